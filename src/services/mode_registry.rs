use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const BASE_PROMPT: &str = "You are Forma, a spatial reasoning AI. When given an image and a question, \
you analyze the spatial relationships, geometry, dimensions, and physical structure in the image.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Quick,
    Deep,
    Expert,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Quick, Mode::Deep, Mode::Expert];

    /// Parse a client-supplied mode identifier. Case and surrounding
    /// whitespace are ignored.
    pub fn parse(mode_id: &str) -> Option<Self> {
        match mode_id.trim().to_ascii_lowercase().as_str() {
            "quick" => Some(Mode::Quick),
            "deep" => Some(Mode::Deep),
            "expert" => Some(Mode::Expert),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Quick => "quick",
            Mode::Deep => "deep",
            Mode::Expert => "expert",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeConfig {
    pub name: Mode,
    pub system_prompt: String,
    pub max_output_tokens: u32,
}

/// Static lookup from mode to system instruction and output budget.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    modes: HashMap<Mode, ModeConfig>,
}

impl ModeRegistry {
    pub const FALLBACK: Mode = Mode::Deep;

    pub fn new() -> Self {
        let modes = Mode::ALL
            .into_iter()
            .map(|mode| (mode, Self::builtin(mode)))
            .collect();
        Self { modes }
    }

    /// Resolve a mode identifier. Unknown or empty identifiers fall back to `deep`.
    pub fn resolve(&self, mode_id: &str) -> &ModeConfig {
        let mode = Mode::parse(mode_id).unwrap_or(Self::FALLBACK);
        self.get(mode)
    }

    pub fn get(&self, mode: Mode) -> &ModeConfig {
        &self.modes[&mode]
    }

    fn builtin(mode: Mode) -> ModeConfig {
        let (instructions, max_output_tokens) = match mode {
            Mode::Quick => (
                "Answer concisely in at most three numbered steps, then state the answer. \
                 Keep the spatial reasoning brief but visible.",
                600,
            ),
            Mode::Deep => (
                "Always respond with numbered steps that walk through your reasoning. \
                 Be clear, educational, and precise. Never just give the final answer; \
                 always show the spatial thinking behind it.",
                1500,
            ),
            Mode::Expert => (
                "Respond as a structural and geometric analyst. Use numbered steps, state \
                 every assumption and estimated measurement with units, cite the visual \
                 evidence for each step, and finish with the answer and its uncertainty.",
                3000,
            ),
        };

        ModeConfig {
            name: mode,
            system_prompt: format!("{} {}", BASE_PROMPT, instructions),
            max_output_tokens,
        }
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_modes() {
        let registry = ModeRegistry::new();
        assert_eq!(registry.resolve("quick").name, Mode::Quick);
        assert_eq!(registry.resolve("deep").name, Mode::Deep);
        assert_eq!(registry.resolve("expert").name, Mode::Expert);
        assert_eq!(registry.resolve(" EXPERT ").name, Mode::Expert);
    }

    #[test]
    fn unknown_and_empty_fall_back_to_deep() {
        let registry = ModeRegistry::new();
        assert_eq!(registry.resolve("").name, Mode::Deep);
        assert_eq!(registry.resolve("turbo").name, Mode::Deep);
    }

    #[test]
    fn budgets_grow_with_depth() {
        let registry = ModeRegistry::new();
        let quick = registry.get(Mode::Quick).max_output_tokens;
        let deep = registry.get(Mode::Deep).max_output_tokens;
        let expert = registry.get(Mode::Expert).max_output_tokens;
        assert!(quick < deep && deep < expert);
        assert_eq!(deep, 1500);
    }

    #[test]
    fn every_prompt_carries_the_base_instruction() {
        let registry = ModeRegistry::new();
        for mode in Mode::ALL {
            assert!(registry.get(mode).system_prompt.starts_with("You are Forma"));
        }
    }
}
