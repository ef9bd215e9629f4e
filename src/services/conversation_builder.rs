use crate::error::ValidationError;
use crate::llm::{ImageData, LlmMessage};
use crate::services::mode_registry::ModeConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior exchange supplied by the client for follow-up questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }
}

/// The ordered message list sent upstream for a single request.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<LlmMessage>,
}

impl Conversation {
    pub fn messages(&self) -> &[LlmMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<LlmMessage> {
        self.messages
    }
}

pub struct ConversationBuilder;

impl ConversationBuilder {
    /// Assemble the upstream conversation.
    ///
    /// Without history the image travels with `question` in a single user
    /// turn. With history, the image is paired with the first history turn's
    /// text, the remaining turns follow verbatim, and `question` is appended
    /// as the final user turn.
    pub fn build(
        mode: &ModeConfig,
        image: Option<ImageData>,
        history: &[ConversationTurn],
        question: &str,
    ) -> Conversation {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(LlmMessage::system(&mode.system_prompt));

        let (opening_text, rest) = match history.split_first() {
            Some((first, rest)) => (first.text.as_str(), rest),
            None => (question, &[][..]),
        };

        let mut opening = LlmMessage::user(opening_text);
        if let Some(image) = image {
            opening = opening.with_image(image);
        }
        messages.push(opening);

        if !history.is_empty() {
            messages.extend(rest.iter().map(|turn| match turn.role {
                TurnRole::User => LlmMessage::user(&turn.text),
                TurnRole::Assistant => LlmMessage::assistant(&turn.text),
            }));
            messages.push(LlmMessage::user(question));
        }

        Conversation { messages }
    }

    /// Parse the client's `history` form field. Blank or `null` means no history.
    pub fn parse_history(raw: Option<&str>) -> Result<Vec<ConversationTurn>, ValidationError> {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(Vec::new());
        };
        let turns: Option<Vec<ConversationTurn>> = serde_json::from_str(raw)
            .map_err(|e| ValidationError::MalformedHistory(e.to_string()))?;
        Ok(turns.unwrap_or_default())
    }
}
