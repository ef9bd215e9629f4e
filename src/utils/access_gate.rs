/// Header carrying the shared access secret.
pub const ACCESS_HEADER: &str = "x-forma-key";

/// Compares presented credentials against the configured access secret.
#[derive(Clone, Debug, Default)]
pub struct AccessGate {
    secret: Option<String>,
}

impl AccessGate {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_protected(&self) -> bool {
        self.secret.is_some()
    }

    /// Always true when no secret is configured.
    pub fn authorized(&self, presented: Option<&str>) -> bool {
        match &self.secret {
            None => true,
            Some(secret) => presented.is_some_and(|p| constant_time_eq(p.as_bytes(), secret.as_bytes())),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_when_no_secret_configured() {
        let gate = AccessGate::new(None);
        assert!(!gate.is_protected());
        assert!(gate.authorized(None));
        assert!(gate.authorized(Some("anything")));

        assert!(AccessGate::new(Some(String::new())).authorized(None));
    }

    #[test]
    fn requires_exact_secret_when_configured() {
        let gate = AccessGate::new(Some("hunter2".to_string()));
        assert!(gate.is_protected());
        assert!(gate.authorized(Some("hunter2")));
        assert!(!gate.authorized(Some("hunter3")));
        assert!(!gate.authorized(Some("hunter")));
        assert!(!gate.authorized(Some("")));
        assert!(!gate.authorized(None));
    }
}
