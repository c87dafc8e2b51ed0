use serde::Serialize;
use std::fmt;

/// Streaming state of one session
///
/// `Idle` on creation, `Streaming` while a relay pipeline runs, `Stopped`
/// after it has been torn down. A stopped session may stream again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Streaming,
    Stopped,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Stopped => "stopped",
        }
    }

    #[must_use]
    pub const fn is_streaming(self) -> bool {
        matches!(self, Self::Streaming)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_value(SessionState::Streaming).unwrap(), "streaming");
        assert_eq!(SessionState::Stopped.to_string(), "stopped");
        assert!(!SessionState::Idle.is_streaming());
    }
}
