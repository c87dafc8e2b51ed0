use serde::Serialize;
use thiserror::Error;

/// Why a control request could not be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeErrorKind {
    /// The message is absent or not a JSON object.
    NotAnObject,
    /// A field is present but has the wrong JSON type.
    InvalidElement,
    /// A required field is absent.
    MissingElement,
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Plugin not ready: {0}")]
    NotReady(String),

    #[error("No session associated with this handle")]
    NoSession,

    #[error("{cause}")]
    InvalidRequestShape { kind: ShapeErrorKind, cause: String },

    #[error("Unknown request '{0}'")]
    UnknownRequest(String),

    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),

    #[error("Pipeline construction failed: {0}")]
    PipelineConstruction(String),

    #[error("Live streaming hasn't been started")]
    NotStreaming,

    #[error("Live streaming is already running")]
    AlreadyStreaming,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn missing_element(field: &str) -> Self {
        Self::InvalidRequestShape {
            kind: ShapeErrorKind::MissingElement,
            cause: format!("Missing mandatory element ({field})"),
        }
    }

    pub fn invalid_element(field: &str, expected: &str) -> Self {
        Self::InvalidRequestShape {
            kind: ShapeErrorKind::InvalidElement,
            cause: format!("Invalid element type ({field} should be {expected})"),
        }
    }

    pub fn not_an_object(cause: impl Into<String>) -> Self {
        Self::InvalidRequestShape {
            kind: ShapeErrorKind::NotAnObject,
            cause: cause.into(),
        }
    }

    /// Stable numeric code reported to the host alongside the cause.
    #[must_use]
    pub const fn code(&self) -> u16 {
        match self {
            Self::InvalidRequestShape { kind, .. } => match kind {
                ShapeErrorKind::NotAnObject => 411,
                ShapeErrorKind::InvalidElement => 412,
                ShapeErrorKind::MissingElement => 413,
            },
            Self::UnknownRequest(_) => 414,
            Self::InvalidUrl(_) => 415,
            Self::PipelineConstruction(_) => 416,
            Self::NotStreaming => 417,
            Self::AlreadyStreaming => 418,
            Self::NotReady(_) => 480,
            Self::NoSession => 481,
            Self::Internal(_) => 499,
        }
    }

    #[must_use]
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error_code: self.code(),
            error: self.to_string(),
        }
    }
}

/// Error object returned to the host in place of a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error_code: u16,
    pub error: String,
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            RelayError::not_an_object("x"),
            RelayError::invalid_element("url", "a string"),
            RelayError::missing_element("url"),
            RelayError::UnknownRequest("pause".to_string()),
            RelayError::InvalidUrl("http://x".to_string()),
            RelayError::PipelineConstruction("no rtmpsink".to_string()),
            RelayError::NotStreaming,
            RelayError::AlreadyStreaming,
            RelayError::NotReady("Shutting down".to_string()),
            RelayError::NoSession,
            RelayError::Internal("io".to_string()),
        ];
        let mut codes: Vec<u16> = errors.iter().map(RelayError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_error_body_carries_cause() {
        let body = RelayError::missing_element("request").to_body();
        assert_eq!(body.error_code, 413);
        assert_eq!(body.error, "Missing mandatory element (request)");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error_code"], 413);
    }
}
