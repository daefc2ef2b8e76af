use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParatransError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("A translation is already in progress")]
    Busy,
}

pub type Result<T> = std::result::Result<T, ParatransError>;

/// Classified failure of a single paragraph translation.
///
/// Only terminal failures are represented here; transient attempt failures
/// (timeouts, HTTP errors, broken streams) are retried inside the client and
/// surface as `NetworkError` or `ServiceOffline` once retries are exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("Translation cancelled")]
    Cancelled,

    #[error("Model \"{model}\" not found")]
    ModelNotFound { model: String },

    #[error("Cannot connect to Ollama. Please make sure Ollama is running.")]
    ServiceOffline,

    #[error("{0}")]
    NetworkError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Cancelled,
    ModelNotFound,
    OllamaOffline,
    NetworkError,
}

impl TranslateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            Self::ServiceOffline => ErrorKind::OllamaOffline,
            Self::NetworkError(_) => ErrorKind::NetworkError,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Message shown next to a failed paragraph.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            "Translation failed".to_string()
        } else {
            message
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_falls_back_when_empty() {
        let err = TranslateError::NetworkError(String::new());
        assert_eq!(err.user_message(), "Translation failed");
        assert_eq!(err.kind(), ErrorKind::NetworkError);
    }

    #[test]
    fn test_model_not_found_message() {
        let err = TranslateError::ModelNotFound { model: "gemma:2b".to_string() };
        assert_eq!(err.user_message(), "Model \"gemma:2b\" not found");
        assert!(!err.is_cancelled());
        assert!(TranslateError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ErrorKind::OllamaOffline).unwrap();
        assert_eq!(json, "\"OLLAMA_OFFLINE\"");
    }
}
