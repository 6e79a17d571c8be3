use thiserror::Error;

use crate::types::Direction;

#[derive(Debug, Error)]
pub enum SpeechError {
    /// Missing or invalid provider credentials. Never retried.
    #[error("Config error: {0}")]
    Config(String),

    /// Every provider in the priority list failed to establish.
    #[error("No {direction} provider available after {attempts} attempt(s): {last_error}")]
    ProvidersUnavailable {
        direction: Direction,
        attempts: usize,
        last_error: String,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpeechError {
    /// Short machine-readable kind, used for metrics labels and error events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::ProvidersUnavailable { .. } => "providers_unavailable",
            Self::Provider(_) => "provider",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conversion(_) => "conversion",
            Self::Session(_) => "session",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;
