use crate::session::CallState;
use thiserror::Error;

/// Errors surfaced by call operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Blank display name or target token; surfaced to the user as a prompt
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Session description creation or application failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The signaling connection is unavailable or was lost
    #[error("signaling link error: {0}")]
    Link(String),

    /// Candidate handling on a closed or broken transport
    #[error("transport error: {0}")]
    Transport(String),

    #[error("{operation} is not allowed while {state}")]
    InvalidState {
        operation: &'static str,
        state: CallState,
    },

    /// The intent was invalidated by a hang-up before it completed
    #[error("operation cancelled by hang-up")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CallError>;

impl From<webrtc::Error> for CallError {
    fn from(err: webrtc::Error) -> Self {
        CallError::Negotiation(err.to_string())
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::Link(format!("malformed signaling message: {err}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for CallError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        CallError::Link(err.to_string())
    }
}

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid signaling url: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid config: {0}")]
    Invalid(String),
}
