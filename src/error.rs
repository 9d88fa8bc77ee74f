//! Error types for the Dash runtime
//!
//! Extraction and classification never fail, so everything here describes
//! collaborator failures or broken preconditions.

use thiserror::Error;

/// Main error type for Dash operations
#[derive(Error, Debug)]
pub enum DashError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A turn was submitted for a conversation that was never started
    #[error("No active conversation: {0}")]
    NoActiveConversation(String),

    /// LLM gateway failure after retries were exhausted
    #[error("Gateway error (status {status:?}): {message}")]
    Gateway {
        /// HTTP-style status, absent for transport failures
        status: Option<u16>,
        /// Error body or transport message
        message: String,
    },

    /// Reminder endpoint failure
    #[error("Reminder error: {0}")]
    Reminder(String),

    /// Transcription service failure
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Text-to-speech service failure
    #[error("Speech error: {0}")]
    Speech(String),

    /// Prompt template rendering failure
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used by collaborator clients
pub type Result<T> = std::result::Result<T, DashError>;

impl DashError {
    /// Whether this is the broken-precondition case that must reach the caller
    pub fn is_precondition(&self) -> bool {
        matches!(self, DashError::NoActiveConversation(_))
    }
}
