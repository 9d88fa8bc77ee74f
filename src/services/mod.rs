//! Services - Collaborators the dispatcher and voice pipeline call into
//!
//! Each external backend function sits behind a trait so sessions can be
//! driven by fakes in tests and by the HTTP clients in `http` at runtime.

mod http;

#[cfg(test)]
pub mod fakes;

pub use http::{HttpReminderService, HttpSpeechService, HttpTranscriptionService};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::Result;

/// Screen navigation on the device; fire-and-forget
pub trait Navigator: Send + Sync {
    fn open_screen(&self, route: &str, params: &BTreeMap<String, String>);
}

/// Navigator for the development CLI that only reports where it would go
#[derive(Debug, Default, Clone)]
pub struct ConsoleNavigator;

impl Navigator for ConsoleNavigator {
    fn open_screen(&self, route: &str, params: &BTreeMap<String, String>) {
        info!(route, ?params, "Navigating");
        if params.is_empty() {
            println!("  [navigate] {}", route);
        } else {
            let query = params
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join("&");
            println!("  [navigate] {}?{}", route, query);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderRequest {
    pub title: String,
    #[serde(rename = "scheduleAt")]
    pub schedule_at: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderReceipt {
    pub success: bool,
    #[serde(default)]
    pub id: Option<String>,
}

/// Reminder creation endpoint
#[async_trait]
pub trait ReminderService: Send + Sync {
    async fn create_reminder(&self, request: &ReminderRequest) -> Result<ReminderReceipt>;
}

/// A recorded clip to transcribe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInput {
    /// Storage URL or local URI of the recording
    pub uri: String,
    /// Language hint, if the user picked one
    pub language: Option<String>,
}

impl AudioInput {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            language: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub transcript: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Speech-to-text backend
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub text: String,
    pub language: String,
    pub style: String,
}

/// What the device should play
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpeechOutput {
    /// Remote audio rendered by the TTS service
    Audio { url: String },
    /// Speak the text with the on-device synthesizer
    DeviceFallback { text: String, language: String },
}

/// Text-to-speech backend
#[async_trait]
pub trait SpeechService: Send + Sync {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechOutput>;
}
