//! Configuration for the Dash runtime

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::gateway::RetryPolicy;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashConfig {
    /// Product name used in the system prompt
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// LLM gateway function URL
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Bearer key for the backend functions
    #[serde(default)]
    pub gateway_api_key: String,

    /// Model identifier forwarded to the gateway
    #[serde(default = "default_model")]
    pub model: String,

    /// Reminder creation function URL
    #[serde(default = "default_reminders_url")]
    pub reminders_url: String,

    /// Transcription function URL
    #[serde(default = "default_transcription_url")]
    pub transcription_url: String,

    /// Text-to-speech function URL
    #[serde(default = "default_tts_url")]
    pub tts_url: String,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum gateway attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds, doubled per attempt
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay
    #[serde(default = "default_retry_jitter_ms")]
    pub retry_jitter_ms: u64,

    /// Number of turns kept in the rolling history window
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Intents below this confidence become passthrough
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Language used until one is detected
    #[serde(default = "default_language")]
    pub default_language: String,

    /// Idle sessions older than this are dropped
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,

    /// Path to store user preferences
    #[serde(default = "default_data_path")]
    pub data_path: String,
}

fn default_app_name() -> String {
    "EduDash".to_string()
}

fn default_gateway_url() -> String {
    "http://localhost:54321/functions/v1/ai-gateway".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_reminders_url() -> String {
    "http://localhost:54321/functions/v1/create-reminder".to_string()
}

fn default_transcription_url() -> String {
    "http://localhost:54321/functions/v1/transcribe-audio".to_string()
}

fn default_tts_url() -> String {
    "http://localhost:54321/functions/v1/tts-proxy".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_jitter_ms() -> u64 {
    250
}

fn default_history_window() -> usize {
    20
}

fn default_min_confidence() -> f32 {
    0.6
}

fn default_language() -> String {
    "en".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24
}

fn default_data_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("dash").to_string_lossy().to_string())
        .unwrap_or_else(|| "/var/lib/dash".to_string())
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            gateway_url: default_gateway_url(),
            gateway_api_key: String::new(),
            model: default_model(),
            reminders_url: default_reminders_url(),
            transcription_url: default_transcription_url(),
            tts_url: default_tts_url(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_jitter_ms: default_retry_jitter_ms(),
            history_window: default_history_window(),
            min_confidence: default_min_confidence(),
            default_language: default_language(),
            session_ttl_hours: default_session_ttl_hours(),
            data_path: default_data_path(),
        }
    }
}

impl DashConfig {
    /// Load configuration from file, with environment variable overrides
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("DASH_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(key) = std::env::var("DASH_GATEWAY_KEY") {
            config.gateway_api_key = key;
        }
        if let Ok(model) = std::env::var("DASH_MODEL") {
            config.model = model;
        }
        if let Ok(url) = std::env::var("DASH_REMINDERS_URL") {
            config.reminders_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            anyhow::bail!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            );
        }
        if self.history_window == 0 {
            anyhow::bail!("history_window must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Gateway retry policy derived from the retry settings
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_jitter: Duration::from_millis(self.retry_jitter_ms),
        }
    }
}
