//! HTTP clients for the reminder, transcription and text-to-speech functions

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::debug;

use super::{
    AudioInput, ReminderReceipt, ReminderRequest, ReminderService, SpeechOutput, SpeechRequest,
    SpeechService, Transcript, TranscriptionService,
};
use crate::config::DashConfig;
use crate::error::{DashError, Result};

/// Shared plumbing for the backend functions
#[derive(Clone)]
struct FunctionClient {
    url: String,
    api_key: String,
    http_client: Client,
}

impl FunctionClient {
    fn new(url: &str, config: &DashConfig) -> Result<Self> {
        let http_client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            url: url.to_string(),
            api_key: config.gateway_api_key.clone(),
            http_client,
        })
    }

    fn post(&self) -> RequestBuilder {
        let builder = self.http_client.post(&self.url);
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

#[derive(Clone)]
pub struct HttpReminderService {
    client: FunctionClient,
}

impl HttpReminderService {
    pub fn new(config: &DashConfig) -> Result<Self> {
        Ok(Self {
            client: FunctionClient::new(&config.reminders_url, config)?,
        })
    }
}

#[async_trait]
impl ReminderService for HttpReminderService {
    async fn create_reminder(&self, request: &ReminderRequest) -> Result<ReminderReceipt> {
        debug!(title = %request.title, schedule_at = %request.schedule_at, "Creating reminder");

        let response = self.client.post().json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DashError::Reminder(format!(
                "Reminder endpoint returned {}: {}",
                status, error_text
            )));
        }

        Ok(response.json::<ReminderReceipt>().await?)
    }
}

#[derive(Deserialize)]
struct TranscriptionBody {
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Clone)]
pub struct HttpTranscriptionService {
    client: FunctionClient,
}

impl HttpTranscriptionService {
    pub fn new(config: &DashConfig) -> Result<Self> {
        Ok(Self {
            client: FunctionClient::new(&config.transcription_url, config)?,
        })
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    async fn transcribe(&self, audio: &AudioInput) -> Result<Transcript> {
        let body = serde_json::json!({
            "audioUrl": audio.uri,
            "language": audio.language,
        });

        let response = self.client.post().json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DashError::Transcription(format!(
                "Transcription returned {}: {}",
                status, error_text
            )));
        }

        let body: TranscriptionBody = response.json().await?;
        match (body.transcript, body.error) {
            (Some(transcript), _) => Ok(Transcript {
                transcript,
                language: body.language,
                provider: body.provider,
            }),
            (None, Some(error)) => Err(DashError::Transcription(error)),
            (None, None) => Err(DashError::Transcription(
                "Transcription response had no transcript".to_string(),
            )),
        }
    }
}

#[derive(Deserialize)]
struct SpeechBody {
    #[serde(default, rename = "audioUrl")]
    audio_url: Option<String>,
    #[serde(default)]
    fallback: bool,
}

#[derive(Clone)]
pub struct HttpSpeechService {
    client: FunctionClient,
}

impl HttpSpeechService {
    pub fn new(config: &DashConfig) -> Result<Self> {
        Ok(Self {
            client: FunctionClient::new(&config.tts_url, config)?,
        })
    }
}

#[async_trait]
impl SpeechService for HttpSpeechService {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechOutput> {
        let response = self.client.post().json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DashError::Speech(format!("TTS returned {}", status)));
        }

        let body: SpeechBody = response.json().await?;
        match body.audio_url {
            Some(url) if !body.fallback => Ok(SpeechOutput::Audio { url }),
            _ => Ok(SpeechOutput::DeviceFallback {
                text: request.text.clone(),
                language: request.language.clone(),
            }),
        }
    }
}
