//! In-memory collaborators for tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use super::{
    AudioInput, Navigator, ReminderReceipt, ReminderRequest, ReminderService, SpeechOutput,
    SpeechRequest, SpeechService, Transcript, TranscriptionService,
};
use crate::error::{DashError, Result};
use crate::gateway::{GatewayFailure, GatewayOutcome, GatewayRequest, LlmGateway};

/// Gateway that replays scripted outcomes, repeating the last one
pub struct ScriptedGateway {
    script: Mutex<Vec<GatewayOutcome>>,
    requests: Mutex<Vec<GatewayRequest>>,
    calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn new(script: Vec<GatewayOutcome>) -> Self {
        Self {
            script: Mutex::new(script),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn replying(content: &str) -> Self {
        Self::new(vec![GatewayOutcome::Success {
            content: content.to_string(),
            usage: None,
        }])
    }

    pub fn failing(status: u16) -> Self {
        Self::new(vec![GatewayOutcome::Failure(GatewayFailure::new(
            Some(status),
            "scripted failure",
        ))])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<GatewayRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl LlmGateway for ScriptedGateway {
    async fn complete(&self, request: &GatewayRequest) -> GatewayOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.remove(0)
        } else {
            script[0].clone()
        }
    }
}

pub enum ReminderBehaviour {
    Accept(&'static str),
    Reject,
    Error,
}

pub struct FakeReminders {
    behaviour: ReminderBehaviour,
    requests: Mutex<Vec<ReminderRequest>>,
}

impl FakeReminders {
    pub fn new(behaviour: ReminderBehaviour) -> Self {
        Self {
            behaviour,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ReminderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReminderService for FakeReminders {
    async fn create_reminder(&self, request: &ReminderRequest) -> Result<ReminderReceipt> {
        self.requests.lock().unwrap().push(request.clone());
        match self.behaviour {
            ReminderBehaviour::Accept(id) => Ok(ReminderReceipt {
                success: true,
                id: Some(id.to_string()),
            }),
            ReminderBehaviour::Reject => Ok(ReminderReceipt {
                success: false,
                id: None,
            }),
            ReminderBehaviour::Error => Err(DashError::Reminder("endpoint down".to_string())),
        }
    }
}

/// Navigator that remembers every screen it was asked to open
#[derive(Default)]
pub struct RecordingNavigator {
    opened: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl RecordingNavigator {
    pub fn opened(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.opened.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn open_screen(&self, route: &str, params: &BTreeMap<String, String>) {
        self.opened
            .lock()
            .unwrap()
            .push((route.to_string(), params.clone()));
    }
}

/// Transcriber returning a fixed transcript, or failing when there is none
pub struct FakeTranscriber {
    transcript: Option<Transcript>,
}

impl FakeTranscriber {
    pub fn hearing(text: &str, language: Option<&str>) -> Self {
        Self {
            transcript: Some(Transcript {
                transcript: text.to_string(),
                language: language.map(str::to_string),
                provider: Some("fake".to_string()),
            }),
        }
    }

    pub fn failing() -> Self {
        Self { transcript: None }
    }
}

#[async_trait]
impl TranscriptionService for FakeTranscriber {
    async fn transcribe(&self, _audio: &AudioInput) -> Result<Transcript> {
        self.transcript
            .clone()
            .ok_or_else(|| DashError::Transcription("no speech detected".to_string()))
    }
}

pub struct FakeSpeech {
    fail: bool,
    requests: Mutex<Vec<SpeechRequest>>,
}

impl FakeSpeech {
    pub fn working() -> Self {
        Self {
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SpeechRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechService for FakeSpeech {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<SpeechOutput> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(DashError::Speech("TTS returned 503".to_string()));
        }
        Ok(SpeechOutput::Audio {
            url: "https://tts.test/clip.mp3".to_string(),
        })
    }
}
