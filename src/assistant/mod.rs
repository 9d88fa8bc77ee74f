//! Assistant - The per-turn pipeline
//!
//! A text turn runs classification, entity extraction, action resolution, the
//! auto-execute gate and dispatch while holding its conversation's lock. A
//! voice turn wraps that with transcription before and speech synthesis after.

use chrono::{DateTime, FixedOffset, Local};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::action::{ActionDescriptor, ActionResolver};
use crate::config::DashConfig;
use crate::context::{RawInput, SessionManager, UserProfile};
use crate::dispatcher::{ResponseDispatcher, SideEffect};
use crate::entities::{extract_at, ExtractedEntities};
use crate::error::Result;
use crate::gateway::{HttpGateway, LlmGateway};
use crate::intent::{Classification, IntentClassifier};
use crate::policy::{AutonomyLevel, ExecutionDecision, ExecutionPolicy};
use crate::prompts::FALLBACK_REPLY;
use crate::services::{
    AudioInput, HttpReminderService, HttpSpeechService, HttpTranscriptionService, Navigator,
    ReminderService, SpeechOutput, SpeechRequest, SpeechService, TranscriptionService,
};
use crate::speech::normalize_for_speech;

const SPEECH_STYLE: &str = "friendly";

/// Source of "now" for date phrases and prompts
pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// External collaborators the assistant calls into
pub struct Collaborators {
    pub gateway: Arc<dyn LlmGateway>,
    pub reminders: Arc<dyn ReminderService>,
    pub navigator: Arc<dyn Navigator>,
    pub transcriber: Arc<dyn TranscriptionService>,
    pub speech: Arc<dyn SpeechService>,
}

impl Collaborators {
    /// HTTP clients for every backend function
    pub fn http(config: &DashConfig, navigator: Arc<dyn Navigator>) -> Result<Self> {
        Ok(Self {
            gateway: Arc::new(HttpGateway::new(config)?),
            reminders: Arc::new(HttpReminderService::new(config)?),
            navigator,
            transcriber: Arc::new(HttpTranscriptionService::new(config)?),
            speech: Arc::new(HttpSpeechService::new(config)?),
        })
    }
}

/// Everything that happened in one text turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation_id: String,
    pub classification: Classification,
    pub entities: ExtractedEntities,
    pub action: ActionDescriptor,
    pub decision: ExecutionDecision,
    pub reply: String,
    pub side_effects: Vec<SideEffect>,
    pub used_fallback: bool,
    /// Language the reply should be spoken in
    pub language: String,
}

/// Result of a voice turn
#[derive(Debug, Clone)]
pub struct VoiceOutcome {
    /// Absent when transcription failed and no turn was processed
    pub turn: Option<TurnOutcome>,
    pub reply: String,
    pub speech: SpeechOutput,
}

pub struct Assistant {
    sessions: SessionManager,
    classifier: IntentClassifier,
    resolver: ActionResolver,
    policy: ExecutionPolicy,
    dispatcher: ResponseDispatcher,
    transcriber: Arc<dyn TranscriptionService>,
    speech: Arc<dyn SpeechService>,
    clock: Clock,
}

impl Assistant {
    pub async fn new(config: &DashConfig, collaborators: Collaborators) -> Result<Self> {
        let dispatcher = ResponseDispatcher::new(
            config,
            collaborators.gateway,
            collaborators.reminders,
            collaborators.navigator,
        )?;

        Ok(Self {
            sessions: SessionManager::new(config).await?,
            classifier: IntentClassifier::new(),
            resolver: ActionResolver::new(config.min_confidence),
            policy: ExecutionPolicy::with_defaults(),
            dispatcher,
            transcriber: collaborators.transcriber,
            speech: collaborators.speech,
            clock: Arc::new(local_now),
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn start_conversation(&self, profile: UserProfile) -> String {
        self.sessions.start_conversation(profile).await
    }

    /// Change the autonomy level for a conversation and remember it for new ones
    pub async fn set_autonomy(&self, conversation_id: &str, autonomy: AutonomyLevel) -> Result<()> {
        let shared = self.sessions.session(conversation_id).await?;
        let mut session = shared.lock().await;
        session.preferences.autonomy = autonomy;
        self.sessions.save_preferences(&session.preferences).await
    }

    /// Process one text turn
    ///
    /// The only error is an unknown conversation id; every collaborator
    /// failure is absorbed into the reply.
    #[instrument(
        skip(self, input),
        fields(
            request_id = %uuid::Uuid::new_v4(),
            conversation_id = %input.conversation_id,
            input_len = input.text.len(),
        )
    )]
    pub async fn handle_input(&self, input: RawInput) -> Result<TurnOutcome> {
        let shared = self.sessions.session(&input.conversation_id).await?;
        let mut session = shared.lock().await;
        info!("Processing user input");

        let now = (self.clock)();
        let detected_language = input
            .language
            .as_deref()
            .map(str::trim)
            .filter(|language| !language.is_empty())
            .map(str::to_string);

        let classification = self.classifier.classify(&input.text, &session.history());
        let source_text = classification
            .derived_from
            .clone()
            .unwrap_or_else(|| input.text.clone());
        let entities = extract_at(&source_text, now);
        let action = self.resolver.resolve(
            &classification,
            &entities,
            session.profile.role,
            &source_text,
        );
        let decision = self.policy.evaluate(
            &input.text,
            session.preferences.autonomy,
            classification.is_follow_up(),
        );

        let mut ctx = session.turn_context(now);
        if let Some(language) = &detected_language {
            ctx.language = language.clone();
        }

        let dispatched = self
            .dispatcher
            .dispatch(&action, decision, &input.text, &ctx)
            .await;

        let offered = match (&action, decision) {
            (ActionDescriptor::OpenScreen { .. }, ExecutionDecision::Suggest) => {
                Some(source_text.as_str())
            }
            _ => None,
        };
        session.record_exchange(&input.text, &dispatched.reply, offered);
        if let Some(language) = detected_language {
            if language != session.preferences.language {
                info!(language = %language, "Detected language changed");
                session.preferences.language = language;
                if let Err(e) = self.sessions.save_preferences(&session.preferences).await {
                    warn!(error = %e, "Failed to persist preferences");
                }
            }
        }

        info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            action = action.kind(),
            used_fallback = dispatched.used_fallback,
            "Turn complete"
        );

        Ok(TurnOutcome {
            conversation_id: input.conversation_id,
            classification,
            entities,
            action,
            decision,
            reply: dispatched.reply,
            side_effects: dispatched.side_effects,
            used_fallback: dispatched.used_fallback,
            language: ctx.language,
        })
    }

    /// Transcribe a recording, process it as a turn and prepare the spoken reply
    pub async fn handle_voice(&self, conversation_id: &str, audio: AudioInput) -> Result<VoiceOutcome> {
        let shared = self.sessions.session(conversation_id).await?;
        let fallback_language = shared.lock().await.preferences.language.clone();

        let transcript = match self.transcriber.transcribe(&audio).await {
            Ok(transcript) if !transcript.transcript.trim().is_empty() => transcript,
            Ok(_) => {
                warn!("Transcription was empty");
                return Ok(self.unheard(fallback_language).await);
            }
            Err(e) => {
                warn!(error = %e, "Transcription failed");
                return Ok(self.unheard(fallback_language).await);
            }
        };

        let mut input = RawInput::new(conversation_id, transcript.transcript);
        if let Some(language) = transcript.language.or(audio.language) {
            input = input.with_language(language);
        }

        let turn = self.handle_input(input).await?;
        let speech = self.speak(&turn.reply, &turn.language).await;

        Ok(VoiceOutcome {
            reply: turn.reply.clone(),
            turn: Some(turn),
            speech,
        })
    }

    async fn unheard(&self, language: String) -> VoiceOutcome {
        VoiceOutcome {
            turn: None,
            reply: FALLBACK_REPLY.to_string(),
            speech: self.speak(FALLBACK_REPLY, &language).await,
        }
    }

    /// Synthesize `reply`, falling back to on-device speech
    async fn speak(&self, reply: &str, language: &str) -> SpeechOutput {
        let request = SpeechRequest {
            text: normalize_for_speech(reply, language),
            language: language.to_string(),
            style: SPEECH_STYLE.to_string(),
        };

        match self.speech.synthesize(&request).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed, using device speech");
                SpeechOutput::DeviceFallback {
                    text: request.text,
                    language: request.language,
                }
            }
        }
    }
}

fn local_now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{pending_suggestion, UserRole};
    use crate::dispatcher::COMPOSER_ROUTE;
    use crate::error::DashError;
    use crate::intent::IntentKind;
    use crate::services::fakes::{
        FakeReminders, FakeSpeech, FakeTranscriber, RecordingNavigator, ReminderBehaviour,
        ScriptedGateway,
    };
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    struct Harness {
        assistant: Assistant,
        gateway: Arc<ScriptedGateway>,
        reminders: Arc<FakeReminders>,
        navigator: Arc<RecordingNavigator>,
        speech: Arc<FakeSpeech>,
        _dir: tempfile::TempDir,
    }

    struct Fakes {
        gateway: ScriptedGateway,
        reminders: ReminderBehaviour,
        transcriber: FakeTranscriber,
        speech: FakeSpeech,
    }

    impl Default for Fakes {
        fn default() -> Self {
            Self {
                gateway: ScriptedGateway::replying("Happy to help!"),
                reminders: ReminderBehaviour::Accept("rem-1"),
                transcriber: FakeTranscriber::failing(),
                speech: FakeSpeech::working(),
            }
        }
    }

    fn fixed_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, 14, 30, 0)
            .unwrap()
    }

    async fn harness(fakes: Fakes) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = DashConfig {
            data_path: dir.path().to_string_lossy().to_string(),
            retry_base_delay_ms: 1,
            retry_jitter_ms: 1,
            ..Default::default()
        };

        let gateway = Arc::new(fakes.gateway);
        let reminders = Arc::new(FakeReminders::new(fakes.reminders));
        let navigator = Arc::new(RecordingNavigator::default());
        let speech = Arc::new(fakes.speech);
        let collaborators = Collaborators {
            gateway: gateway.clone(),
            reminders: reminders.clone(),
            navigator: navigator.clone(),
            transcriber: Arc::new(fakes.transcriber),
            speech: speech.clone(),
        };

        let assistant = Assistant::new(&config, collaborators)
            .await
            .unwrap()
            .with_clock(Arc::new(fixed_now));

        Harness {
            assistant,
            gateway,
            reminders,
            navigator,
            speech,
            _dir: dir,
        }
    }

    async fn start(h: &Harness, role: UserRole) -> String {
        h.assistant.start_conversation(UserProfile::new(role)).await
    }

    #[tokio::test]
    async fn test_lesson_request_is_suggested_with_params() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(
                &id,
                "Create a grade 4 math lesson about fractions for 45 minutes",
            ))
            .await
            .unwrap();

        assert_eq!(turn.classification.intent, IntentKind::CreateLesson);
        let expected: BTreeMap<String, String> = [
            ("gradeLevel", "4"),
            ("subject", "Mathematics"),
            ("topic", "fractions"),
            ("duration", "45"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(
            turn.action,
            ActionDescriptor::OpenScreen {
                route: "/screens/ai-lesson-generator".to_string(),
                params: expected,
            }
        );
        assert_eq!(turn.decision, ExecutionDecision::Suggest);
        assert!(h.navigator.opened().is_empty());
        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_confirmation_opens_suggested_screen() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        h.assistant
            .handle_input(RawInput::new(&id, "a grade 5 worksheet on verbs"))
            .await
            .unwrap();
        assert!(h.navigator.opened().is_empty());

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "Yes please"))
            .await
            .unwrap();

        assert_eq!(turn.decision, ExecutionDecision::Execute);
        assert_eq!(turn.reply, "Opening the Worksheet Generator...");
        let opened = h.navigator.opened();
        assert_eq!(opened[0].0, "/screens/worksheet-generator");
        assert_eq!(opened[0].1["gradeLevel"], "5");
        assert_eq!(opened[0].1["topic"], "verbs");
    }

    #[tokio::test]
    async fn test_acknowledging_reminder_does_not_schedule_again() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        h.assistant
            .handle_input(RawInput::new(&id, "remind me tomorrow at 9 to call the parent"))
            .await
            .unwrap();
        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "ok thanks"))
            .await
            .unwrap();

        assert_eq!(turn.classification.intent, IntentKind::GeneralQuery);
        assert_eq!(turn.action, ActionDescriptor::Passthrough);
        assert_eq!(h.reminders.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_acknowledging_opened_screen_does_not_navigate_again() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Principal).await;

        h.assistant
            .handle_input(RawInput::new(&id, "open the financial dashboard"))
            .await
            .unwrap();
        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "ok"))
            .await
            .unwrap();

        assert_eq!(turn.action, ActionDescriptor::Passthrough);
        assert_eq!(h.navigator.opened().len(), 1);
    }

    #[tokio::test]
    async fn test_suggestion_is_consumed_by_confirmation() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        for text in ["a grade 5 worksheet on verbs", "yes", "yes"] {
            h.assistant
                .handle_input(RawInput::new(&id, text))
                .await
                .unwrap();
        }

        assert_eq!(h.navigator.opened().len(), 1);
        let session = h.assistant.sessions().session(&id).await.unwrap();
        let history = session.lock().await.history();
        assert_eq!(pending_suggestion(&history), None);
    }

    #[tokio::test]
    async fn test_reminder_scheduled_for_tomorrow_morning() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "remind me tomorrow at 9 to call the parent"))
            .await
            .unwrap();

        match &turn.action {
            ActionDescriptor::CreateReminder { title, when_iso, .. } => {
                assert_eq!(title, "Reminder");
                assert_eq!(when_iso, "2026-10-17T09:00:00+02:00");
            }
            other => panic!("Expected CreateReminder, got {:?}", other),
        }
        assert_eq!(turn.reply, "Done! I'll remind you tomorrow at 09:00.");
        assert_eq!(h.reminders.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_reminder_failure_still_completes_turn() {
        let h = harness(Fakes {
            reminders: ReminderBehaviour::Error,
            gateway: ScriptedGateway::replying("I can't set reminders right now."),
            ..Default::default()
        })
        .await;
        let id = start(&h, UserRole::Teacher).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "remind me tomorrow at 9 to call the parent"))
            .await
            .unwrap();

        assert_eq!(
            turn.reply,
            "I couldn't save that reminder. I can't set reminders right now."
        );
        assert!(turn.side_effects.is_empty());
        let session = h.assistant.sessions().session(&id).await.unwrap();
        assert_eq!(session.lock().await.turn_count(), 2);
    }

    #[tokio::test]
    async fn test_general_query_goes_to_gateway() {
        let h = harness(Fakes {
            gateway: ScriptedGateway::replying("I can't check the weather, but I can help with lessons."),
            ..Default::default()
        })
        .await;
        let id = start(&h, UserRole::Teacher).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "what's the weather like"))
            .await
            .unwrap();

        assert_eq!(turn.classification.intent, IntentKind::GeneralQuery);
        assert_eq!(turn.action, ActionDescriptor::Passthrough);
        assert_eq!(turn.reply, "I can't check the weather, but I can help with lessons.");
        assert_eq!(h.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_financial_dashboard_opens_for_principal() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Principal).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "open the financial dashboard"))
            .await
            .unwrap();

        assert_eq!(turn.decision, ExecutionDecision::Execute);
        assert_eq!(turn.reply, "Opening the Financial Dashboard...");
        assert_eq!(h.navigator.opened()[0].0, "/screens/financial-dashboard");
    }

    #[tokio::test]
    async fn test_financial_dashboard_passes_through_for_teacher() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "open the financial dashboard"))
            .await
            .unwrap();

        assert_eq!(turn.action, ActionDescriptor::Passthrough);
        assert!(h.navigator.opened().is_empty());
    }

    #[tokio::test]
    async fn test_message_opens_composer() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        h.assistant
            .handle_input(RawInput::new(&id, "send a message to the parents about the trip"))
            .await
            .unwrap();

        assert_eq!(h.navigator.opened()[0].0, COMPOSER_ROUTE);
    }

    #[tokio::test]
    async fn test_rate_limited_gateway_gives_fallback_reply() {
        let h = harness(Fakes {
            gateway: ScriptedGateway::failing(429),
            ..Default::default()
        })
        .await;
        let id = start(&h, UserRole::Teacher).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "tell me a joke"))
            .await
            .unwrap();

        assert_eq!(h.gateway.calls(), 3);
        assert_eq!(turn.reply, FALLBACK_REPLY);
        assert!(turn.used_fallback);
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_an_error() {
        let h = harness(Fakes::default()).await;
        let result = h.assistant.handle_input(RawInput::new("nope", "hello")).await;
        assert!(matches!(result, Err(DashError::NoActiveConversation(_))));
    }

    #[tokio::test]
    async fn test_expired_conversation_is_a_precondition_error() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;
        h.assistant.sessions().end_conversation(&id).await;

        let text_error = h
            .assistant
            .handle_input(RawInput::new(&id, "hello"))
            .await
            .unwrap_err();
        assert!(text_error.is_precondition());

        let voice_error = h
            .assistant
            .handle_voice(&id, AudioInput::new("https://audio.test/clip.m4a"))
            .await
            .unwrap_err();
        assert!(voice_error.is_precondition());
    }

    #[tokio::test]
    async fn test_history_is_sent_on_later_turns() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        for text in ["hello", "tell me a joke"] {
            h.assistant
                .handle_input(RawInput::new(&id, text))
                .await
                .unwrap();
        }

        let request = h.gateway.last_request().unwrap();
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "Happy to help!", "tell me a joke"]);
    }

    #[tokio::test]
    async fn test_detected_language_is_persisted() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Parent).await;

        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "hallo").with_language("af"))
            .await
            .unwrap();

        assert_eq!(turn.language, "af");
        assert_eq!(h.assistant.sessions().preferences().await.language, "af");
        assert!(h.gateway.last_request().unwrap().context.contains("Reply in Afrikaans"));
    }

    #[tokio::test]
    async fn test_autonomy_setting_changes_policy() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        h.assistant
            .set_autonomy(&id, AutonomyLevel::Autonomous)
            .await
            .unwrap();
        let turn = h
            .assistant
            .handle_input(RawInput::new(&id, "a grade 5 worksheet on verbs"))
            .await
            .unwrap();

        assert_eq!(turn.decision, ExecutionDecision::Execute);
        assert_eq!(h.navigator.opened().len(), 1);
        assert_eq!(
            h.assistant.sessions().preferences().await.autonomy,
            AutonomyLevel::Autonomous
        );
    }

    #[tokio::test]
    async fn test_voice_turn_speaks_normalised_reply() {
        let h = harness(Fakes {
            transcriber: FakeTranscriber::hearing("what are the school fees", Some("en")),
            gateway: ScriptedGateway::replying("Fees are **R1,250.50** per term."),
            ..Default::default()
        })
        .await;
        let id = start(&h, UserRole::Parent).await;

        let outcome = h
            .assistant
            .handle_voice(&id, AudioInput::new("file:///clip.m4a"))
            .await
            .unwrap();

        assert_eq!(outcome.reply, "Fees are **R1,250.50** per term.");
        assert_eq!(
            outcome.speech,
            SpeechOutput::Audio {
                url: "https://tts.test/clip.mp3".to_string()
            }
        );
        assert_eq!(
            h.speech.requests()[0].text,
            "Fees are one thousand two hundred and fifty rand and fifty cents per term."
        );
    }

    #[tokio::test]
    async fn test_voice_falls_back_to_device_speech() {
        let h = harness(Fakes {
            transcriber: FakeTranscriber::hearing("hello", Some("zu")),
            speech: FakeSpeech::failing(),
            ..Default::default()
        })
        .await;
        let id = start(&h, UserRole::Parent).await;

        let outcome = h
            .assistant
            .handle_voice(&id, AudioInput::new("file:///clip.m4a"))
            .await
            .unwrap();

        assert_eq!(
            outcome.speech,
            SpeechOutput::DeviceFallback {
                text: "Happy to help!".to_string(),
                language: "zu".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_transcription_apologises_without_a_turn() {
        let h = harness(Fakes::default()).await;
        let id = start(&h, UserRole::Teacher).await;

        let outcome = h
            .assistant
            .handle_voice(&id, AudioInput::new("file:///clip.m4a"))
            .await
            .unwrap();

        assert!(outcome.turn.is_none());
        assert_eq!(outcome.reply, FALLBACK_REPLY);
        assert_eq!(h.gateway.calls(), 0);
        let session = h.assistant.sessions().session(&id).await.unwrap();
        assert_eq!(session.lock().await.turn_count(), 0);
    }
}
