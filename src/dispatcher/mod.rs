//! Dispatcher - Carrying out the resolved action and composing the reply
//!
//! Dispatch never fails. Collaborator errors are logged here and turned into
//! either a general LLM answer (failed reminders) or the short fallback reply.

use chrono::DateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::action::{ActionDescriptor, RecipientKind};
use crate::config::DashConfig;
use crate::context::TurnContext;
use crate::error::{DashError, Result};
use crate::gateway::{GatewayMessage, GatewayOutcome, GatewayRequest, LlmGateway, RetryPolicy};
use crate::intent::screen_name;
use crate::policy::ExecutionDecision;
use crate::prompts::{self, PromptBuilder, FALLBACK_REPLY};
use crate::services::{Navigator, ReminderRequest, ReminderService};

/// Screen hosting the message composer
pub const COMPOSER_ROUTE: &str = "/screens/compose-message";

/// Something the turn changed outside the conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    Navigated { route: String },
    ReminderCreated { id: Option<String> },
    ComposerOpened { recipient: RecipientKind },
}

/// Reply and side effects of one dispatched action
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub reply: String,
    pub side_effects: Vec<SideEffect>,
    /// Set when the reply is the apology shown after a collaborator failure
    pub used_fallback: bool,
}

impl DispatchOutcome {
    fn reply(reply: String) -> Self {
        Self {
            reply,
            side_effects: Vec::new(),
            used_fallback: false,
        }
    }

    fn with_effect(reply: String, effect: SideEffect) -> Self {
        Self {
            reply,
            side_effects: vec![effect],
            used_fallback: false,
        }
    }

    fn fallback() -> Self {
        Self {
            reply: FALLBACK_REPLY.to_string(),
            side_effects: Vec::new(),
            used_fallback: true,
        }
    }
}

pub struct ResponseDispatcher {
    gateway: Arc<dyn LlmGateway>,
    reminders: Arc<dyn ReminderService>,
    navigator: Arc<dyn Navigator>,
    retry: RetryPolicy,
    model: String,
    prompts: PromptBuilder,
}

impl ResponseDispatcher {
    pub fn new(
        config: &DashConfig,
        gateway: Arc<dyn LlmGateway>,
        reminders: Arc<dyn ReminderService>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        Ok(Self {
            gateway,
            reminders,
            navigator,
            retry: config.retry_policy(),
            model: config.model.clone(),
            prompts: PromptBuilder::new(&config.app_name)?,
        })
    }

    /// Execute `action` for one turn; the first matching arm wins
    pub async fn dispatch(
        &self,
        action: &ActionDescriptor,
        decision: ExecutionDecision,
        text: &str,
        ctx: &TurnContext,
    ) -> DispatchOutcome {
        debug!(action = action.kind(), ?decision, "Dispatching action");

        match (action, decision) {
            (ActionDescriptor::OpenScreen { route, params }, ExecutionDecision::Execute) => {
                self.open_screen(route, params)
            }
            (ActionDescriptor::OpenScreen { route, params }, ExecutionDecision::Suggest) => {
                DispatchOutcome::reply(prompts::screen_suggestion(display_name(route), params))
            }
            (
                ActionDescriptor::CreateReminder {
                    title,
                    when_iso,
                    payload,
                },
                _,
            ) => match self.create_reminder(title, when_iso, payload, ctx).await {
                Some(outcome) => outcome,
                None => self.reminder_not_saved(text, ctx).await,
            },
            (
                ActionDescriptor::ComposeMessage {
                    recipient_kind,
                    prefill,
                },
                _,
            ) => self.open_composer(*recipient_kind, prefill),
            (ActionDescriptor::Passthrough, _) => self.ask_llm(text, ctx).await,
        }
    }

    fn open_screen(&self, route: &str, params: &BTreeMap<String, String>) -> DispatchOutcome {
        self.navigator.open_screen(route, params);
        info!(route, "Opened screen");

        DispatchOutcome::with_effect(
            prompts::opening_confirmation(display_name(route)),
            SideEffect::Navigated {
                route: route.to_string(),
            },
        )
    }

    fn open_composer(&self, recipient: RecipientKind, prefill: &str) -> DispatchOutcome {
        let params = BTreeMap::from([
            ("recipientKind".to_string(), recipient.as_str().to_string()),
            ("prefill".to_string(), prefill.to_string()),
        ]);
        self.navigator.open_screen(COMPOSER_ROUTE, &params);
        info!(recipient = recipient.as_str(), "Opened message composer");

        DispatchOutcome::with_effect(
            prompts::composer_reply(recipient),
            SideEffect::ComposerOpened { recipient },
        )
    }

    /// `None` when the reminder could not be created
    async fn create_reminder(
        &self,
        title: &str,
        when_iso: &str,
        payload: &serde_json::Value,
        ctx: &TurnContext,
    ) -> Option<DispatchOutcome> {
        let request = ReminderRequest {
            title: title.to_string(),
            schedule_at: when_iso.to_string(),
            payload: payload.clone(),
        };

        let receipt = match self.reminders.create_reminder(&request).await {
            Ok(receipt) if receipt.success => receipt,
            Ok(_) => {
                warn!(schedule_at = when_iso, "Reminder endpoint declined the reminder");
                return None;
            }
            Err(e) => {
                warn!(error = %e, schedule_at = when_iso, "Failed to create reminder");
                return None;
            }
        };

        info!(id = ?receipt.id, schedule_at = when_iso, "Reminder created");
        let reply = match DateTime::parse_from_rfc3339(when_iso) {
            Ok(when) => prompts::reminder_confirmation(title, &when, &ctx.now),
            Err(_) => format!("Done! I'll remind you at {}.", when_iso),
        };

        Some(DispatchOutcome::with_effect(
            reply,
            SideEffect::ReminderCreated { id: receipt.id },
        ))
    }

    /// LLM answer for a reminder that was never saved, led by an explicit notice
    async fn reminder_not_saved(&self, text: &str, ctx: &TurnContext) -> DispatchOutcome {
        let mut outcome = self
            .ask_llm_with_note(text, ctx, Some(prompts::REMINDER_NOT_SAVED_NOTE))
            .await;
        outcome.reply = format!("{} {}", prompts::REMINDER_NOT_SAVED_REPLY, outcome.reply);
        outcome
    }

    /// General LLM answer with the conversation window as context
    async fn ask_llm(&self, text: &str, ctx: &TurnContext) -> DispatchOutcome {
        self.ask_llm_with_note(text, ctx, None).await
    }

    async fn ask_llm_with_note(
        &self,
        text: &str,
        ctx: &TurnContext,
        note: Option<&str>,
    ) -> DispatchOutcome {
        let mut messages: Vec<GatewayMessage> = ctx
            .history
            .iter()
            .map(|turn| GatewayMessage::new(turn.role.as_str(), turn.text.as_str()))
            .collect();
        messages.push(GatewayMessage::new("user", text));

        let mut context = self.prompts.system_prompt_or_minimal(ctx);
        if let Some(note) = note {
            context.push_str("\n\n");
            context.push_str(note);
        }

        let request = GatewayRequest {
            messages,
            context,
            model: self.model.clone(),
        };

        match self.retry.complete(self.gateway.as_ref(), &request).await {
            GatewayOutcome::Success { content, usage } => {
                debug!(?usage, "Gateway reply received");
                match prompts::post_process(&content) {
                    Some(reply) => DispatchOutcome::reply(reply),
                    None => {
                        warn!("Gateway returned an empty reply");
                        DispatchOutcome::fallback()
                    }
                }
            }
            GatewayOutcome::Failure(failure) => {
                let error = DashError::Gateway {
                    status: failure.status,
                    message: failure.message,
                };
                error!(error = %error, "LLM gateway call failed");
                DispatchOutcome::fallback()
            }
        }
    }
}

fn display_name(route: &str) -> &str {
    screen_name(route).unwrap_or(route)
}
