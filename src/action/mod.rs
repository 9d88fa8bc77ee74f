//! Action - Turning a classified intent into one concrete action
//!
//! Exactly one `ActionDescriptor` comes out of every turn. `Passthrough` is
//! the safe default whenever the intent is weak, unsupported for the user's
//! role, or missing what it needs (a reminder without a time).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::context::UserRole;
use crate::entities::{EntityKind, ExtractedEntities};
use crate::intent::{Classification, IntentKind};

/// Title used when none can be inferred from the text
pub const DEFAULT_REMINDER_TITLE: &str = "Reminder";

static PARENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:parents?|guardians?|mom|mum|dad|families|family)\b")
        .expect("Invalid parent regex")
});

static TEACHER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:teachers?|staff|principal|educators?|class\s+teacher)\b")
        .expect("Invalid teacher regex")
});

/// Who a composed message goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    Parent,
    Teacher,
}

impl RecipientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientKind::Parent => "parent",
            RecipientKind::Teacher => "teacher",
        }
    }
}

/// The structured decision for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDescriptor {
    /// Navigate to a screen with prefilled parameters
    OpenScreen {
        route: String,
        params: BTreeMap<String, String>,
    },
    /// Schedule a reminder at an absolute time
    CreateReminder {
        title: String,
        #[serde(rename = "whenISO")]
        when_iso: String,
        payload: serde_json::Value,
    },
    /// Open a prefilled message composer
    ComposeMessage {
        #[serde(rename = "recipientKind")]
        recipient_kind: RecipientKind,
        prefill: String,
    },
    /// Defer to the general-purpose LLM
    Passthrough,
}

impl ActionDescriptor {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionDescriptor::OpenScreen { .. } => "open_screen",
            ActionDescriptor::CreateReminder { .. } => "create_reminder",
            ActionDescriptor::ComposeMessage { .. } => "compose_message",
            ActionDescriptor::Passthrough => "passthrough",
        }
    }
}

/// Maps classified intents to actions
#[derive(Debug, Clone)]
pub struct ActionResolver {
    min_confidence: f32,
}

impl ActionResolver {
    pub fn new(min_confidence: f32) -> Self {
        Self { min_confidence }
    }

    /// Resolve one turn; `text` is the original input carried into drafts and payloads
    pub fn resolve(
        &self,
        classification: &Classification,
        entities: &ExtractedEntities,
        role: UserRole,
        text: &str,
    ) -> ActionDescriptor {
        if classification.confidence < self.min_confidence {
            debug!(
                intent = %classification.intent,
                confidence = classification.confidence,
                "Intent below threshold, passing through"
            );
            return ActionDescriptor::Passthrough;
        }

        let action = match classification.intent {
            IntentKind::CreateReminder => match entities.get(EntityKind::DateTime) {
                Some(when) => ActionDescriptor::CreateReminder {
                    title: entities
                        .get(EntityKind::Topic)
                        .unwrap_or(DEFAULT_REMINDER_TITLE)
                        .to_string(),
                    when_iso: when.to_string(),
                    payload: serde_json::json!({
                        "text": text,
                        "source": "dash",
                    }),
                },
                None => ActionDescriptor::Passthrough,
            },
            IntentKind::SendMessage => ActionDescriptor::ComposeMessage {
                recipient_kind: infer_recipient(text, role),
                prefill: text.to_string(),
            },
            IntentKind::OpenFinancialDashboard if !role.can_view_finances() => {
                debug!(%role, "Financial dashboard not available for role");
                ActionDescriptor::Passthrough
            }
            intent => match intent.route() {
                Some(route) => ActionDescriptor::OpenScreen {
                    route: route.to_string(),
                    params: entities.to_params(),
                },
                None => ActionDescriptor::Passthrough,
            },
        };

        // A confirmation only ever opens the screen it was offered
        if classification.is_follow_up() && !matches!(action, ActionDescriptor::OpenScreen { .. }) {
            debug!(action = action.kind(), "Confirmation does not repeat side effects");
            return ActionDescriptor::Passthrough;
        }

        debug!(intent = %classification.intent, action = action.kind(), "Resolved action");
        action
    }
}

/// Recipient named earliest in the text, otherwise the other side of the sender's role
pub fn infer_recipient(text: &str, role: UserRole) -> RecipientKind {
    let parent_at = PARENT_REGEX.find(text).map(|m| m.start());
    let teacher_at = TEACHER_REGEX.find(text).map(|m| m.start());

    match (parent_at, teacher_at) {
        (Some(parent), Some(teacher)) if teacher < parent => RecipientKind::Teacher,
        (Some(_), _) => RecipientKind::Parent,
        (None, Some(_)) => RecipientKind::Teacher,
        (None, None) if role == UserRole::Parent => RecipientKind::Teacher,
        (None, None) => RecipientKind::Parent,
    }
}
