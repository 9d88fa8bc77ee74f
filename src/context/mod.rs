//! Context - Conversation sessions and user preferences
//!
//! The session manager owns every live conversation:
//! - A rolling window of recent turns per conversation
//! - The user's role and name for prompt construction
//! - Preference flags (detected language, autonomy level)
//!
//! Each session sits behind its own async mutex. A turn holds that lock from
//! classification until its reply is recorded, so turns of one conversation
//! are applied strictly in arrival order while separate conversations proceed
//! independently.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::DashConfig;
use crate::error::{DashError, Result};
use crate::policy::AutonomyLevel;

const PREFERENCES_FILE: &str = "preferences.json";

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

/// A single conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Request whose screen this assistant turn offered without opening it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ConversationTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
            timestamp: Utc::now(),
            suggestion: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, request: impl Into<String>) -> Self {
        self.suggestion = Some(request.into());
        self
    }
}

/// Request awaiting confirmation, if the latest turn offered a screen
pub fn pending_suggestion(history: &[ConversationTurn]) -> Option<&str> {
    history
        .last()
        .filter(|turn| turn.role == TurnRole::Assistant)
        .and_then(|turn| turn.suggestion.as_deref())
}

/// Role of the signed-in user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Teacher,
    Principal,
    Parent,
    Student,
    Admin,
}

impl UserRole {
    /// Whether the role may open school finance screens
    pub fn can_view_finances(&self) -> bool {
        matches!(self, UserRole::Principal | UserRole::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Teacher => "teacher",
            UserRole::Principal => "principal",
            UserRole::Parent => "parent",
            UserRole::Student => "student",
            UserRole::Admin => "admin",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "teacher" => Ok(UserRole::Teacher),
            "principal" | "principal_admin" => Ok(UserRole::Principal),
            "parent" => Ok(UserRole::Parent),
            "student" | "learner" => Ok(UserRole::Student),
            "admin" | "superadmin" => Ok(UserRole::Admin),
            other => Err(DashError::Config(format!("Unknown user role '{}'", other))),
        }
    }
}

/// Identity attached to a conversation when it starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub role: UserRole,
    pub name: Option<String>,
}

impl UserProfile {
    pub fn new(role: UserRole) -> Self {
        Self { role, name: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// User input for one turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInput {
    pub text: String,
    /// Language tag reported by the keyboard or transcription service
    pub language: Option<String>,
    pub conversation_id: String,
}

impl RawInput {
    pub fn new(conversation_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            conversation_id: conversation_id.into(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

/// Persisted user preference flags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub language: String,
    #[serde(default)]
    pub autonomy: AutonomyLevel,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            autonomy: AutonomyLevel::default(),
        }
    }
}

impl UserPreferences {
    pub async fn load_or_default(path: &str, default_language: &str) -> Result<Self> {
        let file = format!("{}/{}", path, PREFERENCES_FILE);

        if std::path::Path::new(&file).exists() {
            let content = tokio::fs::read_to_string(&file).await?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self {
                language: default_language.to_string(),
                ..Self::default()
            })
        }
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        let file = format!("{}/{}", path, PREFERENCES_FILE);
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&file, content).await?;
        Ok(())
    }
}

/// Everything the dispatcher needs to know about the turn being processed
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub conversation_id: String,
    pub history: Vec<ConversationTurn>,
    pub role: UserRole,
    pub user_name: Option<String>,
    pub language: String,
    pub now: DateTime<FixedOffset>,
}

/// Per-conversation state
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub profile: UserProfile,
    pub preferences: UserPreferences,
    history: VecDeque<ConversationTurn>,
    window: usize,
}

impl Session {
    pub fn new(id: &str, profile: UserProfile, preferences: UserPreferences, window: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            created_at: now,
            last_accessed: now,
            profile,
            preferences,
            history: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Update the last accessed timestamp
    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// Snapshot of the rolling window, oldest first
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history.iter().cloned().collect()
    }

    pub fn turn_count(&self) -> usize {
        self.history.len()
    }

    /// Append a completed exchange, evicting the oldest turns past the window
    ///
    /// `suggestion` is the request whose screen the reply offered; it stays
    /// pending only until the next exchange is recorded.
    pub fn record_exchange(&mut self, user_text: &str, reply: &str, suggestion: Option<&str>) {
        self.touch();
        let mut assistant_turn = ConversationTurn::assistant(reply);
        if let Some(request) = suggestion {
            assistant_turn = assistant_turn.with_suggestion(request);
        }

        self.history.push_back(ConversationTurn::user(user_text));
        self.history.push_back(assistant_turn);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    pub fn turn_context(&self, now: DateTime<FixedOffset>) -> TurnContext {
        TurnContext {
            conversation_id: self.id.clone(),
            history: self.history(),
            role: self.profile.role,
            user_name: self.profile.name.clone(),
            language: self.preferences.language.clone(),
            now,
        }
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Owner of every live conversation
#[derive(Clone)]
pub struct SessionManager {
    data_path: String,
    history_window: usize,
    session_ttl_hours: i64,
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    preferences: Arc<RwLock<UserPreferences>>,
}

impl SessionManager {
    pub async fn new(config: &DashConfig) -> Result<Self> {
        let preferences =
            UserPreferences::load_or_default(&config.data_path, &config.default_language).await?;

        Ok(Self {
            data_path: config.data_path.clone(),
            history_window: config.history_window,
            session_ttl_hours: config.session_ttl_hours,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            preferences: Arc::new(RwLock::new(preferences)),
        })
    }

    /// Start a new conversation and return its id
    pub async fn start_conversation(&self, profile: UserProfile) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let preferences = self.preferences.read().await.clone();
        let session = Session::new(&id, profile, preferences, self.history_window);

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(conversation_id = %id, "Conversation started");
        id
    }

    /// Look up a live conversation; an unknown id is a caller bug
    pub async fn session(&self, conversation_id: &str) -> Result<SharedSession> {
        self.sessions
            .read()
            .await
            .get(conversation_id)
            .cloned()
            .ok_or_else(|| DashError::NoActiveConversation(conversation_id.to_string()))
    }

    pub async fn end_conversation(&self, conversation_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(conversation_id).is_some();
        if removed {
            debug!(conversation_id, "Conversation ended");
        }
        removed
    }

    pub async fn preferences(&self) -> UserPreferences {
        self.preferences.read().await.clone()
    }

    /// Replace and persist the user's preferences
    pub async fn save_preferences(&self, preferences: &UserPreferences) -> Result<()> {
        *self.preferences.write().await = preferences.clone();
        preferences.save(&self.data_path).await
    }

    /// Drop sessions idle for longer than the TTL
    ///
    /// Sessions in the middle of a turn are locked and always kept.
    pub async fn cleanup_stale_sessions(&self, max_age_hours: Option<i64>) -> usize {
        let ttl = Duration::hours(max_age_hours.unwrap_or(self.session_ttl_hours));
        let cutoff = Utc::now() - ttl;

        let mut sessions = self.sessions.write().await;
        let before_count = sessions.len();

        sessions.retain(|_id, session| match session.try_lock() {
            Ok(session) => session.last_accessed > cutoff,
            Err(_) => true,
        });

        let removed = before_count - sessions.len();
        if removed > 0 {
            info!(
                removed_sessions = removed,
                remaining_sessions = sessions.len(),
                "Cleaned up stale sessions"
            );
        }

        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
