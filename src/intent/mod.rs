//! Intent - Classifying what the user wants from free text
//!
//! Classification walks a fixed, ordered rule table. Each rule carries a
//! static confidence; the highest-confidence matching rule is the primary
//! intent and earlier rules win ties. When nothing matches the input is a
//! general query for the LLM.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::context::{pending_suggestion, ConversationTurn};

/// Confidence reported for the general-query fallback
pub const FALLBACK_CONFIDENCE: f32 = 0.5;

static AFFIRMATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:yes|yeah|yep|sure|ok(?:ay)?|please|go ahead|do it|open it|let'?s do it|sounds good)(?:\s*,?\s*(?:please|thanks|thank you))?[.!]*$",
    )
    .expect("Invalid affirmation regex")
});

/// The closed set of intents the router acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    CreateLesson,
    GenerateWorksheet,
    CreateAssessment,
    OpenFinancialDashboard,
    ViewReports,
    OpenAttendance,
    OpenTimetable,
    SendMessage,
    CreateReminder,
    GeneralQuery,
}

/// Screen route and display name for each navigation intent
const SCREENS: &[(IntentKind, &str, &str)] = &[
    (IntentKind::CreateLesson, "/screens/ai-lesson-generator", "Lesson Generator"),
    (IntentKind::GenerateWorksheet, "/screens/worksheet-generator", "Worksheet Generator"),
    (IntentKind::CreateAssessment, "/screens/exam-generator", "Exam Generator"),
    (IntentKind::OpenFinancialDashboard, "/screens/financial-dashboard", "Financial Dashboard"),
    (IntentKind::ViewReports, "/screens/reports", "Reports"),
    (IntentKind::OpenAttendance, "/screens/attendance", "Attendance Register"),
    (IntentKind::OpenTimetable, "/screens/timetable", "Timetable"),
];

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::CreateLesson => "create_lesson",
            IntentKind::GenerateWorksheet => "generate_worksheet",
            IntentKind::CreateAssessment => "create_assessment",
            IntentKind::OpenFinancialDashboard => "open_financial_dashboard",
            IntentKind::ViewReports => "view_reports",
            IntentKind::OpenAttendance => "open_attendance",
            IntentKind::OpenTimetable => "open_timetable",
            IntentKind::SendMessage => "send_message",
            IntentKind::CreateReminder => "create_reminder",
            IntentKind::GeneralQuery => "general_query",
        }
    }

    /// Route for navigation intents
    pub fn route(&self) -> Option<&'static str> {
        SCREENS
            .iter()
            .find(|(kind, _, _)| kind == self)
            .map(|(_, route, _)| *route)
    }

    pub fn is_navigation(&self) -> bool {
        self.route().is_some()
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-readable name of a screen route
pub fn screen_name(route: &str) -> Option<&'static str> {
    SCREENS
        .iter()
        .find(|(_, screen_route, _)| *screen_route == route)
        .map(|(_, _, name)| *name)
}

/// Every known screen as (route, name), for prompt construction
pub fn known_screens() -> impl Iterator<Item = (&'static str, &'static str)> {
    SCREENS.iter().map(|(_, route, name)| (*route, *name))
}

/// An intent with its static confidence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredIntent {
    pub intent: IntentKind,
    pub confidence: f32,
}

/// Result of classifying one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub intent: IntentKind,
    pub confidence: f32,
    /// Other matching intents, best first
    pub secondary: Vec<ScoredIntent>,
    /// Earlier user text this classification was taken from, for confirmations
    pub derived_from: Option<String>,
}

impl Classification {
    pub fn fallback() -> Self {
        Self {
            intent: IntentKind::GeneralQuery,
            confidence: FALLBACK_CONFIDENCE,
            secondary: Vec::new(),
            derived_from: None,
        }
    }

    pub fn is_follow_up(&self) -> bool {
        self.derived_from.is_some()
    }
}

struct IntentRule {
    intent: IntentKind,
    patterns: Vec<Regex>,
    confidence: f32,
}

impl IntentRule {
    fn new(intent: IntentKind, patterns: &[&str], confidence: f32) -> Self {
        Self {
            intent,
            patterns: patterns
                .iter()
                .map(|pattern| Regex::new(pattern).expect("Invalid intent regex"))
                .collect(),
            confidence,
        }
    }

    fn matches(&self, lower: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(lower))
    }
}

/// Rule-table intent classifier
pub struct IntentClassifier {
    rules: Vec<IntentRule>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    /// Build the classifier with the fixed rule table; order is tie-break priority
    pub fn new() -> Self {
        Self {
            rules: vec![
                IntentRule::new(
                    IntentKind::CreateReminder,
                    &[r"\bremind(?:er|ers)?\b", r"\bdon'?t let me forget\b"],
                    0.9,
                ),
                IntentRule::new(
                    IntentKind::OpenFinancialDashboard,
                    &[
                        r"\bfinanc(?:e|es|ial)\b",
                        r"\b(?:school\s+)?fees?\b",
                        r"\b(?:budget|revenue|expenses?|invoices?|petty\s+cash)\b",
                    ],
                    0.9,
                ),
                IntentRule::new(
                    IntentKind::GenerateWorksheet,
                    &[r"\bworksheets?\b", r"\b(?:homework|activity)\s+sheets?\b"],
                    0.85,
                ),
                IntentRule::new(
                    IntentKind::CreateLesson,
                    &[
                        r"\blesson\s+plans?\b",
                        r"\b(?:create|make|plan|generate|build|prepare|design|write)\b.*\blessons?\b",
                        r"\bteach(?:ing)?\b.*\blessons?\b",
                    ],
                    0.85,
                ),
                IntentRule::new(
                    IntentKind::SendMessage,
                    &[
                        r"\b(?:send|write|draft|compose)\b.*\b(?:message|note|email|sms|whatsapp|announcement)\b",
                        r"\b(?:message|text|contact|notify)\s+(?:the\s+|all\s+|my\s+)?(?:parents?|teachers?|staff|guardians?)\b",
                    ],
                    0.85,
                ),
                IntentRule::new(
                    IntentKind::CreateAssessment,
                    &[
                        r"\b(?:quiz|quizzes|exams?|assessments?|tests?)\b.*\b(?:create|make|generate|set|build)\b",
                        r"\b(?:create|make|generate|set|build)\b.*\b(?:quiz|quizzes|exams?|assessments?|tests?)\b",
                    ],
                    0.8,
                ),
                IntentRule::new(
                    IntentKind::OpenAttendance,
                    &[r"\battendance\b", r"\b(?:absent|absentees|class\s+register)\b"],
                    0.8,
                ),
                IntentRule::new(
                    IntentKind::ViewReports,
                    &[
                        r"\breports?\b",
                        r"\bprogress\b.*\b(?:students?|learners?|child|children|class)\b",
                        r"\b(?:marks|results|report\s+cards?)\b",
                    ],
                    0.75,
                ),
                IntentRule::new(
                    IntentKind::OpenTimetable,
                    &[r"\btime\s*tables?\b", r"\bclass\s+schedule\b"],
                    0.7,
                ),
            ],
        }
    }

    /// Classify `text`, consulting `history` only to resolve short confirmations
    ///
    /// A confirmation inherits an intent only when the latest assistant turn
    /// offered a screen; a bare "ok" after anything else is a general query.
    pub fn classify(&self, text: &str, history: &[ConversationTurn]) -> Classification {
        let direct = self.classify_text(text);
        if direct.intent != IntentKind::GeneralQuery {
            debug!(intent = %direct.intent, confidence = direct.confidence, "Classified input");
            return direct;
        }

        if AFFIRMATION_REGEX.is_match(text.trim()) {
            if let Some(suggested) = pending_suggestion(history) {
                let mut inherited = self.classify_text(suggested);
                if inherited.intent.is_navigation() {
                    debug!(intent = %inherited.intent, "Confirmation accepts suggested screen");
                    inherited.derived_from = Some(suggested.to_string());
                    return inherited;
                }
            }
        }

        direct
    }

    fn classify_text(&self, text: &str) -> Classification {
        let lower = text.to_lowercase();
        let matched: Vec<ScoredIntent> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(&lower))
            .map(|rule| ScoredIntent {
                intent: rule.intent,
                confidence: rule.confidence,
            })
            .collect();

        let Some(primary_index) = matched
            .iter()
            .enumerate()
            .fold(None, |best: Option<usize>, (index, candidate)| match best {
                Some(best) if matched[best].confidence >= candidate.confidence => Some(best),
                _ => Some(index),
            })
        else {
            return Classification::fallback();
        };

        let primary = matched[primary_index];
        let mut secondary: Vec<ScoredIntent> = matched
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != primary_index)
            .map(|(_, scored)| *scored)
            .collect();
        // Stable sort keeps table order among equal confidences
        secondary.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        Classification {
            intent: primary.intent,
            confidence: primary.confidence,
            secondary,
            derived_from: None,
        }
    }
}
