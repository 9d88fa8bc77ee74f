//! Policy Layer - Auto-execute decisions for navigation actions
//!
//! A resolved screen action either fires immediately or is only offered in
//! the reply. The decision is binary and made from explicit go-words in the
//! user's text, overridden by the user's autonomy preference.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How much the assistant may do without an explicit instruction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyLevel {
    /// Never navigate on the user's behalf, always suggest
    Manual,
    /// Navigate only when the text asks for it
    #[default]
    Balanced,
    /// Navigate whenever a screen action is resolved
    Autonomous,
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(AutonomyLevel::Manual),
            "balanced" => Ok(AutonomyLevel::Balanced),
            "autonomous" | "auto" => Ok(AutonomyLevel::Autonomous),
            other => Err(format!("Unknown autonomy level '{}'", other)),
        }
    }
}

/// Outcome of the auto-execute gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionDecision {
    /// Perform the action now
    Execute,
    /// Mention the action in the reply only
    Suggest,
}

/// Policy configuration
#[derive(Clone, Debug)]
pub struct PolicyConfig {
    /// Phrases that ask for the action to happen now
    pub auto_execute_phrases: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_execute_phrases: ["open", "show", "go to", "navigate", "launch", "take me"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Evaluates whether resolved navigation fires immediately
#[derive(Clone, Debug)]
pub struct ExecutionPolicy {
    go_words: Regex,
}

impl ExecutionPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        let alternation = config
            .auto_execute_phrases
            .iter()
            .map(|phrase| {
                phrase
                    .split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect::<Vec<_>>()
            .join("|");
        let go_words = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
            .unwrap_or_else(|_| Regex::new(r"(?i)\bopen\b").expect("Invalid fallback regex"));

        Self { go_words }
    }

    pub fn with_defaults() -> Self {
        Self::new(PolicyConfig::default())
    }

    /// Whether the text explicitly asks for navigation
    pub fn requests_execution(&self, text: &str) -> bool {
        self.go_words.is_match(text)
    }

    /// Decide for one turn; `confirmed` marks a follow-up that accepts an earlier suggestion
    pub fn evaluate(&self, text: &str, autonomy: AutonomyLevel, confirmed: bool) -> ExecutionDecision {
        let decision = match autonomy {
            AutonomyLevel::Manual => ExecutionDecision::Suggest,
            AutonomyLevel::Autonomous => ExecutionDecision::Execute,
            AutonomyLevel::Balanced if confirmed || self.requests_execution(text) => {
                ExecutionDecision::Execute
            }
            AutonomyLevel::Balanced => ExecutionDecision::Suggest,
        };

        debug!(?autonomy, confirmed, ?decision, "Evaluated auto-execute policy");
        decision
    }
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_words_execute() {
        let policy = ExecutionPolicy::with_defaults();
        for text in [
            "open the financial dashboard",
            "Show me attendance",
            "go to   the timetable",
            "Navigate to reports",
            "launch the lesson generator",
            "take me to worksheets",
        ] {
            assert_eq!(
                policy.evaluate(text, AutonomyLevel::Balanced, false),
                ExecutionDecision::Execute,
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_plain_request_is_suggested() {
        let policy = ExecutionPolicy::with_defaults();
        assert_eq!(
            policy.evaluate(
                "Create a grade 4 math lesson about fractions",
                AutonomyLevel::Balanced,
                false
            ),
            ExecutionDecision::Suggest
        );
    }

    #[test]
    fn test_word_boundaries() {
        let policy = ExecutionPolicy::with_defaults();
        assert!(!policy.requests_execution("the showcase was reopened"));
        assert!(!policy.requests_execution("a good topic"));
    }

    #[test]
    fn test_confirmation_executes() {
        let policy = ExecutionPolicy::with_defaults();
        assert_eq!(
            policy.evaluate("yes please", AutonomyLevel::Balanced, true),
            ExecutionDecision::Execute
        );
    }

    #[test]
    fn test_autonomy_overrides() {
        let policy = ExecutionPolicy::with_defaults();
        assert_eq!(
            policy.evaluate("open reports", AutonomyLevel::Manual, true),
            ExecutionDecision::Suggest
        );
        assert_eq!(
            policy.evaluate("a worksheet on verbs", AutonomyLevel::Autonomous, false),
            ExecutionDecision::Execute
        );
    }

    #[test]
    fn test_custom_phrases() {
        let policy = ExecutionPolicy::new(PolicyConfig {
            auto_execute_phrases: vec!["maak oop".to_string()],
        });
        assert!(policy.requests_execution("Maak oop die rooster"));
        assert!(!policy.requests_execution("open the timetable"));
    }

    #[test]
    fn test_autonomy_parsing() {
        assert_eq!("auto".parse::<AutonomyLevel>(), Ok(AutonomyLevel::Autonomous));
        assert!("reckless".parse::<AutonomyLevel>().is_err());
        assert_eq!(AutonomyLevel::default(), AutonomyLevel::Balanced);
    }
}
