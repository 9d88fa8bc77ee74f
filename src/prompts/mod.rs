//! Prompts - System prompt rendering and canned reply text

use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use minijinja::{context, Environment};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use tracing::warn;

use crate::action::RecipientKind;
use crate::context::TurnContext;
use crate::error::Result;
use crate::intent::known_screens;

/// Shown whenever a collaborator fails; never carries error details
pub const FALLBACK_REPLY: &str = "I'm experiencing a temporary issue, please try again.";

/// Leads the reply when the reminder endpoint did not save a reminder
pub const REMINDER_NOT_SAVED_REPLY: &str = "I couldn't save that reminder.";

/// Appended to the system prompt for the answer that follows an unsaved reminder
pub const REMINDER_NOT_SAVED_NOTE: &str =
    "The reminder the user asked for could not be saved. Do not tell them it was set.";

/// Used when the system prompt template cannot be rendered
const MINIMAL_SYSTEM_PROMPT: &str =
    "You are Dash, a friendly assistant for teachers, principals and parents. Keep replies short and practical.";

const SYSTEM_TEMPLATE: &str = r#"You are Dash, the AI assistant built into {{ app_name }}, an education platform used by South African schools.
You are speaking with {% if user_name %}{{ user_name }}, {% endif %}a {{ role }}.
It is {{ time_of_day }} on {{ date }}.

Guidelines:
- Reply in {{ language }}.
- Be warm, concise and practical. Prefer short paragraphs over long lists.
- Never invent marks, fees or attendance figures; point the user to the right screen instead.
- If you cannot help, say so briefly and suggest who can.

Screens the user can open:
{% for screen in screens %}- {{ screen }}
{% endfor %}"#;

static SPEAKER_LABEL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:dash|assistant)\s*:\s*").expect("Invalid label regex"));

static BLANK_LINES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("Invalid blank lines regex"));

/// Renders the system prompt sent as gateway context
pub struct PromptBuilder {
    env: Environment<'static>,
    app_name: String,
}

impl PromptBuilder {
    pub fn new(app_name: &str) -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)?;

        Ok(Self {
            env,
            app_name: app_name.to_string(),
        })
    }

    pub fn system_prompt(&self, ctx: &TurnContext) -> Result<String> {
        let screens: Vec<String> = known_screens()
            .map(|(route, name)| format!("{} ({})", name, route))
            .collect();

        let template = self.env.get_template("system")?;
        Ok(template.render(context! {
            app_name => self.app_name,
            user_name => ctx.user_name,
            role => ctx.role.as_str(),
            time_of_day => time_of_day(ctx.now.hour()),
            date => ctx.now.format("%A %-d %B %Y").to_string(),
            language => language_name(&ctx.language),
            screens => screens,
        })?)
    }

    /// Rendered prompt, or a minimal one when rendering fails
    pub fn system_prompt_or_minimal(&self, ctx: &TurnContext) -> String {
        match self.system_prompt(ctx) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!("Failed to render system prompt: {}", e);
                MINIMAL_SYSTEM_PROMPT.to_string()
            }
        }
    }
}

pub fn time_of_day(hour: u32) -> &'static str {
    match hour {
        5..=11 => "morning",
        12..=16 => "afternoon",
        17..=20 => "evening",
        _ => "night",
    }
}

/// Display name for a language tag such as "af" or "en-ZA"
pub fn language_name(code: &str) -> String {
    let base = code.split(['-', '_']).next().unwrap_or(code).to_lowercase();
    match base.as_str() {
        "en" => "English",
        "af" => "Afrikaans",
        "zu" => "isiZulu",
        "xh" => "isiXhosa",
        "st" => "Sesotho",
        "tn" => "Setswana",
        "nso" => "Sepedi",
        _ => return code.to_string(),
    }
    .to_string()
}

pub fn opening_confirmation(screen: &str) -> String {
    format!("Opening the {}...", screen)
}

/// Reply offering a screen without navigating to it
pub fn screen_suggestion(screen: &str, params: &BTreeMap<String, String>) -> String {
    let prefilled: Vec<String> = ["gradeLevel", "subject", "topic", "duration"]
        .iter()
        .filter_map(|key| {
            params.get(*key).map(|value| match *key {
                "gradeLevel" => format!("grade {}", value),
                "duration" => format!("{} minutes", value),
                _ => value.clone(),
            })
        })
        .collect();

    if prefilled.is_empty() {
        format!(
            "I can open the {} for you. Just say \"open it\" when you're ready.",
            screen
        )
    } else {
        format!(
            "I can open the {} for you with {} filled in. Just say \"open it\" when you're ready.",
            screen,
            prefilled.join(", ")
        )
    }
}

pub fn reminder_confirmation(
    title: &str,
    when: &DateTime<FixedOffset>,
    now: &DateTime<FixedOffset>,
) -> String {
    let day_offset = when.date_naive().num_days_from_ce() - now.date_naive().num_days_from_ce();
    let when_text = match day_offset {
        0 => format!("today at {}", when.format("%H:%M")),
        1 => format!("tomorrow at {}", when.format("%H:%M")),
        _ => when.format("%A %-d %B at %H:%M").to_string(),
    };

    if title.eq_ignore_ascii_case(crate::action::DEFAULT_REMINDER_TITLE) {
        format!("Done! I'll remind you {}.", when_text)
    } else {
        format!("Done! I'll remind you about {} {}.", title, when_text)
    }
}

pub fn composer_reply(recipient: RecipientKind) -> String {
    format!(
        "Here's a draft message to the {}. Check it before you send.",
        recipient.as_str()
    )
}

/// Light clean-up of gateway replies; `None` when nothing usable is left
pub fn post_process(reply: &str) -> Option<String> {
    let trimmed = reply.trim();
    let unlabelled = SPEAKER_LABEL_REGEX.replace(trimmed, "");
    let collapsed = BLANK_LINES_REGEX.replace_all(&unlabelled, "\n\n");
    let cleaned = collapsed.trim();

    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::UserRole;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, day: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, day, hour, minute, 0)
            .unwrap()
    }

    fn turn_context() -> TurnContext {
        TurnContext {
            conversation_id: "c1".to_string(),
            history: vec![],
            role: UserRole::Principal,
            user_name: Some("Thandi".to_string()),
            language: "af".to_string(),
            now: at(8, 15, 16),
        }
    }

    #[test]
    fn test_system_prompt_renders_context() {
        let builder = PromptBuilder::new("EduDash").unwrap();
        let prompt = builder.system_prompt(&turn_context()).unwrap();

        assert!(prompt.contains("built into EduDash"));
        assert!(prompt.contains("Thandi, a principal"));
        assert!(prompt.contains("It is morning on Friday 16 October 2026"));
        assert!(prompt.contains("Reply in Afrikaans"));
        assert!(prompt.contains("- Lesson Generator (/screens/ai-lesson-generator)"));
    }

    #[test]
    fn test_system_prompt_without_name() {
        let builder = PromptBuilder::new("EduDash").unwrap();
        let ctx = TurnContext {
            user_name: None,
            role: UserRole::Parent,
            ..turn_context()
        };
        let prompt = builder.system_prompt(&ctx).unwrap();
        assert!(prompt.contains("You are speaking with a parent."));
    }

    #[test]
    fn test_rendered_prompt_preferred_over_minimal() {
        let builder = PromptBuilder::new("EduDash").unwrap();
        let ctx = turn_context();
        assert_eq!(
            builder.system_prompt_or_minimal(&ctx),
            builder.system_prompt(&ctx).unwrap()
        );
        assert_ne!(builder.system_prompt_or_minimal(&ctx), MINIMAL_SYSTEM_PROMPT);
    }

    #[test]
    fn test_time_of_day() {
        assert_eq!(time_of_day(7), "morning");
        assert_eq!(time_of_day(13), "afternoon");
        assert_eq!(time_of_day(19), "evening");
        assert_eq!(time_of_day(23), "night");
        assert_eq!(time_of_day(3), "night");
    }

    #[test]
    fn test_language_names() {
        assert_eq!(language_name("en-ZA"), "English");
        assert_eq!(language_name("zu"), "isiZulu");
        assert_eq!(language_name("fr"), "fr");
    }

    #[test]
    fn test_reminder_confirmation() {
        let now = at(14, 30, 16);
        assert_eq!(
            reminder_confirmation("Reminder", &at(9, 0, 17), &now),
            "Done! I'll remind you tomorrow at 09:00."
        );
        assert_eq!(
            reminder_confirmation("staff meeting", &at(16, 0, 16), &now),
            "Done! I'll remind you about staff meeting today at 16:00."
        );
        assert_eq!(
            reminder_confirmation("Reminder", &at(9, 0, 20), &now),
            "Done! I'll remind you Tuesday 20 October at 09:00."
        );
    }

    #[test]
    fn test_screen_suggestion() {
        let params: BTreeMap<String, String> = [("gradeLevel", "4"), ("subject", "Mathematics")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(
            screen_suggestion("Lesson Generator", &params),
            "I can open the Lesson Generator for you with grade 4, Mathematics filled in. Just say \"open it\" when you're ready."
        );
        assert!(screen_suggestion("Reports", &BTreeMap::new()).starts_with("I can open the Reports"));
    }

    #[test]
    fn test_post_process() {
        assert_eq!(
            post_process("  Dash: Hello!\n\n\n\nHow can I help?  "),
            Some("Hello!\n\nHow can I help?".to_string())
        );
        assert_eq!(post_process("   "), None);
        assert_eq!(post_process("Assistant:   "), None);
    }
}
