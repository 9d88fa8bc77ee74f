//! Entities - Typed values pulled out of free text
//!
//! Every extractor is a pure pattern match over the raw input. Nothing here
//! fails: a field that cannot be recognised is simply left out of the result.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, SecondsFormat, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Accepted lesson duration range in minutes
const MIN_DURATION_MINUTES: u32 = 15;
const MAX_DURATION_MINUTES: u32 = 180;

/// Topic length bounds (exclusive) in characters
const MIN_TOPIC_CHARS: usize = 2;
const MAX_TOPIC_CHARS: usize = 80;

static GRADE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:grade|year)\s*(\d{1,2})").expect("Invalid grade regex")
});

/// Ordered subject table; the first matching row wins
static SUBJECT_TABLE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\b(?:maths?|mathematics|numeracy)\b", "Mathematics"),
        (r"(?i)\b(?:natural\s+sciences?|science)\b", "Natural Sciences"),
        (r"(?i)\b(?:english|literacy)\b", "English"),
        (r"(?i)\bafrikaans\b", "Afrikaans"),
        (r"(?i)\blife\s*skills\b", "Life Skills"),
        (r"(?i)\bgeography\b", "Geography"),
        (r"(?i)\bhistory\b", "History"),
        (r"(?i)\b(?:creative\s+arts?|arts?)\b", "Creative Arts"),
        (r"(?i)\bmusic\b", "Music"),
        (r"(?i)\b(?:pe|physical\s+education|phys\s*ed)\b", "Physical Education"),
    ]
    .into_iter()
    .map(|(pattern, subject)| (Regex::new(pattern).expect("Invalid subject regex"), subject))
    .collect()
});

static NINETY_MINUTE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:one\s+and\s+a\s+half\s+hours?|an?\s+hour\s+and\s+a\s+half|1\.5\s*(?:hours?|hrs?)|90[\s-]*min(?:ute)?s?)\b",
    )
    .expect("Invalid ninety-minute regex")
});

static HALF_HOUR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bhalf\s+an?\s+hour\b").expect("Invalid half-hour regex"));

static ONE_HOUR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:an|one)\s+hour\b").expect("Invalid one-hour regex"));

static MINUTES_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,3})[\s-]*(?:minutes?|mins?)\b").expect("Invalid minutes regex")
});

static HOURS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})[\s-]*(?:hours?|hrs?)\b").expect("Invalid hours regex")
});

static QUOTED_TOPIC_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["“]([^"“”]+)["”]"#).expect("Invalid quoted topic regex"));

static TOPIC_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:about|on|teaching|topic|theme)\b[:\s]+(.+?)(?:\s+(?:for|with|in|at|using|by|to|today|tomorrow)\b|[,.;!?\n]|$)",
    )
    .expect("Invalid topic regex")
});

static RELATIVE_TIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bin\s+(\d{1,4})\s*(minutes?|mins?|hours?|hrs?|days?)\b")
        .expect("Invalid relative time regex")
});

static DAY_AT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(today|tomorrow)\s+at\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b")
        .expect("Invalid day-at regex")
});

static BARE_AT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2})(?::(\d{2}))?\s*(am|pm)?\b").expect("Invalid at-time regex")
});

static TOMORROW_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btomorrow\b").expect("Invalid tomorrow regex"));

static TODAY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btoday\b").expect("Invalid today regex"));

static CURRICULUM_TABLE: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bcaps\b", "CAPS"),
        (r"(?i)\bieb\b", "IEB"),
        (r"(?i)\bcambridge\b", "Cambridge"),
    ]
    .into_iter()
    .map(|(pattern, name)| (Regex::new(pattern).expect("Invalid curriculum regex"), name))
    .collect()
});

/// Kinds of entity the extractor recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Subject,
    GradeLevel,
    Duration,
    Topic,
    DateTime,
    Curriculum,
}

impl EntityKind {
    /// Parameter key used when the entity prefills a screen
    pub fn key(&self) -> &'static str {
        match self {
            EntityKind::Subject => "subject",
            EntityKind::GradeLevel => "gradeLevel",
            EntityKind::Duration => "duration",
            EntityKind::Topic => "topic",
            EntityKind::DateTime => "dateTime",
            EntityKind::Curriculum => "curriculum",
        }
    }
}

/// Entities found in a single input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedEntities(BTreeMap<EntityKind, String>);

impl ExtractedEntities {
    pub fn get(&self, kind: EntityKind) -> Option<&str> {
        self.0.get(&kind).map(String::as_str)
    }

    pub fn contains(&self, kind: EntityKind) -> bool {
        self.0.contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityKind, &str)> {
        self.0.iter().map(|(kind, value)| (*kind, value.as_str()))
    }

    /// Screen parameters keyed by their camelCase names
    pub fn to_params(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(kind, value)| (kind.key().to_string(), value.to_string()))
            .collect()
    }

    /// The parsed reminder time, if one was extracted
    pub fn date_time(&self) -> Option<DateTime<FixedOffset>> {
        self.get(EntityKind::DateTime)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
    }

    fn set(&mut self, kind: EntityKind, value: Option<String>) {
        if let Some(value) = value {
            self.0.insert(kind, value);
        }
    }
}

impl FromIterator<(EntityKind, String)> for ExtractedEntities {
    fn from_iter<I: IntoIterator<Item = (EntityKind, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Extract every recognisable entity using the local clock for date phrases
pub fn extract(text: &str) -> ExtractedEntities {
    extract_at(text, Local::now().fixed_offset())
}

/// Extract every recognisable entity relative to `now`
pub fn extract_at(text: &str, now: DateTime<FixedOffset>) -> ExtractedEntities {
    let mut entities = ExtractedEntities::default();
    entities.set(
        EntityKind::GradeLevel,
        extract_grade_level(text).map(|grade| grade.to_string()),
    );
    entities.set(EntityKind::Subject, extract_subject(text).map(str::to_string));
    entities.set(
        EntityKind::Duration,
        extract_duration_minutes(text).map(|minutes| minutes.to_string()),
    );
    entities.set(EntityKind::Topic, extract_topic(text));
    entities.set(
        EntityKind::DateTime,
        extract_date_time(text, now).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false)),
    );
    entities.set(
        EntityKind::Curriculum,
        extract_curriculum(text).map(str::to_string),
    );
    entities
}

/// Grade level from the first "grade N" / "year N", kept only within 1-12
pub fn extract_grade_level(text: &str) -> Option<u8> {
    let captures = GRADE_REGEX.captures(text)?;
    let grade: u8 = captures.get(1)?.as_str().parse().ok()?;
    (1..=12).contains(&grade).then_some(grade)
}

pub fn extract_subject(text: &str) -> Option<&'static str> {
    SUBJECT_TABLE
        .iter()
        .find(|(regex, _)| regex.is_match(text))
        .map(|(_, subject)| *subject)
}

/// Duration in minutes; values outside the accepted range are dropped
pub fn extract_duration_minutes(text: &str) -> Option<u32> {
    let minutes = if NINETY_MINUTE_REGEX.is_match(text) {
        Some(90)
    } else if HALF_HOUR_REGEX.is_match(text) {
        Some(30)
    } else if let Some(captures) = MINUTES_REGEX.captures(text) {
        captures[1].parse::<u32>().ok()
    } else if let Some(captures) = HOURS_REGEX.captures(text) {
        captures[1].parse::<u32>().ok().map(|hours| hours * 60)
    } else if ONE_HOUR_REGEX.is_match(text) {
        Some(60)
    } else {
        None
    }?;

    (MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES)
        .contains(&minutes)
        .then_some(minutes)
}

pub fn extract_topic(text: &str) -> Option<String> {
    let candidate = QUOTED_TOPIC_REGEX
        .captures(text)
        .or_else(|| TOPIC_REGEX.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_string())?;

    let chars = candidate.chars().count();
    (chars > MIN_TOPIC_CHARS && chars < MAX_TOPIC_CHARS).then_some(candidate)
}

pub fn extract_curriculum(text: &str) -> Option<&'static str> {
    CURRICULUM_TABLE
        .iter()
        .find(|(regex, _)| regex.is_match(text))
        .map(|(_, name)| *name)
}

/// Absolute time for reminder phrases, resolved against `now`
pub fn extract_date_time(
    text: &str,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    if let Some(captures) = RELATIVE_TIME_REGEX.captures(text) {
        let amount: i64 = captures[1].parse().ok()?;
        let unit = captures[2].to_lowercase();
        let offset = if unit.starts_with("min") {
            Duration::minutes(amount)
        } else if unit.starts_with('h') {
            Duration::hours(amount)
        } else {
            Duration::days(amount)
        };
        return Some(now + offset);
    }

    if let Some(captures) = DAY_AT_REGEX.captures(text) {
        let (hour, minute) = clock_time(
            &captures[2],
            captures.get(3).map(|m| m.as_str()),
            captures.get(4).map(|m| m.as_str()),
        )?;
        let mut date = now.date_naive();
        if captures[1].eq_ignore_ascii_case("tomorrow") {
            date = date.succ_opt()?;
        }
        return local_time(&now, date, hour, minute);
    }

    let captures = BARE_AT_REGEX.captures(text)?;
    let (hour, minute) = clock_time(
        &captures[1],
        captures.get(2).map(|m| m.as_str()),
        captures.get(3).map(|m| m.as_str()),
    )?;

    if TOMORROW_REGEX.is_match(text) {
        return local_time(&now, now.date_naive().succ_opt()?, hour, minute);
    }
    let today = local_time(&now, now.date_naive(), hour, minute)?;
    if today > now || TODAY_REGEX.is_match(text) {
        Some(today)
    } else {
        local_time(&now, now.date_naive().succ_opt()?, hour, minute)
    }
}

fn clock_time(hour: &str, minute: Option<&str>, meridiem: Option<&str>) -> Option<(u32, u32)> {
    let mut hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.map_or(Some(0), |m| m.parse().ok())?;
    if minute > 59 {
        return None;
    }

    match meridiem.map(str::to_lowercase).as_deref() {
        Some(meridiem) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if meridiem == "pm" && hour < 12 {
                hour += 12;
            } else if meridiem == "am" && hour == 12 {
                hour = 0;
            }
        }
        None if hour > 23 => return None,
        None => {}
    }

    Some((hour, minute))
}

fn local_time(
    now: &DateTime<FixedOffset>,
    date: NaiveDate,
    hour: u32,
    minute: u32,
) -> Option<DateTime<FixedOffset>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    now.offset().from_local_datetime(&naive).single()
}
