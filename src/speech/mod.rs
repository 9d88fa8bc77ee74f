//! Speech - Preparing reply text for text-to-speech
//!
//! Replies are written for the screen. Before they are spoken, markdown is
//! stripped and, for English, amounts, percentages, clock times and numbers
//! are spelled out so the synthesizer reads them naturally.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static LINK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("Invalid link regex"));

static MARKUP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\*\*|__|`+|^\s*#+\s*|^\s*[-*•]\s+").expect("Invalid markup regex"));

static CURRENCY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bR\s?(\d{1,3}(?:[ ,]\d{3})+|\d+)(?:\.(\d{2}))?\b").expect("Invalid currency regex")
});

static CLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([01]?\d|2[0-3]):([0-5]\d)\b").expect("Invalid clock regex"));

static PERCENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+)(?:\.(\d+))?\s?%").expect("Invalid percent regex"));

static DECIMAL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+)\.(\d+)\b").expect("Invalid decimal regex"));

static INTEGER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}(?:,\d{3})+\b|\b\d+\b").expect("Invalid integer regex"));

static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]+").expect("Invalid whitespace regex"));

const ONES: [&str; 20] = [
    "zero", "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten",
    "eleven", "twelve", "thirteen", "fourteen", "fifteen", "sixteen", "seventeen", "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

/// Largest first; u64::MAX is under a thousand quintillion
const SCALES: [(u64, &str); 6] = [
    (1_000_000_000_000_000_000, "quintillion"),
    (1_000_000_000_000_000, "quadrillion"),
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Rewrite `text` so it reads well when spoken in `language`
pub fn normalize_for_speech(text: &str, language: &str) -> String {
    let text = LINK_REGEX.replace_all(text, "$1");
    let text = MARKUP_REGEX.replace_all(&text, "");

    let text = if language.to_lowercase().starts_with("en") {
        spell_out_numbers(&text)
    } else {
        text.into_owned()
    };

    WHITESPACE_REGEX.replace_all(text.trim(), " ").into_owned()
}

fn spell_out_numbers(text: &str) -> String {
    let text = CURRENCY_REGEX.replace_all(text, |caps: &Captures| {
        let rands = parse_grouped(&caps[1]);
        let cents = caps.get(2).and_then(|m| m.as_str().parse::<u64>().ok()).unwrap_or(0);
        match rands {
            Some(rands) => currency_words(rands, cents),
            None => caps[0].to_string(),
        }
    });

    let text = CLOCK_REGEX.replace_all(&text, |caps: &Captures| {
        let hour: u64 = caps[1].parse().unwrap_or(0);
        let minute: u64 = caps[2].parse().unwrap_or(0);
        match minute {
            0 => format!("{} o'clock", number_to_words(hour)),
            1..=9 => format!("{} oh {}", number_to_words(hour), number_to_words(minute)),
            _ => format!("{} {}", number_to_words(hour), number_to_words(minute)),
        }
    });

    let text = PERCENT_REGEX.replace_all(&text, |caps: &Captures| {
        let whole = spell_digits_or_keep(&caps[1]);
        match caps.get(2) {
            Some(fraction) => format!("{} point {} percent", whole, digit_words(fraction.as_str())),
            None => format!("{} percent", whole),
        }
    });

    let text = DECIMAL_REGEX.replace_all(&text, |caps: &Captures| {
        format!("{} point {}", spell_digits_or_keep(&caps[1]), digit_words(&caps[2]))
    });

    INTEGER_REGEX
        .replace_all(&text, |caps: &Captures| spell_digits_or_keep(&caps[0]))
        .into_owned()
}

fn currency_words(rands: u64, cents: u64) -> String {
    let cents_words = match cents {
        0 => None,
        1 => Some("one cent".to_string()),
        n => Some(format!("{} cents", number_to_words(n))),
    };

    match (rands, cents_words) {
        (0, Some(cents)) => cents,
        (rands, Some(cents)) => format!("{} rand and {}", number_to_words(rands), cents),
        (rands, None) => format!("{} rand", number_to_words(rands)),
    }
}

/// Parse digits that may contain thousands separators
fn parse_grouped(digits: &str) -> Option<u64> {
    digits
        .chars()
        .filter(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()
}

fn spell_digits_or_keep(digits: &str) -> String {
    parse_grouped(digits)
        .map(number_to_words)
        .unwrap_or_else(|| digits.to_string())
}

fn digit_words(digits: &str) -> String {
    digits
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| ONES[d as usize])
        .collect::<Vec<_>>()
        .join(" ")
}

/// English words for `n`, British style ("one hundred and five")
pub fn number_to_words(n: u64) -> String {
    if n == 0 {
        return ONES[0].to_string();
    }

    let mut parts = Vec::new();
    let mut remaining = n;
    for (scale, name) in SCALES {
        if remaining >= scale {
            parts.push(format!("{} {}", below_thousand(remaining / scale), name));
            remaining %= scale;
        }
    }

    if remaining > 0 {
        if !parts.is_empty() && remaining < 100 {
            parts.push(format!("and {}", below_hundred(remaining)));
        } else {
            parts.push(below_thousand(remaining));
        }
    }

    parts.join(" ")
}

fn below_thousand(n: u64) -> String {
    match (n / 100, n % 100) {
        (0, rest) => below_hundred(rest),
        (hundreds, 0) => format!("{} hundred", ONES[hundreds as usize]),
        (hundreds, rest) => format!("{} hundred and {}", ONES[hundreds as usize], below_hundred(rest)),
    }
}

fn below_hundred(n: u64) -> String {
    if n < 20 {
        return ONES[n as usize].to_string();
    }
    let tens = TENS[(n / 10) as usize];
    match n % 10 {
        0 => tens.to_string(),
        ones => format!("{}-{}", tens, ONES[ones as usize]),
    }
}
