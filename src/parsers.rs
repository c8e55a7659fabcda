//! Text parsers for scraped catalog fields.
//!
//! Every function here is total: malformed input yields `None`, never an
//! error or a panic.

use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(\d+)h(?:\s+(\d+)min)?|(\d+)min)$").expect("duration pattern is valid")
});

static PARENTHESIZED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\((.*?)\)").expect("parenthesis pattern is valid"));

/// Parse `"<H>h <M>min"`, `"<H>h"` or `"<M>min"` into total minutes.
///
/// ```
/// use streaming_catalog::parsers::parse_duration;
/// assert_eq!(parse_duration("2h 30min"), Some(150));
/// assert_eq!(parse_duration("1h"), Some(60));
/// assert_eq!(parse_duration("45min"), Some(45));
/// assert_eq!(parse_duration(""), None);
/// ```
pub fn parse_duration(text: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(text.trim())?;

    if let Some(minutes) = caps.get(3) {
        return minutes.as_str().parse().ok();
    }

    let hours: u32 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    hours.checked_mul(60)?.checked_add(minutes)
}

/// Render minutes in the display form accepted by [`parse_duration`].
pub fn format_duration(minutes: Option<u32>) -> Option<String> {
    let minutes = minutes?;
    let hours = minutes / 60;
    let rem = minutes % 60;

    let text = match (hours, rem) {
        (0, 0) => "0min".to_string(),
        (0, m) => format!("{m}min"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m}min"),
    };
    Some(text)
}

/// Split a `"<score> (<count>)"` rating into its score and vote count.
pub fn parse_rating_blob(text: &str) -> (Option<f64>, Option<u64>) {
    let text = text.trim();
    if text.is_empty() {
        return (None, None);
    }

    let score = text.split(' ').next().and_then(parse_score);
    let count = PARENTHESIZED_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| parse_count(m.as_str()));

    (score, count)
}

/// Parse a vote count with an optional `k` (thousand) or `m` (million) suffix.
pub fn parse_count(text: &str) -> Option<u64> {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return None;
    }

    let (number, multiplier) = if let Some(stripped) = text.strip_suffix('k') {
        (stripped, 1_000.0)
    } else if let Some(stripped) = text.strip_suffix('m') {
        (stripped, 1_000_000.0)
    } else {
        return text.parse::<u64>().ok();
    };

    let value: f64 = number.trim().parse().ok()?;
    non_negative_integer(value * multiplier)
}

/// Parse a release year, tolerating one pair of surrounding parentheses.
pub fn parse_year(text: &str) -> Option<i32> {
    let text = text.trim();
    let inner = text
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(text);

    inner.trim().parse::<i32>().ok().filter(|year| *year >= 0)
}

/// Parse an IMDb score; rejects negative and non-finite values.
pub fn parse_score(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|score| score.is_finite() && *score >= 0.0)
}

fn non_negative_integer(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 0.0 || value >= u64::MAX as f64 {
        return None;
    }
    Some(value.round() as u64)
}
