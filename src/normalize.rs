use crate::parsers::{format_duration, parse_count, parse_duration, parse_rating_blob, parse_score, parse_year};
use crate::types::{NormalizedRecord, RawRecord};
use chrono::NaiveDateTime;
use serde_json::Value;

/// Input-shape adapter: which fields are the canonical source for rating and duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    /// Page-scraped records: `imdb_score` is a combined `"7.5 (12k)"` blob and
    /// `duracao` is free text.
    BlobShaped,
    /// API records: separate `imdb_score`/`imdb_count` values and integer
    /// `duracao_minutos`.
    SplitShaped,
}

impl RecordShape {
    /// Split fields only count when they carry a value; an explicit `null` does not.
    pub fn detect(raw: &RawRecord) -> Self {
        let has_value = |key: &str| raw.get(key).is_some_and(|v| !v.is_null());
        let numeric_score = matches!(raw.get("imdb_score"), Some(Value::Number(_)));
        if has_value("imdb_count") || has_value("duracao_minutos") || numeric_score {
            RecordShape::SplitShaped
        } else {
            RecordShape::BlobShaped
        }
    }
}

/// Result of normalizing one record, with the fields that were present but unparseable
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOutcome {
    pub record: NormalizedRecord,
    pub degraded_fields: Vec<&'static str>,
}

/// Turns raw field dictionaries into typed catalog rows.
///
/// A field that fails to parse becomes `None`; a record is never dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: &RawRecord, shape: RecordShape, captured_at: NaiveDateTime) -> NormalizedRecord {
        self.normalize_detailed(raw, shape, captured_at).record
    }

    /// Normalize a batch, stamping every record with the same capture instant.
    pub fn normalize_batch(
        &self,
        raws: &[RawRecord],
        shape: RecordShape,
        captured_at: NaiveDateTime,
    ) -> Vec<NormalizeOutcome> {
        raws.iter()
            .map(|raw| self.normalize_detailed(raw, shape, captured_at))
            .collect()
    }

    pub fn normalize_detailed(
        &self,
        raw: &RawRecord,
        shape: RecordShape,
        captured_at: NaiveDateTime,
    ) -> NormalizeOutcome {
        let mut degraded = Vec::new();

        let (imdb_score, imdb_count) = match shape {
            RecordShape::BlobShaped => resolve_blob_rating(raw, &mut degraded),
            RecordShape::SplitShaped => resolve_split_rating(raw, &mut degraded),
        };
        let (duracao, duracao_minutos) = resolve_duration(raw, shape, &mut degraded);
        let ano = resolve_year(raw, &mut degraded);

        let record = NormalizedRecord {
            provedor: text_field(raw, "provedor"),
            categoria: text_field(raw, "categoria"),
            titulo: text_field(raw, "titulo"),
            ano,
            duracao,
            duracao_minutos,
            imdb_score,
            imdb_count,
            classificacao: text_field(raw, "classificacao"),
            sinopse: text_field(raw, "sinopse"),
            url: text_field(raw, "url"),
            extract_timestamp: captured_at,
        };

        NormalizeOutcome {
            record,
            degraded_fields: degraded,
        }
    }
}

/// Whitespace-normalized text; `"None"` and empty strings are null.
fn clean_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.split_whitespace().collect::<Vec<_>>().join(" "),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };

    if text.is_empty() || text == "None" {
        None
    } else {
        Some(text)
    }
}

fn text_field(raw: &RawRecord, key: &str) -> Option<String> {
    clean_text(raw.get(key))
}

/// Runs `parse` over a present field, recording the field as degraded when it fails.
fn parse_field<T>(
    raw: &RawRecord,
    key: &'static str,
    degraded: &mut Vec<&'static str>,
    parse: impl FnOnce(&Value) -> Option<T>,
) -> Option<T> {
    let value = raw.get(key)?;
    if clean_text(Some(value)).is_none() {
        return None;
    }
    let parsed = parse(value);
    if parsed.is_none() {
        degraded.push(key);
    }
    parsed
}

fn number_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0 && *f < u64::MAX as f64)
                .map(|f| f as u64)
        }),
        _ => None,
    }
}

fn resolve_blob_rating(raw: &RawRecord, degraded: &mut Vec<&'static str>) -> (Option<f64>, Option<u64>) {
    let Some(value) = raw.get("imdb_score") else {
        return (None, None);
    };

    match value {
        Value::Number(n) => {
            let score = n.as_f64().filter(|s| s.is_finite() && *s >= 0.0);
            if score.is_none() {
                degraded.push("imdb_score");
            }
            (score, None)
        }
        other => match clean_text(Some(other)) {
            Some(text) => {
                let (score, count) = parse_rating_blob(&text);
                if score.is_none() {
                    degraded.push("imdb_score");
                }
                if count.is_none() && text.contains('(') {
                    degraded.push("imdb_count");
                }
                (score, count)
            }
            None => (None, None),
        },
    }
}

fn resolve_split_rating(raw: &RawRecord, degraded: &mut Vec<&'static str>) -> (Option<f64>, Option<u64>) {
    let score = parse_field(raw, "imdb_score", degraded, |value| match value {
        Value::Number(n) => n.as_f64().filter(|s| s.is_finite() && *s >= 0.0),
        other => clean_text(Some(other)).and_then(|text| parse_score(&text)),
    });

    let count = parse_field(raw, "imdb_count", degraded, |value| match value {
        Value::Number(_) => number_as_u64(value),
        other => clean_text(Some(other)).and_then(|text| parse_count(&text)),
    });

    (score, count)
}

fn resolve_minutes(raw: &RawRecord, degraded: &mut Vec<&'static str>) -> Option<u32> {
    parse_field(raw, "duracao_minutos", degraded, |value| match value {
        Value::Number(_) => number_as_u64(value).and_then(|m| u32::try_from(m).ok()),
        other => clean_text(Some(other)).and_then(|text| text.parse::<u32>().ok()),
    })
}

/// Returns `(display text, minutes)`. The canonical field depends on the shape.
/// Split records keep their display text when it already parses to the same minutes.
fn resolve_duration(
    raw: &RawRecord,
    shape: RecordShape,
    degraded: &mut Vec<&'static str>,
) -> (Option<String>, Option<u32>) {
    let text = text_field(raw, "duracao");

    let from_text = |text: String, degraded: &mut Vec<&'static str>| {
        let minutes = parse_duration(&text);
        if minutes.is_none() {
            degraded.push("duracao");
        }
        (Some(text), minutes)
    };

    match shape {
        RecordShape::BlobShaped => match text {
            Some(text) => from_text(text, degraded),
            None => {
                let minutes = resolve_minutes(raw, degraded);
                (format_duration(minutes), minutes)
            }
        },
        RecordShape::SplitShaped => match resolve_minutes(raw, degraded) {
            Some(minutes) => match text {
                Some(text) if parse_duration(&text) == Some(minutes) => (Some(text), Some(minutes)),
                _ => (format_duration(Some(minutes)), Some(minutes)),
            },
            None => match text {
                Some(text) => from_text(text, degraded),
                None => (None, None),
            },
        },
    }
}

fn resolve_year(raw: &RawRecord, degraded: &mut Vec<&'static str>) -> Option<i32> {
    parse_field(raw, "ano", degraded, |value| match value {
        Value::Number(_) => number_as_u64(value).and_then(|y| i32::try_from(y).ok()),
        other => clean_text(Some(other)).and_then(|text| parse_year(&text)),
    })
}
