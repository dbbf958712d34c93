//! Response parsing: raw provider text → validated numeric answer.
//!
//! Strategies run in a fixed order against the normalized (trimmed, lowercased)
//! text and the first one that yields an in-range number wins:
//!
//! 1. labeled field (`rating: 5`, `score: 5`)
//! 2. whole-text JSON object with a `rating` field
//! 3. first in-range number anywhere in the text
//! 4. scale midpoint, tagged `PARSER WARNING`
//!
//! Any internal failure while running the strategies yields the midpoint tagged
//! `PARSER ERROR`. [`parse`] never fails.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::scale::ScaleRange;

/// How many characters of offending text end up in logs and API error tags.
pub const SNIPPET_CHARS: usize = 100;

// =============================================================================
// Answer types
// =============================================================================

/// Where a score came from.
///
/// The first three variants are genuine answers recovered from text. The rest
/// are synthesized midpoints; each carries the text marker that downstream
/// consumers match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    LabeledField,
    StructuredObject,
    NumberScan,
    ParserWarning,
    ParserError,
    ApiError,
    RangeError,
    TaskError,
}

impl AnswerStatus {
    /// Diagnostic prefix written into the justification, if any.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            AnswerStatus::LabeledField
            | AnswerStatus::StructuredObject
            | AnswerStatus::NumberScan => None,
            AnswerStatus::ParserWarning => Some("PARSER WARNING"),
            AnswerStatus::ParserError => Some("PARSER ERROR"),
            AnswerStatus::ApiError => Some("API ERROR"),
            AnswerStatus::RangeError => Some("RANGE ERROR"),
            AnswerStatus::TaskError => Some("ERROR"),
        }
    }

    /// True when the score is a placeholder rather than the model's answer.
    pub fn is_synthesized(&self) -> bool {
        self.marker().is_some()
    }

    /// Rows that count as the model declining or failing to answer.
    pub fn is_refusal(&self) -> bool {
        matches!(self, AnswerStatus::ParserWarning | AnswerStatus::ApiError)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerStatus::LabeledField => "labeled_field",
            AnswerStatus::StructuredObject => "structured_object",
            AnswerStatus::NumberScan => "number_scan",
            AnswerStatus::ParserWarning => "parser_warning",
            AnswerStatus::ParserError => "parser_error",
            AnswerStatus::ApiError => "api_error",
            AnswerStatus::RangeError => "range_error",
            AnswerStatus::TaskError => "task_error",
        }
    }
}

/// A numeric answer plus its justification. `numeric_score` is always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAnswer {
    pub numeric_score: f64,
    pub label: String,
    pub justification: String,
    pub status: AnswerStatus,
}

impl ParsedAnswer {
    fn recovered(score: f64, justification: impl Into<String>, status: AnswerStatus) -> Self {
        Self {
            numeric_score: score,
            label: String::new(),
            justification: justification.into(),
            status,
        }
    }

    /// Midpoint placeholder with `"<MARKER>: <detail>"` as justification.
    pub fn synthesized(scale: ScaleRange, status: AnswerStatus, detail: &str) -> Self {
        let justification = match status.marker() {
            Some(marker) => format!("{marker}: {detail}"),
            None => detail.to_string(),
        };
        Self {
            numeric_score: scale.midpoint(),
            label: String::new(),
            justification,
            status,
        }
    }

    pub fn parser_warning(scale: ScaleRange) -> Self {
        Self::synthesized(
            scale,
            AnswerStatus::ParserWarning,
            "No valid number found in response",
        )
    }

    pub fn parser_error(scale: ScaleRange, message: &str) -> Self {
        Self::synthesized(scale, AnswerStatus::ParserError, message)
    }

    /// Placeholder for a failed provider call; the detail is cut to
    /// [`SNIPPET_CHARS`] characters.
    pub fn api_error(scale: ScaleRange, detail: &str) -> Self {
        Self::synthesized(
            scale,
            AnswerStatus::ApiError,
            &format!("{}...", snippet(detail)),
        )
    }
}

// =============================================================================
// Parsing
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum ParseFailure {
    #[error("could not convert string to float: '{0}'")]
    Number(String),
    #[error("rating is not numeric: {0}")]
    NonNumericRating(String),
}

static LABELED_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:rating|score):\s*(-?[0-9]+(?:\.[0-9]+)?)").expect("Invalid labeled-field regex")
});

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?[0-9]+(?:\.[0-9]+)?").expect("Invalid number regex"));

/// Turn raw provider text into a [`ParsedAnswer`] bound to `scale`.
pub fn parse(raw_text: &str, scale: ScaleRange) -> ParsedAnswer {
    let text = raw_text.trim().to_lowercase();

    match run_strategies(&text, scale) {
        Ok(Some(answer)) => answer,
        Ok(None) => {
            warn!(snippet = %snippet(&text), "No valid number found in response");
            ParsedAnswer::parser_warning(scale)
        }
        Err(e) => {
            error!(error = %e, "Parser error");
            ParsedAnswer::parser_error(scale, &e.to_string())
        }
    }
}

fn run_strategies(text: &str, scale: ScaleRange) -> Result<Option<ParsedAnswer>, ParseFailure> {
    if let Some(answer) = labeled_field(text, scale)? {
        return Ok(Some(answer));
    }
    if let Some(answer) = structured_object(text, scale)? {
        return Ok(Some(answer));
    }
    number_scan(text, scale)
}

/// Only the first labeled match is considered; an out-of-range value abandons
/// the strategy instead of looking for a later label.
fn labeled_field(text: &str, scale: ScaleRange) -> Result<Option<ParsedAnswer>, ParseFailure> {
    let Some(caps) = LABELED_FIELD.captures(text) else {
        return Ok(None);
    };
    let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
        return Ok(None);
    };

    let value = parse_number(number.as_str())?;
    if !scale.contains(value) {
        return Ok(None);
    }

    let tail = text[whole.end()..].trim();
    let justification = if tail.is_empty() { text } else { tail };
    Ok(Some(ParsedAnswer::recovered(
        value,
        justification,
        AnswerStatus::LabeledField,
    )))
}

fn structured_object(text: &str, scale: ScaleRange) -> Result<Option<ParsedAnswer>, ParseFailure> {
    let Ok(Value::Object(record)) = serde_json::from_str::<Value>(text) else {
        return Ok(None);
    };
    let Some(rating) = record.get("rating") else {
        return Ok(None);
    };

    let value = match rating {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ParseFailure::NonNumericRating(n.to_string()))?,
        Value::String(s) => parse_number(s.trim())?,
        other => return Err(ParseFailure::NonNumericRating(other.to_string())),
    };
    if !scale.contains(value) {
        return Ok(None);
    }

    let justification = match record.get("justification") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    Ok(Some(ParsedAnswer::recovered(
        value,
        justification,
        AnswerStatus::StructuredObject,
    )))
}

fn number_scan(text: &str, scale: ScaleRange) -> Result<Option<ParsedAnswer>, ParseFailure> {
    for candidate in NUMBER.find_iter(text) {
        let value = parse_number(candidate.as_str())?;
        if scale.contains(value) {
            return Ok(Some(ParsedAnswer::recovered(
                value,
                text,
                AnswerStatus::NumberScan,
            )));
        }
    }
    Ok(None)
}

fn parse_number(s: &str) -> Result<f64, ParseFailure> {
    s.parse::<f64>()
        .map_err(|_| ParseFailure::Number(s.to_string()))
}

/// First [`SNIPPET_CHARS`] characters of `s`, cut on a char boundary.
pub fn snippet(s: &str) -> &str {
    match s.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
