//! Strict extraction of scores from raw model replies.
//!
//! Replies are cleaned in order: a `<think>` block is dropped, markdown
//! fences are unwrapped, then the first balanced `{...}` object is parsed as
//! JSON. Replies without any object fall back to `FIELD: value` lines.
//! Every required field must be present and in range; only `reasoning` may
//! be missing.

use serde_json::Value;

use crate::score::{CONFIDENCE_RANGE, Category, SCORE_RANGE};

/// Why a reply could not be turned into scores.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// Neither a JSON object nor labelled lines were found.
    #[error("no structured content in reply")]
    NoStructuredContent,

    /// An object was found but is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A score field is not a number.
    #[error("field {field} is not numeric: {value}")]
    NonNumeric {
        /// Field name.
        field: &'static str,
        /// Offending value as text.
        value: String,
    },

    /// A score field is outside its range.
    #[error("field {field} out of range: {value}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Offending value.
        value: f64,
    },

    /// The category is not one of the known categories.
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Scores extracted from a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedScore {
    /// Importance, 0 to 10.
    pub importance_score: f64,
    /// Spam likelihood, 0 to 10.
    pub spam_score: f64,
    /// Category.
    pub category: Category,
    /// Model explanation, possibly empty.
    pub reasoning: String,
    /// Confidence, 0 to 1.
    pub confidence: f64,
}

/// Parse a raw model reply.
///
/// # Errors
///
/// Returns a [`ParseError`] describing the first problem found.
pub fn parse_reply(raw: &str) -> Result<ParsedScore, ParseError> {
    let text = strip_fences(strip_think(raw));

    match first_object(text) {
        Some(object) => {
            let value: Value =
                serde_json::from_str(object).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
            from_json(&value)
        }
        None => from_lines(text),
    }
}

/// Drop reasoning-model `<think>` output.
fn strip_think(text: &str) -> &str {
    if let Some(end) = text.find("</think>") {
        &text[end + "</think>".len()..]
    } else if text.trim_start().starts_with("<think>") {
        // Unterminated: the reply never got past thinking.
        ""
    } else {
        text
    }
}

/// Unwrap the first markdown code fence, if any.
fn strip_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // Skip a language tag such as `json`.
    let after = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(char::is_alphanumeric) => &after[nl + 1..],
        _ => after,
    };
    after.find("```").map_or(after, |end| &after[..end])
}

/// The first balanced `{...}` in `text`, honouring JSON strings.
fn first_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn from_json(value: &Value) -> Result<ParsedScore, ParseError> {
    let field = |name: &'static str| value.get(name).filter(|v| !v.is_null());

    let number = |name: &'static str| -> Result<f64, ParseError> {
        match field(name) {
            None => Err(ParseError::MissingField(name)),
            Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ParseError::NonNumeric {
                field: name,
                value: n.to_string(),
            }),
            Some(Value::String(s)) => parse_number(name, s),
            Some(other) => Err(ParseError::NonNumeric {
                field: name,
                value: other.to_string(),
            }),
        }
    };

    let category = match field("category") {
        None => return Err(ParseError::MissingField("category")),
        Some(Value::String(s)) => parse_category(s)?,
        Some(other) => return Err(ParseError::UnknownCategory(other.to_string())),
    };

    let reasoning = match field("reasoning") {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    build(
        number("importance_score")?,
        number("spam_score")?,
        category,
        reasoning,
        number("confidence")?,
    )
}

fn from_lines(text: &str) -> Result<ParsedScore, ParseError> {
    let mut importance = None;
    let mut spam = None;
    let mut category = None;
    let mut confidence = None;
    let mut reasoning = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key
            .trim()
            .trim_start_matches(['-', '*', ' '])
            .trim_end_matches('*')
            .trim()
            .to_lowercase()
            .replace([' ', '-'], "_");
        let value = value
            .trim()
            .trim_end_matches(',')
            .trim_matches(['"', '\'', '*'])
            .trim();

        let slot = match key.as_str() {
            "importance_score" | "importance" => &mut importance,
            "spam_score" | "spam" => &mut spam,
            "category" => &mut category,
            "confidence" => &mut confidence,
            "reasoning" => &mut reasoning,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    if importance.is_none() && spam.is_none() && category.is_none() && confidence.is_none() {
        return Err(ParseError::NoStructuredContent);
    }

    let number = |name: &'static str, value: Option<&str>| {
        value.map_or(Err(ParseError::MissingField(name)), |v| parse_number(name, v))
    };

    build(
        number("importance_score", importance)?,
        number("spam_score", spam)?,
        parse_category(category.ok_or(ParseError::MissingField("category"))?)?,
        reasoning.unwrap_or_default().to_string(),
        number("confidence", confidence)?,
    )
}

fn build(
    importance_score: f64,
    spam_score: f64,
    category: Category,
    reasoning: String,
    confidence: f64,
) -> Result<ParsedScore, ParseError> {
    check_range("importance_score", importance_score, &SCORE_RANGE)?;
    check_range("spam_score", spam_score, &SCORE_RANGE)?;
    check_range("confidence", confidence, &CONFIDENCE_RANGE)?;

    Ok(ParsedScore {
        importance_score,
        spam_score,
        category,
        reasoning,
        confidence,
    })
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, ParseError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ParseError::NonNumeric {
            field,
            value: raw.to_string(),
        })
}

fn parse_category(raw: &str) -> Result<Category, ParseError> {
    Category::parse(raw).ok_or_else(|| ParseError::UnknownCategory(raw.to_string()))
}

fn check_range(
    field: &'static str,
    value: f64,
    range: &std::ops::RangeInclusive<f64>,
) -> Result<(), ParseError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ParseError::OutOfRange { field, value })
    }
}
