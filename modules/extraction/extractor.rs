//! Recovers one JSON object from free-form model output
//!
//! The candidate is the interior of a ```` ```json ```` fence, or failing
//! that the widest `{ ... }` span. Text that already parses as JSON is
//! returned untouched. Everything else goes through escape normalization,
//! control-character stripping, a strict parse, brace-balance repair and
//! finally the permissive literal parser.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::error::Category;
use serde_json::Value;
use tracing::debug;

use super::literal::parse_literal;
use crate::modules::error::ExtractionError;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap_or_else(|e| panic!("invalid fence pattern: {}", e))
});

static BRACE_SPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap_or_else(|e| panic!("invalid brace pattern: {}", e)));

/// Where the candidate text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSource {
    Fenced,
    BraceSpan,
}

/// Which parse produced the value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStage {
    StrictParse,
    BraceRepair,
    Permissive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub value: Value,
    pub source: CandidateSource,
    pub stage: ExtractionStage,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseExtractor;

impl ResponseExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> Result<Extracted, ExtractionError> {
        let (candidate, source) = find_candidate(text).ok_or_else(|| ExtractionError {
            reason: "no JSON object found in model output".to_string(),
            original: text.to_string(),
        })?;

        let raw_error = match serde_json::from_str::<Value>(candidate) {
            Ok(value) => {
                return Ok(Extracted {
                    value,
                    source,
                    stage: ExtractionStage::StrictParse,
                })
            }
            Err(e) => e,
        };

        // Truncation at the closing braces leaves escaped quotes intact, so
        // repair the raw candidate before normalization rewrites them.
        if let Some(value) = repair_braces(candidate, &raw_error) {
            return Ok(Extracted {
                value,
                source,
                stage: ExtractionStage::BraceRepair,
            });
        }

        let cleaned = strip_control_chars(&normalize_escapes(candidate));

        let strict_error = match serde_json::from_str::<Value>(&cleaned) {
            Ok(value) => {
                return Ok(Extracted {
                    value,
                    source,
                    stage: ExtractionStage::StrictParse,
                })
            }
            Err(e) => e,
        };
        debug!("Strict parse failed: {}", strict_error);

        if let Some(value) = repair_braces(&cleaned, &strict_error) {
            return Ok(Extracted {
                value,
                source,
                stage: ExtractionStage::BraceRepair,
            });
        }

        let balanced = balance_braces(&cleaned);
        match parse_literal(&balanced) {
            Ok(value) => Ok(Extracted {
                value,
                source,
                stage: ExtractionStage::Permissive,
            }),
            Err(literal_error) => Err(ExtractionError {
                reason: format!("{}; literal parse: {}", strict_error, literal_error),
                original: text.to_string(),
            }),
        }
    }
}

/// The fenced block if there is one, else the widest brace span
pub fn find_candidate(text: &str) -> Option<(&str, CandidateSource)> {
    if let Some(inner) = FENCED_JSON.captures(text).and_then(|caps| caps.get(1)) {
        return Some((inner.as_str(), CandidateSource::Fenced));
    }
    BRACE_SPAN
        .find(text)
        .map(|span| (span.as_str(), CandidateSource::BraceSpan))
}

fn normalize_escapes(candidate: &str) -> String {
    candidate
        .replace("\\\"", "\"")
        .replace("\\\\n", "\\n")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

/// Drops C0 controls and DEL, keeping the line breaks and tabs normalization produced
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !(matches!(c, '\u{00}'..='\u{1f}' | '\u{7f}') && !matches!(c, '\n' | '\t')))
        .collect()
}

/// Appends the missing `}` and reparses, only when the parse ran out of input
fn repair_braces(text: &str, error: &serde_json::Error) -> Option<Value> {
    let missing = missing_closing_braces(text);
    if error.classify() != Category::Eof || missing == 0 {
        return None;
    }
    match serde_json::from_str::<Value>(&balance_braces(text)) {
        Ok(value) => {
            debug!("Recovered JSON after appending {} closing braces", missing);
            Some(value)
        }
        Err(e) => {
            debug!("Brace repair failed: {}", e);
            None
        }
    }
}

fn balance_braces(text: &str) -> String {
    format!("{}{}", text, "}".repeat(missing_closing_braces(text)))
}

fn missing_closing_braces(text: &str) -> usize {
    let open = text.matches('{').count();
    let close = text.matches('}').count();
    open.saturating_sub(close)
}
