//! Prompt rendering for classification requests
//!
//! The wording is free to change. The three section markers are not: raw
//! report and raw results are recovered from a returned record by splitting
//! on them.

use serde_json::Value;

use crate::modules::institution_config::InstitutionConfig;

pub const REPORT_MARKER: &str = "**Hearing Report:**";
pub const RESULTS_MARKER: &str = "**Audiometric Test Results:**";
pub const TEMPLATE_MARKER: &str = "**Classification Template:**";

/// Value used when a section cannot be recovered from a prompt
pub const UNKNOWN_SECTION: &str = "Unknown";

pub struct PromptRenderer<'a> {
    config: &'a InstitutionConfig,
}

impl<'a> PromptRenderer<'a> {
    pub fn new(config: &'a InstitutionConfig) -> Self {
        Self { config }
    }

    pub fn render(&self, report: &str, results: &Value) -> String {
        format!(
            "You are an expert pediatric audiologist assistant responsible for extracting explicit hearing test data \
             and classifying hearing loss with precision. Your classification must strictly follow the given \
             template and clinical guidelines.\n\n\
             {REPORT_MARKER}\n\n{}\n\n\
             {RESULTS_MARKER}\n\n{}\n\n\
             {TEMPLATE_MARKER}\n\n{}\n\n\
             **Valid Values:**\n```json\n{}\n```\n\n\
             **Classification Guidelines (MUST FOLLOW):**\n```json\n{}\n```\n\n\
             **Output Requirements:**\n\
             - Use only explicitly provided threshold values; do not infer missing values.\n\
             - If multiple severities are listed, assign the most severe classification.\n\
             - Use only the valid values listed above.\n\
             - Provide reasoning for the left ear, the right ear and the risk factors, citing guideline numbers.\n\
             - Return the classification as JSON in exactly the template's format, with no other commentary.\n",
            report,
            pretty(results),
            pretty(&self.config.template),
            pretty(&self.config.valid_values),
            pretty(&Value::from(self.config.rules.clone())),
        )
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Best-effort recovery of `(raw_report, raw_results)` from a rendered prompt
pub fn extract_sections(prompt: &str) -> (String, String) {
    (
        extract_between(prompt, REPORT_MARKER, RESULTS_MARKER),
        extract_between(prompt, RESULTS_MARKER, TEMPLATE_MARKER),
    )
}

fn extract_between(text: &str, start_marker: &str, end_marker: &str) -> String {
    let Some((_, after_start)) = text.split_once(start_marker) else {
        return UNKNOWN_SECTION.to_string();
    };
    match after_start.split_once(end_marker) {
        Some((section, _)) => section.trim().to_string(),
        None => UNKNOWN_SECTION.to_string(),
    }
}
