//! Turns a batch output file into table rows and error-log entries
//!
//! Every non-blank line yields exactly one of the two. Nothing a single
//! record contains can abort the pass.

use tracing::{debug, warn};

use super::projector::{RecordProjector, TableRow};
use crate::modules::batch::records::{record_id, WireRecord};
use crate::modules::batch::extract_sections;
use crate::modules::extraction::{sanitize_line, ResponseExtractor};

/// A record that could not be turned into a row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLogEntry {
    pub line_number: usize,
    pub raw_line: String,
    pub error_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tabulation {
    pub rows: Vec<TableRow>,
    pub errors: Vec<ErrorLogEntry>,
}

impl Tabulation {
    pub fn record_count(&self) -> usize {
        self.rows.len() + self.errors.len()
    }
}

/// Projects every record line of `jsonl`
pub fn tabulate(jsonl: &str, projector: &RecordProjector) -> Tabulation {
    let extractor = ResponseExtractor::new();
    let mut tabulation = Tabulation::default();

    for (idx, line) in jsonl.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_number = idx + 1;

        match tabulate_line(line, line_number, projector, &extractor) {
            Ok(row) => tabulation.rows.push(row),
            Err(description) => {
                warn!("Line {}: {}", line_number, description);
                tabulation.errors.push(ErrorLogEntry {
                    line_number,
                    raw_line: line.to_string(),
                    error_description: description,
                });
            }
        }
    }

    debug!(
        "Tabulated {} records: {} rows, {} errors",
        tabulation.record_count(),
        tabulation.rows.len(),
        tabulation.errors.len()
    );
    tabulation
}

fn tabulate_line(
    line: &str,
    line_number: usize,
    projector: &RecordProjector,
    extractor: &ResponseExtractor,
) -> Result<TableRow, String> {
    let record: WireRecord =
        serde_json::from_str(&sanitize_line(line)).map_err(|e| format!("Invalid record line: {}", e))?;
    let patient_id = record
        .record_id
        .clone()
        .unwrap_or_else(|| record_id(line_number));

    if let Some(error) = &record.error {
        let code = error
            .error_code
            .as_ref()
            .map(|code| code.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(format!(
            "Model invocation failed for {} ({}): {}",
            patient_id,
            code,
            error.error_message.as_deref().unwrap_or("no message")
        ));
    }

    let output = record
        .output_text()
        .ok_or_else(|| format!("No model output for {}", patient_id))?;
    let extracted = extractor
        .extract(&sanitize_line(output))
        .map_err(|e| e.to_string())?;

    let (raw_report, raw_results) = extract_sections(record.prompt_text().unwrap_or_default());
    Ok(projector.project(&patient_id, &raw_report, &raw_results, &extracted.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::batch::prompt::{REPORT_MARKER, RESULTS_MARKER, TEMPLATE_MARKER};
    use serde_json::json;

    const COMPLETE_OUTPUT: &str = "```json\n{\"Attributes\":{\"Hearing Type\":{\"Left Ear\":{\"Type\":\"Sensorineural\",\"Degree\":\"Mild\"}},\"Known Hearing Loss Risk Indicators\":{\"Known Hearing Loss Risk\":\"No\"},\"Reasoning\":\"No risk factors noted.\"}}\n```";

    fn redcap_projector() -> RecordProjector {
        let headers: Vec<String> = [
            "Patient Index",
            "Raw Report",
            "Left Ear Type",
            "Left Ear Degree",
            "Known Hearing Loss Risk",
            "Reasoning",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        RecordProjector::new(&headers)
    }

    fn output_line(record_id: &str, output: &str) -> String {
        let prompt = format!(
            "Classify.\n{REPORT_MARKER}\nBilateral mild SNHL\n{RESULTS_MARKER}\n[]\n{TEMPLATE_MARKER}\n{{}}"
        );
        json!({
            "recordId": record_id,
            "modelInput": {"messages": [{"role": "user", "content": [{"type": "text", "text": prompt}]}]},
            "modelOutput": {"content": [{"text": output}]}
        })
        .to_string()
    }

    fn expected_row() -> Vec<String> {
        ["PAT00000001", "Bilateral mild SNHL", "Sensorineural", "Mild", "No", "No risk factors noted."]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_end_to_end_row() {
        let jsonl = output_line("PAT00000001", COMPLETE_OUTPUT);
        let tabulation = tabulate(&jsonl, &redcap_projector());
        assert!(tabulation.errors.is_empty());
        assert_eq!(tabulation.rows.len(), 1);
        assert_eq!(tabulation.rows[0].cells, expected_row());
    }

    #[test]
    fn test_truncated_output_is_repaired() {
        let truncated = COMPLETE_OUTPUT.replace("}}\n```", "}\n```");
        assert_ne!(truncated, COMPLETE_OUTPUT);
        let jsonl = output_line("PAT00000001", &truncated);
        let tabulation = tabulate(&jsonl, &redcap_projector());
        assert!(tabulation.errors.is_empty());
        assert_eq!(tabulation.rows[0].cells, expected_row());
    }

    #[test]
    fn test_output_without_braces_is_logged() {
        let jsonl = output_line("PAT00000001", "I am unable to classify this report.");
        let tabulation = tabulate(&jsonl, &redcap_projector());
        assert!(tabulation.rows.is_empty());
        assert_eq!(tabulation.errors.len(), 1);
        assert_eq!(tabulation.errors[0].line_number, 1);
        assert_eq!(tabulation.errors[0].raw_line, jsonl);
        assert!(tabulation.errors[0].error_description.starts_with("JSON decode failed"));
    }

    #[test]
    fn test_rows_plus_errors_cover_every_record() {
        let lines = [
            output_line("PAT00000001", COMPLETE_OUTPUT),
            output_line("PAT00000002", "no json here"),
            "{not a record".to_string(),
            String::new(),
            json!({"recordId": "PAT00000004", "modelInput": {"messages": []}}).to_string(),
            json!({
                "recordId": "PAT00000005",
                "modelInput": {"messages": []},
                "error": {"errorCode": 400, "errorMessage": "Input is too long"}
            })
            .to_string(),
            output_line("PAT00000006", "{'Reasoning': 'single quotes',}"),
        ];
        let tabulation = tabulate(&lines.join("\n"), &redcap_projector());

        assert_eq!(tabulation.record_count(), 6);
        let row_ids: Vec<_> = tabulation.rows.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(row_ids, vec!["PAT00000001", "PAT00000006"]);
        let error_lines: Vec<_> = tabulation.errors.iter().map(|e| e.line_number).collect();
        assert_eq!(error_lines, vec![2, 3, 5, 6]);
        assert!(tabulation.errors[3].error_description.contains("Input is too long"));
    }

    #[test]
    fn test_missing_record_id_falls_back_to_line_number() {
        let mut without_id: serde_json::Value =
            serde_json::from_str(&output_line("ignored", COMPLETE_OUTPUT)).unwrap();
        without_id.as_object_mut().unwrap().remove("recordId");
        let failed = json!({"error": {"errorCode": 429, "errorMessage": "Too many requests"}});

        let jsonl = format!("\n\n{}\n{}", without_id, failed);
        let tabulation = tabulate(&jsonl, &redcap_projector());

        assert_eq!(tabulation.rows.len(), 1);
        assert_eq!(tabulation.rows[0].record_id, "PAT00000003");
        assert_eq!(tabulation.rows[0].cells[0], "PAT00000003");
        assert_eq!(tabulation.rows[0].cells[1..], expected_row()[1..]);

        assert_eq!(tabulation.errors.len(), 1);
        assert_eq!(tabulation.errors[0].line_number, 4);
        assert!(tabulation.errors[0]
            .error_description
            .starts_with("Model invocation failed for PAT00000004 (429)"));
    }

    #[test]
    fn test_missing_sections_use_sentinel() {
        let line = json!({
            "recordId": "PAT00000009",
            "modelOutput": {"content": [{"text": "{\"Reasoning\": \"x\"}"}]}
        })
        .to_string();
        let tabulation = tabulate(&line, &redcap_projector());
        assert_eq!(tabulation.rows[0].cells[1], "Unknown");
    }
}
