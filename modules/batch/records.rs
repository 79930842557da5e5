//! Batch records and their line-delimited wire format

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompt::PromptRenderer;
use crate::modules::error::InputError;
use crate::modules::institution_config::InstitutionConfig;

pub const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Record id for the patient at 1-based position `index` of its input file
pub fn record_id(index: usize) -> String {
    format!("PAT{:08}", index)
}

/// What the model is asked about one patient
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    pub report_text: String,
    pub structured_results: Value,
    pub rendered_prompt: String,
}

/// One patient record travelling through a batch unit
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub record_id: String,
    pub model_input: ModelInput,
    pub model_output: Option<String>,
}

impl BatchRecord {
    /// The JSONL request line submitted to the job service
    pub fn to_wire(&self, max_tokens: u32) -> WireRecord {
        WireRecord {
            record_id: Some(self.record_id.clone()),
            model_input: Some(WireModelInput {
                anthropic_version: Some(ANTHROPIC_VERSION.to_string()),
                max_tokens: Some(max_tokens),
                messages: vec![WireMessage {
                    role: "user".to_string(),
                    content: vec![WireContent {
                        kind: Some("text".to_string()),
                        text: Some(self.model_input.rendered_prompt.clone()),
                    }],
                }],
            }),
            model_output: self.model_output.as_ref().map(|text| WireModelOutput {
                content: vec![WireContent {
                    kind: Some("text".to_string()),
                    text: Some(text.clone()),
                }],
            }),
            error: None,
        }
    }
}

/// A record line as it appears in `.jsonl` inputs and `.jsonl.out` outputs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_input: Option<WireModelInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_output: Option<WireModelOutput>,
    /// Set by the job service when this record failed inside the job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireRecordError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireModelInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<WireContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireContent {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireModelOutput {
    #[serde(default)]
    pub content: Vec<WireContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecordError {
    #[serde(default)]
    pub error_code: Option<Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl WireRecord {
    /// Text of the first user text block of the request
    pub fn prompt_text(&self) -> Option<&str> {
        self.model_input
            .as_ref()?
            .messages
            .iter()
            .flat_map(|message| message.content.iter())
            .find(|content| content.kind.as_deref().map_or(true, |kind| kind == "text"))
            .and_then(|content| content.text.as_deref())
    }

    /// Text of the first model output block, if the job produced one
    pub fn output_text(&self) -> Option<&str> {
        self.model_output
            .as_ref()?
            .content
            .first()
            .and_then(|content| content.text.as_deref())
    }
}

/// Serializes records as one JSON object per line
pub fn to_jsonl(records: &[BatchRecord], max_tokens: u32) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(&record.to_wire(max_tokens))?);
        out.push('\n');
    }
    Ok(out)
}

#[derive(Debug, Deserialize)]
struct PatientEntry {
    #[serde(default, alias = "Report")]
    report: Option<String>,
    #[serde(default, alias = "Results")]
    results: Option<Value>,
}

fn has_results(results: &Value) -> bool {
    match results {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// Turns a JSON array of patients into batch records
///
/// Patients with neither a report nor results are skipped; ids still follow
/// their position in the array.
pub fn parse_patient_file(
    key: &str,
    data: &[u8],
    config: &InstitutionConfig,
) -> Result<Vec<BatchRecord>, InputError> {
    let patients: Vec<Value> =
        serde_json::from_slice(data).map_err(|e| InputError::MalformedPatients {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

    let renderer = PromptRenderer::new(config);
    let mut records = Vec::with_capacity(patients.len());

    for (idx, patient) in patients.into_iter().enumerate() {
        let index = idx + 1;
        let entry: PatientEntry = match serde_json::from_value(patient) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Skipping patient {} in {}: {}", index, key, e);
                continue;
            }
        };

        let report = entry.report.unwrap_or_default().trim().to_string();
        let results = entry.results.unwrap_or(Value::Array(Vec::new()));
        if report.is_empty() && !has_results(&results) {
            tracing::info!("Skipping patient {}: No report or audiometric results", index);
            continue;
        }

        let rendered_prompt = renderer.render(&report, &results);
        records.push(BatchRecord {
            record_id: record_id(index),
            model_input: ModelInput {
                report_text: report,
                structured_results: results,
                rendered_prompt,
            },
            model_output: None,
        });
    }

    if records.is_empty() {
        return Err(InputError::NoRecords(key.to_string()));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> InstitutionConfig {
        InstitutionConfig {
            institution: "Redcap".to_string(),
            template: json!({"Attributes": {"Hearing Type": {}}}),
            valid_values: json!({}),
            rules: vec!["1. Use explicit thresholds only.".to_string()],
            csv_headers: vec!["Patient Index".to_string()],
        }
    }

    #[test]
    fn test_record_ids_are_zero_padded() {
        assert_eq!(record_id(1), "PAT00000001");
        assert_eq!(record_id(12345678), "PAT12345678");
    }

    #[test]
    fn test_parse_patients_skips_empty_but_keeps_positions() {
        let data = br#"[
            {"report": "Mild loss bilaterally", "results": [{"freq": 500, "db": 30}]},
            {"report": "   ", "results": []},
            {"Report": "Normal hearing", "Results": {}}
        ]"#;
        let records = parse_patient_file("in/a.json", data, &config()).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.record_id.as_str()).collect();
        assert_eq!(ids, vec!["PAT00000001", "PAT00000003"]);
        assert_eq!(records[1].model_input.report_text, "Normal hearing");
        assert!(records[0].model_input.rendered_prompt.contains("Mild loss bilaterally"));
    }

    #[test]
    fn test_parse_patients_errors() {
        assert!(matches!(
            parse_patient_file("k", b"{\"not\": \"an array\"}", &config()),
            Err(InputError::MalformedPatients { .. })
        ));
        assert!(matches!(
            parse_patient_file("k", b"[{\"report\": \"\"}]", &config()),
            Err(InputError::NoRecords(_))
        ));
    }

    #[test]
    fn test_wire_format_matches_job_service_layout() {
        let record = BatchRecord {
            record_id: "PAT00000007".to_string(),
            model_input: ModelInput {
                report_text: "r".to_string(),
                structured_results: json!([]),
                rendered_prompt: "prompt text".to_string(),
            },
            model_output: Some("{\"Reasoning\": \"x\"}".to_string()),
        };
        let line = serde_json::to_value(record.to_wire(1024)).unwrap();
        assert_eq!(line["recordId"], "PAT00000007");
        assert_eq!(line["modelInput"]["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(line["modelInput"]["max_tokens"], 1024);
        assert_eq!(line["modelInput"]["messages"][0]["role"], "user");
        assert_eq!(line["modelInput"]["messages"][0]["content"][0]["type"], "text");
        assert_eq!(line["modelInput"]["messages"][0]["content"][0]["text"], "prompt text");
        assert_eq!(line["modelOutput"]["content"][0]["text"], "{\"Reasoning\": \"x\"}");
        assert!(line.get("error").is_none());
    }

    #[test]
    fn test_output_line_with_provider_error() {
        let line = r#"{"recordId":"PAT00000002","modelInput":{"messages":[]},"error":{"errorCode":400,"errorMessage":"Too many tokens"}}"#;
        let record: WireRecord = serde_json::from_str(line).unwrap();
        assert!(record.output_text().is_none());
        assert_eq!(
            record.error.unwrap().error_message.as_deref(),
            Some("Too many tokens")
        );
    }
}
