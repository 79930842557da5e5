//! Projection of extracted attributes onto an institution's column layout

use serde_json::Value;
use std::fmt;

pub const PATIENT_INDEX_HEADER: &str = "Patient Index";
pub const RAW_REPORT_HEADER: &str = "Raw Report";
const RAW_RESULTS_HEADERS: &[&str] = &["Raw Results", "Audiometric Test Results"];

const EAR_SIDES: &[&str] = &["Left Ear", "Right Ear", "Better Ear"];

/// One step of an attribute path
///
/// `key` is the attribute name the model emits; `name` is the compact form
/// used when the path is printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub name: String,
    pub key: String,
}

impl PathSegment {
    fn new(name: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
        }
    }

    fn from_key(key: &str) -> Self {
        Self {
            name: key.split_whitespace().collect(),
            key: key.to_string(),
        }
    }

    fn lookup<'a>(&self, object: &'a serde_json::Map<String, Value>) -> Option<&'a Value> {
        object
            .get(&self.key)
            .or_else(|| object.get(&self.name))
            .or_else(|| {
                let wanted = fold(&self.name);
                object
                    .iter()
                    .find(|(candidate, _)| fold(candidate) == wanted)
                    .map(|(_, value)| value)
            })
    }
}

fn fold(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Nested location of one attribute inside the extracted object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath(pub Vec<PathSegment>);

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|segment| segment.name.as_str()).collect();
        write!(f, "{}", names.join("."))
    }
}

impl AttributePath {
    /// Walks the path; any missing step yields `None`
    pub fn resolve<'a>(&self, attributes: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(attributes, |node, segment| {
            node.as_object().and_then(|object| segment.lookup(object))
        })
    }
}

/// Maps a non-fixed header to the attribute path it reads
pub fn map_header_to_path(header: &str) -> AttributePath {
    let header = header.trim();

    for side in EAR_SIDES {
        if let Some((_, suffix)) = header.split_once(side) {
            let mut segments = vec![
                PathSegment::new("HearingType", "Hearing Type"),
                PathSegment::from_key(side),
            ];
            let suffix = suffix.trim();
            if !suffix.is_empty() {
                segments.push(PathSegment::from_key(suffix));
            }
            return AttributePath(segments);
        }
    }

    let risk = PathSegment::new("RiskIndicators", "Known Hearing Loss Risk Indicators");
    if header.contains("Tier One") || header.contains("Tier Two") {
        let tier = if header.contains("Tier One") { "Tier One" } else { "Tier Two" };
        return AttributePath(vec![
            risk,
            PathSegment::from_key("Risk Factors"),
            PathSegment::from_key(tier),
        ]);
    }
    if header == "Known Hearing Loss Risk" {
        return AttributePath(vec![risk, PathSegment::from_key(header)]);
    }

    AttributePath(vec![PathSegment::from_key(header)])
}

/// What a table column holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Column {
    RecordId,
    RawReport,
    RawResults,
    Attribute(AttributePath),
}

impl Column {
    pub fn for_header(header: &str) -> Self {
        let trimmed = header.trim();
        if trimmed == PATIENT_INDEX_HEADER {
            Column::RecordId
        } else if trimmed == RAW_REPORT_HEADER {
            Column::RawReport
        } else if RAW_RESULTS_HEADERS.contains(&trimmed) {
            Column::RawResults
        } else {
            Column::Attribute(map_header_to_path(trimmed))
        }
    }
}

/// Renders an attribute leaf as table text
///
/// Missing and null leaves are empty, lists are comma-joined, other
/// non-string values use their JSON text.
pub fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

/// One output row, aligned with the institution's headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub record_id: String,
    pub cells: Vec<String>,
}

/// Builds rows for one institution's header layout
#[derive(Debug, Clone)]
pub struct RecordProjector {
    columns: Vec<Column>,
}

impl RecordProjector {
    pub fn new(csv_headers: &[String]) -> Self {
        Self {
            columns: csv_headers.iter().map(|header| Column::for_header(header)).collect(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Projects `extracted`, unwrapping a top-level `"Attributes"` object if present
    pub fn project(&self, record_id: &str, raw_report: &str, raw_results: &str, extracted: &Value) -> TableRow {
        let attributes = extracted.get("Attributes").unwrap_or(extracted);
        let cells = self
            .columns
            .iter()
            .map(|column| match column {
                Column::RecordId => record_id.to_string(),
                Column::RawReport => raw_report.to_string(),
                Column::RawResults => raw_results.to_string(),
                Column::Attribute(path) => render_value(path.resolve(attributes)),
            })
            .collect();

        TableRow {
            record_id: record_id.to_string(),
            cells,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_header_paths_are_fixed_by_name() {
        assert_eq!(map_header_to_path("Left Ear Type").to_string(), "HearingType.LeftEar.Type");
        assert_eq!(map_header_to_path("Right Ear Degree").to_string(), "HearingType.RightEar.Degree");
        assert_eq!(
            map_header_to_path("Tier One Risk Factors").to_string(),
            "RiskIndicators.RiskFactors.TierOne"
        );
        assert_eq!(
            map_header_to_path("Tier Two Risk Factors").to_string(),
            "RiskIndicators.RiskFactors.TierTwo"
        );
        assert_eq!(
            map_header_to_path("Known Hearing Loss Risk").to_string(),
            "RiskIndicators.KnownHearingLossRisk"
        );
        assert_eq!(map_header_to_path("Reasoning").to_string(), "Reasoning");
        assert_eq!(map_header_to_path("Site Notes").to_string(), "SiteNotes");
    }

    #[test]
    fn test_projection_defaults_missing_leaves_to_empty() {
        let projector = RecordProjector::new(&headers(&[
            "Patient Index",
            "Raw Report",
            "Raw Results",
            "Left Ear Type",
            "Right Ear Type",
            "Tier One Risk Factors",
            "Reasoning",
        ]));
        let extracted = json!({"Attributes": {"Hearing Type": {"Left Ear": {"Type": "Conductive"}}}});
        let row = projector.project("PAT00000004", "report", "[]", &extracted);
        assert_eq!(
            row.cells,
            vec!["PAT00000004", "report", "[]", "Conductive", "", "", ""]
        );
    }

    #[test]
    fn test_value_rendering() {
        let projector = RecordProjector::new(&headers(&[
            "Tier One Risk Factors",
            "Tier Two Risk Factors",
            "Score",
            "Known Hearing Loss Risk",
        ]));
        let extracted = json!({
            "Known Hearing Loss Risk Indicators": {
                "Known Hearing Loss Risk": null,
                "Risk Factors": {"Tier One": ["Down syndrome", "Bacterial meningitis"], "Tier Two": [3, true]}
            },
            "Score": 2
        });
        let row = projector.project("PAT00000001", "", "", &extracted);
        assert_eq!(
            row.cells,
            vec!["Down syndrome, Bacterial meningitis", "3, true", "2", ""]
        );
    }

    #[test]
    fn test_compact_attribute_names_also_resolve() {
        let projector = RecordProjector::new(&headers(&["Left Ear Type", "Better Ear Degree"]));
        let extracted = json!({"HearingType": {"LeftEar": {"Type": "Mixed"}, "better_ear": {"degree": "Mild"}}});
        let row = projector.project("PAT00000001", "", "", &extracted);
        assert_eq!(row.cells, vec!["Mixed", "Mild"]);
    }
}
