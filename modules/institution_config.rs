//! Institution templates loaded from the shared config file
//!
//! The config file is read once at startup. The resulting
//! [`InstitutionConfig`] is immutable and handed to every component that
//! needs it, usually behind an `Arc`.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use super::error::ConfigError;

/// Classification template, valid values, rules and output columns for one institution
#[derive(Debug, Clone, PartialEq)]
pub struct InstitutionConfig {
    pub institution: String,
    pub template: Value,
    pub valid_values: Value,
    pub rules: Vec<String>,
    pub csv_headers: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    templates: HashMap<String, TemplateEntry>,
}

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    #[serde(default)]
    template: Value,
    #[serde(default)]
    valid_values: Value,
    #[serde(default)]
    processing_rules: ProcessingRules,
    #[serde(default)]
    csv_headers: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProcessingRules {
    #[serde(default)]
    rules: Vec<String>,
}

impl InstitutionConfig {
    /// Reads `path` and selects the template for `institution`
    pub fn load(path: impl AsRef<Path>, institution: &str) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&raw, institution)?;
        info!(
            "Loaded config for institution '{}' from {} ({} rules, {} columns)",
            institution,
            path.display(),
            config.rules.len(),
            config.csv_headers.len()
        );
        Ok(config)
    }

    /// Parses an in-memory config document and selects `institution`
    pub fn from_json(raw: &str, institution: &str) -> Result<Self, ConfigError> {
        let mut file: ConfigFile = serde_json::from_str(raw)?;
        let entry = file
            .templates
            .remove(institution)
            .ok_or_else(|| ConfigError::UnknownInstitution(institution.to_string()))?;

        if is_empty_value(&entry.template) {
            return Err(ConfigError::MissingTemplate(institution.to_string()));
        }
        if entry.processing_rules.rules.is_empty() {
            return Err(ConfigError::MissingRules(institution.to_string()));
        }
        if entry.csv_headers.is_empty() {
            return Err(ConfigError::MissingHeaders(institution.to_string()));
        }

        Ok(Self {
            institution: institution.to_string(),
            template: entry.template,
            valid_values: entry.valid_values,
            rules: entry.processing_rules.rules,
            csv_headers: entry.csv_headers,
        })
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"{
        "templates": {
            "Redcap": {
                "template": {"Attributes": {"Hearing Type": {}}},
                "valid_values": {"Type": ["Sensorineural", "Conductive"]},
                "processing_rules": {"rules": ["1. Use the worse threshold.", "2. Cite guidelines."]},
                "csv_headers": ["Patient Index", "Raw Report", "Left Ear Type"]
            },
            "NoRules": {
                "template": {"Attributes": {}},
                "processing_rules": {"rules": []},
                "csv_headers": ["Patient Index"]
            },
            "NoTemplate": {
                "template": {},
                "processing_rules": {"rules": ["1."]},
                "csv_headers": ["Patient Index"]
            }
        }
    }"#;

    #[test]
    fn test_loads_known_institution() {
        let config = InstitutionConfig::from_json(CONFIG, "Redcap").unwrap();
        assert_eq!(config.institution, "Redcap");
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.csv_headers, vec!["Patient Index", "Raw Report", "Left Ear Type"]);
        assert_eq!(config.valid_values["Type"][0], "Sensorineural");
    }

    #[test]
    fn test_missing_pieces_are_config_errors() {
        assert!(matches!(
            InstitutionConfig::from_json(CONFIG, "CDC"),
            Err(ConfigError::UnknownInstitution(name)) if name == "CDC"
        ));
        assert!(matches!(
            InstitutionConfig::from_json(CONFIG, "NoRules"),
            Err(ConfigError::MissingRules(_))
        ));
        assert!(matches!(
            InstitutionConfig::from_json(CONFIG, "NoTemplate"),
            Err(ConfigError::MissingTemplate(_))
        ));
        assert!(matches!(
            InstitutionConfig::from_json("not json", "Redcap"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let config = InstitutionConfig::load(file.path(), "Redcap").unwrap();
        assert_eq!(config.csv_headers.len(), 3);

        let missing = InstitutionConfig::load("/definitely/not/here.json", "Redcap");
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
