//! Deterministic CSV output plus the parallel error log

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;

use super::projector::TableRow;
use super::tabulate::{ErrorLogEntry, Tabulation};
use crate::modules::error::UnitError;

static PATIENT_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"PAT(\d+)").unwrap_or_else(|e| panic!("invalid patient id pattern: {}", e)));

/// Numeric patient index of a record id, if it has one
pub fn patient_number(record_id: &str) -> Option<u64> {
    PATIENT_NUMBER
        .captures(record_id)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// Orders rows by patient index; ids without one go last in arrival order
pub fn sort_rows(rows: &mut [TableRow]) {
    rows.sort_by_key(|row| match patient_number(&row.record_id) {
        Some(n) => (0, n),
        None => (1, 0),
    });
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn push_csv_line(out: &mut String, fields: &[String]) {
    let quoted: Vec<String> = fields.iter().map(|field| quote_field(field)).collect();
    out.push_str(&quoted.join(","));
    out.push_str("\r\n");
}

/// Header line followed by the rows, already sorted
pub fn render_csv(headers: &[String], rows: &[TableRow]) -> String {
    let mut out = String::new();
    push_csv_line(&mut out, headers);
    for row in rows {
        push_csv_line(&mut out, &row.cells);
    }
    out
}

pub fn render_error_log(errors: &[ErrorLogEntry]) -> String {
    let mut out = String::new();
    for entry in errors {
        out.push_str(&format!("[Line {}] Error: {}\n", entry.line_number, entry.error_description));
        out.push_str(&format!("Raw content: {}\n\n", entry.raw_line));
    }
    out
}

/// Where a unit's table and error log were written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFiles {
    pub csv_path: PathBuf,
    pub error_log_path: PathBuf,
    pub rows: usize,
    pub errors: usize,
}

pub struct TableWriter {
    output_dir: PathBuf,
    headers: Vec<String>,
}

impl TableWriter {
    pub fn new(output_dir: impl Into<PathBuf>, headers: Vec<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            headers,
        }
    }

    pub fn csv_path(&self, stem: &str, institution: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_output.csv", stem, institution.to_lowercase()))
    }

    pub fn error_log_path(&self, stem: &str, institution: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}_error_log.txt", stem, institution.to_lowercase()))
    }

    /// Sorts and writes both files; an empty tabulation still produces both
    pub async fn write(
        &self,
        stem: &str,
        institution: &str,
        mut tabulation: Tabulation,
    ) -> Result<TableFiles, UnitError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| output_error(&self.output_dir, source))?;

        sort_rows(&mut tabulation.rows);

        let csv_path = self.csv_path(stem, institution);
        tokio::fs::write(&csv_path, render_csv(&self.headers, &tabulation.rows))
            .await
            .map_err(|source| output_error(&csv_path, source))?;

        let error_log_path = self.error_log_path(stem, institution);
        tokio::fs::write(&error_log_path, render_error_log(&tabulation.errors))
            .await
            .map_err(|source| output_error(&error_log_path, source))?;

        info!(
            "CSV written to: {} ({} rows, {} errors logged to {})",
            csv_path.display(),
            tabulation.rows.len(),
            tabulation.errors.len(),
            error_log_path.display()
        );

        Ok(TableFiles {
            csv_path,
            error_log_path,
            rows: tabulation.rows.len(),
            errors: tabulation.errors.len(),
        })
    }
}

fn output_error(path: &Path, source: std::io::Error) -> UnitError {
    UnitError::Output {
        path: path.display().to_string(),
        source,
    }
}
