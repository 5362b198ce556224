//! Tabular sequence dataset as handed to the run subsystem.
//!
//! Rows are biological sequences keyed by `uid`; `ott` is the species
//! identifier used to build species trees and mapping files.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{JobError, Result};

/// Columns that must be present in a dataset CSV.
pub const REQUIRED_COLUMNS: [&str; 3] = ["uid", "ott", "sequence"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRow {
    pub uid: String,
    #[serde(default)]
    pub ott: Option<String>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub sequence: String,
    #[serde(default)]
    pub alignment: Option<String>,
    #[serde(default = "default_keep", deserialize_with = "flexible_bool")]
    pub keep: bool,
}

fn default_keep() -> bool {
    true
}

// Accepts the spellings pandas and spreadsheets produce.
fn flexible_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "could not interpret '{other}' as a boolean"
        ))),
    }
}

impl SequenceRow {
    pub fn new(uid: &str, ott: &str, sequence: &str) -> Self {
        Self {
            uid: uid.to_string(),
            ott: Some(ott.to_string()),
            species: None,
            name: None,
            sequence: sequence.to_string(),
            alignment: None,
            keep: true,
        }
    }

    pub fn with_alignment(mut self, alignment: &str) -> Self {
        self.alignment = Some(alignment.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    rows: Vec<SequenceRow>,
}

impl Dataset {
    pub fn new(rows: Vec<SequenceRow>) -> Result<Self> {
        let mut seen = HashSet::new();
        for row in &rows {
            if row.uid.trim().is_empty() {
                return Err(JobError::DataConsistency(
                    "dataset row with empty uid".to_string(),
                ));
            }
            if !seen.insert(row.uid.as_str()) {
                return Err(JobError::DataConsistency(format!(
                    "uid '{}' appears more than once in the dataset",
                    row.uid
                )));
            }
        }
        Ok(Self { rows })
    }

    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(JobError::Config(format!(
                    "dataset '{}' is missing required column '{column}'",
                    path.display()
                )));
            }
        }
        let rows = reader
            .deserialize::<SequenceRow>()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Self::new(rows)
    }

    pub fn to_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> &[SequenceRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, uid: &str) -> Option<&SequenceRow> {
        self.rows.iter().find(|r| r.uid == uid)
    }

    /// Rows whose uid is in `uids`, in dataset order.
    pub fn retain_uids(&self, uids: &HashSet<&str>) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|r| uids.contains(r.uid.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Write kept rows as relaxed sequential PHYLIP using the `alignment`
    /// column.
    pub fn write_phy(&self, path: &Path) -> Result<()> {
        let kept: Vec<&SequenceRow> = self.rows.iter().filter(|r| r.keep).collect();
        if kept.is_empty() {
            return Err(JobError::EmptyInput(
                "no kept rows to write to alignment".to_string(),
            ));
        }

        let mut width = None;
        let mut body = String::new();
        for row in &kept {
            let aligned = row.alignment.as_deref().ok_or_else(|| {
                JobError::Config(format!(
                    "row '{}' has no alignment; align the dataset first",
                    row.uid
                ))
            })?;
            match width {
                None => width = Some(aligned.len()),
                Some(w) if w != aligned.len() => {
                    return Err(JobError::Config(format!(
                        "alignment for '{}' has length {} but expected {w}",
                        row.uid,
                        aligned.len()
                    )));
                }
                Some(_) => {}
            }
            body.push_str(&row.uid);
            body.push('\n');
            body.push_str(aligned);
            body.push('\n');
        }

        let header = format!("{} {}\n\n", kept.len(), width.unwrap_or(0));
        std::fs::write(path, header + &body)?;
        Ok(())
    }
}
