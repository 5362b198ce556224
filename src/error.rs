use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while preparing, running, or collecting an external job.
///
/// Variants are grouped by when they can occur: `Config` and
/// `MissingPrerequisite` are always raised before a job process exists,
/// `ToolFailed` only after the process exited non-zero, and
/// `MissingArtifact` only after the process reported success.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing prerequisite {what}: {name}")]
    MissingPrerequisite { what: &'static str, name: String },

    #[error("Output directory '{}' already exists (use --overwrite to replace it)", .0.display())]
    OutputExists(PathBuf),

    #[error(
        "{tool} returned {code}\n\n\
         ------------------------------------------------------------\n \
         {tool} output\n\
         ------------------------------------------------------------\n\n{output}"
    )]
    ToolFailed {
        tool: String,
        code: i32,
        output: String,
    },

    #[error("Tool reported success but expected output is missing: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("Inconsistent data: {0}")]
    DataConsistency(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Tree error: {0}")]
    Tree(#[from] crate::tree::TreeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl JobError {
    pub(crate) fn missing_binary(name: impl Into<String>) -> Self {
        Self::MissingPrerequisite {
            what: "binary",
            name: name.into(),
        }
    }

    pub(crate) fn missing_file(path: impl Into<PathBuf>) -> Self {
        Self::MissingPrerequisite {
            what: "file",
            name: path.into().display().to_string(),
        }
    }

    /// True for errors raised before any job process was started.
    pub fn is_pre_launch(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::MissingPrerequisite { .. }
                | Self::OutputExists(_)
                | Self::DataConsistency(_)
                | Self::EmptyInput(_)
                | Self::Tree(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
