use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::dataset::Dataset;
use crate::error::JobError;
use crate::tree::Tree;

/// Which kind of calculation produced a run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcType {
    MlTree,
    Reconciliation,
}

impl CalcType {
    /// Prefix used for generated output directory names.
    pub fn output_base(self) -> &'static str {
        match self {
            CalcType::MlTree => "generate_ml_tree",
            CalcType::Reconciliation => "generax_reconciliation",
        }
    }
}

/// How a `--seed` flag should be produced for a tool run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedChoice {
    /// Do not pass a seed.
    #[default]
    Omit,
    /// Pass this exact seed.
    Explicit(u64),
    /// Generate a random seed and pass it.
    Generate,
}

impl SeedChoice {
    /// Resolve to the value written after `--seed`, if any.
    pub fn resolve(self) -> Option<u64> {
        match self {
            SeedChoice::Omit => None,
            SeedChoice::Explicit(seed) => Some(seed),
            SeedChoice::Generate => Some(gen_seed()),
        }
    }
}

/// Random ten digit seed.
pub fn gen_seed() -> u64 {
    use rand::Rng;
    rand::thread_rng().gen_range(1_000_000_000..10_000_000_000)
}

impl FromStr for SeedChoice {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "true" => return Ok(SeedChoice::Generate),
            "false" => return Ok(SeedChoice::Omit),
            _ => {}
        }
        s.parse::<u64>().map(SeedChoice::Explicit).map_err(|_| {
            JobError::Config(format!("seed '{s}' could not be interpreted as an integer"))
        })
    }
}

/// Every encoding a seed may arrive in from config files or JSON requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeedArg {
    Flag(bool),
    Int(i64),
    Text(String),
    Other(serde_json::Value),
}

impl TryFrom<Option<SeedArg>> for SeedChoice {
    type Error = JobError;

    fn try_from(value: Option<SeedArg>) -> Result<Self, Self::Error> {
        match value {
            None => Ok(SeedChoice::Omit),
            Some(SeedArg::Flag(true)) => Ok(SeedChoice::Generate),
            Some(SeedArg::Flag(false)) => Ok(SeedChoice::Omit),
            Some(SeedArg::Int(n)) => u64::try_from(n)
                .map(SeedChoice::Explicit)
                .map_err(|_| JobError::Config(format!("seed {n} must not be negative"))),
            Some(SeedArg::Text(s)) => s.parse(),
            Some(SeedArg::Other(v)) => Err(JobError::Config(format!(
                "seed must be true/false, an integer, or a string holding an integer; got {v}"
            ))),
        }
    }
}

/// Poll intervals for following a tool's log file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollIntervals {
    /// Wait between attempts to open a log file that does not exist yet.
    #[serde(with = "humantime_serde")]
    pub open_retry: Duration,
    /// Wait after a read that returned no new data.
    #[serde(with = "humantime_serde")]
    pub read_retry: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            open_retry: Duration::from_secs(1),
            read_retry: Duration::from_millis(100),
        }
    }
}

/// Inputs for one calculation, before preparation resolves a previous run.
#[derive(Debug, Clone)]
pub struct CalcRequest {
    pub previous_dir: Option<PathBuf>,
    pub dataset: Option<Dataset>,
    pub model: Option<String>,
    pub tree: Option<Tree>,
    pub output: Option<PathBuf>,
    pub overwrite: bool,
    /// `None` uses every available core.
    pub threads: Option<usize>,
    pub seed: SeedChoice,
    pub log_to_sink: bool,
    pub extra_args: Vec<String>,
}

impl Default for CalcRequest {
    fn default() -> Self {
        Self {
            previous_dir: None,
            dataset: None,
            model: None,
            tree: None,
            output: None,
            overwrite: false,
            threads: None,
            seed: SeedChoice::Omit,
            log_to_sink: true,
            extra_args: Vec::new(),
        }
    }
}

/// Events emitted while a job runs, consumed by CLI or library callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    Started { command: String },
    /// One line of the tool's own log file, without the trailing newline.
    LogLine(String),
    Info(InfoEvent),
    Finished { code: i32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    CarriedForward { count: usize },
    WroteResults { path: PathBuf },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::CarriedForward { count } => {
                format!("Carried forward {count} tree(s) from previous run")
            }
            InfoEvent::WroteResults { path } => {
                format!("Wrote results to {}", path.display())
            }
        }
    }
}

/// Provenance written next to a run's results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub version: String,
    pub calc_type: CalcType,
    pub model: String,
    pub cmd: String,
    /// CSV holding the dataset as it was passed to the tool.
    pub dataset: PathBuf,
    pub start_time: String,
    pub end_time: String,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_json(text: &str) -> Result<SeedChoice, JobError> {
        let arg: Option<SeedArg> = serde_json::from_str(text).unwrap();
        SeedChoice::try_from(arg)
    }

    #[test]
    fn seed_encodings() {
        assert_eq!(from_json("null").unwrap(), SeedChoice::Omit);
        assert_eq!(from_json("false").unwrap(), SeedChoice::Omit);
        assert_eq!(from_json("true").unwrap(), SeedChoice::Generate);
        assert_eq!(from_json("12345").unwrap(), SeedChoice::Explicit(12345));
        assert_eq!(from_json("\"777\"").unwrap(), SeedChoice::Explicit(777));
    }

    #[test]
    fn bad_seed_encodings_are_config_errors() {
        for text in ["\"seven\"", "1.5", "-3", "[1]"] {
            assert!(
                matches!(from_json(text), Err(JobError::Config(_))),
                "{text} should be rejected"
            );
        }
        assert!(matches!(
            "abc".parse::<SeedChoice>(),
            Err(JobError::Config(_))
        ));
    }

    #[test]
    fn generated_seed_has_ten_digits() {
        let seed = SeedChoice::Generate.resolve().unwrap();
        assert_eq!(seed.to_string().len(), 10);
        assert_eq!(SeedChoice::Omit.resolve(), None);
        assert_eq!(SeedChoice::Explicit(4).resolve(), Some(4));
    }

    #[test]
    fn run_record_serializes_elapsed_as_text() {
        let record = RunRecord {
            version: "0.1.0".into(),
            calc_type: CalcType::MlTree,
            model: "LG+G8".into(),
            cmd: "raxml-ng --search".into(),
            dataset: PathBuf::from("input/dataset.csv"),
            start_time: "2024-01-01T00:00:00Z".into(),
            end_time: "2024-01-01T00:01:30Z".into(),
            elapsed: Duration::from_secs(90),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["calc_type"], "ml_tree");
        assert_eq!(json["elapsed"], "1m 30s");
    }
}
