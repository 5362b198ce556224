//! User settings: tool binaries, default thread count and log polling.
//!
//! Resolution order for a binary is CLI flag, then environment variable,
//! then config file, then the bare program name looked up on `PATH`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{JobError, Result};
use crate::model::{PollIntervals, SeedArg, SeedChoice};

pub const GENERAX_ENV: &str = "PHYLO_RUNNER_GENERAX";
pub const RAXML_ENV: &str = "PHYLO_RUNNER_RAXML";
pub const MPIRUN_ENV: &str = "PHYLO_RUNNER_MPIRUN";

pub const DEFAULT_GENERAX_BIN: &str = "generax";
pub const DEFAULT_RAXML_BIN: &str = "raxml-ng";
pub const DEFAULT_MPIRUN_BIN: &str = "mpirun";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub binaries: BinarySettings,
    pub run: RunSettings,
    pub poll: PollIntervals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinarySettings {
    pub generax: String,
    pub raxml: String,
    pub mpirun: String,
}

impl Default for BinarySettings {
    fn default() -> Self {
        Self {
            generax: DEFAULT_GENERAX_BIN.to_string(),
            raxml: DEFAULT_RAXML_BIN.to_string(),
            mpirun: DEFAULT_MPIRUN_BIN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Default worker count; unset means all available cores.
    pub threads: Option<usize>,
    /// Seed used when the command line gives none: `true`, `false`, an
    /// integer, or a string holding an integer.
    pub seed: Option<SeedArg>,
}

impl Settings {
    /// `<config dir>/phylo-runner/config.toml`, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("phylo-runner").join("config.toml"))
    }

    /// Load settings from `path`, or from the default location when `path`
    /// is `None`. A missing default file yields defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (Some(p.to_path_buf()), true),
            None => (Self::default_path(), false),
        };

        let mut settings = match path {
            Some(p) if p.exists() => {
                debug!(path = %p.display(), "Loading settings");
                let content = std::fs::read_to_string(&p)?;
                Self::from_toml(&content)?
            }
            Some(p) if explicit => return Err(JobError::missing_file(p)),
            _ => Self::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(content).map_err(|e| JobError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// The configured `run.seed`, or `Omit` when unset.
    pub fn default_seed(&self) -> Result<SeedChoice> {
        SeedChoice::try_from(self.run.seed.clone())
    }

    fn validate(&self) -> Result<()> {
        if self.run.threads == Some(0) {
            return Err(JobError::Config("run.threads must be at least 1".into()));
        }
        self.default_seed()?;
        if self.poll.read_retry.is_zero() || self.poll.open_retry.is_zero() {
            return Err(JobError::Config("poll intervals must be non-zero".into()));
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        let env = |key: &str| std::env::var(key).ok().and_then(|v| normalized_non_empty(&v));
        if let Some(v) = env(GENERAX_ENV) {
            self.binaries.generax = v;
        }
        if let Some(v) = env(RAXML_ENV) {
            self.binaries.raxml = v;
        }
        if let Some(v) = env(MPIRUN_ENV) {
            self.binaries.mpirun = v;
        }
    }
}

fn normalized_non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Worker count to hand to a tool: the requested count, or every core.
pub fn resolve_threads(requested: Option<usize>) -> usize {
    requested.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn partial_toml_keeps_defaults() {
        let s = Settings::from_toml(
            r#"
            [binaries]
            generax = "/opt/generax/bin/generax"

            [poll]
            open_retry = "2s"
            read_retry = "50ms"
            "#,
        )
        .unwrap();
        assert_eq!(s.binaries.generax, "/opt/generax/bin/generax");
        assert_eq!(s.binaries.raxml, DEFAULT_RAXML_BIN);
        assert_eq!(s.poll.open_retry, Duration::from_secs(2));
        assert_eq!(s.poll.read_retry, Duration::from_millis(50));
        assert_eq!(s.run.threads, None);
    }

    #[test]
    fn zero_threads_rejected() {
        let err = Settings::from_toml("[run]\nthreads = 0\n").unwrap_err();
        assert!(matches!(err, JobError::Config(_)));
    }

    #[test]
    fn run_seed_accepts_loose_encodings() {
        let cases = [
            ("seed = true", SeedChoice::Generate),
            ("seed = false", SeedChoice::Omit),
            ("seed = 7", SeedChoice::Explicit(7)),
            ("seed = \"123\"", SeedChoice::Explicit(123)),
        ];
        for (line, expected) in cases {
            let s = Settings::from_toml(&format!("[run]\n{line}\n")).unwrap();
            assert_eq!(s.default_seed().unwrap(), expected, "{line}");
        }
        assert_eq!(Settings::default().default_seed().unwrap(), SeedChoice::Omit);
    }

    #[test]
    fn unrecognized_run_seed_rejected() {
        for line in ["seed = 1.5", "seed = -3", "seed = \"abc\"", "seed = [1]"] {
            let err = Settings::from_toml(&format!("[run]\n{line}\n")).unwrap_err();
            assert!(matches!(err, JobError::Config(_)), "{line}");
        }
    }

    #[test]
    fn explicit_missing_file_is_prerequisite_error() {
        let err = Settings::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, JobError::MissingPrerequisite { what: "file", .. }));
    }

    #[test]
    fn blank_values_are_ignored() {
        assert_eq!(normalized_non_empty("   "), None);
        assert_eq!(normalized_non_empty(" raxml "), Some("raxml".to_string()));
    }

    #[test]
    fn resolve_threads_prefers_request() {
        assert_eq!(resolve_threads(Some(3)), 3);
        assert!(resolve_threads(None) >= 1);
    }
}
