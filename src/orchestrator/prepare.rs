//! Calculation preparation.
//!
//! Resolves a previous run and explicit arguments into concrete inputs and
//! creates a fresh run directory:
//!
//! ```text
//! <run>/input/dataset.csv   dataset snapshot
//! <run>/working/            tool working directory
//! <run>/output/             created after the tool succeeds
//! ```

use crate::dataset::Dataset;
use crate::error::{JobError, Result};
use crate::model::{CalcRequest, CalcType};
use crate::orchestrator::record::read_record;
use crate::tree::Tree;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use std::time::Instant;
use time::OffsetDateTime;
use tracing::{debug, info};

pub const INPUT_DIR: &str = "input";
pub const WORKING_DIR: &str = "working";
pub const OUTPUT_DIR: &str = "output";
pub const DATASET_FILE: &str = "dataset.csv";

/// A tree file from a previous run's output, held in memory so it survives
/// an overwrite of that run's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarriedTree {
    pub file_name: String,
    pub contents: String,
}

#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run_dir: PathBuf,
    pub working_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Dataset snapshot path, relative to `run_dir`.
    pub dataset_snapshot: PathBuf,
    pub dataset: Dataset,
    pub model: String,
    pub tree: Option<Tree>,
    pub existing_trees: Vec<CarriedTree>,
    pub start_time: OffsetDateTime,
    pub started: Instant,
}

/// What a previous run directory contributes.
#[derive(Debug, Default)]
struct PreviousRun {
    dataset: Option<Dataset>,
    model: Option<String>,
    tree: Option<Tree>,
    trees: Vec<CarriedTree>,
}

fn load_previous(dir: &Path) -> Result<PreviousRun> {
    if !dir.is_dir() {
        return Err(JobError::MissingPrerequisite {
            what: "previous run directory",
            name: dir.display().to_string(),
        });
    }
    let output = dir.join(OUTPUT_DIR);
    let record = read_record(&output)?;

    let dataset_path = dir.join(&record.dataset);
    let dataset = if dataset_path.is_file() {
        Some(Dataset::from_csv(&dataset_path)?)
    } else {
        None
    };

    let tree_path = output.join("tree.newick");
    let tree = if tree_path.is_file() {
        Some(Tree::from_file(&tree_path)?)
    } else {
        None
    };

    let mut trees = Vec::new();
    for entry in std::fs::read_dir(&output)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "newick") {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            trees.push(CarriedTree {
                file_name,
                contents: std::fs::read_to_string(&path)?,
            });
        }
    }
    trees.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    debug!(dir = %dir.display(), trees = trees.len(), "Loaded previous run");
    Ok(PreviousRun {
        dataset,
        model: Some(record.model),
        tree,
        trees,
    })
}

/// `<base>_<10 random letters>`.
pub fn generate_output_name(calc_type: CalcType) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..10)
        .filter_map(|_| LETTERS.choose(&mut rng).map(|&b| b as char))
        .collect();
    format!("{}_{suffix}", calc_type.output_base())
}

/// Resolve inputs and lay out a fresh run directory.
///
/// Explicit request fields override what the previous run provides. An
/// existing output directory is an error unless `overwrite` is set, in
/// which case it is removed first.
pub fn prepare_calc(req: &CalcRequest, calc_type: CalcType) -> Result<PreparedRun> {
    let previous = match req.previous_dir.as_deref() {
        Some(dir) => load_previous(dir)?,
        None => PreviousRun::default(),
    };

    let dataset = req
        .dataset
        .clone()
        .or(previous.dataset)
        .ok_or_else(|| JobError::Config("a dataset is required for this calculation".into()))?;
    let model = req
        .model
        .clone()
        .or(previous.model)
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| JobError::Config("a model is required for this calculation".into()))?;
    let tree = req.tree.clone().or(previous.tree);

    let run_dir = req
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(generate_output_name(calc_type)));
    if run_dir.exists() {
        if !req.overwrite {
            return Err(JobError::OutputExists(run_dir));
        }
        info!(dir = %run_dir.display(), "Removing existing output directory");
        std::fs::remove_dir_all(&run_dir)?;
    }

    let input_dir = run_dir.join(INPUT_DIR);
    let working_dir = run_dir.join(WORKING_DIR);
    std::fs::create_dir_all(&input_dir)?;
    std::fs::create_dir(&working_dir)?;

    let dataset_snapshot = Path::new(INPUT_DIR).join(DATASET_FILE);
    dataset.to_csv(&run_dir.join(&dataset_snapshot))?;

    Ok(PreparedRun {
        output_dir: run_dir.join(OUTPUT_DIR),
        working_dir,
        run_dir,
        dataset_snapshot,
        dataset,
        model,
        tree,
        existing_trees: previous.trees,
        start_time: OffsetDateTime::now_utc(),
        started: Instant::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SequenceRow;
    use tempfile::TempDir;

    fn request(output: PathBuf) -> CalcRequest {
        CalcRequest {
            dataset: Some(
                Dataset::new(vec![SequenceRow::new("u1", "s1", "MK").with_alignment("MK")])
                    .unwrap(),
            ),
            model: Some("LG+G8".into()),
            output: Some(output),
            ..Default::default()
        }
    }

    #[test]
    fn lays_out_run_directory() {
        let tmp = TempDir::new().unwrap();
        let run = tmp.path().join("run");
        let prepared = prepare_calc(&request(run.clone()), CalcType::MlTree).unwrap();
        assert!(run.join("input/dataset.csv").is_file());
        assert!(prepared.working_dir.is_dir());
        assert!(!prepared.output_dir.exists());
        assert_eq!(prepared.model, "LG+G8");
    }

    #[test]
    fn existing_output_needs_overwrite() {
        let tmp = TempDir::new().unwrap();
        let run = tmp.path().join("run");
        std::fs::create_dir(&run).unwrap();
        std::fs::write(run.join("stale"), "x").unwrap();

        let err = prepare_calc(&request(run.clone()), CalcType::MlTree).unwrap_err();
        assert!(matches!(err, JobError::OutputExists(_)));

        let mut req = request(run.clone());
        req.overwrite = true;
        prepare_calc(&req, CalcType::MlTree).unwrap();
        assert!(!run.join("stale").exists());
    }

    #[test]
    fn missing_model_is_config_error() {
        let tmp = TempDir::new().unwrap();
        let mut req = request(tmp.path().join("run"));
        req.model = None;
        let err = prepare_calc(&req, CalcType::MlTree).unwrap_err();
        assert!(matches!(err, JobError::Config(_)));
    }

    #[test]
    fn generated_names_use_calc_prefix() {
        let name = generate_output_name(CalcType::Reconciliation);
        let suffix = name.strip_prefix("generax_reconciliation_").unwrap();
        assert_eq!(suffix.len(), 10);
        assert!(suffix.chars().all(|c| c.is_ascii_alphabetic()));
    }
}
