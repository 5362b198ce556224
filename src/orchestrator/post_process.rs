//! Result collection: move a finished tool's artifacts into the stable
//! output layout.
//!
//! ```text
//! output/tree.newick                      canonical result tree
//! output/tree_events.newick               reconciliation events (optional)
//! output/reconciliations/                 per-family reconciliation output
//! output/bootstrap_replicates/bsmsa_NNNN.phy
//! output/bootstrap_replicates/bootstraps.newick
//! ```

use crate::engine::{generax, raxml};
use crate::error::{JobError, Result};
use crate::orchestrator::prepare::CarriedTree;
use std::path::Path;
use tracing::{debug, warn};

pub const TREE_FILE: &str = "tree.newick";
pub const EVENTS_TREE_FILE: &str = "tree_events.newick";
pub const RECONCILIATIONS_DIR: &str = "reconciliations";
pub const BOOTSTRAP_DIR: &str = "bootstrap_replicates";
pub const BOOTSTRAP_TREES_FILE: &str = "bootstraps.newick";

/// What a collection pass produced, for presentation layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    pub carried_forward: usize,
    pub events_tree: bool,
    pub bootstrap_replicates: usize,
}

// The tool claimed success, so a missing artifact is a consistency error,
// not a tool failure.
fn copy_required(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_file() {
        return Err(JobError::MissingArtifact(src.to_path_buf()));
    }
    std::fs::copy(src, dst)?;
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

/// Write trees from a previous run into `output_dir` before new results
/// land, so files the new run does not produce are kept.
pub fn carry_forward(trees: &[CarriedTree], output_dir: &Path) -> Result<usize> {
    for tree in trees {
        std::fs::write(output_dir.join(&tree.file_name), &tree.contents)?;
    }
    Ok(trees.len())
}

/// Collect RAxML-NG output. With `bootstrap`, the support tree becomes the
/// canonical tree and replicate alignments are renumbered to four digits.
pub fn collect_ml(working_dir: &Path, output_dir: &Path, bootstrap: bool) -> Result<Collected> {
    let best = if bootstrap {
        raxml::SUPPORT_TREE
    } else {
        raxml::BEST_TREE
    };
    copy_required(&working_dir.join(best), &output_dir.join(TREE_FILE))?;

    let mut collected = Collected::default();
    if !bootstrap {
        return Ok(collected);
    }

    let bs_out = output_dir.join(BOOTSTRAP_DIR);
    std::fs::create_dir_all(&bs_out)?;

    let mut replicates: Vec<(u32, std::path::PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(working_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(n) = raxml::bootstrap_replicate_number(&name.to_string_lossy()) {
            replicates.push((n, entry.path()));
        }
    }
    replicates.sort_by_key(|(n, _)| *n);

    for (n, src) in &replicates {
        std::fs::copy(src, bs_out.join(format!("bsmsa_{n:04}.phy")))?;
    }
    copy_required(
        &working_dir.join(raxml::BOOTSTRAP_TREES),
        &bs_out.join(BOOTSTRAP_TREES_FILE),
    )?;

    debug!(replicates = replicates.len(), "Collected bootstrap replicates");
    collected.bootstrap_replicates = replicates.len();
    Ok(collected)
}

/// Collect GeneRax output. Only the reconciled gene tree is required; the
/// per-family reconciliation directory and events tree are copied when
/// present.
pub fn collect_reconciliation(working_dir: &Path, output_dir: &Path) -> Result<Collected> {
    copy_required(
        &working_dir.join(generax::GENE_TREE_RESULT),
        &output_dir.join(TREE_FILE),
    )?;

    let mut collected = Collected::default();
    let reconciliations = working_dir.join(generax::RECONCILIATIONS_DIR);
    if !reconciliations.is_dir() {
        warn!(dir = %reconciliations.display(), "No reconciliation output to collect");
        return Ok(collected);
    }

    let rec_out = output_dir.join(RECONCILIATIONS_DIR);
    copy_dir_all(&reconciliations, &rec_out)?;

    let events = rec_out.join(generax::EVENTS_TREE);
    if events.is_file() {
        std::fs::copy(&events, output_dir.join(EVENTS_TREE_FILE))?;
        collected.events_tree = true;
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn names(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn previous_trees_are_kept_alongside_new_result() {
        let tmp = TempDir::new().unwrap();
        let working = tmp.path().join("working");
        let output = tmp.path().join("output");
        std::fs::create_dir_all(&working).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(working.join(raxml::BEST_TREE), "(a,b);").unwrap();

        let prior = vec![
            CarriedTree {
                file_name: "A.newick".into(),
                contents: "(x,y);".into(),
            },
            CarriedTree {
                file_name: "B.newick".into(),
                contents: "(y,z);".into(),
            },
        ];
        assert_eq!(carry_forward(&prior, &output).unwrap(), 2);
        collect_ml(&working, &output, false).unwrap();

        let got = names(&output);
        let want: BTreeSet<String> = ["A.newick", "B.newick", "tree.newick"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn new_result_replaces_carried_tree_of_same_name() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(raxml::BEST_TREE), "(new);").unwrap();
        let out = tmp.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let prior = vec![CarriedTree {
            file_name: TREE_FILE.into(),
            contents: "(old);".into(),
        }];
        carry_forward(&prior, &out).unwrap();
        collect_ml(tmp.path(), &out, false).unwrap();
        assert_eq!(std::fs::read_to_string(out.join(TREE_FILE)).unwrap(), "(new);");
    }

    #[test]
    fn bootstrap_replicates_are_zero_padded() {
        let tmp = TempDir::new().unwrap();
        let working = tmp.path().join("working");
        let output = tmp.path().join("output");
        std::fs::create_dir_all(&working).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(working.join(raxml::SUPPORT_TREE), "(a,b)100;").unwrap();
        std::fs::write(working.join(raxml::BOOTSTRAP_TREES), "(a,b);\n(a,b);\n").unwrap();
        std::fs::write(working.join("alignment.phy.raxml.bootstrapMSA.7.phy"), "7").unwrap();
        std::fs::write(working.join("alignment.phy.raxml.bootstrapMSA.23.phy"), "23").unwrap();

        for _ in 0..2 {
            let collected = collect_ml(&working, &output, true).unwrap();
            assert_eq!(collected.bootstrap_replicates, 2);
            let got = names(&output.join(BOOTSTRAP_DIR));
            let want: BTreeSet<String> = ["bootstraps.newick", "bsmsa_0007.phy", "bsmsa_0023.phy"]
                .into_iter()
                .map(String::from)
                .collect();
            assert_eq!(got, want);
        }
        assert_eq!(
            std::fs::read_to_string(output.join(BOOTSTRAP_DIR).join("bsmsa_0023.phy")).unwrap(),
            "23"
        );
    }

    #[test]
    fn missing_best_tree_is_missing_artifact() {
        let tmp = TempDir::new().unwrap();
        let err = collect_ml(tmp.path(), tmp.path(), false).unwrap_err();
        assert!(matches!(err, JobError::MissingArtifact(_)));
    }

    #[test]
    fn reconciliation_copies_events_when_present() {
        let tmp = TempDir::new().unwrap();
        let working = tmp.path().join("working");
        let output = tmp.path().join("output");
        let rec = working.join(generax::RECONCILIATIONS_DIR);
        std::fs::create_dir_all(working.join("result/results/reconcile")).unwrap();
        std::fs::create_dir_all(&rec).unwrap();
        std::fs::create_dir_all(&output).unwrap();
        std::fs::write(working.join(generax::GENE_TREE_RESULT), "(u1,u2);").unwrap();
        std::fs::write(rec.join(generax::EVENTS_TREE), "(u1,u2)D;").unwrap();
        std::fs::write(rec.join("reconcile_transfers.txt"), "").unwrap();

        let collected = collect_reconciliation(&working, &output).unwrap();
        assert!(collected.events_tree);
        assert!(output.join(EVENTS_TREE_FILE).is_file());
        assert!(output
            .join(RECONCILIATIONS_DIR)
            .join("reconcile_transfers.txt")
            .is_file());
    }
}
