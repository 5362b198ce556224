//! Input assembly: turn a dataset and trees into the files a tool expects.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::dataset::{Dataset, SequenceRow};
use crate::error::{JobError, Result};
use crate::tree::{NewickFormat, Tree};

pub const CONTROL_FILE: &str = "control.txt";
pub const ALIGNMENT_FILE: &str = "alignment.phy";
pub const GENE_TREE_FILE: &str = "gene_tree.newick";
pub const SPECIES_TREE_FILE: &str = "species_tree.newick";
pub const MAPPING_FILE: &str = "mapping.link";
pub const ML_TREE_FILE: &str = "tree.newick";

/// Species id to the uids that belong to it, in gene-tree leaf order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappingTable {
    entries: Vec<(String, Vec<String>)>,
    index: HashMap<String, usize>,
}

impl MappingTable {
    pub fn insert(&mut self, species: &str, uid: &str) {
        match self.index.get(species) {
            Some(&i) => self.entries[i].1.push(uid.to_string()),
            None => {
                self.index.insert(species.to_string(), self.entries.len());
                self.entries
                    .push((species.to_string(), vec![uid.to_string()]));
            }
        }
    }

    pub fn species(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(s, _)| s.as_str())
    }

    pub fn uids(&self, species: &str) -> Option<&[String]> {
        self.index.get(species).map(|&i| self.entries[i].1.as_slice())
    }

    pub fn species_of(&self, uid: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, uids)| uids.iter().any(|u| u == uid))
            .map(|(s, _)| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One `species:uid1;uid2` line per species.
    pub fn to_link_text(&self) -> String {
        let mut out = String::new();
        for (species, uids) in &self.entries {
            out.push_str(species);
            out.push(':');
            out.push_str(&uids.join(";"));
            out.push('\n');
        }
        out
    }
}

/// Everything the reconciliation tool needs, held in memory.
#[derive(Debug, Clone)]
pub struct ReconcileInput {
    pub gene_tree: Tree,
    pub species_tree: Tree,
    pub mapping: MappingTable,
    pub dataset: Dataset,
}

/// Build reconciliation inputs from a dataset and a gene tree whose leaves
/// are dataset uids.
///
/// Both trees come back strictly bifurcating: polytomies are split into
/// ladders in an arbitrary but fixed way because the reconciliation tool
/// only accepts binary trees. That is a policy of this function, not a
/// claim about the biology. All species tree branch lengths and supports
/// are set to 1, since the tool does not use them.
///
/// With `species_tree` given, it is pruned to the species present;
/// otherwise a ladder over the sorted species ids is used.
pub fn prepare_reconciliation(
    dataset: &Dataset,
    gene_tree: &Tree,
    species_tree: Option<&Tree>,
) -> Result<ReconcileInput> {
    let mut gene_tree = gene_tree.clone();
    gene_tree.resolve_polytomies();

    let leaves = gene_tree.leaf_names();
    if !leaves.iter().any(|uid| dataset.get(uid).is_some()) {
        return Err(JobError::EmptyInput(
            "no gene tree leaf matches a dataset uid".to_string(),
        ));
    }

    let mut mapping = MappingTable::default();
    for uid in &leaves {
        let row = leaf_row(dataset, uid)?;
        let ott = row
            .ott
            .as_deref()
            .filter(|o| !o.trim().is_empty())
            .ok_or_else(|| {
                JobError::DataConsistency(format!("row '{uid}' has no species id (ott)"))
            })?;
        mapping.insert(ott, uid);
    }

    let in_tree: HashSet<&str> = leaves.iter().map(String::as_str).collect();
    let dataset = dataset.retain_uids(&in_tree);

    let wanted: HashSet<&str> = mapping.species().collect();
    let mut species_tree = match species_tree {
        Some(full) => {
            let pruned = full.prune_to(&wanted)?;
            let present: HashSet<String> = pruned.leaf_names().into_iter().collect();
            if let Some(missing) = mapping.species().find(|s| !present.contains(*s)) {
                return Err(JobError::DataConsistency(format!(
                    "species '{missing}' is not in the species tree"
                )));
            }
            pruned
        }
        None => {
            let mut names: Vec<&str> = mapping.species().collect();
            names.sort_unstable();
            Tree::caterpillar(&names)?
        }
    };
    species_tree.resolve_polytomies();
    species_tree.set_all_branch_metrics(1.0);

    debug!(
        sequences = dataset.len(),
        species = mapping.len(),
        "Prepared reconciliation input"
    );

    Ok(ReconcileInput {
        gene_tree,
        species_tree,
        mapping,
        dataset,
    })
}

/// The dataset row a tree leaf names. It must exist and be kept, or the
/// alignment written from the dataset would not cover the tree.
fn leaf_row<'a>(dataset: &'a Dataset, uid: &str) -> Result<&'a SequenceRow> {
    match dataset.get(uid) {
        Some(row) if row.keep => Ok(row),
        Some(_) => Err(JobError::DataConsistency(format!(
            "tree leaf '{uid}' refers to a dataset row that is not kept"
        ))),
        None => Err(JobError::DataConsistency(format!(
            "tree leaf '{uid}' is not in the dataset"
        ))),
    }
}

/// GeneRax families file for a single family named `reconcile`.
pub fn control_text(model: &str) -> String {
    [
        "[FAMILIES]".to_string(),
        "- reconcile".to_string(),
        format!("starting_gene_tree = {GENE_TREE_FILE}"),
        format!("alignment = {ALIGNMENT_FILE}"),
        format!("mapping = {MAPPING_FILE}"),
        format!("subst_model = {model}"),
    ]
    .join("\n")
}

/// Write the reconciliation file set into `dir`, which must exist.
pub fn write_reconciliation_input(input: &ReconcileInput, model: &str, dir: &Path) -> Result<()> {
    std::fs::write(dir.join(CONTROL_FILE), control_text(model))?;
    input.dataset.write_phy(&dir.join(ALIGNMENT_FILE))?;
    input
        .gene_tree
        .write(&dir.join(GENE_TREE_FILE), NewickFormat::Lengths)?;
    input
        .species_tree
        .write(&dir.join(SPECIES_TREE_FILE), NewickFormat::Full)?;
    std::fs::write(dir.join(MAPPING_FILE), input.mapping.to_link_text())?;
    Ok(())
}

/// Write the ML tree search inputs into `dir` and return the file names
/// the tool will need.
pub fn write_ml_input(dataset: &Dataset, tree: Option<&Tree>, dir: &Path) -> Result<Vec<&'static str>> {
    if let Some(tree) = tree {
        for uid in tree.leaf_names() {
            leaf_row(dataset, &uid)?;
        }
    }
    dataset.write_phy(&dir.join(ALIGNMENT_FILE))?;
    let mut written = vec![ALIGNMENT_FILE];
    if let Some(tree) = tree {
        tree.write(&dir.join(ML_TREE_FILE), NewickFormat::Lengths)?;
        written.push(ML_TREE_FILE);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SequenceRow;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        Dataset::new(vec![
            SequenceRow::new("u1", "s1", "MK").with_alignment("MK"),
            SequenceRow::new("u2", "s2", "MV").with_alignment("MV"),
            SequenceRow::new("u3", "s1", "MA").with_alignment("MA"),
            SequenceRow::new("u9", "s9", "MA").with_alignment("MA"),
        ])
        .unwrap()
    }

    #[test]
    fn two_species_scenario() {
        let ds = Dataset::new(vec![
            SequenceRow::new("u1", "s1", "MK").with_alignment("MK"),
            SequenceRow::new("u2", "s2", "MV").with_alignment("MV"),
        ])
        .unwrap();
        let gene = Tree::parse("(u1,u2);").unwrap();
        let input = prepare_reconciliation(&ds, &gene, None).unwrap();

        let mut species = input.species_tree.leaf_names();
        species.sort();
        assert_eq!(species, vec!["s1", "s2"]);
        assert_eq!(input.mapping.to_link_text(), "s1:u1\ns2:u2\n");

        let dir = TempDir::new().unwrap();
        write_reconciliation_input(&input, "LG+G8", dir.path()).unwrap();
        let control = std::fs::read_to_string(dir.path().join(CONTROL_FILE)).unwrap();
        assert!(control.contains("subst_model = LG+G8"));
        for f in [ALIGNMENT_FILE, GENE_TREE_FILE, SPECIES_TREE_FILE, MAPPING_FILE] {
            assert!(dir.path().join(f).exists(), "{f} missing");
        }
    }

    #[test]
    fn restricts_dataset_and_groups_by_species() {
        let gene = Tree::parse("(u1,u2,u3);").unwrap();
        let input = prepare_reconciliation(&dataset(), &gene, None).unwrap();

        assert!(input.gene_tree.is_bifurcating());
        assert_eq!(input.dataset.len(), 3);
        assert!(input.dataset.get("u9").is_none());
        assert_eq!(input.mapping.uids("s1").unwrap(), ["u1", "u3"]);
        assert_eq!(input.mapping.species_of("u2"), Some("s2"));
        assert_eq!(input.mapping.to_link_text(), "s1:u1;u3\ns2:u2\n");
    }

    #[test]
    fn supplied_species_tree_is_pruned_and_normalized() {
        let gene = Tree::parse("(u1,u2);").unwrap();
        let species = Tree::parse("((s1:0.3,s2:0.1)80:0.2,s7:0.5,s8:1);").unwrap();
        let input = prepare_reconciliation(&dataset(), &gene, Some(&species)).unwrap();
        assert_eq!(
            input.species_tree.to_newick(NewickFormat::Full),
            "(s1:1,s2:1)1:1;"
        );
    }

    #[test]
    fn species_missing_from_species_tree() {
        let gene = Tree::parse("(u1,u2);").unwrap();
        let species = Tree::parse("(s1,s7);").unwrap();
        let err = prepare_reconciliation(&dataset(), &gene, Some(&species)).unwrap_err();
        assert!(matches!(err, JobError::DataConsistency(ref m) if m.contains("s2")));
    }

    #[test]
    fn unknown_leaf_is_consistency_error() {
        let gene = Tree::parse("(u1,ghost);").unwrap();
        let err = prepare_reconciliation(&dataset(), &gene, None).unwrap_err();
        assert!(matches!(err, JobError::DataConsistency(ref m) if m.contains("ghost")));
    }

    #[test]
    fn leaf_on_dropped_row_is_consistency_error() {
        let mut rows = dataset().rows().to_vec();
        rows[1].keep = false;
        let ds = Dataset::new(rows).unwrap();
        let gene = Tree::parse("((u1,u2),u3);").unwrap();
        let err = prepare_reconciliation(&ds, &gene, None).unwrap_err();
        assert!(matches!(err, JobError::DataConsistency(ref m) if m.contains("u2")));
        assert!(err.is_pre_launch());
    }

    #[test]
    fn ml_starting_tree_must_match_kept_rows() {
        let dir = TempDir::new().unwrap();
        let tree = Tree::parse("(u1,ghost);").unwrap();
        let err = write_ml_input(&dataset(), Some(&tree), dir.path()).unwrap_err();
        assert!(matches!(err, JobError::DataConsistency(ref m) if m.contains("ghost")));
        assert!(!dir.path().join(ALIGNMENT_FILE).exists());

        let mut rows = dataset().rows().to_vec();
        rows[0].keep = false;
        let ds = Dataset::new(rows).unwrap();
        let tree = Tree::parse("(u1,u2);").unwrap();
        let err = write_ml_input(&ds, Some(&tree), dir.path()).unwrap_err();
        assert!(matches!(err, JobError::DataConsistency(ref m) if m.contains("u1")));
    }

    #[test]
    fn disjoint_tree_is_empty_input() {
        let gene = Tree::parse("(x1,x2);").unwrap();
        let err = prepare_reconciliation(&dataset(), &gene, None).unwrap_err();
        assert!(matches!(err, JobError::EmptyInput(_)));
    }

    #[test]
    fn ml_input_lists_written_files() {
        let dir = TempDir::new().unwrap();
        let written = write_ml_input(&dataset(), None, dir.path()).unwrap();
        assert_eq!(written, vec![ALIGNMENT_FILE]);

        let tree = Tree::parse("((u1,u2),u3);").unwrap();
        let written = write_ml_input(&dataset(), Some(&tree), dir.path()).unwrap();
        assert_eq!(written, vec![ALIGNMENT_FILE, ML_TREE_FILE]);
    }
}
