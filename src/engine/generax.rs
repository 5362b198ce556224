//! GeneRax command line and file names.

use crate::assemble::{ALIGNMENT_FILE, CONTROL_FILE, GENE_TREE_FILE, MAPPING_FILE, SPECIES_TREE_FILE};
use crate::engine::{resolve_program, ToolCommand};
use crate::error::{JobError, Result};
use crate::model::SeedChoice;

/// Output prefix passed to `--prefix`; GeneRax writes everything below it.
pub const RESULT_PREFIX: &str = "result";
pub const LOG_FILE: &str = "result/generax.log";
pub const GENE_TREE_RESULT: &str = "result/results/reconcile/geneTree.newick";
pub const RECONCILIATIONS_DIR: &str = "result/reconciliations";
pub const EVENTS_TREE: &str = "reconcile_events.newick";

pub const REQUIRED_FILES: [&str; 5] = [
    CONTROL_FILE,
    ALIGNMENT_FILE,
    GENE_TREE_FILE,
    SPECIES_TREE_FILE,
    MAPPING_FILE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecModel {
    /// Duplication and loss.
    UndatedDL,
    /// Duplication, transfer and loss.
    UndatedDTL,
}

impl RecModel {
    pub fn as_str(self) -> &'static str {
        match self {
            RecModel::UndatedDL => "UndatedDL",
            RecModel::UndatedDTL => "UndatedDTL",
        }
    }

    pub fn from_horizontal_transfer(allow: bool) -> Self {
        if allow {
            RecModel::UndatedDTL
        } else {
            RecModel::UndatedDL
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneraxOptions {
    pub binary: String,
    /// MPI launcher used when `threads > 1`.
    pub mpirun: String,
    pub rec_model: RecModel,
    pub seed: SeedChoice,
    pub threads: usize,
    /// Appended verbatim after every other argument.
    pub extra_args: Vec<String>,
}

/// Build the GeneRax invocation. GeneRax parallelizes through MPI, so more
/// than one thread wraps the call in `mpirun -np <threads>`.
pub fn generax_command(opts: &GeneraxOptions) -> Result<ToolCommand> {
    if opts.threads == 0 {
        return Err(JobError::Config("threads must be at least 1".to_string()));
    }

    let mut cmd = if opts.threads > 1 {
        // mpirun starts the binary from inside the working directory.
        let binary = resolve_program(&opts.binary)?.display().to_string();
        let mut cmd = ToolCommand::new("generax", &opts.mpirun);
        cmd.requires.push(binary.clone());
        cmd.args(["-np".to_string(), opts.threads.to_string(), binary]);
        cmd
    } else {
        ToolCommand::new("generax", &opts.binary)
    };

    cmd.args(["--families", CONTROL_FILE])
        .args(["--species-tree", SPECIES_TREE_FILE])
        .args(["--prefix", RESULT_PREFIX])
        .args(["--rec-model", opts.rec_model.as_str()]);

    if let Some(seed) = opts.seed.resolve() {
        cmd.arg("--seed").arg(seed.to_string());
    }

    cmd.args(opts.extra_args.iter().cloned());
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> GeneraxOptions {
        GeneraxOptions {
            binary: "generax".into(),
            mpirun: "mpirun".into(),
            rec_model: RecModel::UndatedDL,
            seed: SeedChoice::Omit,
            threads: 1,
            extra_args: vec![],
        }
    }

    #[test]
    fn fixed_flags_come_first() {
        let cmd = generax_command(&options()).unwrap();
        assert_eq!(
            cmd.display(),
            "generax --families control.txt --species-tree species_tree.newick \
             --prefix result --rec-model UndatedDL"
        );
        assert_eq!(cmd.requires, vec!["generax"]);
    }

    #[test]
    fn seed_flag_matches_choice() {
        let mut opts = options();
        assert!(!generax_command(&opts).unwrap().has_flag("--seed"));

        opts.seed = SeedChoice::Explicit(42);
        assert_eq!(generax_command(&opts).unwrap().flag_value("--seed"), Some("42"));

        opts.seed = SeedChoice::Generate;
        let cmd = generax_command(&opts).unwrap();
        let seed = cmd.flag_value("--seed").unwrap();
        assert!(seed.parse::<u64>().is_ok());
    }

    #[test]
    fn threads_wrap_in_mpirun_and_extra_args_go_last() {
        let mut opts = options();
        opts.threads = 4;
        opts.rec_model = RecModel::from_horizontal_transfer(true);
        opts.extra_args = vec!["--strategy".into(), "EVAL".into()];
        let cmd = generax_command(&opts).unwrap();
        assert_eq!(cmd.program, "mpirun");
        assert_eq!(&cmd.args[..3], ["-np", "4", "generax"]);
        assert_eq!(cmd.requires, vec!["mpirun", "generax"]);
        assert_eq!(cmd.flag_value("--rec-model"), Some("UndatedDTL"));
        assert_eq!(&cmd.args[cmd.args.len() - 2..], ["--strategy", "EVAL"]);
    }

    #[test]
    fn relative_binary_under_mpirun_is_made_absolute() {
        let mut opts = options();
        opts.threads = 2;
        opts.binary = "tools/generax".into();
        let cmd = generax_command(&opts).unwrap();
        let binary = std::path::Path::new(&cmd.args[2]);
        assert!(binary.is_absolute());
        assert!(binary.ends_with("tools/generax"));
        assert_eq!(cmd.requires[1], cmd.args[2]);
    }
}
