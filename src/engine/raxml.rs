//! RAxML-NG command line and file names.

use crate::assemble::{ALIGNMENT_FILE, ML_TREE_FILE};
use crate::engine::ToolCommand;
use crate::error::{JobError, Result};
use crate::model::SeedChoice;

// RAxML-NG names its outputs after the alignment file.
pub const LOG_FILE: &str = "alignment.phy.raxml.log";
pub const BEST_TREE: &str = "alignment.phy.raxml.bestTree";
pub const SUPPORT_TREE: &str = "alignment.phy.raxml.support";
pub const BOOTSTRAP_TREES: &str = "alignment.phy.raxml.bootstraps";
pub const BOOTSTRAP_MSA_PREFIX: &str = "alignment.phy.raxml.bootstrapMSA.";

#[derive(Debug, Clone)]
pub struct RaxmlOptions {
    pub binary: String,
    pub model: String,
    /// Start from `tree.newick` in the working directory.
    pub starting_tree: bool,
    /// Run `--all` with bootstrap replicates instead of a plain `--search`.
    pub bootstrap: bool,
    pub seed: SeedChoice,
    pub threads: usize,
    pub extra_args: Vec<String>,
}

impl RaxmlOptions {
    pub fn required_files(&self) -> Vec<&'static str> {
        let mut files = vec![ALIGNMENT_FILE];
        if self.starting_tree {
            files.push(ML_TREE_FILE);
        }
        files
    }
}

pub fn raxml_command(opts: &RaxmlOptions) -> Result<ToolCommand> {
    if opts.model.trim().is_empty() {
        return Err(JobError::Config("a substitution model is required".to_string()));
    }
    if opts.threads == 0 {
        return Err(JobError::Config("threads must be at least 1".to_string()));
    }

    let mut cmd = ToolCommand::new("raxml-ng", &opts.binary);
    cmd.arg(if opts.bootstrap { "--all" } else { "--search" })
        .args(["--msa", ALIGNMENT_FILE]);
    if opts.starting_tree {
        cmd.args(["--tree", ML_TREE_FILE]);
    }
    cmd.args(["--model", opts.model.trim()]);

    if let Some(seed) = opts.seed.resolve() {
        cmd.arg("--seed").arg(seed.to_string());
    }
    cmd.arg("--threads").arg(opts.threads.to_string());

    if opts.bootstrap {
        cmd.args(["--bs-trees", "autoMRE", "--bs-write-msa"]);
    }
    cmd.args(opts.extra_args.iter().cloned());
    Ok(cmd)
}

/// Replicate number of a `...bootstrapMSA.<n>.phy` file name.
pub fn bootstrap_replicate_number(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(BOOTSTRAP_MSA_PREFIX)?
        .strip_suffix(".phy")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RaxmlOptions {
        RaxmlOptions {
            binary: "raxml-ng".into(),
            model: "LG+G8".into(),
            starting_tree: false,
            bootstrap: false,
            seed: SeedChoice::Explicit(7),
            threads: 2,
            extra_args: vec![],
        }
    }

    #[test]
    fn search_command() {
        let cmd = raxml_command(&options()).unwrap();
        assert_eq!(
            cmd.display(),
            "raxml-ng --search --msa alignment.phy --model LG+G8 --seed 7 --threads 2"
        );
    }

    #[test]
    fn bootstrap_with_tree() {
        let mut opts = options();
        opts.bootstrap = true;
        opts.starting_tree = true;
        opts.seed = SeedChoice::Omit;
        opts.extra_args = vec!["--redo".into()];
        let cmd = raxml_command(&opts).unwrap();
        assert_eq!(cmd.args[0], "--all");
        assert_eq!(cmd.flag_value("--tree"), Some("tree.newick"));
        assert_eq!(cmd.flag_value("--bs-trees"), Some("autoMRE"));
        assert!(!cmd.has_flag("--seed"));
        assert_eq!(cmd.args.last().map(String::as_str), Some("--redo"));
        assert_eq!(opts.required_files(), vec!["alignment.phy", "tree.newick"]);
    }

    #[test]
    fn empty_model_is_config_error() {
        let mut opts = options();
        opts.model = " ".into();
        assert!(matches!(raxml_command(&opts), Err(JobError::Config(_))));
    }

    #[test]
    fn replicate_numbers() {
        assert_eq!(
            bootstrap_replicate_number("alignment.phy.raxml.bootstrapMSA.7.phy"),
            Some(7)
        );
        assert_eq!(
            bootstrap_replicate_number("alignment.phy.raxml.bootstrapMSA.23.phy"),
            Some(23)
        );
        assert_eq!(bootstrap_replicate_number("alignment.phy.raxml.bestTree"), None);
    }
}
