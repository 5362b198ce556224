use crate::config::Settings;
use crate::dataset::Dataset;
use crate::model::{CalcRequest, JobEvent, SeedChoice};
use crate::orchestrator::{self, MlTreeRequest, ReconcileRequest, RunSummary};
use crate::tree::Tree;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
/// `LineWriter` flushes after every line so tool logs appear as they arrive.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "phylo-runner",
    version,
    about = "Run RAxML-NG and GeneRax as managed jobs"
)]
pub struct Cli {
    /// Settings file (defaults to <config dir>/phylo-runner/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Print the run record as JSON instead of a text summary
    #[arg(long, global = true)]
    pub json: bool,

    /// Run silently: suppress all output except errors
    #[arg(long, global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Maximum-likelihood tree search with RAxML-NG
    MlTree {
        #[command(flatten)]
        calc: CalcArgs,

        /// Also infer bootstrap replicates and a support tree
        #[arg(long)]
        bootstrap: bool,

        /// RAxML-NG binary to use
        #[arg(long)]
        raxml_binary: Option<String>,
    },
    /// Reconcile a gene tree with a species tree using GeneRax
    Reconcile {
        #[command(flatten)]
        calc: CalcArgs,

        /// Species tree in Newick format (leaves are ott ids)
        #[arg(long)]
        species_tree: Option<PathBuf>,

        /// Use the UndatedDTL model instead of UndatedDL
        #[arg(long)]
        allow_horizontal_transfer: bool,

        /// GeneRax binary to use
        #[arg(long)]
        generax_binary: Option<String>,

        /// MPI launcher used when --threads is above 1
        #[arg(long)]
        mpirun_binary: Option<String>,
    },
}

#[derive(Debug, Args, Clone)]
pub struct CalcArgs {
    /// Previous run directory to take the dataset, model and tree from
    #[arg(long)]
    pub previous_dir: Option<PathBuf>,

    /// Dataset CSV (uid, ott, sequence, alignment columns)
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Substitution model, e.g. LG+G8
    #[arg(long)]
    pub model: Option<String>,

    /// Starting or gene tree in Newick format
    #[arg(long)]
    pub tree: Option<PathBuf>,

    /// Run directory to create
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Replace the run directory if it exists
    #[arg(long)]
    pub overwrite: bool,

    /// Worker count (default: all cores)
    #[arg(long, value_parser = parse_threads)]
    pub threads: Option<usize>,

    /// Seed: an integer, `true` to generate one, or `false` for none
    #[arg(long)]
    pub seed: Option<SeedChoice>,

    /// Do not stream the tool's own log while it runs
    #[arg(long)]
    pub no_log: bool,

    /// Extra arguments passed to the tool verbatim
    #[arg(last = true)]
    pub extra: Vec<String>,
}

fn parse_threads(s: &str) -> std::result::Result<usize, String> {
    match s.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("'{s}' is not a positive integer")),
        Ok(n) => Ok(n),
    }
}

fn load_tree(path: &Path) -> Result<Tree> {
    Tree::from_file(path).with_context(|| format!("failed to read tree {}", path.display()))
}

/// Build a `CalcRequest` from CLI arguments, loading any referenced files.
/// `default_seed` applies when `--seed` is absent.
pub fn build_calc_request(args: &CalcArgs, default_seed: SeedChoice) -> Result<CalcRequest> {
    let dataset = args
        .dataset
        .as_deref()
        .map(|p| {
            Dataset::from_csv(p).with_context(|| format!("failed to read dataset {}", p.display()))
        })
        .transpose()?;
    let tree = args.tree.as_deref().map(load_tree).transpose()?;

    Ok(CalcRequest {
        previous_dir: args.previous_dir.clone(),
        dataset,
        model: args.model.clone(),
        tree,
        output: args.output.clone(),
        overwrite: args.overwrite,
        threads: args.threads,
        seed: args.seed.unwrap_or(default_seed),
        log_to_sink: !args.no_log,
        extra_args: args.extra.clone(),
    })
}

type CalcTask = tokio::task::JoinHandle<std::result::Result<RunSummary, crate::error::JobError>>;

/// Spawn the selected calculation; events flow to `evt_tx` until it ends.
fn start_calc(
    command: Commands,
    mut settings: Settings,
    evt_tx: mpsc::UnboundedSender<JobEvent>,
) -> Result<CalcTask> {
    let default_seed = settings.default_seed()?;
    let handle = match command {
        Commands::MlTree {
            calc,
            bootstrap,
            raxml_binary,
        } => {
            if let Some(b) = raxml_binary {
                settings.binaries.raxml = b;
            }
            let req = MlTreeRequest {
                calc: build_calc_request(&calc, default_seed)?,
                bootstrap,
            };
            tokio::spawn(async move { orchestrator::generate_ml_tree(&req, &settings, &evt_tx).await })
        }
        Commands::Reconcile {
            calc,
            species_tree,
            allow_horizontal_transfer,
            generax_binary,
            mpirun_binary,
        } => {
            if let Some(b) = generax_binary {
                settings.binaries.generax = b;
            }
            if let Some(b) = mpirun_binary {
                settings.binaries.mpirun = b;
            }
            let req = ReconcileRequest {
                calc: build_calc_request(&calc, default_seed)?,
                species_tree: species_tree.as_deref().map(load_tree).transpose()?,
                allow_horizontal_transfer,
            };
            tokio::spawn(async move { orchestrator::reconcile(&req, &settings, &evt_tx).await })
        }
    };
    Ok(handle)
}

pub async fn run(args: Cli) -> Result<()> {
    let settings = Settings::load(args.config.as_deref()).context("failed to load settings")?;

    let (out_tx, out_handle) = if args.silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };

    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<JobEvent>();
    let handle = start_calc(args.command.clone(), settings, evt_tx)?;

    while let Some(ev) = evt_rx.recv().await {
        let Some(tx) = out_tx.as_ref() else {
            // Silent mode: events are consumed without output.
            continue;
        };
        let line = match ev {
            JobEvent::Started { command } => OutputLine::Stderr(format!("Running '{command}'")),
            JobEvent::LogLine(line) => OutputLine::Stdout(line),
            JobEvent::Info(info) => OutputLine::Stderr(info.to_message()),
            JobEvent::Finished { code } if code != 0 => {
                OutputLine::Stderr(format!("Tool exited with code {code}"))
            }
            JobEvent::Finished { .. } => continue,
        };
        let _ = tx.send(line);
    }

    let summary = handle
        .await
        .context("calculation task failed")?
        .context("calculation failed")?;

    if let Some(tx) = out_tx.as_ref() {
        if args.json {
            let out = serde_json::to_string_pretty(&summary.record)?;
            let _ = tx.send(OutputLine::Stdout(out));
        } else {
            for line in crate::text_summary::build_text_summary(&summary).lines {
                let _ = tx.send(OutputLine::Stdout(line));
            }
        }
    }

    drop(out_tx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }

    Ok(())
}
