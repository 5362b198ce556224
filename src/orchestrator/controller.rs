//! Calculation lifecycle.
//!
//! prepare -> assemble inputs -> run job (log streamed) -> collect -> record.
//! A failed job leaves its working directory in place and no output
//! directory behind.

use crate::assemble::{prepare_reconciliation, write_ml_input, write_reconciliation_input};
use crate::config::{resolve_threads, Settings};
use crate::engine::generax::{self, GeneraxOptions, RecModel};
use crate::engine::raxml::{self, RaxmlOptions};
use crate::engine::{run_job, JobPlan};
use crate::error::{JobError, Result};
use crate::model::{CalcRequest, CalcType, InfoEvent, JobEvent, RunRecord, SeedChoice};
use crate::orchestrator::post_process::{self, Collected};
use crate::orchestrator::prepare::{prepare_calc, PreparedRun};
use crate::orchestrator::record::record;
use crate::tree::Tree;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct MlTreeRequest {
    pub calc: CalcRequest,
    pub bootstrap: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileRequest {
    pub calc: CalcRequest,
    pub species_tree: Option<Tree>,
    pub allow_horizontal_transfer: bool,
}

/// Outcome of a successful calculation.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub output_dir: PathBuf,
    pub record: RunRecord,
    pub collected: Collected,
}

fn job_plan(
    command: crate::engine::ToolCommand,
    prepared: &PreparedRun,
    required_files: Vec<String>,
    log_file: &str,
    calc: &CalcRequest,
    settings: &Settings,
) -> JobPlan {
    JobPlan {
        command,
        working_dir: prepared.working_dir.clone(),
        required_files,
        log_file: calc.log_to_sink.then(|| PathBuf::from(log_file)),
        poll: settings.poll,
    }
}

/// Create the output directory, layer in previous trees, collect, record.
fn finish(
    prepared: &PreparedRun,
    calc_type: CalcType,
    cmd: &str,
    event_tx: &UnboundedSender<JobEvent>,
    collect: impl FnOnce(&Path, &Path) -> Result<Collected>,
) -> Result<RunSummary> {
    let output_dir = &prepared.output_dir;
    std::fs::create_dir(output_dir)?;

    let carried = post_process::carry_forward(&prepared.existing_trees, output_dir)?;
    if carried > 0 {
        let _ = event_tx.send(JobEvent::Info(InfoEvent::CarriedForward { count: carried }));
    }

    let mut collected = collect(prepared.working_dir.as_path(), output_dir.as_path())?;
    collected.carried_forward = carried;

    let record = record(
        output_dir,
        calc_type,
        &prepared.model,
        cmd,
        &prepared.dataset_snapshot,
        prepared.start_time,
    )?;

    let shown = std::fs::canonicalize(output_dir).unwrap_or_else(|_| output_dir.clone());
    let _ = event_tx.send(JobEvent::Info(InfoEvent::WroteResults { path: shown }));
    info!(
        dir = %output_dir.display(),
        elapsed = %humantime::format_duration(prepared.started.elapsed()),
        "Calculation finished"
    );

    Ok(RunSummary {
        run_dir: prepared.run_dir.clone(),
        output_dir: output_dir.clone(),
        record,
        collected,
    })
}

/// Maximum-likelihood tree search with RAxML-NG, optionally with
/// bootstrap replicates.
pub async fn generate_ml_tree(
    req: &MlTreeRequest,
    settings: &Settings,
    event_tx: &UnboundedSender<JobEvent>,
) -> Result<RunSummary> {
    let prepared = prepare_calc(&req.calc, CalcType::MlTree)?;

    let written = write_ml_input(&prepared.dataset, prepared.tree.as_ref(), &prepared.working_dir)?;

    // ML runs are always seeded so they can be reproduced from the record.
    let seed = match req.calc.seed {
        SeedChoice::Omit => SeedChoice::Generate,
        other => other,
    };
    let opts = RaxmlOptions {
        binary: settings.binaries.raxml.clone(),
        model: prepared.model.clone(),
        starting_tree: prepared.tree.is_some(),
        bootstrap: req.bootstrap,
        seed,
        threads: resolve_threads(req.calc.threads.or(settings.run.threads)),
        extra_args: req.calc.extra_args.clone(),
    };
    let command = raxml::raxml_command(&opts)?;
    let cmd = command.display();

    let required = written.iter().map(|f| f.to_string()).collect();
    let plan = job_plan(command, &prepared, required, raxml::LOG_FILE, &req.calc, settings);
    run_job(&plan, event_tx).await?;

    let bootstrap = req.bootstrap;
    finish(&prepared, CalcType::MlTree, &cmd, event_tx, |working, output| {
        post_process::collect_ml(working, output, bootstrap)
    })
}

/// Reconcile a gene tree against a species tree with GeneRax.
pub async fn reconcile(
    req: &ReconcileRequest,
    settings: &Settings,
    event_tx: &UnboundedSender<JobEvent>,
) -> Result<RunSummary> {
    let prepared = prepare_calc(&req.calc, CalcType::Reconciliation)?;
    let gene_tree = prepared.tree.as_ref().ok_or_else(|| {
        JobError::Config("a dataset, model, and tree are required for reconciliation".into())
    })?;

    let input = prepare_reconciliation(&prepared.dataset, gene_tree, req.species_tree.as_ref())?;
    write_reconciliation_input(&input, &prepared.model, &prepared.working_dir)?;

    let opts = GeneraxOptions {
        binary: settings.binaries.generax.clone(),
        mpirun: settings.binaries.mpirun.clone(),
        rec_model: RecModel::from_horizontal_transfer(req.allow_horizontal_transfer),
        seed: req.calc.seed,
        threads: resolve_threads(req.calc.threads.or(settings.run.threads)),
        extra_args: req.calc.extra_args.clone(),
    };
    let command = generax::generax_command(&opts)?;
    let cmd = command.display();

    let required = generax::REQUIRED_FILES.iter().map(|f| f.to_string()).collect();
    let plan = job_plan(command, &prepared, required, generax::LOG_FILE, &req.calc, settings);
    run_job(&plan, event_tx).await?;

    finish(
        &prepared,
        CalcType::Reconciliation,
        &cmd,
        event_tx,
        post_process::collect_reconciliation,
    )
}
