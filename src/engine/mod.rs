//! Job launcher: prerequisite checks, supervised spawn and exit classification.
//!
//! A job is one run of an external binary inside its working directory. The
//! binary is started by a supervisor task that waits for it and hands the
//! captured output back through a single-slot channel, while the caller's
//! task follows the tool's log file (see [`follow`]).

pub mod follow;
pub mod generax;
pub mod raxml;

use crate::error::{JobError, Result};
use crate::model::{JobEvent, PollIntervals};
use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Serializes job launches: at most one external job runs per process.
static LAUNCH_LOCK: Mutex<()> = Mutex::const_new(());

/// A fully built command line for an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Short name used in messages, e.g. `generax`.
    pub tool: String,
    pub program: String,
    pub args: Vec<String>,
    /// Binaries that must resolve before the job may start.
    pub requires: Vec<String>,
}

impl ToolCommand {
    pub fn new(tool: &str, program: &str) -> Self {
        Self {
            tool: tool.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            requires: vec![program.to_string()],
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Value following `flag`, if the flag is present.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Space-joined command line, as recorded in run metadata.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything needed to run one job.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub command: ToolCommand,
    pub working_dir: PathBuf,
    /// File names that must exist inside `working_dir`.
    pub required_files: Vec<String>,
    /// Tool log to follow, relative to `working_dir`.
    pub log_file: Option<PathBuf>,
    pub poll: PollIntervals,
}

/// Captured result of a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    /// Exit code, or -1 when the process was killed by a signal.
    pub code: i32,
    /// Captured stdout followed by captured stderr.
    pub output: String,
}

/// One in-flight external process.
pub struct JobHandle {
    pid: Option<u32>,
    supervisor: JoinHandle<()>,
    result: oneshot::Receiver<std::io::Result<Output>>,
}

impl JobHandle {
    /// OS process id, for callers that need to terminate the job early.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until the supervisor has collected the process's exit status.
    pub fn is_alive(&self) -> bool {
        !self.supervisor.is_finished()
    }

    /// Wait for the process to exit and take its captured output.
    pub async fn wait(self) -> Result<JobOutput> {
        let output = self.result.await.map_err(|_| {
            JobError::Io(std::io::Error::other(
                "job supervisor ended without reporting a result",
            ))
        })??;
        if let Err(e) = self.supervisor.await {
            warn!(error = %e, "Job supervisor task failed after reporting");
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(JobOutput {
            code: output.status.code().unwrap_or(-1),
            output: text,
        })
    }
}

// Program paths with a directory component are made absolute so they keep
// pointing at the same file once the child runs in its own directory.
pub(crate) fn resolve_program(program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.is_relative() && path.components().count() > 1 {
        Ok(std::env::current_dir()?.join(path))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Check that `binary` can be started at all by running it with no
/// arguments. Its exit code is ignored.
async fn probe_binary(binary: &str) -> Result<()> {
    let program = resolve_program(binary)?;
    let status = Command::new(&program)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    match status {
        Ok(status) => {
            debug!(binary, code = ?status.code(), "Probed binary");
            Ok(())
        }
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
            Err(JobError::missing_binary(binary))
        }
        Err(e) => Err(e.into()),
    }
}

/// Verify prerequisites, then start `command` inside `working_dir`.
///
/// Every failure here happens before the job process is spawned. The
/// child gets `working_dir` as its own current directory; the caller's
/// current directory is never touched.
pub async fn launch<S: AsRef<str>>(
    command: &ToolCommand,
    working_dir: &Path,
    required_files: &[S],
) -> Result<JobHandle> {
    for binary in &command.requires {
        probe_binary(binary).await?;
    }

    if !working_dir.is_dir() {
        return Err(JobError::MissingPrerequisite {
            what: "working directory",
            name: working_dir.display().to_string(),
        });
    }
    for name in required_files {
        let path = working_dir.join(name.as_ref());
        if !path.exists() {
            return Err(JobError::missing_file(path));
        }
    }

    let program = resolve_program(&command.program)?;
    let child = Command::new(&program)
        .args(&command.args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => JobError::missing_binary(command.program.clone()),
            _ => JobError::Io(e),
        })?;
    let pid = child.id();
    debug!(pid = ?pid, program = %program.display(), "Spawned job");

    let (tx, rx) = oneshot::channel();
    let supervisor = tokio::spawn(async move {
        let _ = tx.send(child.wait_with_output().await);
    });

    Ok(JobHandle {
        pid,
        supervisor,
        result: rx,
    })
}

/// Zero is success; anything else becomes `ToolFailed` carrying the code
/// and the full captured output.
pub fn classify(tool: &str, output: JobOutput) -> Result<JobOutput> {
    if output.code == 0 {
        Ok(output)
    } else {
        Err(JobError::ToolFailed {
            tool: tool.to_string(),
            code: output.code,
            output: output.output,
        })
    }
}

/// Launch a job, stream its log to `event_tx` while it runs, and classify
/// its exit.
pub async fn run_job(plan: &JobPlan, event_tx: &mpsc::UnboundedSender<JobEvent>) -> Result<JobOutput> {
    let _guard = LAUNCH_LOCK.lock().await;

    let command_text = plan.command.display();
    info!(command = %command_text, dir = %plan.working_dir.display(), "Running job");
    let handle = launch(&plan.command, &plan.working_dir, &plan.required_files).await?;
    let _ = event_tx.send(JobEvent::Started {
        command: command_text,
    });

    if let Some(log) = plan.log_file.as_ref() {
        let lines = follow::follow_log(plan.working_dir.join(log), || handle.is_alive(), plan.poll);
        futures::pin_mut!(lines);
        while let Some(line) = lines.next().await {
            let _ = event_tx.send(JobEvent::LogLine(line));
        }
    }

    let pid = handle.pid();
    let output = handle.wait().await?;
    let _ = event_tx.send(JobEvent::Finished { code: output.code });
    if output.code != 0 {
        warn!(tool = %plan.command.tool, pid = ?pid, code = output.code, "Job failed");
    }
    classify(&plan.command.tool, output)
}
