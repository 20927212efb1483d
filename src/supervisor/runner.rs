// src/supervisor/runner.rs

//! The supervision loop for one daemon.
//!
//! ```text
//! stage assets ──► build command ──► loop {
//!     destroyed? ─────────────────────────► stop
//!     spawn ──► publish handle (fail ─► kill, stop)
//!     drain stdout+stderr ──► wait        (destroy/kill ─► kill, reap)
//!     destroyed? / clear handle fails ────► stop
//!     classify exit code ──► stop | restart now | sleep(retry delay)
//! }
//! ```
//!
//! Within one [`Supervisor`] attempts are strictly sequential: there is never
//! more than one child process alive for it.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::assets::{AssetStager, StageOutcome};
use crate::errors::WardenError;

use super::handle::{ProcessObserver, SupervisorHandle, SupervisorId};
use super::policy::{ExitDecision, RetryTracker, StopReason};
use super::sink::LogSink;
use super::spec::SubprocessSpec;

/// Collaborators shared by every supervisor of one orchestrator.
#[derive(Clone)]
pub struct SupervisorContext {
    pub stager: AssetStager,
    pub observer: Arc<dyn ProcessObserver>,
    pub sink: Arc<dyn LogSink>,
}

/// Summary of a finished [`Supervisor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorExit {
    pub spawns: u32,
    pub reason: StopReason,
}

pub struct Supervisor {
    id: SupervisorId,
    spec: SubprocessSpec,
    ctx: SupervisorContext,
    destroyed: Arc<AtomicBool>,
    cancel: watch::Sender<bool>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("id", &self.id)
            .field("tag", &self.spec.tag())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(id: SupervisorId, spec: SubprocessSpec, ctx: SupervisorContext) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            id,
            spec,
            ctx,
            destroyed: Arc::new(AtomicBool::new(false)),
            cancel,
        }
    }

    pub fn id(&self) -> SupervisorId {
        self.id
    }

    pub fn spec(&self) -> &SubprocessSpec {
        &self.spec
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Request termination. Idempotent, callable from any thread, returns
    /// immediately; the running loop kills its child and unwinds.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::Release);
        self.cancel.send_replace(true);
    }

    /// Run the supervision loop to completion.
    ///
    /// Meant for the worker: it only returns once the loop has stopped.
    /// Failures are logged through the sink and reported as
    /// [`StopReason::Failed`], never propagated.
    pub async fn run(&self) -> SupervisorExit {
        let mut spawns = 0;
        let reason = match self.run_inner(&mut spawns).await {
            Ok(reason) => reason,
            Err(err) => {
                self.ctx.sink.failure(self.spec.tag(), &err);
                StopReason::Failed(format!("{err:#}"))
            }
        };

        info!(
            supervisor = self.id,
            tag = %self.spec.tag(),
            spawns,
            ?reason,
            "supervisor loop finished"
        );

        SupervisorExit { spawns, reason }
    }

    async fn run_inner(&self, spawns: &mut u32) -> Result<StopReason> {
        if self.stage_assets().await? == StageOutcome::Cancelled {
            return Ok(StopReason::Cancelled);
        }

        let mut command = self.build_command()?;
        let mut tracker = RetryTracker::new(self.spec.retries(), self.spec.retry_delay());
        let mut cancel_rx = self.cancel.subscribe();

        loop {
            if self.is_destroyed() {
                return Ok(StopReason::Cancelled);
            }

            let mut child = command.spawn().map_err(|e| {
                WardenError::SpawnError(format!("{:?}: {e}", self.spec.cmd()))
            })?;
            *spawns += 1;

            let (handle, mut kill_rx) = SupervisorHandle::new(self.id, child.id());
            debug!(supervisor = self.id, pid = ?handle.pid(), attempt = tracker.attempt(), "subprocess spawned");

            if !self.ctx.observer.process_started(handle.clone()) {
                warn!(supervisor = self.id, "control queue closed; releasing subprocess");
                handle.destroy();
                if let Err(e) = child.kill().await {
                    warn!(supervisor = self.id, error = %e, "failed to kill unpublished subprocess");
                }
                return Ok(StopReason::PublishFailed);
            }

            let status = self
                .drain_and_wait(&mut child, &mut cancel_rx, &mut kill_rx)
                .await?;
            let code = exit_code(status);
            info!(supervisor = self.id, tag = %self.spec.tag(), exit_code = code, "subprocess exited");

            if self.is_destroyed() {
                return Ok(StopReason::Cancelled);
            }
            if !self.ctx.observer.process_cleared(self.id) {
                return Ok(StopReason::PublishFailed);
            }

            let class = self.spec.exit_codes().classify(code);
            match tracker.on_exit(class, code) {
                ExitDecision::Stop(reason) => return Ok(reason),
                ExitDecision::RestartNow => {
                    debug!(supervisor = self.id, exit_code = code, ?class, "restarting immediately");
                }
                ExitDecision::RetryAfter(delay) => {
                    debug!(
                        supervisor = self.id,
                        exit_code = code,
                        attempt = tracker.attempt(),
                        ?delay,
                        "retrying after delay"
                    );
                    if !self.backoff(delay, &mut cancel_rx).await {
                        return Ok(StopReason::Cancelled);
                    }
                }
            }
        }
    }

    async fn stage_assets(&self) -> Result<StageOutcome> {
        let stager = self.ctx.stager.clone();
        let assets = self.spec.assets().clone();
        let destroyed = Arc::clone(&self.destroyed);

        tokio::task::spawn_blocking(move || stager.stage(&assets, &destroyed))
            .await
            .context("asset staging task failed")?
    }

    fn build_command(&self) -> Result<Command> {
        let (program, args) = self
            .spec
            .cmd()
            .split_first()
            .ok_or_else(|| anyhow!("subprocess command is empty"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = self.spec.cwd() {
            cmd.current_dir(cwd);
        }
        cmd.envs(self.spec.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }

    /// Forward output until both streams close, then reap the child.
    ///
    /// A destroy request or a handle kill interrupts either phase; the child
    /// is then killed and reaped here, on the worker.
    async fn drain_and_wait(
        &self,
        child: &mut Child,
        cancel_rx: &mut watch::Receiver<bool>,
        kill_rx: &mut watch::Receiver<bool>,
    ) -> Result<ExitStatus> {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let exited = tokio::select! {
            status = async {
                self.drain(stdout, stderr).await;
                child.wait().await
            } => Some(status),
            _ = wait_until_set(cancel_rx) => None,
            _ = wait_until_set(kill_rx) => None,
        };

        match exited {
            Some(status) => status.context("waiting for subprocess"),
            None => {
                debug!(supervisor = self.id, "kill requested; terminating subprocess");
                if let Err(e) = child.start_kill() {
                    warn!(supervisor = self.id, error = %e, "failed to kill subprocess");
                }
                child.wait().await.context("reaping killed subprocess")
            }
        }
    }

    async fn drain(&self, stdout: Option<ChildStdout>, stderr: Option<ChildStderr>) {
        tokio::join!(self.pump(stdout), self.pump(stderr));
    }

    async fn pump<R>(&self, stream: Option<R>)
    where
        R: AsyncRead + Unpin,
    {
        let Some(stream) = stream else {
            return;
        };
        let mut segments = BufReader::new(stream).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(bytes)) => {
                    let line = String::from_utf8_lossy(&bytes);
                    self.ctx.sink.line(self.spec.tag(), line.trim_end_matches('\r'));
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(supervisor = self.id, error = %e, "output stream read failed");
                    break;
                }
            }
        }
    }

    /// Sleep for the retry delay; `false` if destroyed meanwhile.
    async fn backoff(&self, delay: Duration, cancel_rx: &mut watch::Receiver<bool>) -> bool {
        if delay.is_zero() {
            return !self.is_destroyed();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = wait_until_set(cancel_rx) => false,
        }
    }
}

async fn wait_until_set(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|set| *set).await.is_err() {
        // Sender gone: nobody can set it any more.
        std::future::pending::<()>().await;
    }
}

/// Exit code of a finished process; `128 + signal` for signalled processes
/// on unix, `-1` when nothing is known.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
