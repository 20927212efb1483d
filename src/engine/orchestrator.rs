// src/engine/orchestrator.rs

//! The job state machine.
//!
//! Every method here runs on the control thread. Long-running work is handed
//! to the [`Worker`]; its results come back as [`ControlEvent`]s tagged with
//! the job they belong to, and anything that no longer matches the current
//! state is dropped as stale.

use std::mem;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::assets::{AssetSource, AssetStager};
use crate::host::{JobResolver, PayloadStore, PayloadWriter, Presenter, StopAction, update_target};
use crate::supervisor::{
    LogSink, SubprocessSpec, Supervisor, SupervisorContext, SupervisorExit, SupervisorHandle,
    SupervisorId,
};
use crate::update::{
    DownloadEvent, DownloadRequest, Downloader, InstallReport, InstallStatus, Installer, Listener,
    SessionId, UpdateJob, UpdatePhase, pipeline,
};

use super::control::{ControlObserver, ControlQueue};
use super::state::{DaemonSlot, OrchestratorState, StartDecision, StartPlan, StateSnapshot, plan_start};
use super::worker::Worker;
use super::{ControlEvent, Flow, StartRequest};

/// Host capabilities the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn JobResolver>,
    pub downloader: Arc<dyn Downloader>,
    pub installer: Arc<dyn Installer>,
    pub presenter: Arc<dyn Presenter>,
    pub store: Arc<dyn PayloadStore>,
    pub assets: Arc<dyn AssetSource>,
    pub sink: Arc<dyn LogSink>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Version of the package currently installed.
    pub installed_version: String,
    /// Marker file recording that asset staging completed.
    pub asset_marker: PathBuf,
    /// Where update packages are downloaded to.
    pub download_dir: PathBuf,
    pub poll_interval: Duration,
    /// Title shown for update downloads.
    pub title: String,
    /// Exit once the active job stops on its own.
    pub exit_when_stopped: bool,
}

/// Resolve a start payload into the job it asks for.
pub fn decide(
    resolver: &dyn JobResolver,
    installed_version: &str,
    payload: Option<&str>,
) -> Result<StartDecision> {
    let requested = resolver.resolve_version(payload);
    match update_target(installed_version, requested.as_deref()) {
        Some(version) => Ok(StartDecision::Update(version)),
        None => Ok(StartDecision::Daemon(resolver.resolve_daemon_spec(payload)?)),
    }
}

pub struct Orchestrator {
    state: OrchestratorState,
    collab: Collaborators,
    options: OrchestratorOptions,
    control: ControlQueue,
    worker: Worker,
    supervisor_ctx: SupervisorContext,
    /// Version of the live update, `None` when no update is live. Worker
    /// steps read it to notice they have been superseded.
    live: watch::Sender<Option<String>>,
    /// Live update version at the last presentation stop.
    stopped_version: Option<String>,
    /// Last start payload; what a bare restart resumes.
    payload: Option<String>,
    payload_writer: PayloadWriter,
    /// Whether the running presentation is up.
    presenting: bool,
    next_supervisor: SupervisorId,
    exit_requested: bool,
    destroyed: bool,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Build the orchestrator, read the persisted payload and spawn the
    /// worker. Must be called within a tokio runtime, before the control loop
    /// starts.
    pub fn new(collab: Collaborators, options: OrchestratorOptions, control: ControlQueue) -> Self {
        let supervisor_ctx = SupervisorContext {
            stager: AssetStager::new(Arc::clone(&collab.assets), options.asset_marker.clone()),
            observer: Arc::new(ControlObserver::new(control.clone())),
            sink: Arc::clone(&collab.sink),
        };
        let (live, _) = watch::channel(None);
        let payload = collab.store.load();
        let payload_writer = PayloadWriter::spawn(Arc::clone(&collab.store));

        Self {
            state: OrchestratorState::Idle,
            collab,
            options,
            control,
            worker: Worker::spawn(),
            supervisor_ctx,
            live,
            stopped_version: None,
            payload,
            payload_writer,
            presenting: false,
            next_supervisor: 0,
            exit_requested: false,
            destroyed: false,
        }
    }

    pub fn control(&self) -> &ControlQueue {
        &self.control
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Bring up the running presentation unless it is already up.
    pub fn show_running(&mut self) {
        if self.presenting {
            return;
        }
        self.presenting = true;
        self.collab
            .presenter
            .show_running(StopAction::new(self.control.clone()));
    }

    /// React to one control event.
    pub fn handle(&mut self, event: ControlEvent) -> Flow {
        match event {
            ControlEvent::Start(request) => self.on_start(request),
            ControlEvent::Destroy => {
                self.destroy();
                return Flow::Exit;
            }
            ControlEvent::ProcessStarted(handle) => self.on_process_started(handle),
            ControlEvent::ProcessCleared(supervisor) => self.on_process_cleared(supervisor),
            ControlEvent::DaemonFinished { supervisor, exit } => {
                self.on_daemon_finished(supervisor, exit)
            }
            ControlEvent::Download { version, event } => self.on_download_event(&version, event),
            ControlEvent::InstallStarted { version, session } => {
                self.on_install_started(&version, session)
            }
            ControlEvent::Install { version, report } => self.on_install_report(&version, report),
            ControlEvent::UpdateFailed { version } => self.on_update_failed(&version),
        }

        if self.exit_requested {
            info!("active job stopped; exiting");
            self.destroy();
            Flow::Exit
        } else {
            Flow::Continue
        }
    }

    /// Stop accepting worker jobs and wait for the queued ones to unwind.
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }

    // ---------------------------------------------------------------------
    // Start
    // ---------------------------------------------------------------------

    fn on_start(&mut self, request: StartRequest) {
        if let Some(payload) = request.payload {
            self.payload_writer.save(&payload);
            self.payload = Some(payload);
        }
        let payload = self.payload.clone();

        let decision = match decide(
            self.collab.resolver.as_ref(),
            &self.options.installed_version,
            payload.as_deref(),
        ) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = ?err, "failed to resolve start request");
                self.stop_presentation();
                return;
            }
        };

        match plan_start(self.state.active_spec(), self.state.update_version(), decision) {
            StartPlan::KeepDaemon => debug!("equivalent daemon already running"),
            StartPlan::KeepUpdate => debug!("update to this version already live"),
            StartPlan::StartDaemon(spec) => {
                self.stop_update();
                self.show_running();
                self.start_daemon(spec);
            }
            StartPlan::StartUpdate(version) => {
                self.stop_daemon();
                self.show_running();
                self.start_update(version);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Daemon
    // ---------------------------------------------------------------------

    fn start_daemon(&mut self, spec: SubprocessSpec) {
        self.stop_daemon();

        self.next_supervisor += 1;
        let supervisor = Arc::new(Supervisor::new(
            self.next_supervisor,
            spec,
            self.supervisor_ctx.clone(),
        ));

        let job = Arc::clone(&supervisor);
        let control = self.control.clone();
        let queued = self.worker.submit(async move {
            let exit = job.run().await;
            control.post(ControlEvent::DaemonFinished {
                supervisor: job.id(),
                exit,
            });
        });

        if !queued {
            warn!("worker stopped; cannot start daemon");
            self.stop_presentation();
            return;
        }

        info!(
            supervisor = supervisor.id(),
            tag = %supervisor.spec().tag(),
            "daemon scheduled"
        );
        self.state = OrchestratorState::Daemon(DaemonSlot {
            supervisor,
            handle: None,
        });
    }

    fn stop_daemon(&mut self) {
        match mem::take(&mut self.state) {
            OrchestratorState::Daemon(slot) => {
                info!(supervisor = slot.supervisor.id(), "stopping daemon");
                slot.supervisor.destroy();
                if let Some(handle) = slot.handle {
                    handle.destroy();
                }
            }
            other => self.state = other,
        }
    }

    fn on_process_started(&mut self, handle: SupervisorHandle) {
        match &mut self.state {
            OrchestratorState::Daemon(slot)
                if slot.supervisor.id() == handle.supervisor()
                    && !slot.supervisor.is_destroyed() =>
            {
                debug!(supervisor = handle.supervisor(), pid = ?handle.pid(), "daemon process started");
                slot.handle = Some(handle);
            }
            _ => {
                debug!(supervisor = handle.supervisor(), "process of a stopped supervisor; killing");
                handle.destroy();
            }
        }
    }

    fn on_process_cleared(&mut self, supervisor: SupervisorId) {
        if let OrchestratorState::Daemon(slot) = &mut self.state {
            if slot.supervisor.id() == supervisor {
                slot.handle = None;
            }
        }
    }

    fn on_daemon_finished(&mut self, supervisor: SupervisorId, exit: SupervisorExit) {
        let current = matches!(
            &self.state,
            OrchestratorState::Daemon(slot)
                if slot.supervisor.id() == supervisor && !slot.supervisor.is_destroyed()
        );
        if !current {
            debug!(supervisor, reason = ?exit.reason, "stopped supervisor finished");
            return;
        }

        info!(supervisor, spawns = exit.spawns, reason = ?exit.reason, "daemon stopped on its own");
        self.state = OrchestratorState::Idle;
        self.stop_presentation();
    }

    // ---------------------------------------------------------------------
    // Update
    // ---------------------------------------------------------------------

    fn is_live(&self, version: &str) -> bool {
        self.live.borrow().as_deref() == Some(version)
    }

    fn start_update(&mut self, version: String) {
        self.stop_update();
        self.live.send_replace(Some(version.clone()));

        let resolver = &self.collab.resolver;
        let (Some(file_name), Some(uri)) = (
            resolver.update_file_name(&version),
            resolver.update_download_uri(&version),
        ) else {
            warn!(version = %version, "no package location for requested version");
            let mut job = UpdateJob::new(version, PathBuf::new());
            job.phase = UpdatePhase::Failed;
            self.state = OrchestratorState::Update(job);
            self.stop_presentation();
            return;
        };

        let file = self.options.download_dir.join(file_name);
        let mut job = UpdateJob::new(version.clone(), file.clone());
        let request = DownloadRequest {
            uri,
            destination: file,
            title: self.options.title.clone(),
            description: format!("{} {}", self.options.title, version),
        };

        let ticket = match self.collab.downloader.enqueue(request) {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(version = %version, error = ?err, "failed to enqueue update download");
                job.phase = UpdatePhase::Failed;
                self.state = OrchestratorState::Update(job);
                self.stop_presentation();
                return;
            }
        };

        info!(version = %version, download = ticket.id, "update download started");
        job.download = Some(ticket.id);
        job.download_listener = Some(self.listen_downloads(version.clone(), ticket.events));
        self.state = OrchestratorState::Update(job);

        let queued = self.worker.submit(pipeline::poll_download(
            Arc::clone(&self.collab.downloader),
            ticket.id,
            version,
            self.live.subscribe(),
            self.control.clone(),
            self.options.poll_interval,
        ));
        if !queued {
            warn!("worker stopped; cannot watch download");
            self.fail_update();
            self.stop_presentation();
        }
    }

    fn listen_downloads(
        &self,
        version: String,
        mut events: mpsc::UnboundedReceiver<DownloadEvent>,
    ) -> Listener {
        let control = self.control.clone();
        Listener::spawn(async move {
            while let Some(event) = events.recv().await {
                let event = ControlEvent::Download {
                    version: version.clone(),
                    event,
                };
                if !control.post(event) {
                    break;
                }
            }
        })
    }

    fn on_download_event(&mut self, version: &str, event: DownloadEvent) {
        if !self.is_live(version) {
            debug!(version, ?event, "stale download event ignored");
            return;
        }
        let OrchestratorState::Update(job) = &mut self.state else {
            return;
        };

        match event {
            DownloadEvent::Completed { id, success } => {
                if job.download != Some(id) || job.phase != UpdatePhase::Downloading {
                    debug!(version, download = id, "completion for another download ignored");
                    return;
                }
                job.download_listener = None;

                if success {
                    self.start_install();
                } else {
                    warn!(version, download = id, "update download failed");
                    self.fail_update();
                    self.stop_presentation();
                }
            }
            DownloadEvent::NotificationClicked { ids } => {
                if job.download.is_some_and(|id| ids.contains(&id)) {
                    info!(version, "download notification clicked; stopping");
                    self.stop_presentation();
                }
            }
        }
    }

    /// Hand the downloaded package to the worker, which opens the session
    /// and reports it back as [`ControlEvent::InstallStarted`].
    fn start_install(&mut self) {
        let OrchestratorState::Update(job) = &mut self.state else {
            return;
        };
        job.phase = UpdatePhase::Installing;
        let version = job.version.clone();
        info!(version = %version, file = ?job.file, "installing update");

        let queued = self.worker.submit(pipeline::install_package(
            Arc::clone(&self.collab.installer),
            job.file.clone(),
            version,
            self.live.subscribe(),
            self.control.clone(),
        ));
        if !queued {
            warn!("worker stopped; cannot install package");
            self.fail_update();
            self.stop_presentation();
        }
    }

    fn on_install_started(&mut self, version: &str, session: SessionId) {
        let awaiting = self.is_live(version)
            && matches!(
                &self.state,
                OrchestratorState::Update(job)
                    if job.phase == UpdatePhase::Installing && job.session.is_none()
            );
        if !awaiting {
            debug!(version, session, "session of a stopped update; abandoning");
            self.collab.installer.abandon(session);
            return;
        }
        if let OrchestratorState::Update(job) = &mut self.state {
            debug!(version, session, "install session open");
            job.session = Some(session);
        }
    }

    fn on_install_report(&mut self, version: &str, report: InstallReport) {
        if !self.is_live(version) {
            debug!(version, ?report, "stale install report ignored");
            return;
        }
        let OrchestratorState::Update(job) = &mut self.state else {
            return;
        };
        if job.session != Some(report.session) {
            debug!(version, session = report.session, "report for another session ignored");
            return;
        }
        job.session = None;

        match report.status {
            InstallStatus::Success => {
                info!(version, "update installed");
                self.finish_update();
            }
            InstallStatus::PendingUserAction(Some(intent)) => {
                info!(version, "update waiting for user confirmation");
                self.finish_update();
                self.collab.presenter.confirm_install(&intent);
            }
            InstallStatus::PendingUserAction(None) => {
                warn!(version, "installer wants confirmation but gave no way to ask");
                self.fail_update();
            }
            InstallStatus::Failure(message) => {
                warn!(version, %message, "update install failed");
                self.fail_update();
            }
        }
        self.stop_presentation();
    }

    fn on_update_failed(&mut self, version: &str) {
        if !self.is_live(version) {
            debug!(version, "stale update failure ignored");
            return;
        }
        if matches!(&self.state, OrchestratorState::Update(job) if job.phase == UpdatePhase::Failed)
        {
            return;
        }
        warn!(version, "update failed");
        self.fail_update();
        self.stop_presentation();
    }

    /// Release the live job's resources and keep it around as failed.
    fn fail_update(&mut self) {
        if let OrchestratorState::Update(job) = &mut self.state {
            job.fail(self.collab.downloader.as_ref(), self.collab.installer.as_ref());
        }
    }

    /// The live update reached a terminal non-failure outcome.
    fn finish_update(&mut self) {
        match mem::take(&mut self.state) {
            OrchestratorState::Update(mut job) => {
                job.release(self.collab.downloader.as_ref(), self.collab.installer.as_ref());
            }
            other => self.state = other,
        }
        self.live.send_replace(None);
    }

    fn stop_update(&mut self) {
        self.live.send_replace(None);

        if let Some(wanted) = self.stopped_version.take() {
            let installed = &self.options.installed_version;
            if let Some(wanted) = update_target(installed, Some(&wanted)) {
                self.collab.presenter.version_mismatch(installed, &wanted);
            }
        }

        match mem::take(&mut self.state) {
            OrchestratorState::Update(mut job) => {
                info!(version = %job.version, phase = ?job.phase, "stopping update");
                job.release(self.collab.downloader.as_ref(), self.collab.installer.as_ref());
            }
            other => self.state = other,
        }
    }

    // ---------------------------------------------------------------------
    // Presentation and teardown
    // ---------------------------------------------------------------------

    fn stop_presentation(&mut self) {
        self.presenting = false;
        self.stopped_version = self.live.borrow().clone();
        self.collab.presenter.stop_and_teardown();
        if self.options.exit_when_stopped {
            self.exit_requested = true;
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        info!("tearing down");

        self.stop_daemon();
        self.stop_update();

        let dir = self.options.download_dir.clone();
        self.worker.submit(async move {
            match tokio::fs::remove_dir_all(&dir).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!(path = ?dir, error = %e, "failed to clean download directory");
                }
                _ => debug!(path = ?dir, "download directory cleaned"),
            }
        });

        self.collab.presenter.release();
    }
}
