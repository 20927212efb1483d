//! In-memory stand-ins for the host capabilities.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow, bail};
use tokio::sync::{mpsc, oneshot};

use warden::host::{JobResolver, Presenter, StopAction};
use warden::supervisor::{
    LogSink, ProcessObserver, SubprocessSpec, SupervisorHandle, SupervisorId,
};
use warden::update::{
    DownloadEvent, DownloadId, DownloadRequest, DownloadStatus, DownloadTicket, Downloader,
    InstallReport, InstallSession, InstallStatus, Installer, SessionId,
};

// -------------------------------------------------------------------------
// Downloader
// -------------------------------------------------------------------------

struct FakeDownload {
    request: DownloadRequest,
    status: DownloadStatus,
    events: mpsc::UnboundedSender<DownloadEvent>,
}

#[derive(Default)]
struct DownloadState {
    next_id: DownloadId,
    entries: BTreeMap<DownloadId, FakeDownload>,
    requests: Vec<(DownloadId, DownloadRequest)>,
    removed: Vec<DownloadId>,
    fail_enqueue: bool,
}

/// A downloader that only moves when the test tells it to.
#[derive(Default)]
pub struct FakeDownloader {
    state: Mutex<DownloadState>,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_enqueue(&self, fail: bool) {
        self.state.lock().unwrap().fail_enqueue = fail;
    }

    /// Every request ever enqueued, in order.
    pub fn requests(&self) -> Vec<(DownloadId, DownloadRequest)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_id(&self) -> Option<DownloadId> {
        self.state.lock().unwrap().requests.last().map(|(id, _)| *id)
    }

    pub fn removed(&self) -> Vec<DownloadId> {
        self.state.lock().unwrap().removed.clone()
    }

    /// Write `contents` to the destination and report success.
    pub fn complete(&self, id: DownloadId, contents: &[u8]) {
        self.finish(id, Some(contents), true);
    }

    /// Write `contents` and flip the status without emitting an event.
    pub fn complete_silently(&self, id: DownloadId, contents: &[u8]) {
        self.finish(id, Some(contents), false);
    }

    pub fn fail(&self, id: DownloadId) {
        self.finish(id, None, true);
    }

    pub fn click(&self, id: DownloadId) {
        let state = self.state.lock().unwrap();
        if let Some(entry) = state.entries.get(&id) {
            let _ = entry
                .events
                .send(DownloadEvent::NotificationClicked { ids: vec![id] });
        }
    }

    fn finish(&self, id: DownloadId, contents: Option<&[u8]>, notify: bool) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        let success = match contents {
            Some(bytes) => {
                let destination = &entry.request.destination;
                if let Some(parent) = destination.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(destination, bytes).unwrap();
                true
            }
            None => false,
        };
        entry.status = if success {
            DownloadStatus::Successful
        } else {
            DownloadStatus::Failed
        };
        if notify {
            let _ = entry.events.send(DownloadEvent::Completed { id, success });
        }
    }
}

impl Downloader for FakeDownloader {
    fn enqueue(&self, request: DownloadRequest) -> Result<DownloadTicket> {
        let mut state = self.state.lock().unwrap();
        if state.fail_enqueue {
            bail!("download manager unavailable");
        }
        state.next_id += 1;
        let id = state.next_id;
        let (tx, events) = mpsc::unbounded_channel();
        state.requests.push((id, request.clone()));
        state.entries.insert(
            id,
            FakeDownload {
                request,
                status: DownloadStatus::Pending,
                events: tx,
            },
        );
        Ok(DownloadTicket { id, events })
    }

    fn status(&self, id: DownloadId) -> DownloadStatus {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(&id)
            .map_or(DownloadStatus::Failed, |e| e.status)
    }

    fn remove(&self, id: DownloadId) {
        let mut state = self.state.lock().unwrap();
        if state.entries.remove(&id).is_some() {
            state.removed.push(id);
        }
    }
}

// -------------------------------------------------------------------------
// Installer
// -------------------------------------------------------------------------

struct FakeSession {
    size: u64,
    written: Option<(String, Vec<u8>)>,
    committed: bool,
    abandoned: bool,
    report: Option<oneshot::Sender<InstallReport>>,
}

#[derive(Default)]
struct InstallState {
    next_id: SessionId,
    sessions: BTreeMap<SessionId, FakeSession>,
    fail_write: bool,
}

/// An installer that records sessions and reports whatever the test says.
#[derive(Default)]
pub struct FakeInstaller {
    state: Mutex<InstallState>,
}

impl FakeInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.state.lock().unwrap().fail_write = fail;
    }

    /// `(id, size)` of every session ever created.
    pub fn sessions(&self) -> Vec<(SessionId, u64)> {
        let state = self.state.lock().unwrap();
        state.sessions.iter().map(|(id, s)| (*id, s.size)).collect()
    }

    pub fn written(&self, id: SessionId) -> Option<(String, Vec<u8>)> {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).and_then(|s| s.written.clone())
    }

    pub fn is_committed(&self, id: SessionId) -> bool {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).is_some_and(|s| s.committed)
    }

    pub fn is_abandoned(&self, id: SessionId) -> bool {
        let state = self.state.lock().unwrap();
        state.sessions.get(&id).is_some_and(|s| s.abandoned)
    }

    /// Deliver the session's final status. `false` if nobody listens.
    pub fn report(&self, id: SessionId, status: InstallStatus) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(tx) = state.sessions.get_mut(&id).and_then(|s| s.report.take()) else {
            return false;
        };
        tx.send(InstallReport {
            session: id,
            status,
        })
        .is_ok()
    }
}

impl Installer for FakeInstaller {
    fn create_session(&self, size: u64) -> Result<InstallSession> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let (tx, report) = oneshot::channel();
        state.sessions.insert(
            id,
            FakeSession {
                size,
                written: None,
                committed: false,
                abandoned: false,
                report: Some(tx),
            },
        );
        Ok(InstallSession { id, report })
    }

    fn write(&self, session: SessionId, name: &str, source: &Path) -> Result<()> {
        let bytes = std::fs::read(source)?;
        let mut state = self.state.lock().unwrap();
        if state.fail_write {
            bail!("installer rejected the package");
        }
        let entry = state
            .sessions
            .get_mut(&session)
            .filter(|s| !s.abandoned)
            .ok_or_else(|| anyhow!("unknown session {session}"))?;
        entry.written = Some((name.to_string(), bytes));
        Ok(())
    }

    fn commit(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .sessions
            .get_mut(&session)
            .filter(|s| !s.abandoned && s.written.is_some())
            .ok_or_else(|| anyhow!("session {session} cannot be committed"))?;
        entry.committed = true;
        Ok(())
    }

    fn abandon(&self, session: SessionId) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.sessions.get_mut(&session) {
            entry.abandoned = true;
            entry.report = None;
        }
    }
}

// -------------------------------------------------------------------------
// Presenter
// -------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterCall {
    ShowRunning,
    StopAndTeardown,
    ConfirmInstall(String),
    VersionMismatch { installed: String, wanted: String },
    Release,
}

#[derive(Default)]
pub struct RecordingPresenter {
    calls: Mutex<Vec<PresenterCall>>,
    stop: Mutex<Option<StopAction>>,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PresenterCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &PresenterCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn stops(&self) -> usize {
        self.count(&PresenterCall::StopAndTeardown)
    }

    /// The stop action handed over by `show_running`.
    pub fn stop_action(&self) -> Option<StopAction> {
        self.stop.lock().unwrap().clone()
    }

    fn record(&self, call: PresenterCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Presenter for RecordingPresenter {
    fn show_running(&self, stop: StopAction) {
        *self.stop.lock().unwrap() = Some(stop);
        self.record(PresenterCall::ShowRunning);
    }

    fn stop_and_teardown(&self) {
        self.record(PresenterCall::StopAndTeardown);
    }

    fn confirm_install(&self, intent: &str) {
        self.record(PresenterCall::ConfirmInstall(intent.to_string()));
    }

    fn version_mismatch(&self, installed: &str, wanted: &str) {
        self.record(PresenterCall::VersionMismatch {
            installed: installed.to_string(),
            wanted: wanted.to_string(),
        });
    }

    fn release(&self) {
        self.record(PresenterCall::Release);
    }
}

// -------------------------------------------------------------------------
// Resolver
// -------------------------------------------------------------------------

/// Resolver whose answers are set directly by the test.
///
/// Packages are located at `fake://pkg/<version>` and saved as
/// `pkg-<version>.bin`.
#[derive(Default)]
pub struct StaticResolver {
    daemon: Mutex<Option<SubprocessSpec>>,
    version: Mutex<Option<String>>,
    payloads: Mutex<Vec<Option<String>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_daemon(&self, spec: SubprocessSpec) {
        *self.daemon.lock().unwrap() = Some(spec);
    }

    pub fn set_version(&self, version: Option<&str>) {
        *self.version.lock().unwrap() = version.map(str::to_string);
    }

    /// Payloads seen by `resolve_version`, one per start request.
    pub fn payloads(&self) -> Vec<Option<String>> {
        self.payloads.lock().unwrap().clone()
    }
}

impl JobResolver for StaticResolver {
    fn resolve_daemon_spec(&self, _payload: Option<&str>) -> Result<SubprocessSpec> {
        self.daemon
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("no daemon configured"))
    }

    fn resolve_version(&self, payload: Option<&str>) -> Option<String> {
        self.payloads.lock().unwrap().push(payload.map(str::to_string));
        self.version.lock().unwrap().clone()
    }

    fn update_file_name(&self, version: &str) -> Option<String> {
        Some(format!("pkg-{version}.bin"))
    }

    fn update_download_uri(&self, version: &str) -> Option<String> {
        Some(format!("fake://pkg/{version}"))
    }
}

// -------------------------------------------------------------------------
// Supervisor collaborators
// -------------------------------------------------------------------------

/// Observer that records published handles; can simulate a closed queue.
#[derive(Default)]
pub struct RecordingObserver {
    started: Mutex<Vec<SupervisorHandle>>,
    cleared: Mutex<Vec<SupervisorId>>,
    closed: AtomicBool,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn closed() -> Self {
        let observer = Self::default();
        observer.closed.store(true, Ordering::SeqCst);
        observer
    }

    pub fn started(&self) -> Vec<SupervisorHandle> {
        self.started.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> Vec<SupervisorId> {
        self.cleared.lock().unwrap().clone()
    }
}

impl ProcessObserver for RecordingObserver {
    fn process_started(&self, handle: SupervisorHandle) -> bool {
        self.started.lock().unwrap().push(handle);
        !self.closed.load(Ordering::SeqCst)
    }

    fn process_cleared(&self, supervisor: SupervisorId) -> bool {
        self.cleared.lock().unwrap().push(supervisor);
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Sink that keeps every line and failure.
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(String, String)>>,
    failures: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().map(|(_, l)| l.clone()).collect()
    }

    pub fn tagged(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<String> {
        self.failures.lock().unwrap().clone()
    }
}

impl LogSink for CollectingSink {
    fn line(&self, tag: &str, line: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((tag.to_string(), line.to_string()));
    }

    fn failure(&self, tag: &str, error: &anyhow::Error) {
        self.failures
            .lock()
            .unwrap()
            .push(format!("{tag}: {error:#}"));
    }
}
