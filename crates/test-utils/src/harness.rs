//! An orchestrator wired to fakes, driven one event at a time by the test.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use warden::assets::{AssetStager, MemoryAssetSource};
use warden::engine::{
    Collaborators, ControlEvent, ControlQueue, Flow, Orchestrator, OrchestratorOptions,
    StartRequest, StateSnapshot,
};
use warden::host::MemoryPayloadStore;
use warden::supervisor::{Supervisor, SupervisorContext, SupervisorId, SubprocessSpec};

use crate::fakes::{
    CollectingSink, FakeDownloader, FakeInstaller, RecordingObserver, RecordingPresenter,
    StaticResolver,
};
use crate::with_timeout;

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub events: mpsc::UnboundedReceiver<ControlEvent>,
    pub downloader: Arc<FakeDownloader>,
    pub installer: Arc<FakeInstaller>,
    pub presenter: Arc<RecordingPresenter>,
    pub resolver: Arc<StaticResolver>,
    pub store: Arc<MemoryPayloadStore>,
    pub sink: Arc<CollectingSink>,
    pub dir: TempDir,
}

impl Harness {
    /// Installed version `1.0`, staying alive when the active job stops.
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        Self::with_options("1.0", false)
    }

    pub fn with_options(installed_version: &str, exit_when_stopped: bool) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let downloader = Arc::new(FakeDownloader::new());
        let installer = Arc::new(FakeInstaller::new());
        let presenter = Arc::new(RecordingPresenter::new());
        let resolver = Arc::new(StaticResolver::new());
        let store = Arc::new(MemoryPayloadStore::new());
        let sink = Arc::new(CollectingSink::new());

        let collab = Collaborators {
            resolver: resolver.clone(),
            downloader: downloader.clone(),
            installer: installer.clone(),
            presenter: presenter.clone(),
            store: store.clone(),
            assets: Arc::new(MemoryAssetSource::new()),
            sink: sink.clone(),
        };
        let options = OrchestratorOptions {
            installed_version: installed_version.to_string(),
            asset_marker: dir.path().join("assets.staged"),
            download_dir: dir.path().join("downloads"),
            poll_interval: Duration::from_millis(10),
            title: "warden".to_string(),
            exit_when_stopped,
        };

        let (control, events) = ControlQueue::new();
        let orchestrator = Orchestrator::new(collab, options, control);

        Self {
            orchestrator,
            events,
            downloader,
            installer,
            presenter,
            resolver,
            store,
            sink,
            dir,
        }
    }

    pub fn download_dir(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.orchestrator.snapshot()
    }

    pub fn start(&mut self, payload: Option<&str>) -> Flow {
        self.orchestrator.handle(ControlEvent::Start(StartRequest {
            payload: payload.map(str::to_string),
        }))
    }

    pub fn handle(&mut self, event: ControlEvent) -> Flow {
        self.orchestrator.handle(event)
    }

    pub async fn next_event(&mut self) -> ControlEvent {
        with_timeout(self.events.recv())
            .await
            .expect("control queue closed")
    }

    /// Handle queued events until one matching `pred` has been handled.
    pub async fn pump_until<F>(&mut self, mut pred: F) -> ControlEvent
    where
        F: FnMut(&ControlEvent) -> bool,
    {
        loop {
            let event = self.next_event().await;
            let matched = pred(&event);
            self.orchestrator.handle(event.clone());
            if matched {
                return event;
            }
        }
    }
}

/// A standalone supervisor with recording collaborators.
pub fn supervisor(
    id: SupervisorId,
    spec: SubprocessSpec,
    marker_dir: &TempDir,
) -> (Supervisor, Arc<RecordingObserver>, Arc<CollectingSink>) {
    let observer = Arc::new(RecordingObserver::new());
    let sink = Arc::new(CollectingSink::new());
    let ctx = SupervisorContext {
        stager: AssetStager::new(
            Arc::new(MemoryAssetSource::new()),
            marker_dir.path().join("assets.staged"),
        ),
        observer: observer.clone(),
        sink: sink.clone(),
    };
    (Supervisor::new(id, spec, ctx), observer, sink)
}
