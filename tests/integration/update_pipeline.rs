// tests/integration/update_pipeline.rs

//! Update flow against the real file-based downloader and installer, and
//! the worker-side download poll loop.

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use warden::assets::EmptyAssetSource;
use warden::engine::{
    Collaborators, ControlEvent, ControlQueue, Orchestrator, OrchestratorOptions, Runtime,
    StartRequest,
};
use warden::host::{ConfigResolver, MemoryPayloadStore};
use warden::supervisor::TracingSink;
use warden::update::{DirectoryInstaller, DownloadRequest, Downloader, FileDownloader, pipeline};
use warden_test_utils::builders::ConfigFileBuilder;
use warden_test_utils::fakes::{FakeDownloader, PresenterCall, RecordingPresenter};
use warden_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn requested_version_ends_up_installed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let releases = dir.path().join("releases");
    fs::create_dir_all(&releases)?;
    fs::write(releases.join("app-2.0.pkg"), b"release 2.0")?;

    let cfg = ConfigFileBuilder::new(&["/bin/sh", "-c", "sleep 30"])
        .installed_version("1.0")
        .update(
            &format!("file://{}/app-{{version}}.pkg", releases.display()),
            "app-{version}.pkg",
        )
        .build();

    let install_dir = dir.path().join("installed");
    let presenter = Arc::new(RecordingPresenter::new());
    let collab = Collaborators {
        resolver: Arc::new(ConfigResolver::new(cfg)),
        downloader: Arc::new(FileDownloader::new()),
        installer: Arc::new(DirectoryInstaller::new(&install_dir)),
        presenter: presenter.clone(),
        store: Arc::new(MemoryPayloadStore::new()),
        assets: Arc::new(EmptyAssetSource),
        sink: Arc::new(TracingSink),
    };
    let options = OrchestratorOptions {
        installed_version: "1.0".to_string(),
        asset_marker: dir.path().join("state/assets.staged"),
        download_dir: dir.path().join("downloads"),
        poll_interval: Duration::from_millis(20),
        title: "app".to_string(),
        exit_when_stopped: true,
    };

    let (control, events) = ControlQueue::new();
    let orchestrator = Orchestrator::new(collab, options, control.clone());
    control.post(ControlEvent::Start(StartRequest {
        payload: Some("warden://run?version=2.0".to_string()),
    }));

    with_timeout(Runtime::new(orchestrator, events).run()).await?;

    assert_eq!(fs::read(install_dir.join("app-2.0.pkg"))?, b"release 2.0");
    assert_eq!(
        presenter.calls(),
        vec![
            PresenterCall::ShowRunning,
            PresenterCall::StopAndTeardown,
            PresenterCall::Release,
        ]
    );
    // Destroy wiped the download directory.
    assert!(!dir.path().join("downloads").exists());
    Ok(())
}

#[tokio::test]
async fn superseded_poll_loop_frees_the_worker_without_waiting_out_its_interval() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let downloader = Arc::new(FakeDownloader::new());
    let ticket = downloader.enqueue(DownloadRequest {
        uri: "fake://pkg/2.0".to_string(),
        destination: dir.path().join("pkg-2.0.bin"),
        title: "app".to_string(),
        description: "app 2.0".to_string(),
    })?;

    let (live, live_rx) = watch::channel(Some("2.0".to_string()));
    let (control, mut events) = ControlQueue::new();
    let poll = tokio::spawn(pipeline::poll_download(
        downloader,
        ticket.id,
        "2.0".to_string(),
        live_rx,
        control,
        Duration::from_secs(3600),
    ));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!poll.is_finished());

    live.send_replace(Some("3.0".to_string()));
    with_timeout(poll).await?;
    assert!(events.try_recv().is_err());
    Ok(())
}
