// tests/orchestrator_update.rs

use std::error::Error;
use std::time::Duration;

use warden::engine::{ControlEvent, Flow, StateSnapshot};
use warden::update::{DownloadEvent, InstallReport, InstallStatus, Installer, UpdatePhase};
use warden_test_utils::builders::sh;
use warden_test_utils::fakes::PresenterCall;
use warden_test_utils::harness::Harness;
use warden_test_utils::{init_tracing, wait_until};

type TestResult = Result<(), Box<dyn Error>>;

fn updating(version: &str, phase: UpdatePhase) -> StateSnapshot {
    StateSnapshot::Update {
        version: version.to_string(),
        phase,
    }
}

fn is_download(event: &ControlEvent) -> bool {
    matches!(event, ControlEvent::Download { .. })
}

fn is_install(event: &ControlEvent) -> bool {
    matches!(event, ControlEvent::Install { .. })
}

fn is_install_started(event: &ControlEvent) -> bool {
    matches!(event, ControlEvent::InstallStarted { .. })
}

/// Start an update to `version` and drive it until the package sits in an
/// install session that has been committed. Returns the session id.
async fn download_and_commit(h: &mut Harness, version: &str) -> u32 {
    h.resolver.set_version(Some(version));
    h.start(Some(&format!("warden://run?version={version}")));

    let id = h.downloader.last_id().expect("download enqueued");
    h.downloader.complete(id, format!("package-{version}").as_bytes());
    h.pump_until(is_download).await;
    assert_eq!(h.snapshot(), updating(version, UpdatePhase::Installing));

    h.pump_until(is_install_started).await;
    let (session, _) = *h.installer.sessions().last().expect("session created");
    let installer = h.installer.clone();
    wait_until(|| installer.is_committed(session)).await;
    session
}

#[tokio::test]
async fn downloads_streams_and_installs_the_requested_version() -> TestResult {
    init_tracing();
    let mut h = Harness::new();

    let session = download_and_commit(&mut h, "2.0").await;

    let (_, request) = h.downloader.requests()[0].clone();
    assert_eq!(request.uri, "fake://pkg/2.0");
    assert_eq!(request.destination, h.download_dir().join("pkg-2.0.bin"));
    assert_eq!(request.description, "warden 2.0");

    assert_eq!(h.installer.sessions(), vec![(session, 11)]);
    assert_eq!(
        h.installer.written(session),
        Some(("pkg-2.0.bin".to_string(), b"package-2.0".to_vec()))
    );

    assert!(h.installer.report(session, InstallStatus::Success));
    h.pump_until(is_install).await;

    assert_eq!(h.snapshot(), StateSnapshot::Idle);
    assert_eq!(h.presenter.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn pending_user_action_asks_for_confirmation() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    let session = download_and_commit(&mut h, "2.0").await;

    h.installer.report(
        session,
        InstallStatus::PendingUserAction(Some("confirm://2.0".to_string())),
    );
    h.pump_until(is_install).await;

    assert_eq!(h.snapshot(), StateSnapshot::Idle);
    assert_eq!(
        h.presenter.count(&PresenterCall::ConfirmInstall("confirm://2.0".to_string())),
        1
    );
    assert_eq!(h.presenter.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn failed_install_keeps_the_version_until_something_else_runs() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    let session = download_and_commit(&mut h, "2.0").await;

    h.installer
        .report(session, InstallStatus::Failure("signature mismatch".to_string()));
    h.pump_until(is_install).await;

    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Failed));
    assert_eq!(h.presenter.stops(), 1);

    // Same target again: single-flight, nothing new is downloaded.
    h.start(Some("warden://run?version=2.0"));
    assert_eq!(h.downloader.requests().len(), 1);

    // Switching to the daemon tears the failed update down and says so.
    h.resolver.set_version(None);
    h.resolver.set_daemon(sh("sleep 30").build()?);
    h.start(Some("warden://run"));

    assert!(matches!(h.snapshot(), StateSnapshot::Daemon { .. }));
    assert_eq!(
        h.presenter.count(&PresenterCall::VersionMismatch {
            installed: "1.0".to_string(),
            wanted: "2.0".to_string(),
        }),
        1
    );

    assert_eq!(h.handle(ControlEvent::Destroy), Flow::Exit);
    Ok(())
}

#[tokio::test]
async fn completion_of_a_superseded_version_is_ignored() -> TestResult {
    init_tracing();
    let mut h = Harness::new();

    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let old = h.downloader.last_id().expect("2.0 enqueued");

    h.resolver.set_version(Some("3.0"));
    h.start(Some("warden://run?version=3.0"));
    let new = h.downloader.last_id().expect("3.0 enqueued");

    assert_ne!(old, new);
    assert_eq!(h.snapshot(), updating("3.0", UpdatePhase::Downloading));
    assert_eq!(h.downloader.removed(), vec![old]);

    // The old transport is unregistered, so nothing comes through it...
    h.downloader.complete(old, b"package-2.0");
    // ...and a completion that was already in flight is dropped.
    h.handle(ControlEvent::Download {
        version: "2.0".to_string(),
        event: DownloadEvent::Completed {
            id: old,
            success: true,
        },
    });
    // A completion for the wrong download of the live version is dropped too.
    h.handle(ControlEvent::Download {
        version: "3.0".to_string(),
        event: DownloadEvent::Completed {
            id: old,
            success: true,
        },
    });

    assert!(h.installer.sessions().is_empty());
    assert_eq!(h.presenter.stops(), 0);
    assert_eq!(h.snapshot(), updating("3.0", UpdatePhase::Downloading));

    // The 2.0 poll loop notices it was superseded and reports nothing.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = h.events.try_recv() {
        assert!(
            !matches!(&event, ControlEvent::UpdateFailed { version } if version == "2.0"),
            "stale failure posted: {event:?}"
        );
        h.handle(event);
    }
    assert_eq!(h.presenter.stops(), 0);
    Ok(())
}

#[tokio::test]
async fn install_report_of_an_abandoned_session_is_ignored() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    let session = download_and_commit(&mut h, "2.0").await;

    h.resolver.set_version(Some("3.0"));
    h.start(Some("warden://run?version=3.0"));
    assert!(h.installer.is_abandoned(session));

    h.handle(ControlEvent::Install {
        version: "2.0".to_string(),
        report: InstallReport {
            session,
            status: InstallStatus::Success,
        },
    });

    assert_eq!(h.snapshot(), updating("3.0", UpdatePhase::Downloading));
    assert_eq!(h.presenter.stops(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_download_stops_the_presentation() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");

    h.downloader.fail(id);
    h.pump_until(|e| is_download(e) || matches!(e, ControlEvent::UpdateFailed { .. }))
        .await;

    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Failed));
    assert_eq!(h.presenter.stops(), 1);
    assert_eq!(h.downloader.removed(), vec![id]);
    assert!(h.installer.sessions().is_empty());
    Ok(())
}

#[tokio::test]
async fn poll_loop_covers_a_lost_completion_event() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");

    h.downloader.complete_silently(id, b"package-2.0");
    h.pump_until(is_download).await;

    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Installing));
    h.pump_until(is_install_started).await;
    assert_eq!(h.installer.sessions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn install_session_is_opened_on_the_worker() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");

    h.downloader.complete_silently(id, b"package-2.0");
    // Handling the completion only hands the package over.
    h.handle(ControlEvent::Download {
        version: "2.0".to_string(),
        event: DownloadEvent::Completed { id, success: true },
    });
    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Installing));

    let event = h.pump_until(is_install_started).await;
    let ControlEvent::InstallStarted { version, session } = event else {
        panic!("unexpected event {event:?}");
    };
    assert_eq!(version, "2.0");
    assert_eq!(h.installer.sessions(), vec![(session, 11)]);

    // The poll loop's own completion for the same download changes nothing.
    h.handle(ControlEvent::Download {
        version: "2.0".to_string(),
        event: DownloadEvent::Completed { id, success: true },
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    while let Ok(event) = h.events.try_recv() {
        h.handle(event);
    }
    assert_eq!(h.installer.sessions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_package_fails_the_update_from_the_worker() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");

    // Completion reported but nothing was written.
    h.handle(ControlEvent::Download {
        version: "2.0".to_string(),
        event: DownloadEvent::Completed { id, success: true },
    });
    h.pump_until(|e| matches!(e, ControlEvent::UpdateFailed { .. }))
        .await;

    assert!(h.installer.sessions().is_empty());
    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Failed));
    assert_eq!(h.presenter.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn session_opened_for_a_superseded_update_is_abandoned() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");
    h.downloader.complete_silently(id, b"package-2.0");
    h.handle(ControlEvent::Download {
        version: "2.0".to_string(),
        event: DownloadEvent::Completed { id, success: true },
    });

    // Superseded before the worker got to open the session.
    h.resolver.set_version(Some("3.0"));
    h.start(Some("warden://run?version=3.0"));

    let installer = h.installer.clone();
    wait_until(|| installer.is_abandoned(1)).await;
    assert!(!h.installer.is_committed(1));

    // A session that reaches the control thread late is dropped there too.
    let late = h.installer.create_session(4)?;
    h.handle(ControlEvent::InstallStarted {
        version: "2.0".to_string(),
        session: late.id,
    });
    assert!(h.installer.is_abandoned(late.id));
    assert_eq!(h.snapshot(), updating("3.0", UpdatePhase::Downloading));
    Ok(())
}

#[tokio::test]
async fn notification_click_stops_the_presentation() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");

    h.downloader.click(id);
    h.pump_until(|e| {
        matches!(
            e,
            ControlEvent::Download {
                event: DownloadEvent::NotificationClicked { .. },
                ..
            }
        )
    })
    .await;

    assert_eq!(h.presenter.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn enqueue_failure_marks_the_update_failed() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.downloader.set_fail_enqueue(true);
    h.resolver.set_version(Some("2.0"));

    h.start(Some("warden://run?version=2.0"));

    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Failed));
    assert_eq!(h.presenter.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn installer_write_failure_abandons_the_session() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.installer.set_fail_write(true);
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");

    h.downloader.complete(id, b"package-2.0");
    h.pump_until(|e| matches!(e, ControlEvent::UpdateFailed { .. }))
        .await;

    let (session, _) = h.installer.sessions()[0];
    assert!(h.installer.is_abandoned(session));
    assert_eq!(h.snapshot(), updating("2.0", UpdatePhase::Failed));
    assert_eq!(h.presenter.stops(), 1);
    Ok(())
}

#[tokio::test]
async fn destroy_releases_the_update_and_the_presentation() -> TestResult {
    init_tracing();
    let mut h = Harness::new();
    h.resolver.set_version(Some("2.0"));
    h.start(Some("warden://run?version=2.0"));
    let id = h.downloader.last_id().expect("enqueued");
    std::fs::create_dir_all(h.download_dir())?;
    std::fs::write(h.download_dir().join("partial.bin"), b"half")?;

    assert_eq!(h.handle(ControlEvent::Destroy), Flow::Exit);

    assert_eq!(h.snapshot(), StateSnapshot::Idle);
    assert_eq!(h.downloader.removed(), vec![id]);
    assert_eq!(h.presenter.calls().last(), Some(&PresenterCall::Release));

    let dir = h.download_dir();
    wait_until(|| !dir.exists()).await;
    Ok(())
}
