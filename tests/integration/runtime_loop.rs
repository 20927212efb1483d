// tests/integration/runtime_loop.rs

use std::error::Error;

use warden::engine::{ControlEvent, Runtime, StartRequest};
use warden_test_utils::builders::sh;
use warden_test_utils::fakes::PresenterCall;
use warden_test_utils::harness::Harness;
use warden_test_utils::{init_tracing, wait_until, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn stop_action_tears_down_a_running_daemon() -> TestResult {
    init_tracing();
    let Harness {
        orchestrator,
        events,
        presenter,
        resolver,
        sink,
        dir: _dir,
        ..
    } = Harness::new();
    resolver.set_daemon(sh("echo up; sleep 30").build()?);

    let control = orchestrator.control().clone();
    control.post(ControlEvent::Start(StartRequest {
        payload: Some("warden://run".to_string()),
    }));

    let runtime = tokio::spawn(Runtime::new(orchestrator, events).run());

    wait_until(|| sink.lines() == vec!["up".to_string()]).await;
    let stop = presenter.stop_action().expect("show_running was called");
    assert!(stop.trigger());

    with_timeout(runtime).await??;

    let calls = presenter.calls();
    assert_eq!(calls.first(), Some(&PresenterCall::ShowRunning));
    assert_eq!(calls.last(), Some(&PresenterCall::Release));
    assert!(!calls.contains(&PresenterCall::StopAndTeardown));

    // The control thread is gone; further requests are refused.
    assert!(!stop.trigger());
    Ok(())
}

#[tokio::test]
async fn runtime_exits_when_the_daemon_finishes() -> TestResult {
    init_tracing();
    let Harness {
        orchestrator,
        events,
        presenter,
        resolver,
        dir: _dir,
        ..
    } = Harness::with_options("1.0", true);
    resolver.set_daemon(sh("exit 3").end_codes([3]).build()?);

    orchestrator
        .control()
        .post(ControlEvent::Start(StartRequest::default()));

    with_timeout(Runtime::new(orchestrator, events).run()).await?;

    assert_eq!(
        presenter.calls(),
        vec![
            PresenterCall::ShowRunning,
            PresenterCall::StopAndTeardown,
            PresenterCall::Release,
        ]
    );
    Ok(())
}

#[tokio::test]
async fn presentation_comes_back_for_the_next_job() -> TestResult {
    init_tracing();
    let Harness {
        orchestrator,
        events,
        presenter,
        resolver,
        dir: _dir,
        ..
    } = Harness::new();
    resolver.set_daemon(sh("exit 0").end_codes([0]).build()?);

    let control = orchestrator.control().clone();
    let runtime = tokio::spawn(Runtime::new(orchestrator, events).run());

    control.post(ControlEvent::Start(StartRequest {
        payload: Some("warden://run?profile=a".to_string()),
    }));
    wait_until(|| presenter.stops() == 1).await;

    control.post(ControlEvent::Start(StartRequest {
        payload: Some("warden://run?profile=b".to_string()),
    }));
    wait_until(|| presenter.stops() == 2).await;

    assert_eq!(
        presenter.calls(),
        vec![
            PresenterCall::ShowRunning,
            PresenterCall::StopAndTeardown,
            PresenterCall::ShowRunning,
            PresenterCall::StopAndTeardown,
        ]
    );

    control.post(ControlEvent::Destroy);
    with_timeout(runtime).await??;
    Ok(())
}
