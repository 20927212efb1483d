// src/host/presenter.rs

use tracing::{debug, info, warn};

use crate::engine::{ControlEvent, ControlQueue};

/// Handle the presentation layer uses to ask for everything to stop
/// (the "stop" action of a foreground notification).
#[derive(Debug, Clone)]
pub struct StopAction {
    control: ControlQueue,
}

impl StopAction {
    pub fn new(control: ControlQueue) -> Self {
        Self { control }
    }

    /// Request a full teardown. `false` once the control thread is gone.
    pub fn trigger(&self) -> bool {
        self.control.post(ControlEvent::Destroy)
    }
}

/// "Something is running" presentation.
///
/// Every method is invoked on the control thread and must not block.
pub trait Presenter: Send + Sync {
    /// Show that a job is running, with a way to stop it.
    fn show_running(&self, stop: StopAction);

    /// The active job ended; take the presentation down.
    fn stop_and_teardown(&self);

    /// Installation needs the user to confirm; `intent` says how.
    fn confirm_install(&self, intent: &str);

    /// An update to `wanted` was abandoned while `installed` keeps running.
    fn version_mismatch(&self, _installed: &str, _wanted: &str) {}

    /// Release presentation resources for good.
    fn release(&self) {}
}

/// Presenter for headless hosts: everything goes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn show_running(&self, _stop: StopAction) {
        info!("warden running; press Ctrl-C to stop");
    }

    fn stop_and_teardown(&self) {
        info!("active job finished; stopping");
    }

    fn confirm_install(&self, intent: &str) {
        warn!(intent = %intent, "package installation requires confirmation");
    }

    fn version_mismatch(&self, installed: &str, wanted: &str) {
        warn!("{} \u{2260} {}", installed, wanted);
    }

    fn release(&self) {
        debug!("presentation released");
    }
}
