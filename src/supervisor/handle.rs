// src/supervisor/handle.rs

use std::sync::Arc;

use tokio::sync::watch;

/// Identity of one supervisor instance within an orchestrator.
pub type SupervisorId = u64;

/// Reference to a spawned daemon process.
///
/// The worker keeps the OS process; the handle only carries its identity and
/// a kill switch. [`destroy`](Self::destroy) is idempotent, callable from any
/// thread and never waits for the process to go away: the worker observes the
/// switch, kills and reaps the process.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    supervisor: SupervisorId,
    pid: Option<u32>,
    kill: Arc<watch::Sender<bool>>,
}

impl SupervisorHandle {
    pub(crate) fn new(supervisor: SupervisorId, pid: Option<u32>) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = Self {
            supervisor,
            pid,
            kill: Arc::new(tx),
        };
        (handle, rx)
    }

    pub fn supervisor(&self) -> SupervisorId {
        self.supervisor
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn destroy(&self) {
        self.kill.send_replace(true);
    }

    pub fn is_destroyed(&self) -> bool {
        *self.kill.borrow()
    }
}

/// Receives process handles from the worker.
///
/// Returning `false` means the receiving side is gone; the supervisor then
/// treats it as cancellation and releases the process itself.
pub trait ProcessObserver: Send + Sync {
    fn process_started(&self, handle: SupervisorHandle) -> bool;
    fn process_cleared(&self, supervisor: SupervisorId) -> bool;
}

/// Observer that accepts everything and keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProcessObserver for NoopObserver {
    fn process_started(&self, _handle: SupervisorHandle) -> bool {
        true
    }

    fn process_cleared(&self, _supervisor: SupervisorId) -> bool {
        true
    }
}
