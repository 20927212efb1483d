// src/engine/control.rs

use tokio::sync::mpsc;

use crate::supervisor::{ProcessObserver, SupervisorHandle, SupervisorId};

use super::ControlEvent;

/// Sending side of the control queue.
///
/// Posting never blocks, so it is safe from the worker, from listener tasks,
/// and from plain threads. A failed post means the control thread has shut
/// down; callers treat that as cancellation.
#[derive(Debug, Clone)]
pub struct ControlQueue {
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl ControlQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ControlEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn post(&self, event: ControlEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Publishes supervisor process transitions onto the control queue.
#[derive(Debug, Clone)]
pub struct ControlObserver {
    control: ControlQueue,
}

impl ControlObserver {
    pub fn new(control: ControlQueue) -> Self {
        Self { control }
    }
}

impl ProcessObserver for ControlObserver {
    fn process_started(&self, handle: SupervisorHandle) -> bool {
        self.control.post(ControlEvent::ProcessStarted(handle))
    }

    fn process_cleared(&self, supervisor: SupervisorId) -> bool {
        self.control.post(ControlEvent::ProcessCleared(supervisor))
    }
}
