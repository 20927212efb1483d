// src/engine/mod.rs

//! Job orchestration engine for warden.
//!
//! The engine keeps exactly one job kind active: either a supervised daemon
//! or an update. It is split into:
//! - [`control`]: the single-threaded control queue every state change goes
//!   through.
//! - [`worker`]: the serial queue long-running steps (supervision loops,
//!   download polling, package streaming) run on.
//! - [`state`]: the active-job state and the pure start planner.
//! - [`orchestrator`]: the state machine reacting to [`ControlEvent`]s.
//! - [`runtime`]: the async loop feeding events to the orchestrator.

use crate::supervisor::{SupervisorExit, SupervisorHandle, SupervisorId};
use crate::update::{DownloadEvent, InstallReport, SessionId};

/// A request to (re)start the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    /// Caller-supplied payload. `None` is a bare restart, which falls back to
    /// the last persisted payload.
    pub payload: Option<String>,
}

/// Events processed on the control thread.
#[derive(Debug, Clone)]
pub enum ControlEvent {
    Start(StartRequest),
    /// Tear everything down and exit.
    Destroy,
    /// A daemon supervisor published the handle of its new process.
    ProcessStarted(SupervisorHandle),
    /// A daemon supervisor's process exited.
    ProcessCleared(SupervisorId),
    /// A daemon supervisor's loop returned.
    DaemonFinished {
        supervisor: SupervisorId,
        exit: SupervisorExit,
    },
    Download {
        version: String,
        event: DownloadEvent,
    },
    /// The worker opened an install session and is streaming into it.
    InstallStarted {
        version: String,
        session: SessionId,
    },
    Install {
        version: String,
        report: InstallReport,
    },
    /// A worker-side update step failed.
    UpdateFailed { version: String },
}

/// Whether the runtime loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub mod control;
pub mod orchestrator;
pub mod runtime;
pub mod state;
pub mod worker;

pub use control::{ControlObserver, ControlQueue};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorOptions};
pub use runtime::Runtime;
pub use state::{OrchestratorState, StartDecision, StartPlan, StateSnapshot, plan_start};
pub use worker::Worker;
