// src/engine/state.rs

use std::sync::Arc;

use crate::supervisor::{Supervisor, SupervisorHandle, SupervisorId, SubprocessSpec};
use crate::update::{UpdateJob, UpdatePhase};

/// The running daemon: its supervisor and, once published, its process.
#[derive(Debug)]
pub struct DaemonSlot {
    pub supervisor: Arc<Supervisor>,
    pub handle: Option<SupervisorHandle>,
}

/// Which job is active. Daemon and update are mutually exclusive by
/// construction.
#[derive(Debug, Default)]
pub enum OrchestratorState {
    #[default]
    Idle,
    Daemon(DaemonSlot),
    Update(UpdateJob),
}

impl OrchestratorState {
    /// Spec of the daemon that is running and not being torn down.
    pub fn active_spec(&self) -> Option<&SubprocessSpec> {
        match self {
            Self::Daemon(slot) if !slot.supervisor.is_destroyed() => Some(slot.supervisor.spec()),
            _ => None,
        }
    }

    pub fn update_version(&self) -> Option<&str> {
        match self {
            Self::Update(job) => Some(&job.version),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        match self {
            Self::Idle => StateSnapshot::Idle,
            Self::Daemon(slot) => StateSnapshot::Daemon {
                supervisor: slot.supervisor.id(),
                pid: slot.handle.as_ref().and_then(SupervisorHandle::pid),
            },
            Self::Update(job) => StateSnapshot::Update {
                version: job.version.clone(),
                phase: job.phase,
            },
        }
    }
}

/// Plain-data view of [`OrchestratorState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateSnapshot {
    Idle,
    Daemon {
        supervisor: SupervisorId,
        pid: Option<u32>,
    },
    Update {
        version: String,
        phase: UpdatePhase,
    },
}

/// What a start request resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Daemon(SubprocessSpec),
    Update(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPlan {
    /// An equivalent daemon is already running.
    KeepDaemon,
    /// Stop any update and start this daemon.
    StartDaemon(SubprocessSpec),
    /// An update to this version is already live.
    KeepUpdate,
    /// Stop any daemon and start updating to this version.
    StartUpdate(String),
}

/// Decide what a start request does given what is currently active.
///
/// Starting is idempotent: an equal spec or the same update version keeps
/// the current job untouched.
pub fn plan_start(
    active_spec: Option<&SubprocessSpec>,
    update_version: Option<&str>,
    decision: StartDecision,
) -> StartPlan {
    match decision {
        StartDecision::Daemon(spec) if active_spec == Some(&spec) => StartPlan::KeepDaemon,
        StartDecision::Daemon(spec) => StartPlan::StartDaemon(spec),
        StartDecision::Update(version) if update_version == Some(version.as_str()) => {
            StartPlan::KeepUpdate
        }
        StartDecision::Update(version) => StartPlan::StartUpdate(version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(cmd: &str) -> SubprocessSpec {
        SubprocessSpec::builder(["sh", "-c", cmd]).build().unwrap()
    }

    #[test]
    fn equal_spec_keeps_the_daemon() {
        let running = spec("sleep 1");
        assert_eq!(
            plan_start(Some(&running), None, StartDecision::Daemon(spec("sleep 1"))),
            StartPlan::KeepDaemon
        );
        assert_eq!(
            plan_start(Some(&running), None, StartDecision::Daemon(spec("sleep 2"))),
            StartPlan::StartDaemon(spec("sleep 2"))
        );
        assert_eq!(
            plan_start(None, Some("2.0"), StartDecision::Daemon(spec("sleep 1"))),
            StartPlan::StartDaemon(spec("sleep 1"))
        );
    }

    #[test]
    fn same_version_keeps_the_update() {
        assert_eq!(
            plan_start(None, Some("2.0"), StartDecision::Update("2.0".into())),
            StartPlan::KeepUpdate
        );
        assert_eq!(
            plan_start(None, Some("2.0"), StartDecision::Update("3.0".into())),
            StartPlan::StartUpdate("3.0".into())
        );
        assert_eq!(
            plan_start(Some(&spec("sleep 1")), None, StartDecision::Update("2.0".into())),
            StartPlan::StartUpdate("2.0".into())
        );
    }
}
