// src/supervisor/policy.rs

//! Exit-code driven retry policy.
//!
//! Three named exit-code sets steer what happens after the supervised process
//! exits, evaluated in this order:
//!
//! 1. `end`: stop supervising for good.
//! 2. `skip`: restart immediately, attempt counter untouched.
//! 3. `start`: the process made progress; reset the counter and restart.
//! 4. anything else: count a failed attempt, stop once the counter exceeds
//!    the retry limit, otherwise restart after the retry delay.
//!
//! Everything here is synchronous and free of IO so it can be unit and
//! property tested directly.

use std::collections::BTreeSet;
use std::time::Duration;

/// The three exit-code sets of a subprocess spec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExitCodePolicy {
    pub end: BTreeSet<i32>,
    pub skip: BTreeSet<i32>,
    pub start: BTreeSet<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    End,
    Skip,
    Start,
    Other,
}

impl ExitCodePolicy {
    /// Classify an exit code. A code present in several sets resolves as
    /// `End` > `Skip` > `Start`.
    pub fn classify(&self, code: i32) -> ExitClass {
        if self.end.contains(&code) {
            ExitClass::End
        } else if self.skip.contains(&code) {
            ExitClass::Skip
        } else if self.start.contains(&code) {
            ExitClass::Start
        } else {
            ExitClass::Other
        }
    }
}

/// Why a supervisor loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Destroy was observed at a checkpoint.
    Cancelled,
    /// The process exited with a code from the `end` set.
    EndCode(i32),
    /// Too many consecutive unrecognized exits; carries the last code.
    RetriesExhausted(i32),
    /// The process handle could not be handed to the control thread.
    PublishFailed,
    /// Staging, spawning or waiting failed.
    Failed(String),
}

/// What the supervisor loop should do after an exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitDecision {
    Stop(StopReason),
    RestartNow,
    RetryAfter(Duration),
}

/// Attempt counter for one supervisor loop.
#[derive(Debug, Clone)]
pub struct RetryTracker {
    attempt: u32,
    limit: u32,
    delay: Duration,
}

impl RetryTracker {
    pub fn new(limit: u32, delay: Duration) -> Self {
        Self {
            attempt: 0,
            limit,
            delay,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn on_exit(&mut self, class: ExitClass, code: i32) -> ExitDecision {
        match class {
            ExitClass::End => ExitDecision::Stop(StopReason::EndCode(code)),
            ExitClass::Skip => ExitDecision::RestartNow,
            ExitClass::Start => {
                self.attempt = 0;
                ExitDecision::RestartNow
            }
            ExitClass::Other => {
                self.attempt = self.attempt.saturating_add(1);
                if self.attempt > self.limit {
                    ExitDecision::Stop(StopReason::RetriesExhausted(code))
                } else {
                    ExitDecision::RetryAfter(self.delay)
                }
            }
        }
    }
}
