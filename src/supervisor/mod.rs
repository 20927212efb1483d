// src/supervisor/mod.rs

//! Process supervision.
//!
//! - [`spec`] holds the immutable, value-comparable [`SubprocessSpec`].
//! - [`policy`] is the pure exit-code classification and retry bookkeeping.
//! - [`handle`] is the cross-thread process handle and the
//!   [`ProcessObserver`] seam used to publish it.
//! - [`sink`] routes subprocess output and failures to logging.
//! - [`runner`] owns the spawn / drain / wait / decide loop.

pub mod handle;
pub mod policy;
pub mod runner;
pub mod sink;
pub mod spec;

pub use handle::{NoopObserver, ProcessObserver, SupervisorHandle, SupervisorId};
pub use policy::{ExitClass, ExitCodePolicy, ExitDecision, RetryTracker, StopReason};
pub use runner::{Supervisor, SupervisorContext, SupervisorExit};
pub use sink::{LogSink, TracingSink};
pub use spec::{SubprocessSpec, SubprocessSpecBuilder};
