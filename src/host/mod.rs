// src/host/mod.rs

//! Capabilities supplied by the host application.
//!
//! The orchestrator is parametric over these instead of being specialised
//! per application:
//! - [`JobResolver`]: which daemon to run / which version to update to for a
//!   start payload.
//! - [`Presenter`]: the "something is running" presentation (notification,
//!   media session, dialogs).
//! - [`PayloadStore`]: persistence of the last start payload.

pub mod presenter;
pub mod resolver;
pub mod store;

pub use presenter::{LogPresenter, Presenter, StopAction};
pub use resolver::{ConfigResolver, JobResolver, payload_param};
pub use store::{FilePayloadStore, MemoryPayloadStore, PayloadStore, PayloadWriter};

/// The version to update to, if any.
///
/// A requested version only counts when it is present and differs from the
/// installed one.
pub fn update_target(installed: &str, requested: Option<&str>) -> Option<String> {
    match requested {
        Some(version) if !version.is_empty() && version != installed => Some(version.to_string()),
        _ => None,
    }
}
