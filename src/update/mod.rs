// src/update/mod.rs

//! Download-then-install pipeline for package updates.
//!
//! The transport ([`Downloader`]) and the installer ([`Installer`]) are
//! capabilities; the orchestrator drives them and owns the one live
//! [`UpdateJob`]. Worker-side steps live in [`pipeline`].

pub mod download;
pub mod install;
pub mod job;
pub mod pipeline;

pub use download::{
    DownloadEvent, DownloadId, DownloadRequest, DownloadStatus, DownloadTicket, Downloader,
    FileDownloader,
};
pub use install::{
    DirectoryInstaller, InstallReport, InstallSession, InstallStatus, Installer, SessionId,
};
pub use job::{Listener, UpdateJob, UpdatePhase};
