// src/update/job.rs

use std::future::Future;
use std::path::PathBuf;

use tokio::task::JoinHandle;

use super::download::{DownloadId, Downloader};
use super::install::{Installer, SessionId};

/// Where the live update currently is.
///
/// A successful or pending install ends the job altogether; only a failed
/// one lingers, so a repeated request for the same version is not retried
/// until something else runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Downloading,
    Installing,
    Failed,
}

/// A registered event listener: a forwarding task that is aborted on drop.
#[derive(Debug)]
pub struct Listener(JoinHandle<()>);

impl Listener {
    pub fn spawn<F>(task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self(tokio::spawn(task))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The one live update and the resources it holds.
#[derive(Debug)]
pub struct UpdateJob {
    pub version: String,
    pub file: PathBuf,
    pub phase: UpdatePhase,
    pub download: Option<DownloadId>,
    pub session: Option<SessionId>,
    pub download_listener: Option<Listener>,
}

impl UpdateJob {
    pub fn new(version: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            file: file.into(),
            phase: UpdatePhase::Downloading,
            download: None,
            session: None,
            download_listener: None,
        }
    }

    /// Abandon the session, unregister the download listener and cancel the
    /// download. The session's report forwarder ends with the session.
    pub fn release(&mut self, downloader: &dyn Downloader, installer: &dyn Installer) {
        if let Some(session) = self.session.take() {
            installer.abandon(session);
        }
        self.download_listener = None;
        if let Some(id) = self.download.take() {
            downloader.remove(id);
        }
    }

    pub fn fail(&mut self, downloader: &dyn Downloader, installer: &dyn Installer) {
        self.release(downloader, installer);
        self.phase = UpdatePhase::Failed;
    }
}
