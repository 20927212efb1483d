// src/update/pipeline.rs

//! Update steps that run on the worker.
//!
//! They report back only through the control queue and tag every event with
//! the version they were started for, so results of a superseded update are
//! recognisable as stale.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::{ControlEvent, ControlQueue};

use super::download::{DownloadEvent, DownloadId, DownloadStatus, Downloader};
use super::install::{InstallSession, Installer};

/// Whether `version` is still the live update.
pub fn is_live(live: &watch::Receiver<Option<String>>, version: &str) -> bool {
    live.borrow().as_deref() == Some(version)
}

/// Watch a download until it resolves.
///
/// Exits silently once `version` is no longer live. On success a completion
/// is posted in case the transport's own event got lost; a duplicate is
/// harmless because the orchestrator matches on the download id.
pub async fn poll_download(
    downloader: Arc<dyn Downloader>,
    id: DownloadId,
    version: String,
    mut live: watch::Receiver<Option<String>>,
    control: ControlQueue,
    interval: Duration,
) {
    loop {
        if !is_live(&live, &version) {
            debug!(download = id, version = %version, "update superseded; polling stopped");
            return;
        }
        match downloader.status(id) {
            DownloadStatus::Successful => {
                control.post(ControlEvent::Download {
                    version,
                    event: DownloadEvent::Completed { id, success: true },
                });
                return;
            }
            DownloadStatus::Failed => break,
            DownloadStatus::Pending | DownloadStatus::Running => {}
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = live.changed() => {
                if changed.is_err() {
                    debug!(download = id, version = %version, "orchestrator gone; polling stopped");
                    return;
                }
            }
        }
    }

    warn!(download = id, version = %version, "download failed");
    control.post(ControlEvent::UpdateFailed { version });
}

/// Open an install session for the downloaded package, stream the package
/// into it and commit.
///
/// The session id is posted as [`ControlEvent::InstallStarted`] before any
/// byte is written; the session's status report is forwarded as
/// [`ControlEvent::Install`]. Failures before the report are posted as
/// [`ControlEvent::UpdateFailed`].
pub async fn install_package(
    installer: Arc<dyn Installer>,
    file: PathBuf,
    version: String,
    live: watch::Receiver<Option<String>>,
    control: ControlQueue,
) {
    let prepare = {
        let installer = Arc::clone(&installer);
        let file = file.clone();
        tokio::task::spawn_blocking(move || {
            let size = match std::fs::metadata(&file) {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => bail!("downloaded package {:?} is missing", file),
            };
            installer.create_session(size)
        })
    };
    let session = match prepare.await.context("install task failed").and_then(|r| r) {
        Ok(session) => session,
        Err(err) => {
            warn!(version = %version, error = ?err, "failed to open install session");
            control.post(ControlEvent::UpdateFailed { version });
            return;
        }
    };

    let InstallSession { id, report } = session;
    if !is_live(&live, &version) {
        debug!(session = id, version = %version, "update superseded; session dropped");
        installer.abandon(id);
        return;
    }

    {
        let control = control.clone();
        let version = version.clone();
        tokio::spawn(async move {
            // Err means the session was abandoned.
            if let Ok(report) = report.await {
                control.post(ControlEvent::Install { version, report });
            }
        });
    }

    let started = ControlEvent::InstallStarted {
        version: version.clone(),
        session: id,
    };
    if !control.post(started) {
        installer.abandon(id);
        return;
    }

    let result = tokio::task::spawn_blocking(move || {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow!("package path {:?} has no file name", file))?
            .to_string();
        installer.write(id, &name, &file)?;
        installer.commit(id)
    })
    .await
    .context("install task failed")
    .and_then(|r| r);

    if let Err(err) = result {
        warn!(session = id, version = %version, error = ?err, "failed to install package");
        control.post(ControlEvent::UpdateFailed { version });
    }
}
