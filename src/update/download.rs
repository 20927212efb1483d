// src/update/download.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type DownloadId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub uri: String,
    pub destination: PathBuf,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Pending,
    Running,
    Successful,
    Failed,
}

/// Asynchronous notifications from a download transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Completed { id: DownloadId, success: bool },
    /// The user interacted with the progress notification of these downloads.
    NotificationClicked { ids: Vec<DownloadId> },
}

/// A queued download plus the stream of its events.
///
/// Dropping `events` unregisters from further notifications.
#[derive(Debug)]
pub struct DownloadTicket {
    pub id: DownloadId,
    pub events: mpsc::UnboundedReceiver<DownloadEvent>,
}

pub trait Downloader: Send + Sync {
    fn enqueue(&self, request: DownloadRequest) -> Result<DownloadTicket>;

    /// Current status; unknown ids report [`DownloadStatus::Failed`].
    fn status(&self, id: DownloadId) -> DownloadStatus;

    /// Cancel the download and delete whatever it wrote. Called from the
    /// control thread; must not block.
    fn remove(&self, id: DownloadId);
}

struct Entry {
    status: DownloadStatus,
    destination: PathBuf,
    task: Option<JoinHandle<()>>,
}

type Entries = Arc<Mutex<HashMap<DownloadId, Entry>>>;

/// Transport for local packages: `file://` URIs and plain paths are copied
/// into place on a background task.
///
/// `enqueue` and `remove` must be called from within a tokio runtime.
#[derive(Default)]
pub struct FileDownloader {
    next_id: AtomicU64,
    entries: Entries,
}

impl FileDownloader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Downloader for FileDownloader {
    fn enqueue(&self, request: DownloadRequest) -> Result<DownloadTicket> {
        let source = match request.uri.strip_prefix("file://") {
            Some(path) => PathBuf::from(path),
            None if !request.uri.contains("://") => PathBuf::from(&request.uri),
            None => bail!("unsupported download uri: {}", request.uri),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, events) = mpsc::unbounded_channel();

        self.entries.lock().unwrap().insert(
            id,
            Entry {
                status: DownloadStatus::Pending,
                destination: request.destination.clone(),
                task: None,
            },
        );

        info!(download = id, title = %request.title, uri = %request.uri, "download enqueued");

        let entries = Arc::clone(&self.entries);
        let task = tokio::spawn(async move {
            set_status(&entries, id, DownloadStatus::Running);
            let success = match copy_into(&source, &request.destination).await {
                Ok(bytes) => {
                    debug!(download = id, bytes, "download finished");
                    true
                }
                Err(e) => {
                    warn!(download = id, error = %e, "download failed");
                    false
                }
            };
            let status = if success {
                DownloadStatus::Successful
            } else {
                DownloadStatus::Failed
            };
            set_status(&entries, id, status);
            // Receiver may already be gone; that is an unregistered listener.
            let _ = tx.send(DownloadEvent::Completed { id, success });
        });

        if let Some(entry) = self.entries.lock().unwrap().get_mut(&id) {
            entry.task = Some(task);
        }

        Ok(DownloadTicket { id, events })
    }

    fn status(&self, id: DownloadId) -> DownloadStatus {
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .map_or(DownloadStatus::Failed, |e| e.status)
    }

    fn remove(&self, id: DownloadId) {
        let Some(entry) = self.entries.lock().unwrap().remove(&id) else {
            return;
        };
        if let Some(task) = entry.task {
            task.abort();
        }
        debug!(download = id, destination = ?entry.destination, "download removed");
        tokio::spawn(async move {
            match tokio::fs::remove_file(&entry.destination).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                    warn!(path = ?entry.destination, error = %e, "failed to delete download");
                }
                _ => {}
            }
        });
    }
}

fn set_status(entries: &Entries, id: DownloadId, status: DownloadStatus) {
    if let Some(entry) = entries.lock().unwrap().get_mut(&id) {
        entry.status = status;
    }
}

async fn copy_into(source: &Path, destination: &Path) -> std::io::Result<u64> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, destination).await
}
