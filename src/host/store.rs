// src/host/store.rs

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Persistence for the last start payload, so a bare restart resumes the
/// same logical target.
pub trait PayloadStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, payload: &str);
}

/// Payload kept in a small text file.
#[derive(Debug, Clone)]
pub struct FilePayloadStore {
    path: PathBuf,
}

impl FilePayloadStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PayloadStore for FilePayloadStore {
    fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Some(contents.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "failed to read persisted payload");
                None
            }
        }
    }

    fn save(&self, payload: &str) {
        let result = self
            .path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&self.path, payload));
        if let Err(e) = result {
            warn!(path = ?self.path, error = %e, "failed to persist payload");
        }
    }
}

/// Saves payloads on the blocking pool, one at a time and in the order they
/// were handed over, so callers on the control thread never touch the disk.
#[derive(Debug, Clone)]
pub struct PayloadWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl PayloadWriter {
    /// Must be called within a tokio runtime.
    pub fn spawn(store: Arc<dyn PayloadStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                let store = Arc::clone(&store);
                if let Err(e) = tokio::task::spawn_blocking(move || store.save(&payload)).await {
                    warn!(error = %e, "payload write task failed");
                }
            }
            debug!("payload writer stopped");
        });
        Self { tx }
    }

    pub fn save(&self, payload: &str) {
        if self.tx.send(payload.to_string()).is_err() {
            warn!("payload writer stopped; payload not persisted");
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryPayloadStore {
    payload: Mutex<Option<String>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadStore for MemoryPayloadStore {
    fn load(&self) -> Option<String> {
        self.payload.lock().unwrap().clone()
    }

    fn save(&self, payload: &str) {
        *self.payload.lock().unwrap() = Some(payload.to_string());
    }
}
