// src/update/install.rs

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Installer session id. Never zero.
pub type SessionId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    Success,
    /// The installer needs the user; the payload says how to ask them.
    PendingUserAction(Option<String>),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub session: SessionId,
    pub status: InstallStatus,
}

/// A created session plus the receiver of its final status.
///
/// Dropping `report` unregisters from the status broadcast.
#[derive(Debug)]
pub struct InstallSession {
    pub id: SessionId,
    pub report: oneshot::Receiver<InstallReport>,
}

/// Package installer with an explicit session lifecycle:
/// create, write, commit, then one asynchronous status report.
///
/// `create_session`, `write` and `commit` may block and are only called from
/// the worker. `abandon` is called from the control thread and must not block.
pub trait Installer: Send + Sync {
    fn create_session(&self, size: u64) -> Result<InstallSession>;

    /// Stream `source` into the session under `name` and flush it to disk.
    fn write(&self, session: SessionId, name: &str, source: &Path) -> Result<()>;

    fn commit(&self, session: SessionId) -> Result<()>;

    /// Drop the session and everything written to it. Unknown ids are ignored.
    fn abandon(&self, session: SessionId);
}

struct SessionState {
    size: u64,
    staged: PathBuf,
    name: Option<String>,
    report: Option<oneshot::Sender<InstallReport>>,
}

/// Installs packages by placing them in a directory.
///
/// Written bytes go to `<dir>/.session-<id>`; commit renames the file to
/// its final name and reports [`InstallStatus::Success`].
pub struct DirectoryInstaller {
    dir: PathBuf,
    next_id: AtomicU32,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

impl DirectoryInstaller {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next_id: AtomicU32::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Installer for DirectoryInstaller {
    fn create_session(&self, size: u64) -> Result<InstallSession> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating install directory {:?}", self.dir))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let staged = self.dir.join(format!(".session-{id}"));
        let (tx, report) = oneshot::channel();

        self.sessions.lock().unwrap().insert(
            id,
            SessionState {
                size,
                staged,
                name: None,
                report: Some(tx),
            },
        );
        debug!(session = id, size, "install session created");
        Ok(InstallSession { id, report })
    }

    fn write(&self, session: SessionId, name: &str, source: &Path) -> Result<()> {
        let (staged, size) = {
            let sessions = self.sessions.lock().unwrap();
            let state = sessions
                .get(&session)
                .ok_or_else(|| anyhow!("unknown install session {session}"))?;
            (state.staged.clone(), state.size)
        };

        let mut input =
            File::open(source).with_context(|| format!("opening package {:?}", source))?;
        let mut output =
            File::create(&staged).with_context(|| format!("creating {:?}", staged))?;
        let written = io::copy(&mut input, &mut output)
            .with_context(|| format!("writing package into session {session}"))?;
        output.sync_all().context("flushing install session")?;

        if written != size {
            bail!("package size changed while installing: expected {size} bytes, wrote {written}");
        }

        if let Some(state) = self.sessions.lock().unwrap().get_mut(&session) {
            state.name = Some(name.to_string());
        }
        Ok(())
    }

    fn commit(&self, session: SessionId) -> Result<()> {
        let mut state = self
            .sessions
            .lock()
            .unwrap()
            .remove(&session)
            .ok_or_else(|| anyhow!("unknown install session {session}"))?;
        let name = state
            .name
            .take()
            .ok_or_else(|| anyhow!("install session {session} committed before write"))?;

        let target = self.dir.join(&name);
        let status = match fs::rename(&state.staged, &target) {
            Ok(()) => {
                info!(session, target = ?target, "package installed");
                InstallStatus::Success
            }
            Err(e) => {
                warn!(session, error = %e, "failed to install package");
                InstallStatus::Failure(e.to_string())
            }
        };

        if let Some(tx) = state.report.take() {
            let _ = tx.send(InstallReport { session, status });
        }
        Ok(())
    }

    /// Must be called within a tokio runtime; the staged file is deleted on
    /// a background task.
    fn abandon(&self, session: SessionId) {
        let Some(state) = self.sessions.lock().unwrap().remove(&session) else {
            return;
        };
        debug!(session, "install session abandoned");
        tokio::spawn(async move {
            match tokio::fs::remove_file(&state.staged).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    warn!(path = ?state.staged, error = %e, "failed to remove staged package");
                }
                _ => {}
            }
        });
    }
}
