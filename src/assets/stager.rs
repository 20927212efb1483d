// src/assets/stager.rs

//! Idempotent, resumable staging of bundled assets.
//!
//! A single completion marker covers the whole asset map. The rules per
//! destination are:
//!
//! - destination exists and the marker exists: nothing to do;
//! - destination exists without the marker: a previous staging was
//!   interrupted, so the destination is wiped and staged again;
//! - destination missing: the marker is stale and is removed.
//!
//! The marker is only written once every entry has been staged, so an
//! interrupted run is always redone by the next one.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::{AssetKind, AssetSource};

/// Result of a staging pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Every entry is in place and the marker exists.
    Completed,
    /// Cancellation was observed; the marker was not written.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AssetStager {
    source: Arc<dyn AssetSource>,
    marker: PathBuf,
}

impl AssetStager {
    pub fn new(source: Arc<dyn AssetSource>, marker: impl Into<PathBuf>) -> Self {
        Self {
            source,
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Stage every `source node -> destination` entry of `assets`.
    ///
    /// `cancel` is checked between entries and between nodes of one entry.
    /// Blocking; run it off the control thread.
    pub fn stage(
        &self,
        assets: &BTreeMap<String, PathBuf>,
        cancel: &AtomicBool,
    ) -> Result<StageOutcome> {
        for (src, dst) in assets {
            self.stage_entry(src, dst, cancel)?;
            if is_cancelled(cancel) {
                debug!(asset = %src, "staging cancelled");
                return Ok(StageOutcome::Cancelled);
            }
        }

        if !self.marker.exists() {
            if let Some(parent) = self.marker.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating marker dir {:?}", parent))?;
            }
            fs::write(&self.marker, b"")
                .with_context(|| format!("writing staging marker {:?}", self.marker))?;
            info!(entries = assets.len(), marker = ?self.marker, "assets staged");
        }

        Ok(StageOutcome::Completed)
    }

    fn stage_entry(&self, src: &str, dst: &Path, cancel: &AtomicBool) -> Result<()> {
        if dst.exists() {
            if self.marker.exists() || is_cancelled(cancel) {
                return Ok(());
            }
            debug!(asset = %src, dst = ?dst, "wiping partially staged asset");
            remove_path(dst)?;
        } else {
            match fs::remove_file(&self.marker) {
                Ok(()) => debug!(marker = ?self.marker, "removed stale staging marker"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("removing marker {:?}", self.marker));
                }
            }
        }

        // Breadth-first walk of the source subtree.
        let mut queue = VecDeque::from([(src.trim_matches('/').to_string(), dst.to_path_buf())]);
        while let Some((node, path)) = queue.pop_front() {
            if is_cancelled(cancel) {
                return Ok(());
            }
            match self.source.kind(&node)? {
                AssetKind::Dir(children) => {
                    fs::create_dir_all(&path)
                        .with_context(|| format!("creating dir {:?}", path))?;
                    for child in children {
                        let child_path = path.join(&child);
                        queue.push_back((format!("{node}/{child}"), child_path));
                    }
                }
                AssetKind::File => {
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)
                            .with_context(|| format!("creating dir {:?}", parent))?;
                    }
                    let mut reader = self.source.open(&node)?;
                    let mut out = fs::File::create_new(&path)
                        .with_context(|| format!("creating file {:?}", path))?;
                    io::copy(&mut reader, &mut out)
                        .with_context(|| format!("copying asset {node:?} to {:?}", path))?;
                }
            }
        }

        Ok(())
    }
}

fn is_cancelled(cancel: &AtomicBool) -> bool {
    cancel.load(Ordering::Acquire)
}

/// Remove a file or a directory tree.
pub(crate) fn remove_path(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("inspecting {:?}", path))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).with_context(|| format!("removing dir {:?}", path))
    } else {
        fs::remove_file(path).with_context(|| format!("removing file {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryAssetSource;

    fn source() -> Arc<MemoryAssetSource> {
        let source = MemoryAssetSource::new();
        source.add_file("bin/run.sh", "#!/bin/sh\necho run\n");
        source.add_file("bin/conf/app.toml", "port = 1");
        source.add_dir("bin/empty");
        Arc::new(source)
    }

    #[test]
    fn stages_tree_and_writes_marker() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AssetStager::new(source(), dir.path().join("state/.staged"));
        let assets = BTreeMap::from([("bin".to_string(), dir.path().join("out/bin"))]);

        let outcome = stager.stage(&assets, &AtomicBool::new(false)).unwrap();

        assert_eq!(outcome, StageOutcome::Completed);
        assert!(stager.marker().exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("out/bin/conf/app.toml")).unwrap(),
            "port = 1"
        );
        assert!(dir.path().join("out/bin/empty").is_dir());
    }

    #[test]
    fn cancelled_before_start_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AssetStager::new(source(), dir.path().join(".staged"));
        let assets = BTreeMap::from([("bin".to_string(), dir.path().join("bin"))]);

        let outcome = stager.stage(&assets, &AtomicBool::new(true)).unwrap();

        assert_eq!(outcome, StageOutcome::Cancelled);
        assert!(!stager.marker().exists());
        assert!(!dir.path().join("bin/run.sh").exists());
    }

    #[test]
    fn missing_source_node_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let stager = AssetStager::new(source(), dir.path().join(".staged"));
        let assets = BTreeMap::from([("nope".to_string(), dir.path().join("nope"))]);

        assert!(stager.stage(&assets, &AtomicBool::new(false)).is_err());
        assert!(!stager.marker().exists());
    }
}
