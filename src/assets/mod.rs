// src/assets/mod.rs

//! Bundled asset sources and the idempotent stager that materializes them.
//!
//! - [`AssetSource`] abstracts the read-only tree of bundled resources.
//!   Nodes are addressed by `/`-separated paths relative to the source root.
//! - [`DirAssetSource`] reads from a directory on disk (production).
//! - [`memory::MemoryAssetSource`] is an in-memory tree for tests.
//! - [`stager::AssetStager`] copies entries into a writable location and
//!   writes a completion marker.

use std::fmt::Debug;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub mod memory;
pub mod stager;

pub use memory::MemoryAssetSource;
pub use stager::{AssetStager, StageOutcome};

/// What a node in the asset tree is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetKind {
    File,
    /// Directory with the names of its direct children.
    Dir(Vec<String>),
}

/// Read-only tree of bundled resources.
pub trait AssetSource: Send + Sync + Debug {
    fn kind(&self, node: &str) -> Result<AssetKind>;
    fn open(&self, node: &str) -> Result<Box<dyn Read + Send>>;
}

/// Asset tree rooted at a directory on disk.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, node: &str) -> PathBuf {
        node.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }
}

impl AssetSource for DirAssetSource {
    fn kind(&self, node: &str) -> Result<AssetKind> {
        let path = self.resolve(node);
        let meta = fs::metadata(&path).with_context(|| format!("reading asset {:?}", path))?;
        if !meta.is_dir() {
            return Ok(AssetKind::File);
        }

        let mut children = Vec::new();
        for entry in fs::read_dir(&path).with_context(|| format!("reading dir {:?}", path))? {
            let name = entry?.file_name();
            let name = name
                .into_string()
                .map_err(|raw| anyhow::anyhow!("asset name {raw:?} in {path:?} is not valid UTF-8"))?;
            children.push(name);
        }
        children.sort();
        Ok(AssetKind::Dir(children))
    }

    fn open(&self, node: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.resolve(node);
        let file = fs::File::open(&path).with_context(|| format!("opening asset {:?}", path))?;
        Ok(Box::new(file))
    }
}

/// Asset source with no entries, for hosts that bundle nothing.
#[derive(Debug, Clone, Default)]
pub struct EmptyAssetSource;

impl AssetSource for EmptyAssetSource {
    fn kind(&self, node: &str) -> Result<AssetKind> {
        anyhow::bail!("no bundled assets (requested {node:?})")
    }

    fn open(&self, node: &str) -> Result<Box<dyn Read + Send>> {
        anyhow::bail!("no bundled assets (requested {node:?})")
    }
}
