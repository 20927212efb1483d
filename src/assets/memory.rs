// src/assets/memory.rs

use super::{AssetKind, AssetSource};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum MemoryEntry {
    File(Vec<u8>),
    Dir(Vec<String>), // List of child names
}

/// In-memory asset tree.
///
/// Parent directories are created implicitly by [`add_file`](Self::add_file).
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetSource {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(&self, node: &str, content: impl Into<Vec<u8>>) {
        let node = node.trim_matches('/').to_string();
        let mut entries = self.entries.lock().unwrap();
        Self::link_parent(&mut entries, &node);
        entries.insert(node, MemoryEntry::File(content.into()));
    }

    pub fn add_dir(&self, node: &str) {
        let node = node.trim_matches('/').to_string();
        let mut entries = self.entries.lock().unwrap();
        Self::ensure_dir(&mut entries, &node);
    }

    fn ensure_dir(entries: &mut HashMap<String, MemoryEntry>, node: &str) {
        if entries.contains_key(node) {
            return;
        }
        Self::link_parent(entries, node);
        entries.insert(node.to_string(), MemoryEntry::Dir(Vec::new()));
    }

    fn link_parent(entries: &mut HashMap<String, MemoryEntry>, node: &str) {
        let Some((parent, name)) = node.rsplit_once('/') else {
            return;
        };
        Self::ensure_dir(entries, parent);
        if let Some(MemoryEntry::Dir(children)) = entries.get_mut(parent) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }
}

impl AssetSource for MemoryAssetSource {
    fn kind(&self, node: &str) -> Result<AssetKind> {
        let entries = self.entries.lock().unwrap();
        match entries.get(node) {
            Some(MemoryEntry::File(_)) => Ok(AssetKind::File),
            Some(MemoryEntry::Dir(children)) => Ok(AssetKind::Dir(children.clone())),
            None => Err(anyhow!("Asset not found: {:?}", node)),
        }
    }

    fn open(&self, node: &str) -> Result<Box<dyn Read + Send>> {
        let entries = self.entries.lock().unwrap();
        match entries.get(node) {
            Some(MemoryEntry::File(content)) => Ok(Box::new(Cursor::new(content.clone()))),
            Some(MemoryEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", node)),
            None => Err(anyhow!("Asset not found: {:?}", node)),
        }
    }
}
