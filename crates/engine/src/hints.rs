//! Durable buffer of writes destined for currently-down replicas.
//!
//! The map is keyed by `key`, so several pending hints for the same key
//! collapse to the latest — an intentional, observable property of the
//! on-disk format. The file is rewritten after every mutation.

use gossipkv_common::{now_ms, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// A write waiting for its target node to come back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hint {
    pub key: String,
    pub value: String,
    pub target: NodeId,
    pub timestamp_ms: u64,
}

/// The hinted-handoff map plus its backing JSON file.
#[derive(Debug)]
pub struct HintMap {
    hints: HashMap<String, Hint>,
    path: PathBuf,
}

impl HintMap {
    /// Load the hint file, or start empty if it does not exist yet.
    pub fn load(path: &Path) -> io::Result<Self> {
        let hints = match File::open(path) {
            Ok(file) => serde_json::from_reader(file).unwrap_or_else(|e| {
                tracing::warn!("hint file {:?} unreadable, starting empty: {}", path, e);
                HashMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            hints,
            path: path.to_path_buf(),
        })
    }

    /// Buffer a write for `target`, replacing any older hint for the key.
    pub fn store(&mut self, key: &str, value: &str, target: NodeId) {
        self.hints.insert(
            key.to_string(),
            Hint {
                key: key.to_string(),
                value: value.to_string(),
                target,
                timestamp_ms: now_ms(),
            },
        );
        self.persist();
    }

    /// Drop the hint for `key` after successful delivery.
    pub fn remove(&mut self, key: &str) -> Option<Hint> {
        let removed = self.hints.remove(key);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&Hint> {
        self.hints.get(key)
    }

    /// All pending hints.
    pub fn pending(&self) -> Vec<Hint> {
        self.hints.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Rewrite the hint file. Failures are logged; the in-memory map is
    /// already updated and the operation stands.
    fn persist(&self) {
        match File::create(&self.path) {
            Ok(file) => {
                if let Err(e) = serde_json::to_writer(file, &self.hints) {
                    tracing::warn!("failed to persist hint file {:?}: {}", self.path, e);
                }
            }
            Err(e) => {
                tracing::warn!("failed to create hint file {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_pending() {
        let dir = TempDir::new().unwrap();
        let mut hints = HintMap::load(&dir.path().join("n1_hint.json")).unwrap();

        hints.store("k1", "v1", NodeId::new("n2"));
        hints.store("k2", "v2", NodeId::new("n3"));

        assert_eq!(hints.len(), 2);
        let pending = hints.pending();
        assert!(pending.iter().any(|h| h.key == "k1" && h.value == "v1"));
        assert!(pending
            .iter()
            .any(|h| h.key == "k2" && h.target == NodeId::new("n3")));
    }

    #[test]
    fn test_same_key_collapses_to_latest() {
        let dir = TempDir::new().unwrap();
        let mut hints = HintMap::load(&dir.path().join("n1_hint.json")).unwrap();

        hints.store("k", "old", NodeId::new("n2"));
        hints.store("k", "new", NodeId::new("n2"));

        assert_eq!(hints.len(), 1);
        assert_eq!(hints.get("k").unwrap().value, "new");
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let mut hints = HintMap::load(&dir.path().join("n1_hint.json")).unwrap();

        hints.store("k", "v", NodeId::new("n2"));
        let removed = hints.remove("k").unwrap();
        assert_eq!(removed.value, "v");
        assert!(hints.is_empty());
        assert!(hints.remove("k").is_none());
    }

    #[test]
    fn test_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n1_hint.json");
        {
            let mut hints = HintMap::load(&path).unwrap();
            hints.store("k1", "v1", NodeId::new("n2"));
            hints.store("k2", "v2", NodeId::new("n2"));
            hints.remove("k1");
        }
        let hints = HintMap::load(&path).unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints.get("k2").unwrap().target, NodeId::new("n2"));
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let hints = HintMap::load(&dir.path().join("absent.json")).unwrap();
        assert!(hints.is_empty());
    }
}
