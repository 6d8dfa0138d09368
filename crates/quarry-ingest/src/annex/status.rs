//! Remembered remote status of captured files.

use crate::Result;
use crate::fetch::RemoteStatus;
use quarry_store::METADATA_DIR;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-path remote status, persisted as JSON at
/// `<dataset>/.quarry/crawl/status.json`.
///
/// Lets a re-run skip downloads whose remote size, modification time and
/// ETag are unchanged since the file was captured.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusDb {
    #[serde(skip)]
    path: PathBuf,
    #[serde(skip)]
    dirty: bool,
    files: BTreeMap<String, RemoteStatus>,
}

impl StatusDb {
    /// Location of the status file inside a dataset.
    pub fn location(dataset_root: &Path) -> PathBuf {
        dataset_root
            .join(METADATA_DIR)
            .join("crawl")
            .join("status.json")
    }

    /// Load the status file, or start empty if there is none yet.
    pub fn load(path: PathBuf) -> Result<Self> {
        let mut db = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            serde_json::from_str::<StatusDb>(&contents)?
        } else {
            StatusDb::default()
        };
        db.path = path;
        Ok(db)
    }

    pub fn get(&self, path: &str) -> Option<&RemoteStatus> {
        self.files.get(path)
    }

    pub fn set(&mut self, path: &str, status: RemoteStatus) {
        if self.files.get(path) != Some(&status) {
            self.files.insert(path.to_string(), status);
            self.dirty = true;
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write the file if anything changed since loading.
    pub fn save(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(self)?)?;
        self.dirty = false;
        tracing::debug!(path = %self.path.display(), entries = self.files.len(), "Saved status db");
        Ok(())
    }
}
