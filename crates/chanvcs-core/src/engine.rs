//! Routing-engine collaborator.
//!
//! The engine owns the live channel documents. chanvcs only lists, fetches
//! and applies them; deploying and running a channel is the engine's job.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chanvcs_state::{FileStore, FsFileStore};
use tracing::debug;

use crate::artifact::layout::validate_channel_id;
use crate::domain::error::{ChanvcsError, Result};

/// Live channel documents.
#[async_trait]
pub trait ChannelEngine: Send + Sync {
    /// Ids of every live channel, sorted.
    async fn list_channel_ids(&self) -> Result<Vec<String>>;

    /// Live document of `id`, `None` when the engine has no such channel.
    async fn fetch_channel(&self, id: &str) -> Result<Option<String>>;

    /// Create or replace the live document of `id`.
    async fn apply_channel(&self, id: &str, document: &str) -> Result<()>;
}

/// Engine backed by a directory of `<id>.xml` files, as written by the
/// engine's own export tooling.
#[derive(Debug, Clone)]
pub struct DirectoryEngine {
    files: FsFileStore,
}

impl DirectoryEngine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            files: FsFileStore::new(dir),
        }
    }

    pub fn directory(&self) -> &Path {
        self.files.root()
    }

    fn file_name(id: &str) -> Result<String> {
        validate_channel_id(id)?;
        Ok(format!("{id}.xml"))
    }
}

#[async_trait]
impl ChannelEngine for DirectoryEngine {
    async fn list_channel_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .files
            .list_files("")
            .await?
            .into_iter()
            .filter(|p| !p.contains('/'))
            .filter_map(|p| p.strip_suffix(".xml").map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn fetch_channel(&self, id: &str) -> Result<Option<String>> {
        let name = Self::file_name(id)?;
        match self.files.read_file(&name).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| ChanvcsError::Engine(format!("channel {id} is not utf-8: {e}"))),
            None => Ok(None),
        }
    }

    async fn apply_channel(&self, id: &str, document: &str) -> Result<()> {
        let name = Self::file_name(id)?;
        self.files.write_file(&name, document.as_bytes()).await?;
        debug!(channel_id = %id, dir = %self.directory().display(), "channel applied");
        Ok(())
    }
}

/// In-memory engine for tests. Records every apply in order.
#[derive(Debug, Default)]
pub struct MemoryChannelEngine {
    channels: Mutex<BTreeMap<String, String>>,
    applied: Mutex<Vec<String>>,
}

impl MemoryChannelEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, id: &str, document: &str) -> Self {
        self.channels
            .lock()
            .unwrap()
            .insert(id.to_string(), document.to_string());
        self
    }

    /// Ids passed to `apply_channel`, oldest first.
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }

    pub fn document(&self, id: &str) -> Option<String> {
        self.channels.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl ChannelEngine for MemoryChannelEngine {
    async fn list_channel_ids(&self) -> Result<Vec<String>> {
        Ok(self.channels.lock().unwrap().keys().cloned().collect())
    }

    async fn fetch_channel(&self, id: &str) -> Result<Option<String>> {
        Ok(self.channels.lock().unwrap().get(id).cloned())
    }

    async fn apply_channel(&self, id: &str, document: &str) -> Result<()> {
        validate_channel_id(id)?;
        self.channels
            .lock()
            .unwrap()
            .insert(id.to_string(), document.to_string());
        self.applied.lock().unwrap().push(id.to_string());
        Ok(())
    }
}
