//! Executor-local Block Storage
//!
//! Committed blocks are immutable. A block becomes visible to lookups (and therefore to
//! remote fetchers) only once its payload is fully stored; re-committing an existing id
//! keeps the original payload.

use super::types::BlockId;
use crate::error::{RuntimeError, RuntimeResult};
use crate::scheduler::types::TaskGroupId;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Stores a block. Returns `false` if a block with this id was already committed.
    async fn commit(&self, id: BlockId, payload: Vec<u8>) -> RuntimeResult<bool>;

    async fn get(&self, id: &BlockId) -> RuntimeResult<Option<Arc<[u8]>>>;

    fn contains(&self, id: &BlockId) -> bool;

    /// Drops every block of one producer. Returns how many were removed.
    async fn remove_producer(&self, producer: &TaskGroupId) -> usize;

    /// Drops everything, e.g. when the executor leaves the cluster.
    async fn clear(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Blocks kept in memory.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<BlockId, Arc<[u8]>>,
}

impl MemoryBlockStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn commit(&self, id: BlockId, payload: Vec<u8>) -> RuntimeResult<bool> {
        match self.blocks.entry(id) {
            Entry::Occupied(_) => {
                tracing::debug!("Block {} already committed, keeping original", id);
                Ok(false)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::from(payload));
                Ok(true)
            }
        }
    }

    async fn get(&self, id: &BlockId) -> RuntimeResult<Option<Arc<[u8]>>> {
        Ok(self.blocks.get(id).map(|entry| entry.value().clone()))
    }

    fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    async fn remove_producer(&self, producer: &TaskGroupId) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|id, _| &id.producer != producer);
        before.saturating_sub(self.blocks.len())
    }

    async fn clear(&self) -> usize {
        let count = self.blocks.len();
        self.blocks.clear();
        count
    }

    fn len(&self) -> usize {
        self.blocks.len()
    }
}

/// Blocks kept as files under one directory.
///
/// Every commit writes a uniquely named file and only then publishes it in the index, so
/// a reader can never observe a partially written block.
pub struct FileBlockStore {
    directory: PathBuf,
    index: DashMap<BlockId, PathBuf>,
}

impl FileBlockStore {
    pub async fn new(directory: impl AsRef<Path>) -> RuntimeResult<Arc<Self>> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await?;
        tracing::info!("File block store at {}", directory.display());

        Ok(Arc::new(Self {
            directory,
            index: DashMap::new(),
        }))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn remove_files(paths: Vec<PathBuf>) {
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

#[async_trait]
impl BlockStore for FileBlockStore {
    async fn commit(&self, id: BlockId, payload: Vec<u8>) -> RuntimeResult<bool> {
        if self.index.contains_key(&id) {
            return Ok(false);
        }

        let path = self
            .directory
            .join(format!("{}.{}", id.file_name(), uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        let published = match self.index.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(path.clone());
                true
            }
        };

        if !published {
            tracing::debug!("Block {} committed concurrently, discarding duplicate", id);
            Self::remove_files(vec![path]).await;
        }
        Ok(published)
    }

    async fn get(&self, id: &BlockId) -> RuntimeResult<Option<Arc<[u8]>>> {
        let Some(path) = self.index.get(id).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Arc::from(bytes))),
            // Removed between the index lookup and the read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RuntimeError::from(e)),
        }
    }

    fn contains(&self, id: &BlockId) -> bool {
        self.index.contains_key(id)
    }

    async fn remove_producer(&self, producer: &TaskGroupId) -> usize {
        let ids: Vec<BlockId> = self
            .index
            .iter()
            .filter(|entry| &entry.key().producer == producer)
            .map(|entry| *entry.key())
            .collect();

        let paths: Vec<PathBuf> = ids
            .iter()
            .filter_map(|id| self.index.remove(id).map(|(_, path)| path))
            .collect();
        let removed = paths.len();
        Self::remove_files(paths).await;
        removed
    }

    async fn clear(&self) -> usize {
        let ids: Vec<BlockId> = self.index.iter().map(|entry| *entry.key()).collect();
        let paths: Vec<PathBuf> = ids
            .iter()
            .filter_map(|id| self.index.remove(id).map(|(_, path)| path))
            .collect();
        let removed = paths.len();
        Self::remove_files(paths).await;
        removed
    }

    fn len(&self) -> usize {
        self.index.len()
    }
}
