// src/memory_store.rs
//
// In-memory BlockBlobStore. Backs `--dry-run` and the test suite; it counts
// every call and can be told to corrupt, fail or delay specific blocks.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use crate::blob_store::{BlobProperties, BlockBlobStore, PutBlockOptions, content_md5};
use crate::error::StoreError;

/// A committed blob as held by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
    /// Block list used at commit; empty for single-put blobs.
    pub block_ids: Vec<String>,
}

/// Snapshot of how often each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub blob_properties: usize,
    pub put_blob: usize,
    pub put_block: usize,
    pub commit_blocks: usize,
    pub list_containers: usize,
    pub create_container: usize,
    pub refresh_credentials: usize,
}

#[derive(Debug, Default)]
struct Counters {
    blob_properties: AtomicUsize,
    put_blob: AtomicUsize,
    put_block: AtomicUsize,
    commit_blocks: AtomicUsize,
    list_containers: AtomicUsize,
    create_container: AtomicUsize,
    refresh_credentials: AtomicUsize,
}

type BlobKey = (String, String);

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeSet<String>,
    blobs: HashMap<BlobKey, StoredBlob>,
    staged: HashMap<BlobKey, HashMap<String, Bytes>>,
    corrupt_blocks: HashSet<String>,
    failing_blocks: HashSet<String>,
    deny_container_listing: bool,
    put_block_delay: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    inner: Mutex<Inner>,
    counters: Counters,
}

fn blob_key(container: &str, key: &str) -> BlobKey {
    (container.to_string(), key.to_string())
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already holds one empty container.
    pub fn with_container(container: &str) -> Self {
        let store = Self::new();
        store.lock().containers.insert(container.to_string());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require_container(inner: &Inner, container: &str) -> Result<(), StoreError> {
        if inner.containers.contains(container) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("container {}", container)))
        }
    }

    /// Seed a committed blob, e.g. to create key collisions.
    pub fn insert_blob(&self, container: &str, key: &str, data: impl Into<Bytes>, content_type: &str) {
        let mut inner = self.lock();
        inner.containers.insert(container.to_string());
        inner.blobs.insert(
            blob_key(container, key),
            StoredBlob {
                data: data.into(),
                content_type: content_type.to_string(),
                block_ids: Vec::new(),
            },
        );
    }

    pub fn blob(&self, container: &str, key: &str) -> Option<StoredBlob> {
        self.lock().blobs.get(&blob_key(container, key)).cloned()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    /// Number of staged, uncommitted blocks for a blob.
    pub fn staged_block_count(&self, container: &str, key: &str) -> usize {
        self.lock()
            .staged
            .get(&blob_key(container, key))
            .map_or(0, |blocks| blocks.len())
    }

    pub fn containers(&self) -> Vec<String> {
        self.lock().containers.iter().cloned().collect()
    }

    /// Report a wrong MD5 for this block id.
    pub fn corrupt_block(&self, block_id: &str) {
        self.lock().corrupt_blocks.insert(block_id.to_string());
    }

    /// Fail put-block for this block id with a service error.
    pub fn fail_block(&self, block_id: &str) {
        self.lock().failing_blocks.insert(block_id.to_string());
    }

    /// Make `list_containers` answer with permission denied.
    pub fn deny_container_listing(&self) {
        self.lock().deny_container_listing = true;
    }

    pub fn set_put_block_delay(&self, delay: Duration) {
        self.lock().put_block_delay = Some(delay);
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.counters;
        CallCounts {
            blob_properties: c.blob_properties.load(Ordering::SeqCst),
            put_blob: c.put_blob.load(Ordering::SeqCst),
            put_block: c.put_block.load(Ordering::SeqCst),
            commit_blocks: c.commit_blocks.load(Ordering::SeqCst),
            list_containers: c.list_containers.load(Ordering::SeqCst),
            create_container: c.create_container.load(Ordering::SeqCst),
            refresh_credentials: c.refresh_credentials.load(Ordering::SeqCst),
        }
    }
}

#[async_trait]
impl BlockBlobStore for MemoryBlobStore {
    async fn blob_properties(&self, container: &str, key: &str) -> Result<BlobProperties, StoreError> {
        self.counters.blob_properties.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        match inner.blobs.get(&blob_key(container, key)) {
            Some(blob) => Ok(BlobProperties {
                content_length: blob.data.len() as u64,
                content_type: Some(blob.content_type.clone()),
            }),
            None => Err(StoreError::NotFound(format!("{}/{}", container, key))),
        }
    }

    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.counters.put_blob.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        Self::require_container(&inner, container)?;
        debug!("memory store: put {}/{} ({} bytes)", container, key, body.len());
        inner.blobs.insert(
            blob_key(container, key),
            StoredBlob {
                data: body,
                content_type: content_type.to_string(),
                block_ids: Vec::new(),
            },
        );
        Ok(())
    }

    async fn put_block(
        &self,
        container: &str,
        key: &str,
        block_id: &str,
        body: Bytes,
        _options: &PutBlockOptions,
    ) -> Result<String, StoreError> {
        self.counters.put_block.fetch_add(1, Ordering::SeqCst);
        let delay = self.lock().put_block_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        Self::require_container(&inner, container)?;
        if inner.failing_blocks.contains(block_id) {
            return Err(StoreError::Service {
                status: 500,
                message: format!("injected failure for block {}", block_id),
            });
        }
        let mut reported = content_md5(&body);
        if inner.corrupt_blocks.contains(block_id) {
            reported = content_md5(format!("corrupted:{}", block_id).as_bytes());
        }
        inner
            .staged
            .entry(blob_key(container, key))
            .or_default()
            .insert(block_id.to_string(), body);
        Ok(reported)
    }

    async fn commit_blocks(
        &self,
        container: &str,
        key: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.counters.commit_blocks.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        Self::require_container(&inner, container)?;
        let bkey = blob_key(container, key);
        let staged = inner.staged.get(&bkey);
        if let Some(missing) = block_ids
            .iter()
            .find(|id| staged.is_none_or(|blocks| !blocks.contains_key(id.as_str())))
        {
            return Err(StoreError::Service {
                status: 400,
                message: format!("block {} was never staged", missing),
            });
        }

        let staged = inner.staged.remove(&bkey).unwrap_or_default();
        let mut data = BytesMut::new();
        for id in block_ids {
            if let Some(block) = staged.get(id) {
                data.extend_from_slice(block);
            }
        }
        inner.blobs.insert(
            bkey,
            StoredBlob {
                data: data.freeze(),
                content_type: content_type.to_string(),
                block_ids: block_ids.to_vec(),
            },
        );
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        self.counters.list_containers.fetch_add(1, Ordering::SeqCst);
        let inner = self.lock();
        if inner.deny_container_listing {
            return Err(StoreError::PermissionDenied("list containers".into()));
        }
        Ok(inner.containers.iter().cloned().collect())
    }

    async fn create_container(&self, container: &str) -> Result<(), StoreError> {
        self.counters.create_container.fetch_add(1, Ordering::SeqCst);
        self.lock().containers.insert(container.to_string());
        Ok(())
    }

    async fn refresh_credentials(&self) -> Result<(), StoreError> {
        self.counters.refresh_credentials.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
