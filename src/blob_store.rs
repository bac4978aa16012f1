// src/blob_store.rs
//
// Contract for the block-blob service the uploader talks to. The HTTP and
// auth machinery lives behind this trait; the uploader only sees these calls.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use std::time::Duration;

use crate::error::StoreError;

/// Minimal properties surfaced by `blob_properties`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub content_length: u64,
    pub content_type: Option<String>,
}

/// Options for a single put-block call.
#[derive(Debug, Clone)]
pub struct PutBlockOptions {
    /// Base64 MD5 of the block body as computed by the sender.
    pub content_md5: String,
    /// Server-side timeout hint; the uploader also enforces it locally.
    pub timeout: Duration,
}

/// Base64-encoded MD5 digest, the form block stores report back.
pub fn content_md5(data: &[u8]) -> String {
    B64.encode(md5::compute(data).0)
}

#[async_trait]
pub trait BlockBlobStore: Send + Sync {
    /// Properties of a committed blob. A missing blob is `StoreError::NotFound`.
    async fn blob_properties(&self, container: &str, key: &str) -> Result<BlobProperties, StoreError>;

    /// Single-shot upload of a whole blob.
    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Stage one uncommitted block and return the MD5 the store computed
    /// over the bytes it received.
    async fn put_block(
        &self,
        container: &str,
        key: &str,
        block_id: &str,
        body: Bytes,
        options: &PutBlockOptions,
    ) -> Result<String, StoreError>;

    /// Assemble the blob from staged blocks, in the given order.
    async fn commit_blocks(
        &self,
        container: &str,
        key: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn list_containers(&self) -> Result<Vec<String>, StoreError>;

    async fn create_container(&self, container: &str) -> Result<(), StoreError>;

    /// Renew credentials. Stores with static credentials keep the default.
    async fn refresh_credentials(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Whether a blob exists. Only "not found" maps to `false`; every other
    /// failure propagates.
    async fn blob_exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        match self.blob_properties(container, key).await {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
