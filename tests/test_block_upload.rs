// tests/test_block_upload.rs
//
// Block pipeline behaviour against the in-memory and local-directory stores.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use blobsink::file_part::FilePart;
use blobsink::{
    BlobProperties, BlockBlobStore, BlockBlobUploader, Destination, FileSystemBlobStore,
    MemoryBlobStore, PutBlockOptions, StoreError, UploadConfig, UploadError, UploadMethod,
    UploadPlan,
};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn small_blocks(workers: usize) -> UploadConfig {
    UploadConfig {
        block_size: 1024,
        single_put_threshold: 1024,
        workers,
        block_timeout: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn checksum_mismatch_aborts_batch_without_commit() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("payload.bin");
    std::fs::write(&src, patterned(8 * 1024))?;

    let store = Arc::new(MemoryBlobStore::with_container("data"));
    store.corrupt_block("00004");
    let uploader = BlockBlobUploader::new(Arc::clone(&store), small_blocks(3))?;

    let dest = Destination::new("data", "payload.bin", "application/octet-stream");
    let err = uploader.upload_file(&src, &dest).await.unwrap_err();

    assert!(matches!(err, UploadError::BlockUpload { .. }), "unexpected error: {err}");
    let msg = err.to_string();
    assert!(msg.starts_with("multipart upload failed: "), "{msg}");
    assert!(msg.contains("00004"), "{msg}");
    assert!(err.errors().iter().any(|e| matches!(e, UploadError::Corrupt { block_id, .. } if block_id == "00004")));

    assert_eq!(store.calls().commit_blocks, 0);
    assert!(store.blob("data", "payload.bin").is_none());
    println!("✅ corrupt block aborted the batch: {msg}");
    Ok(())
}

#[tokio::test]
async fn store_failure_on_one_block_stops_other_workers() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("payload.bin");
    std::fs::write(&src, patterned(40 * 1024))?;

    let store = Arc::new(MemoryBlobStore::with_container("data"));
    store.fail_block("00001");
    store.set_put_block_delay(Duration::from_millis(5));
    let uploader = BlockBlobUploader::new(Arc::clone(&store), small_blocks(2))?;

    let dest = Destination::new("data", "payload.bin", "application/octet-stream");
    let err = uploader.upload_file(&src, &dest).await.unwrap_err();

    assert!(err.to_string().contains("00001"));
    // the failing worker cleared pending work, so the batch stopped early
    assert!(store.calls().put_block < 40, "put_block calls: {}", store.calls().put_block);
    assert_eq!(store.calls().commit_blocks, 0);
    Ok(())
}

#[tokio::test]
async fn small_payload_uses_one_direct_put() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("small.txt");
    std::fs::write(&src, patterned(1024))?;

    let store = Arc::new(MemoryBlobStore::with_container("data"));
    let uploader = BlockBlobUploader::new(Arc::clone(&store), UploadConfig::default())?;
    let out = uploader
        .upload_file(&src, &Destination::new("data", "small.txt", "text/plain"))
        .await?;

    assert_eq!(out.method, UploadMethod::SinglePut);
    assert_eq!(out.total_bytes, 1024);
    let calls = store.calls();
    assert_eq!(calls.put_blob, 1);
    assert_eq!(calls.put_block, 0);
    assert_eq!(calls.commit_blocks, 0);
    assert_eq!(store.blob("data", "small.txt").map(|b| b.data.len()), Some(1024));
    Ok(())
}

#[tokio::test]
async fn block_ranges_reassemble_source() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("source.bin");
    let data = patterned(10 * 1000 + 37);
    std::fs::write(&src, &data)?;

    let plan = UploadPlan::new(data.len() as u64, 1000)?;
    assert_eq!(plan.block_count(), 11);

    let mut rebuilt = Vec::with_capacity(data.len());
    for block in plan.blocks() {
        let part = FilePart::open(&src, block.offset, block.size).await?;
        rebuilt.extend(part.read_all().await?);
    }
    assert_eq!(rebuilt, data);
    Ok(())
}

#[tokio::test]
async fn file_store_commit_reproduces_source() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("source.bin");
    let data = patterned(9 * 1024 + 100);
    std::fs::write(&src, &data)?;

    let root = dir.path().join("blobs");
    let store = Arc::new(FileSystemBlobStore::new(&root));
    store.create_container("data").await?;

    let uploader = BlockBlobUploader::new(Arc::clone(&store), small_blocks(4))?;
    let out = uploader
        .upload_file(&src, &Destination::new("data", "nested/source.bin", "application/octet-stream"))
        .await?;

    assert_eq!(out.method, UploadMethod::Blocks { block_count: 10 });
    let committed = std::fs::read(root.join("data/nested/source.bin"))?;
    assert_eq!(committed, data);

    let props = store.blob_properties("data", "nested/source.bin").await?;
    assert_eq!(props.content_length, data.len() as u64);
    assert_eq!(props.content_type.as_deref(), Some("application/octet-stream"));
    println!("✅ {} blocks committed in order", 10);
    Ok(())
}

#[tokio::test]
async fn slow_block_times_out() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("payload.bin");
    std::fs::write(&src, patterned(4 * 1024))?;

    let store = Arc::new(MemoryBlobStore::with_container("data"));
    store.set_put_block_delay(Duration::from_millis(500));
    let cfg = UploadConfig { block_timeout: Duration::from_millis(20), ..small_blocks(2) };
    let uploader = BlockBlobUploader::new(Arc::clone(&store), cfg)?;

    let err = uploader
        .upload_file(&src, &Destination::new("data", "payload.bin", "application/octet-stream"))
        .await
        .unwrap_err();
    assert!(err.errors().iter().all(|e| matches!(e, UploadError::Timeout { .. })));
    assert_eq!(store.calls().commit_blocks, 0);
    Ok(())
}

#[tokio::test]
async fn block_path_commit_keeps_content_type() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("payload.bin");
    std::fs::write(&src, patterned(5 * 1024))?;

    let store = Arc::new(MemoryBlobStore::with_container("data"));
    let uploader = BlockBlobUploader::new(Arc::clone(&store), small_blocks(3))?;
    let out = uploader
        .upload_file(&src, &Destination::new("data", "payload.bin", "application/octet-stream"))
        .await?;

    assert_eq!(out.method, UploadMethod::Blocks { block_count: 5 });
    let blob = store.blob("data", "payload.bin").expect("blob committed");
    assert_eq!(blob.content_type, "application/octet-stream");
    Ok(())
}

/// Delegates to a `MemoryBlobStore` but panics while staging one block.
struct PanickingStore {
    inner: MemoryBlobStore,
    panic_on: &'static str,
}

#[async_trait]
impl BlockBlobStore for PanickingStore {
    async fn blob_properties(&self, container: &str, key: &str) -> Result<BlobProperties, StoreError> {
        self.inner.blob_properties(container, key).await
    }

    async fn put_blob(&self, container: &str, key: &str, body: Bytes, content_type: &str) -> Result<(), StoreError> {
        self.inner.put_blob(container, key, body, content_type).await
    }

    async fn put_block(
        &self,
        container: &str,
        key: &str,
        block_id: &str,
        body: Bytes,
        options: &PutBlockOptions,
    ) -> Result<String, StoreError> {
        if block_id == self.panic_on {
            panic!("store bug while staging {}", block_id);
        }
        self.inner.put_block(container, key, block_id, body, options).await
    }

    async fn commit_blocks(
        &self,
        container: &str,
        key: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.inner.commit_blocks(container, key, block_ids, content_type).await
    }

    async fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_containers().await
    }

    async fn create_container(&self, container: &str) -> Result<(), StoreError> {
        self.inner.create_container(container).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_store_stops_the_batch() -> Result<()> {
    let dir = tempdir()?;
    let src = dir.path().join("payload.bin");
    std::fs::write(&src, patterned(40 * 1024))?;

    let inner = MemoryBlobStore::with_container("data");
    inner.set_put_block_delay(Duration::from_millis(5));
    let store = Arc::new(PanickingStore { inner, panic_on: "00001" });
    let uploader = BlockBlobUploader::new(Arc::clone(&store), small_blocks(2))?;

    let err = uploader
        .upload_file(&src, &Destination::new("data", "payload.bin", "application/octet-stream"))
        .await
        .unwrap_err();

    let msg = err.to_string();
    assert!(msg.contains("00001") && msg.contains("panicked"), "{msg}");
    assert!(err.errors().iter().any(|e| matches!(e, UploadError::Worker(_))));
    let calls = store.inner.calls();
    assert!(calls.put_block < 39, "put_block calls: {}", calls.put_block);
    assert_eq!(calls.commit_blocks, 0);
    Ok(())
}
