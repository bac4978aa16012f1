// src/file_store.rs
//
// FileSystemBlobStore implementation for POSIX file I/O.
// This provides the same BlockBlobStore interface on a local directory tree:
//
//   <root>/<container>/<key>                     committed blobs
//   <root>/<container>/.staging/<key md5>/<id>   staged, uncommitted blocks
//   <root>/<container>/.meta/<key md5>           content type of a blob
//
// Commit writes the content type first, then the ordered blocks into a temp
// file next to the target, and renames it into place last, so a blob is never
// visible half-written or before its metadata.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::blob_store::{BlobProperties, BlockBlobStore, PutBlockOptions, content_md5};
use crate::error::StoreError;

const STAGING_DIR: &str = ".staging";
const META_DIR: &str = ".meta";

#[derive(Debug, Clone)]
pub struct FileSystemBlobStore {
    root: PathBuf,
}

fn map_io(err: std::io::Error, what: &str) -> StoreError {
    match err.kind() {
        ErrorKind::NotFound => StoreError::NotFound(what.to_string()),
        ErrorKind::PermissionDenied => StoreError::PermissionDenied(what.to_string()),
        _ => StoreError::Io(err),
    }
}

/// Fixed-length directory name for a key, whatever the key's length.
fn key_digest(key: &str) -> String {
    format!("{:x}", md5::compute(key.as_bytes()))
}

fn bad_request(message: String) -> StoreError {
    StoreError::Service { status: 400, message }
}

impl FileSystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        if container.is_empty()
            || container.starts_with('.')
            || container.contains(['/', '\\'])
        {
            return Err(bad_request(format!("invalid container name: {:?}", container)));
        }
        Ok(self.root.join(container))
    }

    async fn existing_container_dir(&self, container: &str) -> Result<PathBuf, StoreError> {
        let dir = self.container_dir(container)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StoreError::NotFound(format!("container {}", container))),
            Err(e) => Err(map_io(e, &format!("container {}", container))),
        }
    }

    /// Keys are relative paths; anything that could escape the container is rejected.
    fn blob_path(container_dir: &Path, key: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with('/')
            && rel.components().all(|c| matches!(c, Component::Normal(_)))
            && !matches!(
                rel.components().next(),
                Some(Component::Normal(first)) if first == STAGING_DIR || first == META_DIR
            );
        if !valid {
            return Err(bad_request(format!("invalid blob key: {:?}", key)));
        }
        Ok(container_dir.join(rel))
    }

    fn staging_dir(container_dir: &Path, key: &str) -> PathBuf {
        container_dir.join(STAGING_DIR).join(key_digest(key))
    }

    fn meta_path(container_dir: &Path, key: &str) -> PathBuf {
        container_dir.join(META_DIR).join(key_digest(key))
    }

    async fn write_meta(container_dir: &Path, key: &str, content_type: &str) -> Result<(), StoreError> {
        let meta = Self::meta_path(container_dir, key);
        if let Some(parent) = meta.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&meta, content_type.as_bytes()).await?;
        Ok(())
    }

    /// Write `parts` in order to a temp file beside `target`, then rename it over `target`.
    async fn write_atomically(target: &Path, parts: &[PathBuf], body: Option<&Bytes>) -> Result<u64, StoreError> {
        let parent = target
            .parent()
            .ok_or_else(|| bad_request(format!("blob path has no parent: {}", target.display())))?;
        fs::create_dir_all(parent).await?;
        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));

        let result = async {
            let mut out = fs::File::create(&tmp).await?;
            let mut written = 0u64;
            if let Some(body) = body {
                out.write_all(body).await?;
                written += body.len() as u64;
            }
            for part in parts {
                let mut input = fs::File::open(part).await?;
                written += tokio::io::copy(&mut input, &mut out).await?;
            }
            out.flush().await?;
            out.sync_all().await?;
            drop(out);
            fs::rename(&tmp, target).await?;
            Ok::<u64, std::io::Error>(written)
        }
        .await;

        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(StoreError::Io(e))
            }
        }
    }
}

#[async_trait]
impl BlockBlobStore for FileSystemBlobStore {
    async fn blob_properties(&self, container: &str, key: &str) -> Result<BlobProperties, StoreError> {
        let dir = self.existing_container_dir(container).await?;
        let path = Self::blob_path(&dir, key)?;
        let what = format!("{}/{}", container, key);
        let meta = fs::metadata(&path).await.map_err(|e| map_io(e, &what))?;
        if !meta.is_file() {
            return Err(StoreError::NotFound(what));
        }
        let content_type = fs::read_to_string(Self::meta_path(&dir, key)).await.ok();
        Ok(BlobProperties { content_length: meta.len(), content_type })
    }

    async fn put_blob(
        &self,
        container: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<(), StoreError> {
        let dir = self.existing_container_dir(container).await?;
        let path = Self::blob_path(&dir, key)?;
        Self::write_meta(&dir, key, content_type).await?;
        let written = Self::write_atomically(&path, &[], Some(&body)).await?;
        debug!("put {} bytes to {}", written, path.display());
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
        if block_id.is_empty() || !block_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(bad_request(format!("invalid block id: {:?}", block_id)));
        }
        let dir = self.existing_container_dir(container).await?;
        Self::blob_path(&dir, key)?;
        let staging = Self::staging_dir(&dir, key);
        fs::create_dir_all(&staging).await?;
        fs::write(staging.join(block_id), &body).await?;
        Ok(content_md5(&body))
    }

    async fn commit_blocks(
        &self,
        container: &str,
        key: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<(), StoreError> {
        let dir = self.existing_container_dir(container).await?;
        let path = Self::blob_path(&dir, key)?;
        let staging = Self::staging_dir(&dir, key);

        let mut parts = Vec::with_capacity(block_ids.len());
        for id in block_ids {
            let part = staging.join(id);
            if fs::metadata(&part).await.is_err() {
                return Err(bad_request(format!("block {} was never staged", id)));
            }
            parts.push(part);
        }

        Self::write_meta(&dir, key, content_type).await?;
        let written = Self::write_atomically(&path, &parts, None).await?;
        // the blob is committed; leftover staging files are only clutter
        if let Err(e) = fs::remove_dir_all(&staging).await {
            warn!("failed to remove staged blocks at {}: {}", staging.display(), e);
        }
        info!("committed {} blocks ({} bytes) to {}", block_ids.len(), written, path.display());
        Ok(())
    }

    async fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            // no root yet means no containers yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io(e, &self.root.display().to_string())),
        };
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with('.') {
                    out.push(name);
                }
            }
        }
        out.sort();
        Ok(out)
    }

    async fn create_container(&self, container: &str) -> Result<(), StoreError> {
        let dir = self.container_dir(container)?;
        fs::create_dir_all(&dir).await.map_err(|e| map_io(e, &dir.display().to_string()))?;
        info!("created container {}", dir.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn opts(data: &[u8]) -> PutBlockOptions {
        PutBlockOptions { content_md5: content_md5(data), timeout: Duration::from_secs(30) }
    }

    #[tokio::test]
    async fn test_put_and_properties() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();

        store
            .put_blob("logs", "a/b/c.txt", Bytes::from("hello"), "text/plain")
            .await
            .unwrap();
        let props = store.blob_properties("logs", "a/b/c.txt").await.unwrap();
        assert_eq!(props.content_length, 5);
        assert_eq!(props.content_type.as_deref(), Some("text/plain"));
        assert!(!store.blob_exists("logs", "a/b/missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_staged_blocks_invisible_until_commit() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();

        store.put_block("logs", "big.gz", "00002", Bytes::from("def"), &opts(b"def")).await.unwrap();
        store.put_block("logs", "big.gz", "00001", Bytes::from("abc"), &opts(b"abc")).await.unwrap();
        assert!(!store.blob_exists("logs", "big.gz").await.unwrap());

        let ids = vec!["00001".to_string(), "00002".to_string()];
        store.commit_blocks("logs", "big.gz", &ids, "application/x-gzip").await.unwrap();

        let data = std::fs::read(root.path().join("logs/big.gz")).unwrap();
        assert_eq!(data, b"abcdef");
        assert!(!root.path().join("logs").join(STAGING_DIR).join(key_digest("big.gz")).exists());
    }

    #[tokio::test]
    async fn test_commit_with_unknown_block_fails_without_blob() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();
        store.put_block("logs", "k", "00001", Bytes::from("abc"), &opts(b"abc")).await.unwrap();

        let ids = vec!["00001".to_string(), "00002".to_string()];
        let err = store.commit_blocks("logs", "k", &ids, "text/plain").await.unwrap_err();
        assert!(matches!(err, StoreError::Service { status: 400, .. }));
        assert!(!store.blob_exists("logs", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();
        for key in ["../x", "/abs", "", ".staging/x", "dir/"] {
            let res = store.put_blob("logs", key, Bytes::new(), "text/plain").await;
            assert!(res.is_err(), "key {:?} should be rejected", key);
        }
    }

    #[tokio::test]
    async fn test_list_and_missing_container() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("b").await.unwrap();
        store.create_container("a").await.unwrap();
        assert_eq!(store.list_containers().await.unwrap(), vec!["a", "b"]);

        let err = store.blob_properties("zzz", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_long_keys_stay_within_name_limits() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();
        let key = format!("app/{}/x.gz", "h".repeat(190));
        assert!(key.len() >= 200);

        store.put_blob("logs", &key, Bytes::from("small"), "application/x-gzip").await.unwrap();
        let props = store.blob_properties("logs", &key).await.unwrap();
        assert_eq!(props.content_type.as_deref(), Some("application/x-gzip"));

        let staged = format!("{}-staged", key);
        store.put_block("logs", &staged, "00001", Bytes::from("abc"), &opts(b"abc")).await.unwrap();
        store.put_block("logs", &staged, "00002", Bytes::from("def"), &opts(b"def")).await.unwrap();
        let ids = vec!["00001".to_string(), "00002".to_string()];
        store.commit_blocks("logs", &staged, &ids, "text/plain").await.unwrap();
        assert_eq!(std::fs::read(root.path().join("logs").join(&staged)).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn test_failed_put_leaves_no_visible_blob() {
        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();
        // one path component longer than any file system allows
        let key = format!("app/{}.gz", "h".repeat(300));

        assert!(store.put_blob("logs", &key, Bytes::from("x"), "text/plain").await.is_err());
        let leftovers: Vec<_> = std::fs::read_dir(root.path().join("logs/app"))
            .map(|entries| entries.filter_map(|e| e.ok()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "unexpected files: {:?}", leftovers);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commit_succeeds_when_staging_cleanup_fails() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempdir().unwrap();
        let store = FileSystemBlobStore::new(root.path());
        store.create_container("logs").await.unwrap();
        store.put_block("logs", "k", "00001", Bytes::from("abc"), &opts(b"abc")).await.unwrap();

        // a read-only parent keeps the staging directory from being removed
        let staging_root = root.path().join("logs").join(STAGING_DIR);
        std::fs::set_permissions(&staging_root, std::fs::Permissions::from_mode(0o555)).unwrap();
        let res = store.commit_blocks("logs", "k", &["00001".to_string()], "text/plain").await;
        std::fs::set_permissions(&staging_root, std::fs::Permissions::from_mode(0o755)).unwrap();

        res.unwrap();
        assert_eq!(std::fs::read(root.path().join("logs/k")).unwrap(), b"abc");
    }
}
