// src/output.rs
//
// Buffered-chunk output: each flushed chunk of records is compressed into a
// temp file, given a collision-free key and uploaded as one blob.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::io::Read;
use std::sync::Arc;
use tracing::{info, warn};

use crate::blob_store::BlockBlobStore;
use crate::compressor::{Compressor, CompressorRegistry};
use crate::config::{OutputConfig, UploadConfig};
use crate::error::{Result, StoreError, UploadError};
use crate::object_key::{KeyTemplate, KeyValues, PathSlicer, StoreExistence, resolve_object_key};
use crate::refresh::PeriodicTask;
use crate::uploader::{BlockBlobUploader, Destination, UploadOutcome};

/// What one `write` produced.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub key: String,
    /// Record bytes consumed before compression.
    pub source_bytes: u64,
    pub upload: UploadOutcome,
}

pub struct BlobOutput<S: ?Sized> {
    cfg: OutputConfig,
    container: String,
    compressor: Arc<dyn Compressor>,
    key_template: KeyTemplate,
    path_slicer: PathSlicer,
    uploader: BlockBlobUploader<S>,
    refresher: Option<PeriodicTask>,
}

impl<S: BlockBlobStore + ?Sized + 'static> BlobOutput<S> {
    /// Validate `cfg` and resolve the compressor from the built-in registry.
    pub fn configure(cfg: OutputConfig, upload: UploadConfig, store: Arc<S>) -> Result<Self> {
        Self::configure_with_registry(cfg, upload, store, &CompressorRegistry::default())
    }

    pub fn configure_with_registry(
        cfg: OutputConfig,
        upload: UploadConfig,
        store: Arc<S>,
        registry: &CompressorRegistry,
    ) -> Result<Self> {
        cfg.validate()?;
        let container = cfg.require_container()?.to_string();
        let compressor = registry.resolve(&cfg.store_as);
        let key_template = KeyTemplate::parse(&cfg.object_key_format)?;
        let path_slicer = PathSlicer::new(&cfg.path, cfg.local_time)?;
        PathSlicer::new(&cfg.time_slice_format, cfg.local_time)?;
        let uploader = BlockBlobUploader::new(store, upload)?;

        Ok(Self {
            cfg,
            container,
            compressor,
            key_template,
            path_slicer,
            uploader,
            refresher: None,
        })
    }

    pub fn compressor(&self) -> &dyn Compressor {
        self.compressor.as_ref()
    }

    /// Make sure the container exists and start the credential refresh, if configured.
    pub async fn start(&mut self) -> Result<()> {
        self.ensure_container().await?;

        if let Some(period) = self.cfg.credential_refresh_interval {
            if self.refresher.is_none() {
                let store = Arc::clone(self.uploader.store());
                self.refresher = Some(PeriodicTask::spawn("credential refresh", period, move || {
                    let store = Arc::clone(&store);
                    async move {
                        if let Err(e) = store.refresh_credentials().await {
                            warn!("credential refresh failed: {}", e);
                        }
                    }
                }));
            }
        }
        Ok(())
    }

    /// Stop background work. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        if let Some(task) = self.refresher.take() {
            task.shutdown().await;
        }
    }

    async fn ensure_container(&self) -> Result<()> {
        let store = self.uploader.store();
        match store.list_containers().await {
            Ok(names) if names.iter().any(|n| *n == self.container) => Ok(()),
            Ok(_) if self.cfg.auto_create_container => {
                store.create_container(&self.container).await?;
                info!("created container {}", self.container);
                Ok(())
            }
            Ok(_) => Err(UploadError::Config(format!(
                "The specified container does not exist: container = {}",
                self.container
            ))),
            // listing may be forbidden to a credential that can still write blobs
            Err(StoreError::PermissionDenied(msg)) => {
                warn!(
                    "not permitted to list containers ({}); assuming {} exists",
                    msg, self.container
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Placeholder values for a chunk flushed now.
    pub fn values_for(&self, time_slice: &str) -> KeyValues {
        KeyValues::for_flush(&self.path_slicer.slice(), time_slice, self.compressor.extension())
    }

    pub async fn resolve_key(&self, values: &KeyValues) -> Result<String> {
        let exists = StoreExistence(self.uploader.store().as_ref());
        resolve_object_key(&exists, &self.container, &self.key_template, values).await
    }

    pub async fn write(&self, time_slice: &str, records: Bytes) -> Result<WriteOutcome> {
        self.write_from(time_slice, std::io::Cursor::new(records)).await
    }

    /// Compress everything `records` yields and upload it under a fresh key.
    pub async fn write_from<R>(&self, time_slice: &str, mut records: R) -> Result<WriteOutcome>
    where
        R: Read + Send + 'static,
    {
        let values = self.values_for(time_slice);
        let key = self.resolve_key(&values).await?;

        let compressor = Arc::clone(&self.compressor);
        // on error the temp file is dropped and removed, never uploaded
        let (tmp, source_bytes) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut tmp = tempfile::Builder::new().prefix("blobsink-").tempfile()?;
            let consumed = compressor.compress(&mut records, tmp.as_file_mut())?;
            tmp.as_file_mut().sync_all()?;
            Ok((tmp, consumed))
        })
        .await
        .map_err(|e| UploadError::Worker(e.to_string()))??;

        let dest = Destination::new(&self.container, &key, self.compressor.content_type());
        let upload = self.uploader.upload_file(tmp.path(), &dest).await?;
        info!(
            "wrote {} record bytes to {}/{} as {}",
            source_bytes,
            self.container,
            key,
            self.compressor.name()
        );
        Ok(WriteOutcome { key, source_bytes, upload })
    }
}

/// Render a chunk's time slice, e.g. `20110102` for the default format.
pub fn time_slice_for(at: DateTime<Utc>, format: &str, local_time: bool) -> Result<String> {
    Ok(PathSlicer::new(format, local_time)?.slice_at(at))
}
