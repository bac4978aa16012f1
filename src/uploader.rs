// src/uploader.rs
//
// Parallel block upload with commit-only-on-full-success.
//
// Design:
// - Small payloads (<= single_put_threshold) go up with one put_blob call.
// - Larger payloads are planned into blocks, staged by a fixed pool of
//   workers draining a shared pending list, then committed in sequence order.
// - Each worker opens its own range reader per block, computes the MD5,
//   stages the block and compares the MD5 the store reports back.
// - The first failing worker clears the pending list, so the others run dry
//   and exit cleanly; it returns its error instead of raising it.
// - All worker errors are aggregated; commit is never reached after a failure.

use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

use crate::blob_store::{BlockBlobStore, PutBlockOptions, content_md5};
use crate::block_list::BlockList;
use crate::block_plan::{Block, CompletedBlock, UploadPlan};
use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::file_part::FilePart;

/// Where a payload is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub container: String,
    pub key: String,
    pub content_type: String,
}

impl Destination {
    pub fn new(container: &str, key: &str, content_type: &str) -> Self {
        Self {
            container: container.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMethod {
    SinglePut,
    Blocks { block_count: usize },
}

/// Result info returned by `upload_file`.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub container: String,
    pub key: String,
    pub total_bytes: u64,
    pub method: UploadMethod,
    pub started_at: SystemTime,
    pub completed_at: SystemTime,
}

/// State shared by every worker of one batch.
struct WorkerContext<S: ?Sized> {
    store: Arc<S>,
    source: PathBuf,
    dest: Destination,
    pending: BlockList<Block>,
    completed: BlockList<CompletedBlock>,
    block_timeout: Duration,
}

/// Uploads local files as block blobs through a `BlockBlobStore`.
pub struct BlockBlobUploader<S: ?Sized> {
    store: Arc<S>,
    cfg: UploadConfig,
}

impl<S: ?Sized> Clone for BlockBlobUploader<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), cfg: self.cfg.clone() }
    }
}

impl<S: BlockBlobStore + ?Sized + 'static> BlockBlobUploader<S> {
    pub fn new(store: Arc<S>, cfg: UploadConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { store, cfg })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Upload `source` to `dest`, choosing single put or the block pipeline by size.
    pub async fn upload_file(&self, source: &Path, dest: &Destination) -> Result<UploadOutcome> {
        let started_at = SystemTime::now();
        let size = tokio::fs::metadata(source).await?.len();

        let method = if size <= self.cfg.single_put_threshold {
            let content = tokio::fs::read(source).await?;
            self.store
                .put_blob(&dest.container, &dest.key, Bytes::from(content), &dest.content_type)
                .await?;
            info!("put {}/{} ({} bytes, single request)", dest.container, dest.key, size);
            UploadMethod::SinglePut
        } else {
            let plan = UploadPlan::new(size, self.cfg.block_size)?;
            let blocks = self.upload_blocks(source, &plan, dest).await?;
            let block_count = blocks.len();
            if block_count as u64 != plan.block_count() {
                return Err(UploadError::Worker(format!(
                    "only {} of {} blocks completed",
                    block_count,
                    plan.block_count()
                )));
            }
            self.commit(dest, blocks).await?;
            UploadMethod::Blocks { block_count }
        };

        Ok(UploadOutcome {
            container: dest.container.clone(),
            key: dest.key.clone(),
            total_bytes: size,
            method,
            started_at,
            completed_at: SystemTime::now(),
        })
    }

    /// Stage every block of `plan` with the worker pool.
    ///
    /// Returns the completed blocks (in completion order) only if every
    /// block succeeded; otherwise an aggregated `BlockUpload` error.
    pub async fn upload_blocks(
        &self,
        source: &Path,
        plan: &UploadPlan,
        dest: &Destination,
    ) -> Result<Vec<CompletedBlock>> {
        let start = Instant::now();
        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&self.store),
            source: source.to_path_buf(),
            dest: dest.clone(),
            pending: BlockList::from_items(plan.blocks()),
            completed: BlockList::new(),
            block_timeout: self.cfg.block_timeout,
        });

        info!(
            "uploading {} bytes to {}/{} in {} blocks of <= {} bytes with {} workers",
            plan.total_size(),
            dest.container,
            dest.key,
            plan.block_count(),
            plan.block_size(),
            self.cfg.workers
        );

        let handles: Vec<_> = (0..self.cfg.workers)
            .map(|worker| tokio::spawn(run_worker(worker, Arc::clone(&ctx))))
            .collect();

        let mut errors = Vec::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(None) => {}
                Ok(Some(err)) => errors.push(err),
                Err(join_err) => errors.push(UploadError::Worker(join_err.to_string())),
            }
        }

        if !errors.is_empty() {
            let err = UploadError::block_upload(errors);
            warn!("{}/{}: {}", dest.container, dest.key, err);
            return Err(err);
        }

        let completed = ctx.completed.snapshot();
        let elapsed = start.elapsed().as_secs_f64();
        let mbps = if elapsed > 0.0 {
            plan.total_size() as f64 / elapsed / (1024.0 * 1024.0)
        } else {
            0.0
        };
        info!(
            "staged {} blocks for {}/{} in {:.2}s ({:.2} MB/s)",
            completed.len(),
            dest.container,
            dest.key,
            elapsed,
            mbps
        );
        Ok(completed)
    }

    /// Commit completed blocks in ascending sequence order.
    pub async fn commit(&self, dest: &Destination, mut completed: Vec<CompletedBlock>) -> Result<()> {
        completed.sort_by_key(|b| b.block_number);
        let block_ids: Vec<String> = completed.into_iter().map(|b| b.block_id).collect();
        self.store
            .commit_blocks(&dest.container, &dest.key, &block_ids, &dest.content_type)
            .await?;
        info!("committed {}/{} from {} blocks", dest.container, dest.key, block_ids.len());
        Ok(())
    }
}

async fn run_worker<S: BlockBlobStore + ?Sized>(
    worker: usize,
    ctx: Arc<WorkerContext<S>>,
) -> Option<UploadError> {
    while let Some(block) = ctx.pending.pop() {
        // a panicking store must stop the batch like any other failure
        let attempt = AssertUnwindSafe(upload_block(&ctx, &block))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(UploadError::Worker(format!(
                    "block {} panicked: {}",
                    block.block_id,
                    panic_message(panic.as_ref())
                )))
            });
        match attempt {
            Ok(()) => ctx.completed.push(CompletedBlock {
                block_id: block.block_id,
                block_number: block.block_number,
            }),
            Err(err) => {
                // keep the other workers from taking new blocks
                ctx.pending.clear();
                warn!("worker {} stopped at block {}: {}", worker, block.block_id, err);
                return Some(err);
            }
        }
    }
    debug!("worker {} drained", worker);
    None
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

async fn upload_block<S: BlockBlobStore + ?Sized>(ctx: &WorkerContext<S>, block: &Block) -> Result<()> {
    let read_error = |source| UploadError::BlockRead { block_id: block.block_id.clone(), source };

    // the range reader is dropped, and its handle closed, at the end of this statement
    let data = FilePart::open(&ctx.source, block.offset, block.size)
        .await
        .map_err(read_error)?
        .read_all()
        .await
        .map_err(read_error)?;

    let options = PutBlockOptions {
        content_md5: content_md5(&data),
        timeout: ctx.block_timeout,
    };
    let put = ctx.store.put_block(
        &ctx.dest.container,
        &ctx.dest.key,
        &block.block_id,
        Bytes::from(data),
        &options,
    );
    let reported = tokio::time::timeout(ctx.block_timeout, put)
        .await
        .map_err(|_| UploadError::Timeout {
            block_id: block.block_id.clone(),
            timeout: ctx.block_timeout,
        })?
        .map_err(|source| UploadError::BlockStore { block_id: block.block_id.clone(), source })?;

    if reported != options.content_md5 {
        return Err(UploadError::Corrupt {
            block_id: block.block_id.clone(),
            expected: options.content_md5,
            reported,
        });
    }
    debug!("block {} ({} bytes at {}) staged", block.block_id, block.size, block.offset);
    Ok(())
}
