//! CLI supporting `upload` and `plan`.
//!
//! Examples:
//! ```bash
//! blobsink upload  access.log --root /srv/blobs --container logs
//! blobsink upload  access.log --root /srv/blobs --container logs --store-as zstd --path 'app/%Y/%m/'
//! blobsink upload  big.bin    --container logs --block-size 8MiB --workers 16 --dry-run
//! blobsink plan    big.bin    --block-size 4MiB
//! ```

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

use blobsink::{
    BlobOutput, BlockBlobStore, FileSystemBlobStore, MemoryBlobStore, OutputConfig, UploadConfig,
    UploadMethod, UploadPlan, parse_size, time_slice_for,
};

/// Macro to safely print with broken pipe handling
macro_rules! safe_println {
    ($($arg:tt)*) => {
        match writeln!(io::stdout(), $($arg)*) {
            Ok(_) => {},
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                // exit quietly when piped to head/tail
                std::process::exit(0);
            }
            Err(e) => return Err(e.into())
        }
    };
}

#[derive(Parser)]
#[command(version, about = "Upload files as block blobs with per-block MD5 verification")]
struct Cli {
    #[arg(short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase log verbosity: -v = Info, -vv = Debug",
    )]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compress a file and upload it under a collision-free key.
    Upload {
        /// Local file holding the records to upload
        file: PathBuf,

        /// Directory backing the blob store (ignored with --dry-run)
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Destination container. Falls back to BLOBSINK_CONTAINER.
        #[arg(long)]
        container: Option<String>,

        /// Object key template, e.g. '%{path}%{time_slice}_%{index}.%{file_extension}'
        #[arg(long = "key-format")]
        key_format: Option<String>,

        /// strftime pattern rendered into %{path}
        #[arg(long, default_value = "")]
        path: String,

        /// Compressor: gzip, zstd, json or text
        #[arg(long = "store-as")]
        store_as: Option<String>,

        /// Time slice for %{time_slice}. Defaults to today's date.
        #[arg(long = "time-slice")]
        time_slice: Option<String>,

        /// Render path and the default time slice in local time
        #[arg(long = "local-time")]
        local_time: bool,

        /// Block size ceiling, e.g. 4MiB
        #[arg(long = "block-size", value_parser = parse_size)]
        block_size: Option<u64>,

        /// Payloads up to this size go up in one put, e.g. 64MiB
        #[arg(long = "put-threshold", value_parser = parse_size)]
        put_threshold: Option<u64>,

        /// Number of concurrent block workers
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Per-block timeout in seconds
        #[arg(long = "block-timeout")]
        block_timeout: Option<u64>,

        /// Fail instead of creating a missing container
        #[arg(long = "no-auto-create")]
        no_auto_create: bool,

        /// Upload into an in-memory store and report what would be written
        #[arg(long = "dry-run")]
        dry_run: bool,
    },

    /// Print the block plan for a file.
    Plan {
        file: PathBuf,

        /// Block size ceiling, e.g. 4MiB
        #[arg(long = "block-size", value_parser = parse_size)]
        block_size: Option<u64>,
    },
}

struct UploadArgs {
    file: PathBuf,
    time_slice: String,
    output: OutputConfig,
    upload: UploadConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads any variables from .env file that are not already set
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // bridge `log` records from dependencies
    tracing_log::LogTracer::init().ok();

    match cli.cmd {
        Command::Upload {
            file,
            root,
            container,
            key_format,
            path,
            store_as,
            time_slice,
            local_time,
            block_size,
            put_threshold,
            workers,
            block_timeout,
            no_auto_create,
            dry_run,
        } => {
            let mut output = OutputConfig::from_env();
            if container.is_some() {
                output.container = container;
            }
            if let Some(fmt) = key_format {
                output.object_key_format = fmt;
            }
            if let Some(name) = store_as {
                output.store_as = name;
            }
            output.path = path;
            output.local_time = local_time;
            output.auto_create_container = !no_auto_create;

            let mut upload = UploadConfig::from_env().context("invalid upload settings in environment")?;
            if let Some(n) = block_size {
                upload.block_size = n;
            }
            if let Some(n) = put_threshold {
                upload.single_put_threshold = n;
            }
            if let Some(n) = workers {
                upload.workers = n;
            }
            if let Some(secs) = block_timeout {
                upload.block_timeout = Duration::from_secs(secs);
            }

            let time_slice = match time_slice {
                Some(s) => s,
                None => time_slice_for(Utc::now(), &output.time_slice_format, local_time)?,
            };
            let args = UploadArgs { file, time_slice, output, upload };

            if dry_run {
                let store = Arc::new(MemoryBlobStore::new());
                let summary = upload_cmd(Arc::clone(&store), args).await?;
                safe_println!("{}", summary);
                safe_println!("dry run: {} blob(s) held in memory, nothing written", store.blob_count());
            } else {
                let store = Arc::new(FileSystemBlobStore::new(root));
                let summary = upload_cmd(store, args).await?;
                safe_println!("{}", summary);
            }
        }

        Command::Plan { file, block_size } => {
            plan_cmd(file, block_size).await?;
        }
    }

    Ok(())
}

async fn upload_cmd<S>(store: Arc<S>, args: UploadArgs) -> Result<String>
where
    S: BlockBlobStore + 'static,
{
    let UploadArgs { file, time_slice, output, upload } = args;
    let mut sink = BlobOutput::configure(output, upload, store)?;
    sink.start().await.context("failed to prepare destination container")?;

    let source = std::fs::File::open(&file)
        .with_context(|| format!("failed to open {}", file.display()))?;

    let t0 = Instant::now();
    let res = sink.write_from(&time_slice, source).await;
    sink.shutdown().await;
    let written = res.with_context(|| format!("failed to upload {}", file.display()))?;

    let elapsed = t0.elapsed();
    info!("upload of {} finished in {:?}", file.display(), elapsed);

    let method = match written.upload.method {
        UploadMethod::SinglePut => "single put".to_string(),
        UploadMethod::Blocks { block_count } => format!("{} blocks", block_count),
    };
    Ok(format!(
        "{} -> {}/{} ({} bytes in, {} bytes stored, {}, {:.2?})",
        file.display(),
        written.upload.container,
        written.key,
        written.source_bytes,
        written.upload.total_bytes,
        method,
        elapsed
    ))
}

async fn plan_cmd(file: PathBuf, block_size: Option<u64>) -> Result<()> {
    let meta = tokio::fs::metadata(&file)
        .await
        .with_context(|| format!("failed to stat {}", file.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", file.display());
    }

    let plan = match block_size {
        Some(n) => UploadPlan::new(meta.len(), n)?,
        None => UploadPlan::with_default_block_size(meta.len())?,
    };

    safe_println!(
        "{}: {} bytes, block size {}, {} block(s)",
        file.display(),
        plan.total_size(),
        plan.block_size(),
        plan.block_count()
    );
    safe_println!("{:<8} {:>14} {:>12}", "block", "offset", "size");
    for block in plan.blocks() {
        safe_println!("{:<8} {:>14} {:>12}", block.block_id, block.offset, block.size);
    }
    Ok(())
}
