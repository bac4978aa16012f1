// src/constants.rs
//
// Centralized constants for blobsink to avoid hardcoded values throughout the codebase

/// Default block size ceiling for staged block uploads (4 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 4 * 1024 * 1024;

/// Payloads at or below this size go up in a single put (64 MiB)
pub const DEFAULT_SINGLE_PUT_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Default number of block upload workers
pub const DEFAULT_UPLOAD_WORKERS: usize = 10;

/// Default timeout for a single put-block call (seconds)
pub const DEFAULT_BLOCK_TIMEOUT_SECS: u64 = 30;

/// Width of the zero-padded decimal block identifier ("00001")
pub const BLOCK_ID_WIDTH: usize = 5;

/// Largest block count a plan can address with `BLOCK_ID_WIDTH` digits
pub const MAX_BLOCK_COUNT: u64 = 99_999;

// =============================================================================
// Output Defaults
// =============================================================================

/// Default object key template
pub const DEFAULT_OBJECT_KEY_FORMAT: &str = "%{path}%{time_slice}_%{index}.%{file_extension}";

/// Default compressor name
pub const DEFAULT_STORE_AS: &str = "gzip";

/// Compressor used when the configured name is not registered
pub const FALLBACK_STORE_AS: &str = "text";

/// Default strftime format used to render a chunk's time slice
pub const DEFAULT_TIME_SLICE_FORMAT: &str = "%Y%m%d";

/// Default gzip compression level
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Default zstd compression level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

// =============================================================================
// Environment Overrides
// =============================================================================

/// Block size ceiling in bytes
pub const ENV_BLOCK_SIZE: &str = "BLOBSINK_BLOCK_SIZE";

/// Single-put threshold in bytes
pub const ENV_SINGLE_PUT_THRESHOLD: &str = "BLOBSINK_SINGLE_PUT_THRESHOLD";

/// Number of upload workers
pub const ENV_UPLOAD_WORKERS: &str = "BLOBSINK_UPLOAD_WORKERS";

/// Per-block timeout, humantime syntax ("30s", "2m")
pub const ENV_BLOCK_TIMEOUT: &str = "BLOBSINK_BLOCK_TIMEOUT";

/// Destination container
pub const ENV_CONTAINER: &str = "BLOBSINK_CONTAINER";
