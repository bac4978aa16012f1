// src/lib.rs
//
// Crate root: module tree plus the re-exports most callers need.

// ===== Core building blocks =====
pub mod constants;
pub mod config;
pub mod error;

pub mod block_plan;
pub mod block_list;
pub mod file_part;
pub mod compressor;
pub mod object_key;

// ===== Store contract and implementations =====
pub mod blob_store;
pub mod memory_store;
pub mod file_store;

// ===== Upload pipeline =====
pub mod uploader;
pub mod refresh;
pub mod output;

pub use blob_store::{BlobProperties, BlockBlobStore, PutBlockOptions, content_md5};
pub use block_plan::{Block, CompletedBlock, UploadPlan, block_id};
pub use compressor::{Compressor, CompressorRegistry};
pub use config::{OutputConfig, UploadConfig, parse_size};
pub use error::{Result, StoreError, UploadError};
pub use file_store::FileSystemBlobStore;
pub use memory_store::MemoryBlobStore;
pub use object_key::{KeyTemplate, KeyValues, PathSlicer, resolve_object_key};
pub use output::{BlobOutput, WriteOutcome, time_slice_for};
pub use uploader::{BlockBlobUploader, Destination, UploadMethod, UploadOutcome};
