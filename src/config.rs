// src/config.rs
//
// Runtime parameters for uploads and for the buffered output.

use std::time::Duration;

use crate::constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_TIMEOUT_SECS, DEFAULT_OBJECT_KEY_FORMAT,
    DEFAULT_SINGLE_PUT_THRESHOLD, DEFAULT_STORE_AS, DEFAULT_TIME_SLICE_FORMAT,
    DEFAULT_UPLOAD_WORKERS, ENV_BLOCK_SIZE, ENV_BLOCK_TIMEOUT, ENV_CONTAINER,
    ENV_SINGLE_PUT_THRESHOLD, ENV_UPLOAD_WORKERS,
};
use crate::error::{Result, UploadError};

/// Knobs for the block pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Ceiling for a single block in bytes.
    pub block_size: u64,
    /// Payloads up to this size are sent with one put.
    pub single_put_threshold: u64,
    /// Number of concurrent block workers. Not derived from core count.
    pub workers: usize,
    /// Bound on each put-block call.
    pub block_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            single_put_threshold: DEFAULT_SINGLE_PUT_THRESHOLD,
            workers: DEFAULT_UPLOAD_WORKERS,
            block_timeout: Duration::from_secs(DEFAULT_BLOCK_TIMEOUT_SECS),
        }
    }
}

impl UploadConfig {
    /// Defaults, overridden by any BLOBSINK_* variables that are set.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Some(v) = env_var(ENV_BLOCK_SIZE) {
            cfg.block_size = parse_size(&v).map_err(|e| env_error(ENV_BLOCK_SIZE, e))?;
        }
        if let Some(v) = env_var(ENV_SINGLE_PUT_THRESHOLD) {
            cfg.single_put_threshold =
                parse_size(&v).map_err(|e| env_error(ENV_SINGLE_PUT_THRESHOLD, e))?;
        }
        if let Some(v) = env_var(ENV_UPLOAD_WORKERS) {
            cfg.workers = v
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| env_error(ENV_UPLOAD_WORKERS, e.to_string()))?;
        }
        if let Some(v) = env_var(ENV_BLOCK_TIMEOUT) {
            cfg.block_timeout = humantime::parse_duration(v.trim())
                .map_err(|e| env_error(ENV_BLOCK_TIMEOUT, e.to_string()))?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(UploadError::Config("block_size must be greater than zero".into()));
        }
        if self.workers == 0 {
            return Err(UploadError::Config("workers must be >= 1".into()));
        }
        if self.block_timeout.is_zero() {
            return Err(UploadError::Config("block_timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Settings of a buffered output writing into one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub container: Option<String>,
    /// strftime pattern rendered into `%{path}`.
    pub path: String,
    pub object_key_format: String,
    /// Compressor name; unknown names fall back to text.
    pub store_as: String,
    pub auto_create_container: bool,
    pub time_slice_format: String,
    /// Render `path` and time slices in local time instead of UTC.
    pub local_time: bool,
    /// Period of the background credential refresh, if any.
    pub credential_refresh_interval: Option<Duration>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            container: None,
            path: String::new(),
            object_key_format: DEFAULT_OBJECT_KEY_FORMAT.to_string(),
            store_as: DEFAULT_STORE_AS.to_string(),
            auto_create_container: true,
            time_slice_format: DEFAULT_TIME_SLICE_FORMAT.to_string(),
            local_time: false,
            credential_refresh_interval: None,
        }
    }
}

impl OutputConfig {
    pub fn with_container(container: &str) -> Self {
        Self { container: Some(container.to_string()), ..Self::default() }
    }

    /// Defaults plus the container from BLOBSINK_CONTAINER, when set.
    pub fn from_env() -> Self {
        Self { container: env_var(ENV_CONTAINER), ..Self::default() }
    }

    /// The destination container, or a configuration error when it is missing.
    pub fn require_container(&self) -> Result<&str> {
        match self.container.as_deref().map(str::trim) {
            Some(c) if !c.is_empty() => Ok(c),
            _ => Err(UploadError::Config("container is needed".into())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.require_container()?;
        if self.object_key_format.is_empty() {
            return Err(UploadError::Config("object_key_format must not be empty".into()));
        }
        if matches!(self.credential_refresh_interval, Some(d) if d.is_zero()) {
            return Err(UploadError::Config(
                "credential_refresh_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_error(name: &str, detail: String) -> UploadError {
    UploadError::Config(format!("invalid {}: {}", name, detail))
}

/// Parse a byte size such as `4194304`, `4MiB`, `64M` or `1GB`.
///
/// K/M/G and KiB/MiB/GiB are binary; KB/MB/GB are decimal.
pub fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid size {:?}", s));
    }
    let n: u64 = digits.parse().map_err(|e| format!("invalid size {:?}: {}", s, e))?;
    let mult: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kib" => 1 << 10,
        "m" | "mib" => 1 << 20,
        "g" | "gib" => 1 << 30,
        "kb" => 1_000,
        "mb" => 1_000_000,
        "gb" => 1_000_000_000,
        other => return Err(format!("unknown size unit {:?}", other)),
    };
    n.checked_mul(mult).ok_or_else(|| format!("size {:?} overflows", s))
}
