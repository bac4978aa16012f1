// src/compressor.rs
//
// Payload encoders selected by name at configuration time.
//
// Every compressor drains its source completely and leaves the destination
// finalized on success (gzip/zstd trailers written, buffers flushed).

use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::warn;

use crate::constants::{DEFAULT_GZIP_LEVEL, DEFAULT_ZSTD_LEVEL, FALLBACK_STORE_AS};
use crate::error::{Result, UploadError};

pub trait Compressor: Send + Sync + fmt::Debug {
    /// Registered name, e.g. "gzip".
    fn name(&self) -> &'static str;

    /// File extension used for the `file_extension` key placeholder.
    fn extension(&self) -> &'static str;

    fn content_type(&self) -> &'static str;

    /// Encode all of `source` into `dest`, returning the number of source bytes consumed.
    fn compress(&self, source: &mut dyn Read, dest: &mut dyn Write) -> Result<u64>;
}

fn compression_error(codec: &str, source: io::Error) -> UploadError {
    UploadError::Compression { codec: codec.to_string(), source }
}

/// Identity copy, stored as plain text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextCompressor;

impl Compressor for TextCompressor {
    fn name(&self) -> &'static str {
        "text"
    }

    fn extension(&self) -> &'static str {
        "txt"
    }

    fn content_type(&self) -> &'static str {
        "text/plain"
    }

    fn compress(&self, source: &mut dyn Read, dest: &mut dyn Write) -> Result<u64> {
        let copied = io::copy(source, dest).map_err(|e| compression_error(self.name(), e))?;
        dest.flush().map_err(|e| compression_error(self.name(), e))?;
        Ok(copied)
    }
}

/// Same bytes as `TextCompressor`, declared as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCompressor;

impl Compressor for JsonCompressor {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extension(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn compress(&self, source: &mut dyn Read, dest: &mut dyn Write) -> Result<u64> {
        TextCompressor.compress(source, dest)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: u32,
}

impl GzipCompressor {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_GZIP_LEVEL)
    }
}

impl Compressor for GzipCompressor {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extension(&self) -> &'static str {
        "gz"
    }

    fn content_type(&self) -> &'static str {
        "application/x-gzip"
    }

    fn compress(&self, source: &mut dyn Read, dest: &mut dyn Write) -> Result<u64> {
        let mut encoder = GzEncoder::new(dest, Compression::new(self.level));
        let copied = io::copy(source, &mut encoder).map_err(|e| compression_error(self.name(), e))?;
        // finish() writes the gzip trailer; without it the member is truncated
        let dest = encoder.finish().map_err(|e| compression_error(self.name(), e))?;
        dest.flush().map_err(|e| compression_error(self.name(), e))?;
        Ok(copied)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn extension(&self) -> &'static str {
        "zst"
    }

    fn content_type(&self) -> &'static str {
        "application/zstd"
    }

    fn compress(&self, source: &mut dyn Read, dest: &mut dyn Write) -> Result<u64> {
        let mut encoder =
            zstd::Encoder::new(dest, self.level).map_err(|e| compression_error(self.name(), e))?;
        let copied = io::copy(source, &mut encoder).map_err(|e| compression_error(self.name(), e))?;
        let dest = encoder.finish().map_err(|e| compression_error(self.name(), e))?;
        dest.flush().map_err(|e| compression_error(self.name(), e))?;
        Ok(copied)
    }
}

pub type CompressorFactory = fn() -> Arc<dyn Compressor>;

/// Name → factory table, resolved once when an output is configured.
#[derive(Clone)]
pub struct CompressorRegistry {
    factories: BTreeMap<String, CompressorFactory>,
}

impl fmt::Debug for CompressorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompressorRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("gzip", || Arc::new(GzipCompressor::default()));
        registry.register("zstd", || Arc::new(ZstdCompressor::default()));
        registry.register("json", || Arc::new(JsonCompressor));
        registry.register("text", || Arc::new(TextCompressor));
        registry
    }
}

impl CompressorRegistry {
    pub fn empty() -> Self {
        Self { factories: BTreeMap::new() }
    }

    /// Add or replace a named compressor.
    pub fn register(&mut self, name: &str, factory: CompressorFactory) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Compressor>> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Look up `name`, falling back to plain text with a warning when it is
    /// not registered.
    pub fn resolve(&self, name: &str) -> Arc<dyn Compressor> {
        match self.lookup(name) {
            Some(compressor) => compressor,
            None => {
                warn!("{} not found. Use '{}' instead", name, FALLBACK_STORE_AS);
                self.lookup(FALLBACK_STORE_AS)
                    .unwrap_or_else(|| Arc::new(TextCompressor))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn sample() -> Vec<u8> {
        b"2011-01-02T13:14:15Z\ttest\t{\"a\":1}\n".repeat(200)
    }

    #[test]
    fn test_gzip_output_is_finalized() {
        let data = sample();
        let mut out = Vec::new();
        let consumed = GzipCompressor::default()
            .compress(&mut data.as_slice(), &mut out)
            .unwrap();
        assert_eq!(consumed, data.len() as u64);
        assert!(out.len() < data.len());

        let mut decoded = Vec::new();
        GzDecoder::new(out.as_slice()).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_zstd_output_decodes() {
        let data = sample();
        let mut out = Vec::new();
        ZstdCompressor::default().compress(&mut data.as_slice(), &mut out).unwrap();
        let decoded = zstd::decode_all(out.as_slice()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_text_and_json_are_passthrough() {
        let data = sample();
        for c in [&TextCompressor as &dyn Compressor, &JsonCompressor] {
            let mut out = Vec::new();
            c.compress(&mut data.as_slice(), &mut out).unwrap();
            assert_eq!(out, data);
        }
    }

    #[test]
    fn test_registry_names_and_types() {
        let registry = CompressorRegistry::default();
        let cases = [
            ("gzip", "gz", "application/x-gzip"),
            ("zstd", "zst", "application/zstd"),
            ("json", "json", "application/json"),
            ("text", "txt", "text/plain"),
        ];
        for (name, ext, ct) in cases {
            let c = registry.resolve(name);
            assert_eq!(c.name(), name);
            assert_eq!(c.extension(), ext);
            assert_eq!(c.content_type(), ct);
        }
    }

    #[test]
    fn test_unknown_name_falls_back_to_text() {
        let registry = CompressorRegistry::default();
        assert!(registry.lookup("lzo").is_none());
        let c = registry.resolve("lzo");
        assert_eq!(c.extension(), "txt");
        assert_eq!(c.content_type(), "text/plain");
    }

    #[test]
    fn test_register_custom_factory() {
        let mut registry = CompressorRegistry::empty();
        registry.register("fast-gzip", || Arc::new(GzipCompressor::new(1)));
        assert_eq!(registry.names(), vec!["fast-gzip"]);
        // no "text" entry registered: fallback still yields a passthrough
        assert_eq!(registry.resolve("nope").name(), "text");
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }
    }

    #[test]
    fn test_source_failure_is_compression_error() {
        let mut out = Vec::new();
        let err = GzipCompressor::default()
            .compress(&mut FailingReader, &mut out)
            .unwrap_err();
        assert!(matches!(err, UploadError::Compression { ref codec, .. } if codec == "gzip"));
    }
}
