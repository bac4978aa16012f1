// src/object_key.rs
//
// Object key templates and the collision-free key resolver.
//
// A template is a string with `%{name}` tokens. Recognized names are
// path, time_slice, file_extension, index, uuid_flush and hostname; any
// other name, or a recognized name without a value, is a configuration error.

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;

use crate::blob_store::BlockBlobStore;
use crate::error::{Result, StoreError, UploadError};

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%\{([^}]+)\}").expect("static token regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placeholder {
    Path,
    TimeSlice,
    FileExtension,
    Index,
    UuidFlush,
    Hostname,
}

impl Placeholder {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "path" => Some(Self::Path),
            "time_slice" => Some(Self::TimeSlice),
            "file_extension" => Some(Self::FileExtension),
            "index" => Some(Self::Index),
            "uuid_flush" => Some(Self::UuidFlush),
            "hostname" => Some(Self::Hostname),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::TimeSlice => "time_slice",
            Self::FileExtension => "file_extension",
            Self::Index => "index",
            Self::UuidFlush => "uuid_flush",
            Self::Hostname => "hostname",
        }
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{{{}}}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Token(Placeholder),
}

/// A parsed object key template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    pub fn parse(template: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in TOKEN_RE.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let placeholder = Placeholder::from_name(name.as_str()).ok_or_else(|| {
                UploadError::Config(format!(
                    "unknown placeholder %{{{}}} in object key format {:?}",
                    name.as_str(),
                    template
                ))
            })?;
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            segments.push(Segment::Token(placeholder));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }
        Ok(Self { source: template.to_string(), segments })
    }

    /// Whether the template contains the given placeholder.
    pub fn uses(&self, placeholder: Placeholder) -> bool {
        self.segments.iter().any(|s| *s == Segment::Token(placeholder))
    }

    /// Substitute every placeholder, with `index` as the collision counter.
    pub fn render(&self, values: &KeyValues, index: u64) -> Result<String> {
        let mut out = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token(Placeholder::Index) => out.push_str(&index.to_string()),
                Segment::Token(p) => {
                    let value = values.get(*p).ok_or_else(|| {
                        UploadError::Config(format!(
                            "no value for {} in object key format {:?}",
                            p, self.source
                        ))
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Values for every non-index placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValues {
    pub path: Option<String>,
    pub time_slice: Option<String>,
    pub file_extension: Option<String>,
    pub uuid_flush: Option<String>,
    pub hostname: Option<String>,
}

impl KeyValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values for one flush: a fresh v4 UUID and this machine's hostname
    /// alongside the caller's path, time slice and extension.
    pub fn for_flush(path: &str, time_slice: &str, file_extension: &str) -> Self {
        Self::new()
            .with_path(path)
            .with_time_slice(time_slice)
            .with_file_extension(file_extension)
            .with_uuid_flush(uuid::Uuid::new_v4().to_string())
            .with_hostname(gethostname::gethostname().to_string_lossy().into_owned())
    }

    pub fn with_path(mut self, v: impl Into<String>) -> Self {
        self.path = Some(v.into());
        self
    }

    pub fn with_time_slice(mut self, v: impl Into<String>) -> Self {
        self.time_slice = Some(v.into());
        self
    }

    pub fn with_file_extension(mut self, v: impl Into<String>) -> Self {
        self.file_extension = Some(v.into());
        self
    }

    pub fn with_uuid_flush(mut self, v: impl Into<String>) -> Self {
        self.uuid_flush = Some(v.into());
        self
    }

    pub fn with_hostname(mut self, v: impl Into<String>) -> Self {
        self.hostname = Some(v.into());
        self
    }

    pub fn get(&self, placeholder: Placeholder) -> Option<&str> {
        match placeholder {
            Placeholder::Path => self.path.as_deref(),
            Placeholder::TimeSlice => self.time_slice.as_deref(),
            Placeholder::FileExtension => self.file_extension.as_deref(),
            Placeholder::UuidFlush => self.uuid_flush.as_deref(),
            Placeholder::Hostname => self.hostname.as_deref(),
            Placeholder::Index => None,
        }
    }
}

/// Existence probe used by the resolver.
#[async_trait]
pub trait ExistenceCheck: Send + Sync {
    /// `Ok(false)` only when the key is definitely absent.
    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError>;
}

/// Adapts any `BlockBlobStore` into an `ExistenceCheck`.
pub struct StoreExistence<'a, S: ?Sized>(pub &'a S);

#[async_trait]
impl<'a, S: BlockBlobStore + ?Sized> ExistenceCheck for StoreExistence<'a, S> {
    async fn exists(&self, container: &str, key: &str) -> Result<bool, StoreError> {
        self.0.blob_exists(container, key).await
    }
}

/// Find the first key, counting `index` up from 0, that does not exist yet.
///
/// Fails with a configuration error as soon as two consecutive candidates
/// are identical: the template does not vary with `index`, so the search
/// could never finish.
pub async fn resolve_object_key<E: ExistenceCheck + ?Sized>(
    exists: &E,
    container: &str,
    template: &KeyTemplate,
    values: &KeyValues,
) -> Result<String> {
    let mut index = 0u64;
    let mut previous: Option<String> = None;
    loop {
        let candidate = template.render(values, index)?;
        if index > 0 && previous.as_deref() == Some(candidate.as_str()) {
            return Err(UploadError::Config(format!(
                "duplicated path is generated. use %{{index}} in object key format: path = {}",
                candidate
            )));
        }
        if !exists.exists(container, &candidate).await? {
            debug!("resolved object key {} after {} collision(s)", candidate, index);
            return Ok(candidate);
        }
        debug!("object key {} already exists in {}", candidate, container);
        previous = Some(candidate);
        index += 1;
    }
}

/// Renders strftime patterns for the `path` and `time_slice` values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSlicer {
    format: String,
    local_time: bool,
}

impl PathSlicer {
    /// Rejects patterns chrono cannot format, so rendering never panics later.
    pub fn new(format: &str, local_time: bool) -> Result<Self> {
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(UploadError::Config(format!("invalid strftime pattern {:?}", format)));
        }
        Ok(Self { format: format.to_string(), local_time })
    }

    pub fn slice_at(&self, at: DateTime<Utc>) -> String {
        if self.local_time {
            at.with_timezone(&Local).format(&self.format).to_string()
        } else {
            at.format(&self.format).to_string()
        }
    }

    pub fn slice(&self) -> String {
        self.slice_at(Utc::now())
    }
}
