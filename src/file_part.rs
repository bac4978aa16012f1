// src/file_part.rs
//
// Random-access range reads over a local file. Each FilePart owns its own
// handle, so workers never share a file cursor. The handle is closed when the
// FilePart is dropped, on every exit path.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

#[derive(Debug)]
pub struct FilePart {
    path: PathBuf,
    offset: u64,
    size: u64,
    file: File,
}

impl FilePart {
    /// Open `path` and position the handle at `offset`.
    pub async fn open(path: &Path, offset: u64, size: u64) -> std::io::Result<Self> {
        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Self { path: path.to_path_buf(), offset, size, file })
    }

    /// Read the whole range into memory, consuming the part.
    ///
    /// A source that is shorter than the planned range yields
    /// `UnexpectedEof` rather than a short block.
    pub async fn read_all(mut self) -> std::io::Result<Vec<u8>> {
        let len = usize::try_from(self.size).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "range does not fit in memory")
        })?;
        let mut buf = vec![0u8; len];
        self.file.read_exact(&mut buf).await?;
        trace!("read {} bytes at offset {} from {}", len, self.offset, self.path.display());
        Ok(buf)
    }
}
