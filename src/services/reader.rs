use crate::error::{ReaderError, Result};
use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Random-access byte source for documents too large to load wholesale.
pub trait ChunkReader {
    /// Reads up to `len` bytes starting at `offset`. Short reads happen only at end of file.
    fn read_range(&self, offset: u64, len: usize) -> impl Future<Output = Result<Vec<u8>>> + Send;

    fn size(&self) -> impl Future<Output = Result<u64>> + Send;
}

#[derive(Debug, Clone)]
pub struct FileChunkReader {
    path: PathBuf,
}

impl FileChunkReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChunkReader for FileChunkReader {
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;

        let mut buf = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    async fn size(&self) -> Result<u64> {
        let meta = tokio::fs::metadata(&self.path).await?;
        Ok(meta.len())
    }
}

/// In-memory reader, mostly useful for tests and small uploads.
#[derive(Debug, Clone, Default)]
pub struct BytesChunkReader {
    bytes: Vec<u8>,
    fail_after: Option<u64>,
}

impl BytesChunkReader {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            fail_after: None,
        }
    }

    /// Makes every read that starts at or beyond `offset` fail.
    pub fn failing_after(mut self, offset: u64) -> Self {
        self.fail_after = Some(offset);
        self
    }
}

impl ChunkReader for BytesChunkReader {
    async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if self.fail_after.is_some_and(|limit| offset >= limit) {
            return Err(ReaderError::ScanFailed {
                offset,
                reason: "simulated read failure".to_string(),
            });
        }
        let start = (offset as usize).min(self.bytes.len());
        let end = start.saturating_add(len).min(self.bytes.len());
        Ok(self.bytes[start..end].to_vec())
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.bytes.len() as u64)
    }
}
