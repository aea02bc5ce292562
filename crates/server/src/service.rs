//! Chunk service: bounds-checked range reads of a single file.
//!
//! The service holds no per-client state. The file is opened for every
//! request, so each datagram can be handled on its own task.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use blockfetch_protocol::{BlockRequest, BlockResponse};

/// Why a request was refused. A refused request gets no response.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid range [{start}, {end})")]
    InvalidRange { start: i64, end: i64 },

    #[error("range [{start}, {end}) exceeds file size {size}")]
    OutOfBounds { start: i64, end: i64, size: u64 },

    #[error("block of {len} bytes exceeds limit of {max}")]
    BlockTooLarge { len: u64, max: u64 },

    #[error("file size {0} is not representable on the wire")]
    FileTooLarge(u64),
}

/// Serves byte ranges of one file.
#[derive(Debug, Clone)]
pub struct ChunkService {
    path: PathBuf,
    max_block_size: u64,
}

impl ChunkService {
    /// Creates a service for `path` refusing ranges longer than `max_block_size`.
    pub fn new(path: impl Into<PathBuf>, max_block_size: u64) -> Self {
        Self {
            path: path.into(),
            max_block_size,
        }
    }

    /// The file being served.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the served file.
    pub async fn file_size(&self) -> Result<u64, ServeError> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Answers one request.
    ///
    /// Size probes are answered from file metadata without reading content.
    /// Content requests must lie entirely within the file; the read never
    /// goes past end-of-file.
    pub async fn serve(&self, request: &BlockRequest) -> Result<BlockResponse, ServeError> {
        if request.is_size_probe() {
            let size = self.file_size().await?;
            let size = i64::try_from(size).map_err(|_| ServeError::FileTooLarge(size))?;
            return Ok(BlockResponse::file_size(request, size));
        }

        request
            .validate()
            .map_err(|_| ServeError::InvalidRange {
                start: request.start,
                end: request.end,
            })?;

        let len = request.len();
        if len > self.max_block_size {
            return Err(ServeError::BlockTooLarge {
                len,
                max: self.max_block_size,
            });
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        let size = file.metadata().await?.len();
        if request.end as u64 > size {
            return Err(ServeError::OutOfBounds {
                start: request.start,
                end: request.end,
                size,
            });
        }

        file.seek(SeekFrom::Start(request.start as u64)).await?;
        let mut content = vec![0u8; len as usize];
        // Fails with UnexpectedEof if the file shrank after the size check.
        file.read_exact(&mut content).await?;

        Ok(BlockResponse::content(request, content))
    }
}
