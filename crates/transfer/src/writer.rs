//! Positional block writer.
//!
//! Blocks may arrive in any order and any number of times. Each full block
//! and the tail are written once at their own offset. Progress is published
//! on a watch channel so the fetcher can wait for completion without polling.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::TransferError;
use crate::types::TransferPlan;

/// Snapshot of what has been written so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteProgress {
    /// Distinct full blocks on disk.
    pub written_blocks: u64,
    pub total_blocks: u64,
    pub bytes_written: u64,
    pub tail_written: bool,
    /// Set by the first background write that failed.
    pub failure: Option<String>,
}

impl WriteProgress {
    /// All full blocks have been written.
    pub fn blocks_complete(&self) -> bool {
        self.written_blocks >= self.total_blocks
    }
}

/// Most full blocks a single transfer may track.
///
/// Keeps the written-block bitmap at 128 MiB or less whatever size the
/// server reports.
pub const MAX_TRACKED_BLOCKS: u64 = 1 << 30;

#[derive(Clone, Copy)]
enum Slot {
    Block(u64),
    Tail,
}

/// One bit per full block.
struct BlockSet {
    words: Vec<u64>,
}

impl BlockSet {
    fn new(blocks: u64) -> Self {
        Self {
            words: vec![0; blocks.div_ceil(64) as usize],
        }
    }

    fn contains(&self, index: u64) -> bool {
        self.words[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    fn insert(&mut self, index: u64) {
        self.words[(index / 64) as usize] |= 1u64 << (index % 64);
    }
}

struct WriterInner {
    file: File,
    written: BlockSet,
    tail_written: bool,
}

/// Writes fetched blocks into the destination file.
pub struct BlockWriter {
    path: PathBuf,
    plan: TransferPlan,
    inner: Mutex<WriterInner>,
    progress: watch::Sender<WriteProgress>,
}

impl BlockWriter {
    /// Opens `path` for writing and sizes it to the plan's file size.
    ///
    /// An existing file is reused; anything past the new length is cut off.
    /// Plans with more than [`MAX_TRACKED_BLOCKS`] blocks are refused before
    /// the file is touched.
    pub async fn create(path: &Path, plan: TransferPlan) -> Result<Self, TransferError> {
        if plan.total_blocks > MAX_TRACKED_BLOCKS {
            return Err(TransferError::InvalidSize(
                i64::try_from(plan.file_size).unwrap_or(i64::MAX),
            ));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await?;
        file.set_len(plan.file_size).await?;

        let (progress, _) = watch::channel(WriteProgress {
            total_blocks: plan.total_blocks,
            ..WriteProgress::default()
        });

        Ok(Self {
            path: path.to_path_buf(),
            plan,
            inner: Mutex::new(WriterInner {
                file,
                written: BlockSet::new(plan.total_blocks),
                tail_written: false,
            }),
            progress,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn plan(&self) -> &TransferPlan {
        &self.plan
    }

    /// Writes `data` at `[start, end)`.
    ///
    /// The range must be a full block of the plan or its tail, and `data`
    /// must be exactly as long as the range. Repeated writes of a block that
    /// is already on disk are ignored.
    pub async fn write(
        &self,
        start: u64,
        end: u64,
        data: &[u8],
    ) -> Result<WriteProgress, TransferError> {
        let slot = self.slot_for(start, end, data.len() as u64)?;

        let mut inner = self.inner.lock().await;
        let already = match slot {
            Slot::Block(index) => inner.written.contains(index),
            Slot::Tail => inner.tail_written,
        };
        if already {
            debug!(start, end, "ignoring duplicate block");
            return Ok(self.progress());
        }

        inner.file.seek(SeekFrom::Start(start)).await?;
        inner.file.write_all(data).await?;
        inner.file.flush().await?;

        match slot {
            Slot::Block(index) => inner.written.insert(index),
            Slot::Tail => inner.tail_written = true,
        }
        self.progress.send_modify(|p| {
            match slot {
                Slot::Block(_) => p.written_blocks += 1,
                Slot::Tail => p.tail_written = true,
            }
            p.bytes_written += data.len() as u64;
        });
        drop(inner);

        Ok(self.progress())
    }

    fn slot_for(&self, start: u64, end: u64, len: u64) -> Result<Slot, TransferError> {
        let reject = |reason: String| TransferError::WriteRejected { start, end, reason };

        if end < start || end > self.plan.file_size {
            return Err(reject(format!(
                "range outside file of {} bytes",
                self.plan.file_size
            )));
        }
        if len != end - start {
            return Err(reject(format!("content is {len} bytes")));
        }
        if let Some(index) = self.plan.block_index(start, end) {
            return Ok(Slot::Block(index));
        }
        if self.plan.tail_range() == Some(start..end) {
            return Ok(Slot::Tail);
        }
        Err(reject("not a block of this transfer".into()))
    }

    /// Marks the transfer as failed; wakes [`wait_complete`](Self::wait_complete).
    /// Only the first failure is kept.
    pub fn record_failure(&self, reason: String) {
        self.progress.send_modify(|p| {
            if p.failure.is_none() {
                p.failure = Some(reason);
            }
        });
    }

    pub fn progress(&self) -> WriteProgress {
        self.progress.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WriteProgress> {
        self.progress.subscribe()
    }

    pub fn is_complete(&self) -> bool {
        self.progress.borrow().blocks_complete()
    }

    /// Waits until every full block is on disk.
    ///
    /// Returns at once when the plan has no full blocks.
    pub async fn wait_complete(&self) -> Result<WriteProgress, TransferError> {
        let mut rx = self.progress.subscribe();
        let progress = rx
            .wait_for(|p| p.blocks_complete() || p.failure.is_some())
            .await
            .map_err(|_| TransferError::Write("progress channel closed".into()))?
            .clone();

        match progress.failure {
            Some(reason) => Err(TransferError::Write(reason)),
            None => Ok(progress),
        }
    }

    /// Flushes and syncs the destination to disk.
    pub async fn finish(&self) -> Result<(), TransferError> {
        let mut inner = self.inner.lock().await;
        inner.file.flush().await?;
        inner.file.sync_all().await?;
        Ok(())
    }
}
