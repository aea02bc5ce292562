//! Windowed fetcher.
//!
//! A transfer runs in three phases: size discovery, the windowed phase over
//! all full blocks, then the tail. During the windowed phase up to
//! `window_size` workers request blocks concurrently and hand each one to a
//! detached write task; the phase ends when the writer reports every full
//! block on disk. The tail is fetched and written last, inline.

use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::TransferError;
use crate::discovery::discover_size;
use crate::progress::ProgressMonitor;
use crate::retry::{Requester, RetryPolicy};
use crate::transport::Transport;
use crate::types::{FetchConfig, FetchStrategy, TransferPlan, TransferStats, TransferSummary};
use crate::writer::BlockWriter;

/// How one worker finds its next block.
enum Assignment {
    /// Fixed arithmetic progression of indices.
    Strided(std::iter::StepBy<Range<u64>>),
    /// Shared cursor; each claim takes the next unclaimed index.
    Queue(Arc<AtomicU64>),
}

impl Assignment {
    fn next(&mut self, total_blocks: u64) -> Option<u64> {
        match self {
            Assignment::Strided(indices) => indices.next(),
            Assignment::Queue(cursor) => {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                (index < total_blocks).then_some(index)
            }
        }
    }
}

/// Fetches the server's file into `destination`.
///
/// Returns once every byte is on disk and synced. Fails with
/// [`TransferError::RetriesExhausted`] if any request runs out of attempts
/// and with [`TransferError::Cancelled`] if `cancel` fires. On failure the
/// destination is left partially written.
pub async fn fetch_file(
    transport: Arc<dyn Transport>,
    destination: &Path,
    config: &FetchConfig,
    cancel: CancellationToken,
    monitor: Option<&ProgressMonitor>,
) -> Result<TransferSummary, TransferError> {
    config.validate()?;
    let started = Instant::now();

    let stats = Arc::new(TransferStats::default());
    let requester = Arc::new(Requester::new(transport, Arc::clone(&stats), cancel));

    let file_size = discover_size(&requester, &config.discovery_retry).await?;
    let plan = TransferPlan::new(file_size, config.block_size, config.window_size);
    info!(
        file_size,
        total_blocks = plan.total_blocks,
        window = plan.window_size,
        tail = plan.tail_len(),
        strategy = ?config.strategy,
        destination = %destination.display(),
        "starting transfer"
    );

    let writer = Arc::new(BlockWriter::create(destination, plan).await?);
    if let Some(monitor) = monitor {
        monitor.attach(writer.subscribe(), Arc::clone(&stats), file_size);
        monitor.start();
    }

    let result = transfer(&requester, &writer, &plan, config).await;
    if let Some(monitor) = monitor {
        monitor.stop();
        monitor.notify();
    }
    result?;

    let summary = TransferSummary {
        file_size,
        total_blocks: plan.total_blocks,
        tail_bytes: plan.tail_len(),
        stats: stats.snapshot(),
        elapsed: started.elapsed(),
    };
    info!(
        file_size,
        total_blocks = plan.total_blocks,
        retries = summary.stats.retries,
        hash_mismatches = summary.stats.hash_mismatches,
        stale = summary.stats.stale_responses,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        bytes_per_sec = summary.bytes_per_second() as u64,
        "transfer complete"
    );
    Ok(summary)
}

async fn transfer(
    requester: &Arc<Requester>,
    writer: &Arc<BlockWriter>,
    plan: &TransferPlan,
    config: &FetchConfig,
) -> Result<(), TransferError> {
    fetch_blocks(requester, writer, plan, config).await?;

    let cancel = requester.cancel_token();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(TransferError::Cancelled),
        result = writer.wait_complete() => {
            let progress = result?;
            debug!(written = progress.written_blocks, "windowed phase complete");
        }
    }

    if let Some(range) = plan.tail_range() {
        let data = requester
            .request_block(range.start, range.end, &config.block_retry)
            .await?;
        writer.write(range.start, range.end, &data).await?;
        debug!(start = range.start, end = range.end, "tail written");
    }

    writer.finish().await
}

/// Runs the windowed phase's workers until all of them have requested their
/// last block. Writes may still be in flight when this returns.
async fn fetch_blocks(
    requester: &Arc<Requester>,
    writer: &Arc<BlockWriter>,
    plan: &TransferPlan,
    config: &FetchConfig,
) -> Result<(), TransferError> {
    if plan.total_blocks == 0 {
        return Ok(());
    }

    let cursor = Arc::new(AtomicU64::new(0));
    let mut workers = JoinSet::new();
    for worker in 0..plan.window_size {
        let assignment = match config.strategy {
            FetchStrategy::Strided => Assignment::Strided(plan.worker_indices(worker)),
            FetchStrategy::WorkQueue => Assignment::Queue(Arc::clone(&cursor)),
        };
        workers.spawn(run_worker(
            worker,
            assignment,
            Arc::clone(requester),
            Arc::clone(writer),
            *plan,
            config.block_retry.clone(),
        ));
    }

    while let Some(joined) = workers.join_next().await {
        let result = joined.map_err(|e| TransferError::Worker(e.to_string()))?;
        if let Err(e) = result {
            // Dropping the rest abandons their in-flight attempts.
            workers.shutdown().await;
            return Err(e);
        }
    }
    Ok(())
}

async fn run_worker(
    worker: u64,
    mut assignment: Assignment,
    requester: Arc<Requester>,
    writer: Arc<BlockWriter>,
    plan: TransferPlan,
    policy: RetryPolicy,
) -> Result<(), TransferError> {
    let mut fetched = 0u64;
    while let Some(index) = assignment.next(plan.total_blocks) {
        let range = plan.block_range(index);
        let data = requester
            .request_block(range.start, range.end, &policy)
            .await?;
        spawn_write(&writer, range, data);
        fetched += 1;
    }
    trace!(worker, fetched, "worker done");
    Ok(())
}

/// Writes a block on its own task; a failure is parked on the writer.
fn spawn_write(writer: &Arc<BlockWriter>, range: Range<u64>, data: Vec<u8>) {
    let writer = Arc::clone(writer);
    tokio::spawn(async move {
        match writer.write(range.start, range.end, &data).await {
            Ok(progress) => debug!(
                start = range.start,
                end = range.end,
                written = progress.written_blocks,
                "block written"
            ),
            Err(e) => {
                warn!(start = range.start, end = range.end, "block write failed: {e}");
                writer.record_failure(e.to_string());
            }
        }
    });
}
