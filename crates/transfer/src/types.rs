use std::iter::StepBy;
use std::ops::Range;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use blockfetch_protocol::{DEFAULT_BLOCK_SIZE, DEFAULT_WINDOW_SIZE, max_block_size};

use crate::TransferError;
use crate::retry::RetryPolicy;
use crate::transport::AttemptError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How block indices are assigned to workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    /// Worker `w` fetches indices `w, w + window, w + 2 * window, ...`.
    #[default]
    Strided,
    /// Workers pull the next unclaimed index from a shared cursor.
    WorkQueue,
}

impl FromStr for FetchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strided" => Ok(Self::Strided),
            "work-queue" => Ok(Self::WorkQueue),
            other => Err(format!(
                "unknown strategy '{other}' (expected 'strided' or 'work-queue')"
            )),
        }
    }
}

/// Client-side transfer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchConfig {
    /// Fixed block size; must match the server's limit.
    pub block_size: u64,
    /// Maximum number of concurrent block workers.
    pub window_size: u64,
    pub strategy: FetchStrategy,
    pub block_retry: RetryPolicy,
    pub discovery_retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            strategy: FetchStrategy::default(),
            block_retry: RetryPolicy::block_fetch(),
            discovery_retry: RetryPolicy::size_discovery(),
        }
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.block_size == 0 {
            return Err(TransferError::Config("block_size must be positive".into()));
        }
        if self.block_size > max_block_size() as u64 {
            return Err(TransferError::Config(format!(
                "block_size {} exceeds datagram limit {}",
                self.block_size,
                max_block_size()
            )));
        }
        if self.window_size == 0 {
            return Err(TransferError::Config("window_size must be positive".into()));
        }
        self.block_retry.validate()?;
        self.discovery_retry.validate()
    }
}

// ---------------------------------------------------------------------------
// TransferPlan
// ---------------------------------------------------------------------------

/// Block layout of one transfer, fixed once the file size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub file_size: u64,
    pub block_size: u64,
    /// Number of full blocks (`file_size / block_size`).
    pub total_blocks: u64,
    /// Number of workers (`min(total_blocks, concurrency)`).
    pub window_size: u64,
}

impl TransferPlan {
    pub fn new(file_size: u64, block_size: u64, concurrency: u64) -> Self {
        let total_blocks = file_size / block_size;
        Self {
            file_size,
            block_size,
            total_blocks,
            window_size: total_blocks.min(concurrency),
        }
    }

    /// Byte range of full block `index`.
    pub fn block_range(&self, index: u64) -> Range<u64> {
        index * self.block_size..(index + 1) * self.block_size
    }

    /// Byte range of the short final block, if the size is not a multiple
    /// of the block size.
    pub fn tail_range(&self) -> Option<Range<u64>> {
        let remainder = self.file_size % self.block_size;
        (remainder != 0).then(|| self.file_size - remainder..self.file_size)
    }

    /// Length of the tail block (0 if there is none).
    pub fn tail_len(&self) -> u64 {
        self.file_size % self.block_size
    }

    /// Block index whose range is exactly `[start, end)`, if any.
    pub fn block_index(&self, start: u64, end: u64) -> Option<u64> {
        if start % self.block_size != 0 || end != start + self.block_size {
            return None;
        }
        let index = start / self.block_size;
        (index < self.total_blocks).then_some(index)
    }

    /// Indices claimed by `worker` under the stride partition.
    pub fn worker_indices(&self, worker: u64) -> StepBy<Range<u64>> {
        (worker..self.total_blocks).step_by(self.window_size.max(1) as usize)
    }
}

// ---------------------------------------------------------------------------
// TransferStats
// ---------------------------------------------------------------------------

/// Per-transfer diagnostic counters (thread-safe).
#[derive(Debug, Default)]
pub struct TransferStats {
    retries: AtomicU64,
    timeouts: AtomicU64,
    hash_mismatches: AtomicU64,
    stale_responses: AtomicU64,
    malformed_responses: AtomicU64,
    io_errors: AtomicU64,
}

/// Point-in-time copy of [`TransferStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub retries: u64,
    pub timeouts: u64,
    pub hash_mismatches: u64,
    pub stale_responses: u64,
    pub malformed_responses: u64,
    pub io_errors: u64,
}

impl TransferStats {
    /// Counts a failed attempt under its cause.
    pub fn record_failure(&self, error: &AttemptError) {
        let counter = match error {
            AttemptError::Timeout => &self.timeouts,
            AttemptError::Io(_) => &self.io_errors,
            AttemptError::Malformed(_) | AttemptError::LengthMismatch { .. } => {
                &self.malformed_responses
            }
            AttemptError::Stale { .. } => &self.stale_responses,
            AttemptError::HashMismatch { .. } => &self.hash_mismatches,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a re-issued request and returns the new total.
    pub fn record_retry(&self) -> u64 {
        self.retries.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            hash_mismatches: self.hash_mismatches.load(Ordering::Relaxed),
            stale_responses: self.stale_responses.load(Ordering::Relaxed),
            malformed_responses: self.malformed_responses.load(Ordering::Relaxed),
            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// TransferSummary
// ---------------------------------------------------------------------------

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSummary {
    pub file_size: u64,
    pub total_blocks: u64,
    pub tail_bytes: u64,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
}

impl TransferSummary {
    /// Average throughput over the whole transfer.
    pub fn bytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.file_size as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_with_tail() {
        let plan = TransferPlan::new(2500, 1024, 50);
        assert_eq!(plan.total_blocks, 2);
        assert_eq!(plan.window_size, 2);
        assert_eq!(plan.block_range(1), 1024..2048);
        assert_eq!(plan.tail_range(), Some(2048..2500));
        assert_eq!(plan.tail_len(), 452);
    }

    #[test]
    fn plan_exact_multiple_has_no_tail() {
        let plan = TransferPlan::new(4096, 1024, 50);
        assert_eq!(plan.total_blocks, 4);
        assert_eq!(plan.tail_range(), None);
        assert_eq!(plan.tail_len(), 0);
    }

    #[test]
    fn plan_smaller_than_block() {
        let plan = TransferPlan::new(500, 1024, 50);
        assert_eq!(plan.total_blocks, 0);
        assert_eq!(plan.window_size, 0);
        assert_eq!(plan.tail_range(), Some(0..500));
        assert_eq!(plan.worker_indices(0).count(), 0);
    }

    #[test]
    fn plan_empty_file() {
        let plan = TransferPlan::new(0, 1024, 50);
        assert_eq!(plan.total_blocks, 0);
        assert_eq!(plan.window_size, 0);
        assert_eq!(plan.tail_range(), None);
    }

    #[test]
    fn window_is_capped_by_concurrency() {
        let plan = TransferPlan::new(1024 * 200, 1024, 50);
        assert_eq!(plan.total_blocks, 200);
        assert_eq!(plan.window_size, 50);
    }

    #[test]
    fn stride_partition_claims_every_index_once() {
        let plan = TransferPlan::new(1024 * 123 + 7, 1024, 50);
        let mut claimed = vec![0u32; plan.total_blocks as usize];
        for worker in 0..plan.window_size {
            for index in plan.worker_indices(worker) {
                assert_eq!(index % plan.window_size, worker);
                claimed[index as usize] += 1;
            }
        }
        assert!(claimed.iter().all(|&n| n == 1));
    }

    #[test]
    fn block_index_only_matches_full_blocks() {
        let plan = TransferPlan::new(2500, 1024, 50);
        assert_eq!(plan.block_index(0, 1024), Some(0));
        assert_eq!(plan.block_index(1024, 2048), Some(1));
        assert_eq!(plan.block_index(2048, 3072), None);
        assert_eq!(plan.block_index(2048, 2500), None);
        assert_eq!(plan.block_index(10, 1034), None);
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!("strided".parse::<FetchStrategy>(), Ok(FetchStrategy::Strided));
        assert_eq!("work-queue".parse::<FetchStrategy>(), Ok(FetchStrategy::WorkQueue));
        assert!("random".parse::<FetchStrategy>().is_err());
    }

    #[test]
    fn default_config_uses_protocol_constants() {
        let config = FetchConfig::default();
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.window_size, 50);
        assert_eq!(config.strategy, FetchStrategy::Strided);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_rejects_zero_sizes() {
        let config = FetchConfig {
            block_size: 0,
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FetchConfig {
            window_size: 0,
            ..FetchConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn stats_count_by_cause() {
        let stats = TransferStats::default();
        stats.record_failure(&AttemptError::Timeout);
        stats.record_failure(&AttemptError::HashMismatch { start: 0, end: 1 });
        stats.record_failure(&AttemptError::Stale {
            expected: Some(1),
            got: Some(2),
        });
        assert_eq!(stats.record_retry(), 1);
        assert_eq!(stats.record_retry(), 2);

        let snap = stats.snapshot();
        assert_eq!(snap.retries, 2);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.hash_mismatches, 1);
        assert_eq!(snap.stale_responses, 1);
        assert_eq!(snap.io_errors, 0);
    }
}
