//! Client side of blockfetch: windowed block fetching with retry.
//!
//! [`fetch_file`] discovers the file size, fetches every full block with a
//! bounded window of concurrent workers, writes the tail last and returns a
//! [`TransferSummary`]. All state lives in the transfer itself, so several
//! transfers can run in one process.

mod discovery;
mod fetcher;
mod progress;
mod retry;
#[cfg(test)]
mod testing;
mod transport;
mod types;
mod writer;

pub use discovery::discover_size;
pub use fetcher::fetch_file;
pub use progress::{FetchProgress, ProgressCallback, ProgressMonitor, SpeedCalculator};
pub use retry::{Backoff, Requester, RetryPolicy};
pub use transport::{AttemptError, ExchangeFuture, Transport, UdpTransport};
pub use types::{
    FetchConfig, FetchStrategy, StatsSnapshot, TransferPlan, TransferStats, TransferSummary,
};
pub use writer::{BlockWriter, WriteProgress};

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no verified response for [{start}, {end}) after {attempts} attempts")]
    RetriesExhausted { start: i64, end: i64, attempts: u32 },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("server reported invalid file size {0}")]
    InvalidSize(i64),

    #[error("write failed: {0}")]
    Write(String),

    #[error("write of [{start}, {end}) rejected: {reason}")]
    WriteRejected { start: u64, end: u64, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker failed: {0}")]
    Worker(String),
}
