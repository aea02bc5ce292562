use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::types::TransferStats;
use crate::writer::WriteProgress;

/// Default progress notification interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Progress of one fetch, as reported to callbacks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchProgress {
    pub written_blocks: u64,
    pub total_blocks: u64,
    pub bytes_written: u64,
    pub file_size: u64,
    pub tail_written: bool,
    pub retries: u64,
}

impl FetchProgress {
    /// Fraction of the file on disk, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.file_size == 0 {
            return 1.0;
        }
        self.bytes_written as f64 / self.file_size as f64
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.file_size.saturating_sub(self.bytes_written)
    }
}

/// Callback invoked with fetch progress.
pub type ProgressCallback = Box<dyn Fn(FetchProgress) + Send + Sync>;

/// Periodically reports the progress of an attached transfer.
pub struct ProgressMonitor {
    inner: Arc<RwLock<MonitorInner>>,
    stop: Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
}

struct MonitorInner {
    callbacks: Vec<ProgressCallback>,
    source: Option<ProgressSource>,
    interval: Duration,
}

struct ProgressSource {
    writes: watch::Receiver<WriteProgress>,
    stats: Arc<TransferStats>,
    file_size: u64,
}

impl ProgressSource {
    fn snapshot(&self) -> FetchProgress {
        let writes = self.writes.borrow();
        FetchProgress {
            written_blocks: writes.written_blocks,
            total_blocks: writes.total_blocks,
            bytes_written: writes.bytes_written,
            file_size: self.file_size,
            tail_written: writes.tail_written,
            retries: self.stats.retries(),
        }
    }
}

impl MonitorInner {
    fn emit(&self) {
        if let Some(source) = &self.source {
            let progress = source.snapshot();
            for cb in &self.callbacks {
                cb(progress.clone());
            }
        }
    }
}

impl ProgressMonitor {
    /// Creates a monitor with the given notification interval.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MonitorInner {
                callbacks: Vec::new(),
                source: None,
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            stop: Mutex::new(None),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut inner = self.inner.write().unwrap();
        inner.callbacks.push(callback);
    }

    /// Points the monitor at a transfer's writer and counters.
    pub fn attach(
        &self,
        writes: watch::Receiver<WriteProgress>,
        stats: Arc<TransferStats>,
        file_size: u64,
    ) {
        let mut inner = self.inner.write().unwrap();
        inner.source = Some(ProgressSource {
            writes,
            stats,
            file_size,
        });
    }

    /// Current progress of the attached transfer.
    pub fn snapshot(&self) -> Option<FetchProgress> {
        let inner = self.inner.read().unwrap();
        inner.source.as_ref().map(ProgressSource::snapshot)
    }

    /// Sends a one-time progress notification.
    pub fn notify(&self) {
        self.inner.read().unwrap().emit();
    }

    /// Starts periodic notifications in a background tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap();
            drop(stop.take());
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let interval = inner.read().unwrap().interval;
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => inner.read().unwrap().emit(),
                    _ = &mut rx => break,
                }
            }
        });
    }

    /// Stops the periodic notification task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap();
        // Dropping the sender signals the task to exit.
        drop(stop.take());
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        if let Ok(mut stop) = self.stop.lock() {
            drop(stop.take());
        }
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        let (Some(first), Some(last)) = (s.samples.first(), s.samples.last()) else {
            return 0.0;
        };
        if s.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        // The first sample only marks the start of the window.
        let total_bytes: u64 = s.samples[1..].iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap();
        s.samples.clear();
    }
}
