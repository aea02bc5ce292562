//! Request-with-retry.
//!
//! Every attempt carries a fresh correlation id and is raced against a
//! timer. A losing attempt is dropped, which closes its socket, so nothing
//! is left waiting in the background. Failures are counted on the transfer's
//! [`TransferStats`]; only exhaustion and cancellation reach the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use blockfetch_protocol::{BlockRequest, BlockResponse};

use crate::TransferError;
use crate::transport::{AttemptError, Transport};
use crate::types::TransferStats;

/// Delay inserted between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Re-issue immediately.
    None,
    /// Wait the same amount after every failure.
    Fixed(Duration),
    /// `initial * factor^(attempt - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

impl Backoff {
    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = attempt.saturating_sub(1).min(63) as i32;
                let secs = initial.as_secs_f64() * factor.powi(exp);
                Duration::from_secs_f64(secs.min(max.as_secs_f64()))
            }
        }
    }
}

/// Timeout and attempt budget for one kind of request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// How long a single attempt may wait for its response.
    pub timeout: Duration,
    /// Give up after this many attempts (`None` = never).
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Size discovery runs once per transfer, so it waits long and never
    /// gives up on its own.
    pub fn size_discovery() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: None,
            backoff: Backoff::Fixed(Duration::from_millis(250)),
        }
    }

    /// Block requests time out quickly and retry with a capped backoff.
    pub fn block_fetch() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            max_attempts: Some(64),
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(10),
                max: Duration::from_secs(1),
                factor: 2.0,
            },
        }
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.timeout.is_zero() {
            return Err(TransferError::Config("retry timeout must be positive".into()));
        }
        if self.max_attempts == Some(0) {
            return Err(TransferError::Config("max_attempts must be at least 1".into()));
        }
        if let Backoff::Exponential { factor, .. } = self.backoff
            && !(factor.is_finite() && factor >= 1.0)
        {
            return Err(TransferError::Config(format!(
                "backoff factor must be >= 1, got {factor}"
            )));
        }
        Ok(())
    }

    fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts_made < max)
    }
}

/// Issues requests for one transfer and retries them until answered.
pub struct Requester {
    transport: Arc<dyn Transport>,
    stats: Arc<TransferStats>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl Requester {
    pub fn new(
        transport: Arc<dyn Transport>,
        stats: Arc<TransferStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            stats,
            cancel,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn stats(&self) -> &Arc<TransferStats> {
        &self.stats
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Sends `base` until a verified answer arrives.
    ///
    /// Timeouts, stale or malformed responses, and hash mismatches are all
    /// retried. Returns [`TransferError::RetriesExhausted`] once the policy's
    /// budget is spent and [`TransferError::Cancelled`] if the transfer is
    /// cancelled.
    pub async fn request(
        &self,
        base: BlockRequest,
        policy: &RetryPolicy,
    ) -> Result<BlockResponse, TransferError> {
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let request = base.with_id(self.next_id.fetch_add(1, Ordering::Relaxed));

            let exchange = self.transport.exchange(request, &self.stats);
            let attempt_fut = tokio::time::timeout(policy.timeout, exchange);
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                result = attempt_fut => result,
            };

            let failure = match outcome {
                Ok(Ok(response)) => match check_response(&request, response) {
                    Ok(response) => return Ok(response),
                    Err(e) => e,
                },
                Ok(Err(e)) => e,
                Err(_) => AttemptError::Timeout,
            };
            self.stats.record_failure(&failure);

            match &failure {
                AttemptError::Timeout | AttemptError::Io(_) => {}
                other => warn!(start = base.start, end = base.end, attempt, "{other}"),
            }

            if !policy.allows_another(attempt) {
                warn!(
                    start = base.start,
                    end = base.end,
                    attempts = attempt,
                    "giving up on request"
                );
                return Err(TransferError::RetriesExhausted {
                    start: base.start,
                    end: base.end,
                    attempts: attempt,
                });
            }

            let retries = self.stats.record_retry();
            debug!(
                start = base.start,
                end = base.end,
                attempt,
                retries,
                "request failed ({failure}), retrying"
            );

            let delay = policy.backoff.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(TransferError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Fetches the bytes in `[start, end)`.
    pub async fn request_block(
        &self,
        start: u64,
        end: u64,
        policy: &RetryPolicy,
    ) -> Result<Vec<u8>, TransferError> {
        let response = self
            .request(BlockRequest::range(start as i64, end as i64), policy)
            .await?;
        Ok(response.content.unwrap_or_default())
    }
}

/// Accepts a response only if it answers this attempt and its content is intact.
fn check_response(
    request: &BlockRequest,
    response: BlockResponse,
) -> Result<BlockResponse, AttemptError> {
    if !response.answers(request) {
        return Err(AttemptError::Stale {
            expected: request.id,
            got: response.id,
        });
    }
    if request.is_size_probe() {
        return Ok(response);
    }

    let got = response.content.as_ref().map_or(0, |c| c.len() as u64);
    if response.content.is_none() || got != request.len() {
        return Err(AttemptError::LengthMismatch {
            expected: request.len(),
            got,
        });
    }
    if !response.verify_hash() {
        return Err(AttemptError::HashMismatch {
            start: request.start,
            end: request.end,
        });
    }
    Ok(response)
}
