//! Size discovery.

use tracing::info;

use blockfetch_protocol::BlockRequest;

use crate::TransferError;
use crate::retry::{Requester, RetryPolicy};

/// Asks the server for the authoritative file size.
///
/// The probe is retried under `policy` like any other request; only a
/// file-size answer to the current attempt is accepted.
pub async fn discover_size(
    requester: &Requester,
    policy: &RetryPolicy,
) -> Result<u64, TransferError> {
    info!("requesting file size");
    let response = requester.request(BlockRequest::size_probe(), policy).await?;
    let size = u64::try_from(response.start)
        .map_err(|_| TransferError::InvalidSize(response.start))?;
    info!(size, retries = requester.stats().retries(), "file size discovered");
    Ok(size)
}
