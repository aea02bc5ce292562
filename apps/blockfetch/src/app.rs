//! Runs the server and client commands.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use blockfetch_server::{ChunkServer, ServerConfig};
use blockfetch_transfer::{
    FetchConfig, ProgressMonitor, SpeedCalculator, TransferSummary, UdpTransport, fetch_file,
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Serves until Ctrl-C.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let server = ChunkServer::bind(config).await?;

    let signal = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            signal.shutdown();
        }
    });

    server.run().await?;
    Ok(())
}

/// Fetches the file served at `server` into `output`. Ctrl-C cancels.
///
/// The configuration is checked before anything touches the network.
pub async fn fetch(
    server: SocketAddr,
    output: &Path,
    config: FetchConfig,
) -> anyhow::Result<TransferSummary> {
    config.validate()?;

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("cancelling transfer");
            signal.cancel();
        }
    });

    let monitor = ProgressMonitor::new(Some(PROGRESS_INTERVAL));
    let speed = SpeedCalculator::new(None, None);
    let last_bytes = AtomicU64::new(0);
    monitor.on_progress(Box::new(move |p| {
        let previous = last_bytes.swap(p.bytes_written, Ordering::Relaxed);
        speed.add_sample(p.bytes_written.saturating_sub(previous));
        let eta = speed.eta(p.remaining_bytes()).map(|d| d.as_secs());
        tracing::info!(
            blocks = p.written_blocks,
            total = p.total_blocks,
            percent = format_args!("{:.1}", p.fraction() * 100.0),
            kib_per_sec = format_args!("{:.1}", speed.bytes_per_second() / 1024.0),
            eta_secs = ?eta,
            retries = p.retries,
            "progress"
        );
    }));

    tracing::info!(%server, output = %output.display(), "fetching");
    let transport = Arc::new(UdpTransport::new(server, config.block_size));
    let summary = fetch_file(transport, output, &config, cancel, Some(&monitor)).await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_rejects_oversized_block_before_connecting() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("out.bin");
        let config = FetchConfig {
            block_size: u64::MAX,
            ..FetchConfig::default()
        };

        let err = fetch("127.0.0.1:9".parse().unwrap(), &output, config)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("block_size"));
        assert!(!output.exists());
    }
}
