//! UDP chunk server.
//!
//! Receives request datagrams on one socket and answers each on its own
//! task. Requests that cannot be served are dropped without a reply; the
//! client's retry timer is the only recovery path.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blockfetch_protocol::{
    DEFAULT_BLOCK_SIZE, DEFAULT_PORT, MAX_REQUEST_DATAGRAM, decode_request, encode_response,
    max_block_size,
};

use crate::ServerError;
use crate::service::ChunkService;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (port 0 = OS-assigned).
    pub bind: SocketAddr,
    /// The single file this server exposes.
    pub file: PathBuf,
    /// Longest range a single request may ask for.
    pub max_block_size: u64,
}

impl ServerConfig {
    /// Creates a configuration serving `file` on the default port.
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            bind: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            file: file.into(),
            max_block_size: DEFAULT_BLOCK_SIZE,
        }
    }

    /// Checks that every response this server may send fits in a datagram.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_block_size == 0 {
            return Err(ServerError::Config("max_block_size must be positive".into()));
        }
        if self.max_block_size > max_block_size() as u64 {
            return Err(ServerError::Config(format!(
                "max_block_size {} exceeds datagram limit {}",
                self.max_block_size,
                max_block_size()
            )));
        }
        Ok(())
    }
}

/// The chunk server.
pub struct ChunkServer {
    socket: Arc<UdpSocket>,
    service: Arc<ChunkService>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl ChunkServer {
    /// Validates the configuration, checks the file is readable and binds
    /// the socket.
    pub async fn bind(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        config.validate()?;

        let metadata = tokio::fs::metadata(&config.file).await.map_err(|e| {
            ServerError::Config(format!("cannot serve {}: {e}", config.file.display()))
        })?;
        if !metadata.is_file() {
            return Err(ServerError::Config(format!(
                "{} is not a regular file",
                config.file.display()
            )));
        }

        let socket = UdpSocket::bind(config.bind).await?;
        let local_addr = socket.local_addr()?;
        info!(
            %local_addr,
            file = %config.file.display(),
            size = metadata.len(),
            "chunk server bound"
        );

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            service: Arc::new(ChunkService::new(config.file, config.max_block_size)),
            local_addr,
            cancel: CancellationToken::new(),
        }))
    }

    /// The address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The underlying chunk service.
    pub fn service(&self) -> &ChunkService {
        &self.service
    }

    /// Stops [`run`](Self::run) at its next suspension point.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Receives datagrams until shutdown, spawning one task per datagram.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let mut buf = vec![0u8; MAX_REQUEST_DATAGRAM];

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("chunk server shutting down");
                    break Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, peer)) => {
                            let datagram = buf[..n].to_vec();
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                server.handle_datagram(&datagram, peer).await;
                            });
                        }
                        // Some platforms report ICMP unreachable from an
                        // earlier send here; the socket stays usable.
                        Err(e) => warn!("receive error: {e}"),
                    }
                }
            }
        }
    }

    async fn handle_datagram(&self, datagram: &[u8], peer: SocketAddr) {
        let request = match decode_request(datagram) {
            Ok(r) => r,
            Err(e) => {
                warn!(%peer, len = datagram.len(), "dropping malformed request: {e}");
                return;
            }
        };

        let response = match self.service.serve(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    %peer,
                    start = request.start,
                    end = request.end,
                    "dropping request: {e}"
                );
                return;
            }
        };

        let payload = match encode_response(&response) {
            Ok(p) => p,
            Err(e) => {
                warn!(%peer, "failed to encode response: {e}");
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&payload, peer).await {
            warn!(%peer, "failed to send response: {e}");
            return;
        }

        if response.is_file_size() {
            info!(%peer, size = response.start, "answered size probe");
        } else {
            debug!(
                %peer,
                md5 = %response.md5_hash,
                start = response.start,
                end = response.end,
                "sent block"
            );
        }
    }
}
