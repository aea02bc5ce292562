//! Datagram transport seam.
//!
//! A [`Transport`] performs one request/response exchange and never times
//! out on its own; the retry loop bounds every exchange with a timer and
//! drops the future when the timer wins. Datagrams the transport discards
//! while waiting are counted on the transfer's [`TransferStats`].

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::types::TransferStats;

use blockfetch_protocol::{
    BlockRequest, BlockResponse, ProtocolError, decode_response, encode_request, max_response_len,
};

/// Why a single attempt produced no usable response.
///
/// Every variant is retryable; none of them reaches the caller of a transfer.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("timed out")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Malformed(#[from] ProtocolError),

    #[error("stale response (id {got:?}, expected {expected:?})")]
    Stale {
        expected: Option<u64>,
        got: Option<u64>,
    },

    #[error("content length {got} does not match requested {expected}")]
    LengthMismatch { expected: u64, got: u64 },

    #[error("content hash mismatch for [{start}, {end})")]
    HashMismatch { start: i64, end: i64 },
}

/// A boxed future returned by [`Transport::exchange`].
pub type ExchangeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<BlockResponse, AttemptError>> + Send + 'a>>;

/// One request, one response, over an unreliable datagram channel.
///
/// Dropping the returned future abandons the attempt and must release
/// whatever it was waiting on. Responses skipped without ending the attempt
/// are recorded on `stats`.
pub trait Transport: Send + Sync + 'static {
    fn exchange<'a>(
        &'a self,
        request: BlockRequest,
        stats: &'a TransferStats,
    ) -> ExchangeFuture<'a>;
}

/// UDP transport using a fresh ephemeral socket per attempt.
///
/// The socket is connected to the server, so datagrams from other peers are
/// filtered by the kernel. It is closed when the attempt future is dropped.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    server: SocketAddr,
    recv_buffer: usize,
}

impl UdpTransport {
    /// Creates a transport talking to `server` with a receive buffer sized
    /// for `block_size`-byte responses.
    pub fn new(server: SocketAddr, block_size: u64) -> Self {
        Self {
            server,
            recv_buffer: max_response_len(usize::try_from(block_size).unwrap_or(usize::MAX)),
        }
    }

    /// The server address.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    async fn exchange_once(
        &self,
        request: BlockRequest,
        stats: &TransferStats,
    ) -> Result<BlockResponse, AttemptError> {
        let local: SocketAddr = if self.server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.server).await?;
        socket.send(&encode_request(&request)?).await?;

        let mut buf = vec![0u8; self.recv_buffer];
        loop {
            let n = socket.recv(&mut buf).await?;
            let response = decode_response(&buf[..n])?;
            if response.answers(&request) {
                return Ok(response);
            }
            let stale = AttemptError::Stale {
                expected: request.id,
                got: response.id,
            };
            stats.record_failure(&stale);
            warn!(start = request.start, end = request.end, "{stale}, still waiting");
        }
    }
}

impl Transport for UdpTransport {
    fn exchange<'a>(
        &'a self,
        request: BlockRequest,
        stats: &'a TransferStats,
    ) -> ExchangeFuture<'a> {
        Box::pin(self.exchange_once(request, stats))
    }
}
