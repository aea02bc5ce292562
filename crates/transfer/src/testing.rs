//! In-process transport for tests.
//!
//! Requests are answered by a real [`ChunkService`], with faults injected
//! per call so loss, corruption and stale replies are deterministic.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use blockfetch_protocol::{BlockRequest, decode_response, max_block_size};
use blockfetch_server::ChunkService;
use tempfile::TempDir;

use crate::transport::{AttemptError, ExchangeFuture, Transport};
use crate::types::TransferStats;

/// What goes wrong with one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Request or response lost; the attempt never resolves.
    Drop,
    /// One content byte flipped in transit.
    Corrupt,
    /// Answer carries another attempt's id.
    Stale,
    /// Undecodable datagram.
    Malformed,
}

type FaultPlan = dyn Fn(u64, &BlockRequest) -> Option<Fault> + Send + Sync;

pub struct ServiceTransport {
    service: ChunkService,
    faults: Box<FaultPlan>,
    calls: AtomicU64,
    requests: Mutex<Vec<BlockRequest>>,
}

impl ServiceTransport {
    /// Serves `path`; `faults(call, request)` decides each exchange's fate.
    pub fn new<F>(path: impl Into<PathBuf>, faults: F) -> Arc<Self>
    where
        F: Fn(u64, &BlockRequest) -> Option<Fault> + Send + Sync + 'static,
    {
        Arc::new(Self {
            service: ChunkService::new(path, max_block_size() as u64),
            faults: Box::new(faults),
            calls: AtomicU64::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Writes `data` to `source.bin` in `dir` and serves it.
    pub fn with_file<F>(dir: &TempDir, data: &[u8], faults: F) -> Arc<Self>
    where
        F: Fn(u64, &BlockRequest) -> Option<Fault> + Send + Sync + 'static,
    {
        let path = dir.path().join("source.bin");
        std::fs::write(&path, data).unwrap();
        Self::new(path, faults)
    }

    /// Every request seen so far, in arrival order.
    pub fn requests(&self) -> Vec<BlockRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Content requests seen so far (size probes excluded).
    pub fn block_requests(&self) -> Vec<BlockRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.is_size_probe())
            .collect()
    }
}

impl Transport for ServiceTransport {
    fn exchange<'a>(
        &'a self,
        request: BlockRequest,
        _stats: &'a TransferStats,
    ) -> ExchangeFuture<'a> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        let fault = (self.faults)(call, &request);

        Box::pin(async move {
            if fault == Some(Fault::Drop) {
                return std::future::pending().await;
            }
            if fault == Some(Fault::Malformed) {
                let error = decode_response(b"{\"start\":").unwrap_err();
                return Err(AttemptError::Malformed(error));
            }

            // A refused request gets no reply, same as the UDP server.
            let Ok(mut response) = self.service.serve(&request).await else {
                return std::future::pending().await;
            };
            match fault {
                Some(Fault::Corrupt) => match response.content.as_mut() {
                    Some(content) if !content.is_empty() => content[0] ^= 0xFF,
                    _ => response.md5_hash = "0".repeat(32),
                },
                Some(Fault::Stale) => response.id = request.id.map(|id| id + 1000),
                _ => {}
            }
            Ok::<_, AttemptError>(response)
        })
    }
}
