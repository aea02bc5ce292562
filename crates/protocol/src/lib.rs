//! Wire protocol for blockfetch.
//!
//! A client asks for byte ranges of the one file a server exposes; every
//! request and every response is a single JSON datagram. A request whose
//! bounds are both [`SIZE_SENTINEL`] asks for the file size instead.

pub mod codec;
pub mod constants;
pub mod hash;
pub mod messages;

pub use codec::{decode_request, decode_response, encode_request, encode_response};
pub use constants::{
    DEFAULT_BLOCK_SIZE, DEFAULT_PORT, DEFAULT_WINDOW_SIZE, FILE_SIZE_MARKER, MAX_DATAGRAM,
    MAX_REQUEST_DATAGRAM, SIZE_SENTINEL, max_block_size, max_response_len,
};
pub use hash::{content_hash, verify_content_hash};
pub use messages::{BlockRequest, BlockResponse};

/// Errors produced by the protocol crate.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid range: [{start}, {end})")]
    InvalidRange { start: i64, end: i64 },
}
