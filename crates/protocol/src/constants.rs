/// Reserved `start`/`end` value that turns a request into a size probe.
pub const SIZE_SENTINEL: i64 = i64::MAX;

/// `md5hash` value carried by a size-probe response instead of a digest.
pub const FILE_SIZE_MARKER: &str = "fileSize";

/// Fixed block size in bytes. Both sides must agree; it is never negotiated.
pub const DEFAULT_BLOCK_SIZE: u64 = 1024;

/// Number of concurrent block-fetch workers on the client.
pub const DEFAULT_WINDOW_SIZE: u64 = 50;

/// UDP port the server listens on by default.
pub const DEFAULT_PORT: u16 = 9991;

/// Receive buffer for request datagrams on the server.
///
/// A request is a small JSON object; anything larger is not a request.
pub const MAX_REQUEST_DATAGRAM: usize = 1024;

/// Largest payload that fits in a single UDP datagram over IPv4.
pub const MAX_DATAGRAM: usize = 65_507;

/// Bytes reserved for the JSON envelope around the base64 content.
const RESPONSE_OVERHEAD: usize = 256;

/// Minimum client receive buffer (4 KiB, as older clients allocate).
const MIN_RESPONSE_BUFFER: usize = 4096;

/// Upper bound on the encoded size of a response carrying `block_size` bytes.
pub fn max_response_len(block_size: usize) -> usize {
    let base64_len = block_size.div_ceil(3).saturating_mul(4);
    base64_len
        .saturating_add(RESPONSE_OVERHEAD)
        .max(MIN_RESPONSE_BUFFER)
}

/// Largest block size whose response still fits in one datagram.
pub fn max_block_size() -> usize {
    (MAX_DATAGRAM - RESPONSE_OVERHEAD) / 4 * 3
}
