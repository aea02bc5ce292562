//! JSON datagram codec.
//!
//! Each datagram carries exactly one JSON object; there is no framing.

use crate::ProtocolError;
use crate::messages::{BlockRequest, BlockResponse};

/// Serializes a request into a datagram payload.
pub fn encode_request(request: &BlockRequest) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(request)?)
}

/// Parses a request datagram.
pub fn decode_request(datagram: &[u8]) -> Result<BlockRequest, ProtocolError> {
    Ok(serde_json::from_slice(datagram)?)
}

/// Serializes a response into a datagram payload.
pub fn encode_response(response: &BlockResponse) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(response)?)
}

/// Parses a response datagram.
pub fn decode_response(datagram: &[u8]) -> Result<BlockResponse, ProtocolError> {
    Ok(serde_json::from_slice(datagram)?)
}
