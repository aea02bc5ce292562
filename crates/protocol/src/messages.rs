use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::{FILE_SIZE_MARKER, SIZE_SENTINEL};
use crate::hash::{content_hash, verify_content_hash};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Asks the server for the bytes in `[start, end)`, or for the file size
/// when both bounds are [`SIZE_SENTINEL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub start: i64,
    pub end: i64,
    /// Correlation id echoed by the server. Absent on legacy clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl BlockRequest {
    /// Creates a content request for `[start, end)`.
    pub fn range(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            id: None,
        }
    }

    /// Creates a size-discovery request.
    pub fn size_probe() -> Self {
        Self::range(SIZE_SENTINEL, SIZE_SENTINEL)
    }

    /// Returns a copy tagged with the given correlation id.
    pub fn with_id(self, id: u64) -> Self {
        Self {
            id: Some(id),
            ..self
        }
    }

    /// A request is a size probe when `start` is the sentinel; `end` is not
    /// consulted.
    pub fn is_size_probe(&self) -> bool {
        self.start == SIZE_SENTINEL
    }

    /// Checks that a content request describes a non-negative, ordered range.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.is_size_probe() {
            return Ok(());
        }
        if self.start < 0 || self.end < self.start {
            return Err(ProtocolError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Number of bytes requested. Zero for size probes and invalid ranges.
    pub fn len(&self) -> u64 {
        if self.is_size_probe() || self.validate().is_err() {
            return 0;
        }
        (self.end - self.start) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Answer to a [`BlockRequest`].
///
/// For a size probe `content` is absent, `md5_hash` is [`FILE_SIZE_MARKER`]
/// and both `start` and `end` hold the file size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "base64_opt")]
    pub content: Option<Vec<u8>>,
    pub start: i64,
    pub end: i64,
    #[serde(rename = "md5hash")]
    pub md5_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl BlockResponse {
    /// Builds the size-probe answer for `request`.
    pub fn file_size(request: &BlockRequest, size: i64) -> Self {
        Self {
            content: None,
            start: size,
            end: size,
            md5_hash: FILE_SIZE_MARKER.into(),
            id: request.id,
        }
    }

    /// Builds a content answer for `request`, hashing `data`.
    pub fn content(request: &BlockRequest, data: Vec<u8>) -> Self {
        Self {
            md5_hash: content_hash(&data),
            content: Some(data),
            start: request.start,
            end: request.end,
            id: request.id,
        }
    }

    /// Returns `true` if this is a size-probe answer.
    pub fn is_file_size(&self) -> bool {
        self.content.is_none() && self.md5_hash == FILE_SIZE_MARKER
    }

    /// Returns `true` if the carried digest matches the carried content.
    ///
    /// A response without content never verifies.
    pub fn verify_hash(&self) -> bool {
        match &self.content {
            Some(data) => verify_content_hash(data, &self.md5_hash),
            None => false,
        }
    }

    /// Returns `true` if this response can be the answer to `request`.
    ///
    /// The correlation id must match when the response carries one. A
    /// response without an id (legacy server) is accepted on its range.
    pub fn answers(&self, request: &BlockRequest) -> bool {
        if let Some(id) = self.id
            && request.id != Some(id)
        {
            return false;
        }
        if request.is_size_probe() {
            return self.is_file_size() && self.start == self.end && self.start >= 0;
        }
        !self.is_file_size() && self.start == request.start && self.end == request.end
    }
}

/// Base64 for an optional byte field; accepts a missing field or `null`.
mod base64_opt {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD
                .decode(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
