use md5::{Digest, Md5};

/// Computes MD5 of `data` and returns the lowercase hex digest.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Returns `true` if `expected` is the MD5 hex digest of `data`.
///
/// Comparison ignores ASCII case so uppercase digests from other
/// implementations are accepted.
pub fn verify_content_hash(data: &[u8], expected: &str) -> bool {
    content_hash(data).eq_ignore_ascii_case(expected)
}
