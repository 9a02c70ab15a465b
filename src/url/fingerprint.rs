use sha2::{Digest, Sha256};
use url::Url;

/// Computes a compact 64-bit fingerprint of an absolute URI
///
/// The seen-set stores these instead of full strings so that long crawls
/// keep a bounded per-entry footprint.
pub fn uri_fingerprint(url: &Url) -> u64 {
    let digest = Sha256::digest(url.as_str().as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
