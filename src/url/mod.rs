//! URL handling module
//!
//! This module provides authority extraction, internal/external
//! classification, robots.txt locations and compact URI fingerprints.

mod domain;
mod fingerprint;

pub use domain::{extract_authority, is_internal_uri, robots_txt_url, sub_path_probe};
pub use fingerprint::uri_fingerprint;

/// Returns true if the URL uses a scheme the crawler can fetch
pub fn is_http_scheme(url: &url::Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
