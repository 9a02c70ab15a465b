use url::Url;

/// Extracts the authority (`host[:port]`) from a URL
///
/// The host is lowercased; the port is only included when it differs from
/// the scheme's default. URLs without a host yield an empty string.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use ripple_crawler::url::extract_authority;
///
/// let url = Url::parse("https://EXAMPLE.COM/path").unwrap();
/// assert_eq!(extract_authority(&url), "example.com");
///
/// let url = Url::parse("http://example.com:8080/").unwrap();
/// assert_eq!(extract_authority(&url), "example.com:8080");
/// ```
pub fn extract_authority(url: &Url) -> String {
    let host = url.host_str().map(|h| h.to_lowercase()).unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

/// Decides whether `uri` belongs to the site rooted at `root`
///
/// A URI is internal when its authority matches the root's authority.
pub fn is_internal_uri(uri: &Url, root: &Url) -> bool {
    extract_authority(uri) == extract_authority(root)
}

/// Location of the robots.txt file for the authority of `root`
pub fn robots_txt_url(root: &Url) -> Option<Url> {
    root.join("/robots.txt").ok()
}

/// A synthetic path directly below `root`
///
/// Used to detect robots.txt files that allow the root itself but disallow
/// everything beneath it (`Disallow: /*`).
pub fn sub_path_probe(root: &Url) -> String {
    let root = root.as_str();
    if root.ends_with('/') {
        format!("{}aaaaa", root)
    } else {
        format!("{}/aaaaa", root)
    }
}
