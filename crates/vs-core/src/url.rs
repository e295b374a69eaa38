//! Scheme detection for tab URLs
//!
//! These functions avoid allocations and work directly on string slices.

/// URL scheme classes the coordinator cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    File,
    /// Browser-internal pages (chrome://, about:, extension pages, ...)
    Privileged,
}

/// Fast scheme extraction without URL parsing.
/// Returns None if the URL has no recognisable scheme.
#[inline]
pub fn extract_scheme(url: &str) -> Option<Scheme> {
    let bytes = url.as_bytes();
    let colon_pos = bytes.iter().position(|&b| b == b':')?;
    let scheme = &bytes[..colon_pos];

    if scheme.is_empty() || !scheme[0].is_ascii_alphabetic() {
        return None;
    }

    if scheme.eq_ignore_ascii_case(b"https") {
        Some(Scheme::Https)
    } else if scheme.eq_ignore_ascii_case(b"http") {
        Some(Scheme::Http)
    } else if scheme.eq_ignore_ascii_case(b"file") {
        Some(Scheme::File)
    } else if scheme
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
    {
        Some(Scheme::Privileged)
    } else {
        None
    }
}

/// Whether the content script can be injected into a tab at this URL.
///
/// Only http(s) pages qualify; the browser refuses injection elsewhere.
#[inline]
pub fn is_injectable(url: &str) -> bool {
    matches!(extract_scheme(url), Some(Scheme::Http | Scheme::Https))
}
