//! CSS selector helpers
//!
//! Video sources are arbitrary URLs, so they are escaped before being
//! embedded in an attribute selector.

use std::fmt::Write;

/// Escape a string per the CSSOM "serialize an identifier" rules
/// (the behaviour of `CSS.escape`).
pub fn css_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let first = value.chars().next();
    let len = value.chars().count();

    for (i, c) in value.chars().enumerate() {
        let code = c as u32;
        match c {
            '\0' => out.push('\u{FFFD}'),
            '\u{1}'..='\u{1f}' | '\u{7f}' => push_code_point(&mut out, code),
            '0'..='9' if i == 0 => push_code_point(&mut out, code),
            '0'..='9' if i == 1 && first == Some('-') => push_code_point(&mut out, code),
            '-' if i == 0 && len == 1 => out.push_str("\\-"),
            _ if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() => out.push(c),
            _ => {
                out.push('\\');
                out.push(c);
            }
        }
    }
    out
}

fn push_code_point(out: &mut String, code: u32) {
    let _ = write!(out, "\\{:x} ", code);
}

/// Selector matching a video by its `src` attribute.
pub fn video_src_selector(src: &str) -> String {
    format!("video[src=\"{}\"]", css_escape(src))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_css_escape_plain() {
        assert_eq!(css_escape("video"), "video");
        assert_eq!(css_escape("a-b_c"), "a-b_c");
        assert_eq!(css_escape("ünï"), "ünï");
    }

    #[test]
    fn test_css_escape_specials() {
        assert_eq!(css_escape("a\"b"), "a\\\"b");
        assert_eq!(css_escape("https://x.test/v.mp4?a=1&b=2"), "https\\:\\/\\/x\\.test\\/v\\.mp4\\?a\\=1\\&b\\=2");
        assert_eq!(css_escape("1a"), "\\31 a");
        assert_eq!(css_escape("-1"), "-\\31 ");
        assert_eq!(css_escape("-"), "\\-");
        assert_eq!(css_escape("a\u{0}b"), "a\u{FFFD}b");
        assert_eq!(css_escape("a\nb"), "a\\a b");
    }

    #[test]
    fn test_video_src_selector() {
        assert_eq!(video_src_selector("blob:x"), "video[src=\"blob\\:x\"]");
    }
}
