//! Output escapers, selected per render by encoding name.
//!
//! The registry is process-wide, initialized once and read-only afterwards.
//! Unknown encoding names fall back to the identity escaper, so a render
//! can never fail on the encoding argument.

use std::borrow::Cow;
use std::sync::LazyLock;

use rustc_hash::FxHashMap;

/// An output encoder applied to every escaped value output.
pub trait Escaper: Send + Sync {
    /// Encodes a value's string form for the output document.
    fn encode<'a>(&self, input: &'a str) -> Cow<'a, str>;
}

/// Identity encoding.
struct RawEscaper;

impl Escaper for RawEscaper {
    fn encode<'a>(&self, input: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(input)
    }
}

/// HTML entity encoding for `&`, `<`, `>` and `"`.
struct HtmlEscaper;

impl Escaper for HtmlEscaper {
    fn encode<'a>(&self, input: &'a str) -> Cow<'a, str> {
        if !input.contains(['&', '<', '>', '"']) {
            return Cow::Borrowed(input);
        }
        let mut out = String::with_capacity(input.len() + 8);
        for c in input.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                other => out.push(other),
            }
        }
        Cow::Owned(out)
    }
}

/// Percent-encoding of everything outside the unreserved set.
struct UrlEscaper;

impl Escaper for UrlEscaper {
    fn encode<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let needs_escape =
            |b: u8| !(b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'));
        if !input.bytes().any(needs_escape) {
            return Cow::Borrowed(input);
        }
        let mut out = String::with_capacity(input.len() * 3);
        for b in input.bytes() {
            if needs_escape(b) {
                out.push('%');
                out.push_str(&format!("{:02X}", b));
            } else {
                out.push(b as char);
            }
        }
        Cow::Owned(out)
    }
}

static REGISTRY: LazyLock<FxHashMap<&'static str, Box<dyn Escaper>>> = LazyLock::new(|| {
    let mut registry: FxHashMap<&'static str, Box<dyn Escaper>> = FxHashMap::default();
    registry.insert("raw", Box::new(RawEscaper));
    registry.insert("html", Box::new(HtmlEscaper));
    registry.insert("url", Box::new(UrlEscaper));
    registry
});

/// Looks up the escaper for an output encoding; unknown names resolve to
/// the identity escaper.
pub fn get(encoding: &str) -> &'static dyn Escaper {
    match REGISTRY.get(encoding) {
        Some(escaper) => &**escaper,
        None => {
            log::debug!("unknown output encoding '{}', using raw", encoding);
            &RawEscaper
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_entities() {
        let escaper = get("html");
        assert_eq!(
            escaper.encode("<a href=\"x\">&</a>"),
            "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;"
        );
        assert!(matches!(escaper.encode("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn url_percent_encoding() {
        let escaper = get("url");
        assert_eq!(escaper.encode("a b/c"), "a%20b%2Fc");
        assert_eq!(escaper.encode("safe-._~"), "safe-._~");
    }

    #[test]
    fn unknown_encoding_is_identity() {
        assert_eq!(get("nonsense").encode("<kept>"), "<kept>");
        assert_eq!(get("raw").encode("<kept>"), "<kept>");
    }
}
