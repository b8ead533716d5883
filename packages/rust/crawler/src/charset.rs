//! Character encoding of fetched HTML.
//!
//! The encoding comes from the `Content-Type` charset, then a byte order
//! mark, then a `<meta charset>` (or `http-equiv`) declaration in the first
//! kilobyte of the body, and defaults to UTF-8.

use std::borrow::Cow;
use std::sync::LazyLock;

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;

/// How far into the body a `<meta>` charset declaration is looked for.
const META_SNIFF_LEN: usize = 1024;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]*?charset\s*=\s*["']?\s*([a-z0-9_:.\-]+)"#)
        .expect("valid meta charset regex")
});

/// Encoding declared for an HTML body.
pub fn detect_encoding(content_type: Option<&str>, body: &[u8]) -> &'static Encoding {
    if let Some(encoding) = content_type.and_then(charset_param) {
        return encoding;
    }
    if let Some((encoding, _)) = Encoding::for_bom(body) {
        return encoding;
    }
    let head = String::from_utf8_lossy(&body[..body.len().min(META_SNIFF_LEN)]);
    META_CHARSET
        .captures(&head)
        .and_then(|caps| Encoding::for_label(caps[1].as_bytes()))
        .unwrap_or(UTF_8)
}

/// Decodes `body` with the given encoding; malformed sequences become U+FFFD.
pub fn decode<'a>(encoding: &'static Encoding, body: &'a [u8]) -> Cow<'a, str> {
    encoding.decode(body).0
}

/// Encodes `text` back into `encoding`, returning the bytes and the encoding
/// actually written (UTF-16 labels are written as UTF-8).
pub fn encode<'a>(
    encoding: &'static Encoding,
    text: &'a str,
) -> (Cow<'a, [u8]>, &'static Encoding) {
    let (bytes, written, _) = encoding.encode(text);
    (bytes, written)
}

/// `text/html` content type naming the given charset.
pub fn html_content_type(encoding: &'static Encoding) -> String {
    format!("text/html; charset={}", encoding.name().to_ascii_lowercase())
}

fn charset_param(content_type: &str) -> Option<&'static Encoding> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Encoding::for_label(value.trim().trim_matches(|c| c == '"' || c == '\'').as_bytes())
    })
}

#[cfg(test)]
mod tests {
    use encoding_rs::WINDOWS_1252;

    use super::*;

    #[test]
    fn header_charset_wins() {
        let body = b"<meta charset=\"utf-8\"><p>R\xE8glement</p>";
        let encoding = detect_encoding(Some("text/html; charset=ISO-8859-1"), body);
        assert_eq!(encoding, WINDOWS_1252);
        assert!(decode(encoding, body).contains("Règlement"));
    }

    #[test]
    fn meta_declarations_are_sniffed() {
        let body = b"<html><head><meta charset='windows-1252'></head><body>\xE9</body>";
        assert_eq!(detect_encoding(Some("text/html"), body), WINDOWS_1252);

        let body = b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=iso-8859-1\">";
        assert_eq!(detect_encoding(None, body), WINDOWS_1252);
    }

    #[test]
    fn defaults_to_utf8() {
        assert_eq!(detect_encoding(None, "<p>Règlement</p>".as_bytes()), UTF_8);
        assert_eq!(detect_encoding(Some("text/html; charset=bogus"), b"<p></p>"), UTF_8);
    }

    #[test]
    fn single_byte_text_round_trips() {
        let body = b"<p>R\xE8glement \xAB zonage \xBB</p>";
        let text = decode(WINDOWS_1252, body);
        let (bytes, written) = encode(WINDOWS_1252, &text);
        assert_eq!(written, WINDOWS_1252);
        assert_eq!(bytes.as_ref(), body);
        assert_eq!(html_content_type(written), "text/html; charset=windows-1252");
    }
}
