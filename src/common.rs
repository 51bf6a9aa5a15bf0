//! Escaping, encoding, and trimming functions shared by the preprocessor, the
//! tag parser, and the converters.

use html_escape::NAMED_ENTITIES;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC};
use std::borrow::Cow;
use time::{
    OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};

/// Encodes text into the dotted form used for section and reference anchors:
/// spaces become underscores and every other byte outside of the anchor-safe
/// set becomes `.XX`.
///
/// ```text
/// Peanut Butter (variant 1) -> Peanut_Butter_.28variant_1.29
/// ```
pub fn encode_dot_url(text: &str) -> String {
    let text = text.trim().replace(' ', "_");
    percent_encoding::utf8_percent_encode(&text, &ANCHOR_ALPHABET)
        .to_string()
        .replace('%', ".")
}

/// Decodes HTML entities. Unknown or unterminated entities are left as-is.
pub fn decode_html(text: &str) -> Cow<'_, str> {
    // The longest entity name in the HTML5 table is 31 bytes
    const MAX_LEN: usize = 32;

    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut flushed = 0;
    for start in memchr::memchr_iter(b'&', bytes) {
        if start < flushed {
            continue;
        }
        let name_start = start + 1;
        let window = &bytes[name_start..(name_start + MAX_LEN).min(bytes.len())];
        let Some(len) = memchr::memchr(b';', window) else {
            continue;
        };
        let name = &text[name_start..name_start + len];
        let mut buf = [0; 4];
        let value = if let Some(number) = name.strip_prefix('#') {
            if let Some(hex) = number.strip_prefix(['x', 'X']) {
                u32::from_str_radix(hex, 16).ok()
            } else {
                number.parse::<u32>().ok()
            }
            .and_then(char::from_u32)
            .map(|c| &*c.encode_utf8(&mut buf))
        } else {
            NAMED_ENTITIES
                .binary_search_by(|(entity, _)| entity.cmp(&name.as_bytes()))
                .ok()
                .map(|index| NAMED_ENTITIES[index].1)
        };

        if let Some(value) = value {
            out += &text[flushed..start];
            out += value;
            flushed = name_start + len + 1;
        }
    }

    if flushed == 0 {
        Cow::Borrowed(text)
    } else {
        out += &text[flushed..];
        Cow::Owned(out)
    }
}

/// Escapes the five XML special characters.
#[inline]
pub fn escape_xml(text: &str) -> Cow<'_, str> {
    html_escape::encode_quoted_attribute(text)
}

/// Trims whitespace from both ends, except that if the trailing whitespace
/// contains newlines, it is kept up to and including the first of them.
///
/// ```text
/// "  x  \n \n" -> "x  \n"
/// ```
pub fn trim_newline_right(text: &str) -> &str {
    let text = text.trim_start();
    let end = text.trim_end().len();
    match text[end..].find('\n') {
        Some(newline) => &text[..=end + newline],
        None => &text[..end],
    }
}

/// Trims whitespace from both ends, except that if the leading whitespace
/// contains newlines, the last of them is kept.
///
/// ```text
/// " \n \nfoo  " -> "\nfoo"
/// ```
pub fn trim_newline_left(text: &str) -> &str {
    let start = text
        .char_indices()
        .take_while(|(_, c)| c.is_whitespace())
        .fold(None, |last, (index, c)| {
            if c == '\n' { Some(index) } else { last }
        })
        .unwrap_or_else(|| text.len() - text.trim_start().len());
    text[start..].trim_end()
}

/// Formats a date in the style of a signature timestamp.
///
/// ```text
/// 1970-01-01 00:00 UTC -> 00:00, 1 January 1970 (UTC)
/// ```
pub fn format_signature_time(date: OffsetDateTime) -> Result<String, time::error::Format> {
    date.to_offset(UtcOffset::UTC).format(SIGNATURE_FORMAT)
}

/// The format of a signature timestamp.
const SIGNATURE_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[hour]:[minute], [day padding:none] [month repr:long] [year] (UTC)"
);

/// Percent-encodes a URL part.
#[inline]
pub fn url_encode(input: &str) -> percent_encoding::PercentEncode<'_> {
    percent_encoding::utf8_percent_encode(input, &ALPHABET)
}

/// Percent-encodes a page name for use in a link target, with spaces
/// converted to underscores.
pub fn url_encode_title(title: &str) -> String {
    url_encode(&title.replace(' ', "_")).to_string()
}

/// The alphabet of characters to percent-encode when encoding URLs.
const ALPHABET: AsciiSet = percent_encoding::CONTROLS
    .add(b'%')
    .add(b'#')
    .add(b'\'')
    .add(b'"')
    .add(b'&')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b']')
    .add(b' ');

/// The alphabet of characters to dot-encode in anchors.
const ANCHOR_ALPHABET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b':');

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_html() {
        assert_eq!(
            decode_html("hello & world"),
            Cow::Borrowed("hello & world"),
            "non-entity should remain as-is"
        );
        assert_eq!(
            decode_html("hello&nbsp;world"),
            "hello\u{00a0}world",
            "named entity should decode"
        );
        assert_eq!(
            decode_html("hello&oops;world"),
            "hello&oops;world",
            "invalid entity should remain as-is"
        );
        assert_eq!(
            decode_html("A&#38;B&#x42;"),
            "A&BB",
            "numeric entities should decode"
        );
        assert_eq!(
            decode_html("hello&&amp;world"),
            "hello&&world",
            "incomplete entity should not interfere with later entity"
        );
    }

    #[test]
    fn test_encode_dot_url() {
        assert_eq!(
            encode_dot_url("Peanut Butter (variant 1)"),
            "Peanut_Butter_.28variant_1.29"
        );
        assert_eq!(encode_dot_url("A&B"), "A.26B");
        assert_eq!(encode_dot_url("Ünïcode"), ".C3.9Cn.C3.AFcode");
        assert_eq!(encode_dot_url(" a:b "), "a:b", "outer space should trim");
    }

    #[test]
    fn test_trim_newline_right() {
        assert_eq!(trim_newline_right("  x  \n \n"), "x  \n");
        assert_eq!(trim_newline_right(" x y "), "x y");
        assert_eq!(trim_newline_right("\n\nx\n"), "x\n");
        assert_eq!(trim_newline_right(" \n "), "", "blank text should trim to nothing");
    }

    #[test]
    fn test_trim_newline_left() {
        assert_eq!(trim_newline_left(" \n \nfoo  "), "\nfoo");
        assert_eq!(trim_newline_left("  foo \n"), "foo");
        assert_eq!(trim_newline_left(" \n "), "", "blank text should trim to nothing");
    }

    #[test]
    fn test_format_signature_time() {
        use time::macros::datetime;

        assert_eq!(
            format_signature_time(OffsetDateTime::UNIX_EPOCH).unwrap(),
            "00:00, 1 January 1970 (UTC)"
        );
        assert_eq!(
            format_signature_time(datetime!(2000-02-29 01:01:01 UTC)).unwrap(),
            "01:01, 29 February 2000 (UTC)"
        );
        assert_eq!(
            format_signature_time(datetime!(2023-11-15 00:13 +02:00)).unwrap(),
            "22:13, 14 November 2023 (UTC)",
            "offsets should convert to UTC"
        );
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml(r#"<a href="x">&"#), "&lt;a href=&quot;x&quot;&gt;&amp;");
        assert_eq!(escape_xml("plain"), Cow::Borrowed("plain"));
    }
}
