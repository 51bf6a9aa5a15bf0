//! Position scanning primitives over raw Wikitext.
//!
//! All functions here work on byte offsets into a `&str` and never fail:
//! an opener without a balancing closer is reported as `None`, and callers
//! treat it as plain text.

use indexmap::IndexMap;

/// The three nested bracket families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Bracket {
    /// `{{ }}`
    Template,
    /// `{{{ }}}`
    Parameter,
    /// `[[ ]]`
    Link,
}

impl Bracket {
    /// The closing sequence for this family.
    fn closer(self) -> &'static [u8] {
        match self {
            Bracket::Template => b"}}",
            Bracket::Parameter => b"}}}",
            Bracket::Link => b"]]",
        }
    }
}

/// Finds the offset just past the `}}` closing a template whose body starts
/// at `start`.
pub(crate) fn find_nested_template_end(text: &str, start: usize) -> Option<usize> {
    find_close(text.as_bytes(), start, Bracket::Template)
}

/// Finds the offset just past the `}}}` closing a template parameter whose
/// body starts at `start`.
pub(crate) fn find_nested_param_end(text: &str, start: usize) -> Option<usize> {
    find_close(text.as_bytes(), start, Bracket::Parameter)
}

/// Finds the offset just past the `]]` closing a link whose body starts at
/// `start`.
pub(crate) fn find_nested_link_end(text: &str, start: usize) -> Option<usize> {
    find_close(text.as_bytes(), start, Bracket::Link)
}

/// Runs one shared balance count across all bracket families, starting inside
/// an already opened `family`.
fn find_close(bytes: &[u8], start: usize, family: Bracket) -> Option<usize> {
    // An explicit stack so that hostile input like ten thousand `{{` cannot
    // exhaust the call stack.
    let mut stack = vec![family];
    let mut pos = start;
    while let Some(&top) = stack.last() {
        let rest = bytes.get(pos..)?;
        if rest.is_empty() {
            return None;
        }

        if rest.starts_with(top.closer()) {
            pos += top.closer().len();
            stack.pop();
        } else if rest.starts_with(b"{{{") {
            stack.push(Bracket::Parameter);
            pos += 3;
        } else if rest.starts_with(b"{{") {
            stack.push(Bracket::Template);
            pos += 2;
        } else if rest.starts_with(b"[[") {
            stack.push(Bracket::Link);
            pos += 2;
        } else {
            pos += 1;
        }
    }
    Some(pos)
}

/// Finds the first occurrence of `needle` at or after `start` which is not
/// nested inside any balanced bracket pair.
fn find_top_level(text: &str, start: usize, needle: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = start;
    while pos < bytes.len() {
        let rest = &bytes[pos..];
        let opener = if rest.starts_with(b"{{{") {
            Some((Bracket::Parameter, 3))
        } else if rest.starts_with(b"{{") {
            Some((Bracket::Template, 2))
        } else if rest.starts_with(b"[[") {
            Some((Bracket::Link, 2))
        } else {
            None
        };

        if let Some((family, len)) = opener {
            // An unbalanced opener is just text, so step over it and keep
            // looking
            pos = find_close(bytes, pos + len, family).unwrap_or(pos + len);
        } else if rest[0] == needle {
            return Some(pos);
        } else {
            pos += 1;
        }
    }
    None
}

/// Splits the body of a template invocation on each `|` which is not inside
/// a nested template, parameter, or link. The first part is the name.
pub(crate) fn split_by_pipe(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(end) = find_top_level(text, start, b'|') {
        parts.push(&text[start..end]);
        start = end + 1;
    }
    parts.push(&text[start..]);
    parts
}

/// Splits one template argument on its first top-level `=`, returning the
/// name if there is one, and the value.
pub(crate) fn split_parameter(text: &str) -> (Option<&str>, &str) {
    match find_top_level(text, 0, b'=') {
        Some(index) => (Some(&text[..index]), &text[index + 1..]),
        None => (None, text),
    }
}

/// Returns the offset of the first construct which the template preprocessor
/// needs to look at, or `None` if the text can be passed through untouched.
pub(crate) fn index_of_template_parsing(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    memchr::memchr3_iter(b'{', b'<', b'~', bytes).find(|&index| match bytes[index] {
        b'{' => bytes.get(index + 1) == Some(&b'{'),
        b'~' => bytes[index..].starts_with(b"~~~"),
        _ => true,
    })
}

/// An HTML-like start or end tag.
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct Tag {
    /// The lowercase tag name.
    pub name: String,
    /// The attributes of the tag, in source order.
    pub attributes: IndexMap<String, String>,
    /// The offset just past the closing `>`.
    pub end: usize,
    /// Whether this is an end tag (`</name>`).
    pub is_end: bool,
    /// Whether this is a self-closing tag (`<name/>`).
    pub is_empty: bool,
}

/// Parses the HTML-like tag starting at the `<` at `start`.
pub(crate) fn parse_tag(text: &str, start: usize) -> Option<Tag> {
    let bytes = text.as_bytes();
    let mut pos = start + 1;
    let is_end = bytes.get(pos) == Some(&b'/');
    if is_end {
        pos += 1;
    }

    let name_start = pos;
    if !bytes.get(pos)?.is_ascii_alphabetic() {
        return None;
    }
    while bytes.get(pos).is_some_and(u8::is_ascii_alphanumeric) {
        pos += 1;
    }
    let name = text[name_start..pos].to_ascii_lowercase();

    let mut attributes = IndexMap::new();
    loop {
        while bytes.get(pos)?.is_ascii_whitespace() {
            pos += 1;
        }
        match bytes[pos] {
            b'>' => {
                return Some(Tag {
                    name,
                    attributes,
                    end: pos + 1,
                    is_end,
                    is_empty: false,
                });
            }
            b'/' if bytes.get(pos + 1) == Some(&b'>') => {
                return Some(Tag {
                    name,
                    attributes,
                    end: pos + 2,
                    is_end,
                    is_empty: true,
                });
            }
            b'<' => return None,
            _ => {}
        }

        let attr_start = pos;
        while bytes
            .get(pos)
            .is_some_and(|&b| !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'<'))
            && !bytes[pos..].starts_with(b"/>")
        {
            pos += 1;
        }
        let attr_name = text[attr_start..pos].to_ascii_lowercase();
        if attr_name.is_empty() {
            // A stray `=` or similar
            pos += 1;
            continue;
        }

        while bytes.get(pos).is_some_and(u8::is_ascii_whitespace) {
            pos += 1;
        }
        let value = if bytes.get(pos) == Some(&b'=') {
            pos += 1;
            while bytes.get(pos)?.is_ascii_whitespace() {
                pos += 1;
            }
            match bytes[pos] {
                quote @ (b'"' | b'\'') => {
                    let value_start = pos + 1;
                    let len = memchr::memchr(quote, &bytes[value_start..])?;
                    pos = value_start + len + 1;
                    &text[value_start..value_start + len]
                }
                _ => {
                    let value_start = pos;
                    while bytes
                        .get(pos)
                        .is_some_and(|&b| !b.is_ascii_whitespace() && b != b'>')
                        && !bytes[pos..].starts_with(b"/>")
                    {
                        pos += 1;
                    }
                    &text[value_start..pos]
                }
            }
        } else {
            ""
        };
        attributes.insert(attr_name, value.to_string());
    }
}

/// Parses a bare run of HTML attributes, like the text after `{|` in a
/// Wikitext table. Returns nothing if the attributes are malformed.
pub(crate) fn parse_attributes(text: &str) -> IndexMap<String, String> {
    parse_tag(&format!("<x {}>", text.replace(['<', '>'], "")), 0)
        .map(|tag| tag.attributes)
        .unwrap_or_default()
}

/// Finds the next occurrence of `needle` at or after `start`, comparing ASCII
/// case-insensitively. Returns the offset of the start of the match.
pub(crate) fn read_until_ignore_case(text: &str, start: usize, needle: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let needle = needle.as_bytes();
    let first = *needle.first()?;
    memchr::memchr_iter(first, bytes.get(start..)?)
        .map(|index| start + index)
        .find(|&index| {
            bytes
                .get(index..index + needle.len())
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(needle))
        })
}

/// Finds the end tag `</name>` at or after `start`. Returns the offset of its
/// `<` and the offset just past its `>`.
pub(crate) fn find_end_tag(text: &str, start: usize, name: &str) -> Option<(usize, usize)> {
    let needle = format!("</{name}");
    let mut from = start;
    while let Some(at) = read_until_ignore_case(text, from, &needle) {
        let after = at + needle.len();
        let rest = &text.as_bytes()[after..];
        // `</prefix>` must not match `</prefixed>`
        if rest.first().is_none_or(|b| !b.is_ascii_alphanumeric()) {
            let close = memchr::memchr(b'>', rest).map_or(text.len(), |len| after + len + 1);
            return Some((at, close));
        }
        from = after;
    }
    None
}
