//! The two-pass template preprocessor.
//!
//! Pass 1 handles the structure of the source text: comments, verbatim
//! spans, inclusion control tags, and `subst:` calls. Pass 2 expands template
//! calls, parameter references, parser functions, and signatures. The two
//! passes recurse into each other through [`parse_recursive`] whenever a
//! template name, argument, or body needs expanding.

use super::{
    Error, Model, Result, parser_fns,
    scanner::{self, Tag},
    stack::{self, ParameterMap},
    template,
};
use crate::{
    common::trim_newline_left,
    title::{Namespace, ParsedPageName},
};
use core::fmt::Write as _;
use regex::Regex;
use std::sync::LazyLock;

/// The text emitted in place of expansion once the template recursion limit
/// is reached.
pub(crate) const RECURSION_LIMIT_MESSAGE: &str =
    "Error - template recursion limit exceeded parsing templates.";

/// Tags whose content is passed through without any template processing.
const VERBATIM_TAGS: &[&str] = &["nowiki", "pre", "math", "source"];

/// Fully expands `raw` and appends the result to `out`.
///
/// `render_template` is true when the text is the page being rendered, and
/// false when it is being transcluded. `params` are the arguments bound to the
/// template whose body `raw` is, if any.
///
/// This never fails on bad input; every error is converted to inline text.
pub(crate) fn parse_recursive(
    out: &mut String,
    model: &mut Model<'_>,
    raw: &str,
    render_template: bool,
    params: Option<&ParameterMap>,
) -> Result {
    if scanner::index_of_template_parsing(raw).is_none() {
        *out += raw;
        return Ok(());
    }

    let mut buf = String::new();
    if let Err(err) = parse_recursive_inner(&mut buf, model, raw, render_template, params) {
        log::warn!("template parser error in '{}': {err}", model.title());
        write!(out, "TemplateParserError:{}", err.kind())?;
        return Ok(());
    }
    *out += &buf;
    Ok(())
}

/// The fallible part of [`parse_recursive`].
fn parse_recursive_inner(
    out: &mut String,
    model: &mut Model<'_>,
    raw: &str,
    render_template: bool,
    params: Option<&ParameterMap>,
) -> Result {
    let text = preprocess_recursive(model, raw, render_template, params)?;

    model.depth.template += 1;
    let mut guard = scopeguard::guard(model, |model| model.depth.template -= 1);
    let model = &mut **guard;
    if model.depth.template > model.config().template_recursion_limit {
        model.debug_backtrace();
        *out += RECURSION_LIMIT_MESSAGE;
        return Ok(());
    }

    // Parameter substitution can introduce new comments and verbatim spans
    let text = preprocess(model, &text, render_template, true)?;

    let mut first = String::with_capacity(text.len());
    expand(&mut first, model, &text)?;
    if model.parameter_mode {
        *out += &first;
    } else {
        expand(out, model, &first)?;
    }
    Ok(())
}

/// Runs pass 1 over `raw`, then substitutes any bound `params`.
fn preprocess_recursive(
    model: &mut Model<'_>,
    raw: &str,
    render_template: bool,
    params: Option<&ParameterMap>,
) -> Result<String> {
    model.depth.template += 1;
    let mut guard = scopeguard::guard(model, |model| model.depth.template -= 1);
    let model = &mut **guard;
    if model.depth.template > model.config().template_recursion_limit {
        model.debug_backtrace();
        return Ok(RECURSION_LIMIT_MESSAGE.to_string());
    }

    let text = preprocess(model, raw, render_template, false)?;
    Ok(match params {
        Some(params) => replace_template_parameters(model, &text, Some(params)).unwrap_or(text),
        None => text,
    })
}

/// Pass 1: strips comments, skips verbatim spans, applies inclusion control
/// tags, and performs `subst:` substitution.
///
/// If `ignore_template_tags` is true, only comments and verbatim spans are
/// processed.
pub(crate) fn preprocess(
    model: &mut Model<'_>,
    src: &str,
    render_template: bool,
    ignore_template_tags: bool,
) -> Result<String> {
    let bytes = src.as_bytes();
    let mut out = String::with_capacity(src.len());
    let mut only_include = None::<String>;
    let mut flushed = 0;
    let mut pos = 0;

    while let Some(offset) = memchr::memchr2(b'<', b'{', &bytes[pos..]) {
        let at = pos + offset;
        if bytes[at] == b'{' {
            pos = at + 1;
            if ignore_template_tags || !bytes[at..].starts_with(b"{{") {
                continue;
            }
            let Some(end) = scanner::find_nested_template_end(src, at + 2) else {
                continue;
            };
            let body = src[at + 2..end - 2].trim_start();
            let Some(rest) = strip_prefix_ignore_case(body, "subst:")
                .or_else(|| strip_prefix_ignore_case(body, "safesubst:"))
            else {
                continue;
            };
            if let Some(text) = substitute(model, rest)? {
                out += &src[flushed..at];
                out += &text;
                flushed = end;
            }
            pos = end;
            continue;
        }

        if bytes[at..].starts_with(b"<!--") {
            let (start, end) = comment_span(src, at);
            out += &src[flushed..start.max(flushed)];
            flushed = end;
            pos = end;
            continue;
        }

        let Some(tag) = scanner::parse_tag(src, at).filter(|tag| !tag.is_end) else {
            pos = at + 1;
            continue;
        };

        if VERBATIM_TAGS.contains(&tag.name.as_str()) {
            pos = verbatim_end(src, &tag);
            continue;
        }

        let name = tag.name.as_str();
        if ignore_template_tags || !matches!(name, "includeonly" | "noinclude" | "onlyinclude") {
            pos = at + 1;
            continue;
        }

        out += &src[flushed..at];
        let (body, after) = if tag.is_empty {
            ("", tag.end)
        } else {
            match scanner::find_end_tag(src, tag.end, name) {
                Some((close, after)) => (&src[tag.end..close], after),
                None => (&src[tag.end..], src.len()),
            }
        };

        match (name, render_template) {
            ("includeonly", true) | ("noinclude", false) => {}
            ("includeonly", false) => {
                out += &preprocess(model, body, render_template, false)?;
            }
            ("onlyinclude", false) => {
                let text = preprocess(model, body, render_template, false)?;
                only_include.get_or_insert_default().push_str(&text);
            }
            _ => out += &preprocess(model, body, render_template, false)?,
        }
        flushed = after;
        pos = after;
    }

    if let Some(only_include) = only_include {
        return Ok(only_include);
    }

    out += &src[flushed..];
    Ok(out)
}

/// Returns the span of text to remove for the comment starting at `start`.
///
/// A comment which is alone on its line takes the rest of the line,
/// including its line break, with it. An unterminated comment runs to the end
/// of the text.
fn comment_span(src: &str, start: usize) -> (usize, usize) {
    let bytes = src.as_bytes();
    let end = memchr::memmem::find(&bytes[start + 4..], b"-->")
        .map_or(src.len(), |index| start + 4 + index + 3);

    let is_blank = |b: &u8| b.is_ascii_whitespace() && *b != b'\n';
    let line_start = start - bytes[..start].iter().rev().take_while(|b| is_blank(b)).count();
    let line_end = end + bytes[end..].iter().take_while(|b| is_blank(b)).count();
    let at_line_start = line_start == 0 || bytes[line_start - 1] == b'\n';
    let at_line_end = line_end == bytes.len() || bytes[line_end] == b'\n';

    if at_line_start && at_line_end {
        (line_start, (line_end + 1).min(bytes.len()))
    } else {
        (start, end)
    }
}

/// Returns the offset just past the end of the verbatim span started by
/// `tag`, or just past the tag itself if the span is unterminated.
fn verbatim_end(src: &str, tag: &Tag) -> usize {
    if tag.is_empty {
        tag.end
    } else {
        scanner::find_end_tag(src, tag.end, &tag.name).map_or(tag.end, |(_, end)| end)
    }
}

/// Strips a prefix from `text`, comparing ASCII case-insensitively.
fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| &text[prefix.len()..])
}

/// Performs a `subst:` or `safesubst:` call with the body `rest`, returning
/// the text to splice in, or `None` to leave the call as-is.
fn substitute(model: &mut Model<'_>, rest: &str) -> Result<Option<String>> {
    // log::trace!("substituting {rest}");
    let text = preprocess(model, rest, false, false)?;
    let text = trim_newline_left(&text);
    let parts = scanner::split_by_pipe(text);
    let name = parts[0].trim();

    if let Some(offset) = template::check_parser_function(name) {
        let function_name = name[..offset - 1].trim();
        if let Some(function) = model.engine().function(function_name) {
            let call = parser_fns::FunctionCall::new(
                function_name,
                name[offset..].to_string(),
                &parts,
                text,
                true,
            );
            return match function.call(&call, model) {
                Ok(text) => Ok(Some(text.unwrap_or_default())),
                Err(err) => Ok(Some(parser_fns::error_span(function_name, &err))),
            };
        }
    }

    let page = ParsedPageName::parse(name, Namespace::template());
    if !page.valid {
        return Ok(None);
    }

    let params = stack::raw_parameters(parts[1..].iter().copied());
    let content = match model.raw_content(&page, &params) {
        Ok(Some(content)) => content,
        Ok(None) => return Ok(None),
        Err(err @ (Error::Content(_) | Error::Io(_))) => {
            log::warn!("could not substitute {page}: {err}");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let text = preprocess(model, &content, false, false)?;
    Ok(Some(
        replace_template_parameters(model, &text, Some(&params)).unwrap_or(text),
    ))
}

/// Pass 2: expands templates, parameters, parser functions, and signatures.
fn expand(out: &mut String, model: &mut Model<'_>, src: &str) -> Result {
    let bytes = src.as_bytes();
    let mut flushed = 0;
    let mut pos = 0;

    while let Some(offset) = memchr::memchr3(b'{', b'<', b'~', &bytes[pos..]) {
        let at = pos + offset;
        pos = at + 1;
        match bytes[at] {
            b'{' if bytes[at..].starts_with(b"{{") => {
                if bytes[at..].starts_with(b"{{{")
                    && let Some(end) = scanner::find_nested_param_end(src, at + 3)
                {
                    *out += &src[flushed..at];
                    parse_template_parameter(out, model, &src[at..end])?;
                    flushed = end;
                    pos = end;
                } else if let Some(end) = scanner::find_nested_template_end(src, at + 2) {
                    *out += &src[flushed..at];
                    flushed = at;
                    if template::parse_template(out, model, &src[at + 2..end - 2])? {
                        flushed = end;
                        pos = end;
                    } else {
                        pos = at + 2;
                    }
                } else {
                    pos = at + 2;
                }
            }
            b'<' => {
                if bytes[at..].starts_with(b"<!--") {
                    let (start, end) = comment_span(src, at);
                    *out += &src[flushed..start.max(flushed)];
                    flushed = end;
                    pos = end;
                } else if let Some(tag) = scanner::parse_tag(src, at)
                    && !tag.is_end
                    && VERBATIM_TAGS.contains(&tag.name.as_str())
                {
                    pos = verbatim_end(src, &tag);
                }
            }
            b'~' => {
                let count = bytes[at..].iter().take_while(|&&b| b == b'~').count();
                pos = at + count;
                if count >= 3 {
                    *out += &src[flushed..at];
                    // Only the last five tildes of a longer run are a
                    // signature
                    let literal = count.saturating_sub(5);
                    *out += &src[at..at + literal];
                    model.append_signature(out, count - literal)?;
                    flushed = pos;
                }
            }
            _ => {}
        }
    }

    *out += &src[flushed..];
    Ok(())
}

/// Expands a parameter reference `{{{name|default}}}` in a context with no
/// bound arguments, where only the default can apply.
fn parse_template_parameter(out: &mut String, model: &mut Model<'_>, plain: &str) -> Result {
    match replace_template_parameters(model, plain, None) {
        Some(text) => parse_recursive(out, model, text.trim(), false, None),
        None => {
            *out += plain;
            Ok(())
        }
    }
}

/// Replaces every parameter reference in `text` with its bound value or its
/// default. Returns `None` if nothing was replaced.
///
/// The names and defaults of references are resolved recursively with the
/// same arguments. Bound values are already expanded, so they are only
/// searched for references which have defaults.
pub(crate) fn replace_template_parameters(
    model: &mut Model<'_>,
    text: &str,
    params: Option<&ParameterMap>,
) -> Option<String> {
    model.depth.parser += 1;
    let mut guard = scopeguard::guard(model, |model| model.depth.parser -= 1);
    let model = &mut **guard;
    if model.depth.parser > model.config().parser_recursion_limit {
        log::warn!("parameter recursion limit exceeded in '{}'", model.title());
        return None;
    }

    let value_limit = model.config().template_value_limit;
    let buffer_limit = model.config().template_buffer_limit;
    let mut out = String::new();
    let mut flushed = 0;
    let mut pos = 0;
    let mut replaced = false;

    while let Some(offset) = memchr::memmem::find(&text.as_bytes()[pos..], b"{{{") {
        let at = pos + offset;
        if text.as_bytes().get(at + 3) == Some(&b'{') {
            // `{{{{` is a template wrapping a parameter, so look for the
            // innermost triple brace
            pos = at + 1;
            continue;
        }
        let Some(end) = scanner::find_nested_param_end(text, at + 3) else {
            pos = at + 3;
            continue;
        };
        pos = end;

        let parts = scanner::split_by_pipe(&text[at + 3..end - 3]);
        let name = parts[0].trim();
        let name = replace_template_parameters(model, name, params)
            .map_or_else(|| name.to_string(), |name| name.trim().to_string());

        let (value, is_default) = match params.and_then(|params| params.get(&name)) {
            Some(value) => (value.as_str(), false),
            None => match parts.get(1) {
                Some(default) => (*default, true),
                None => continue,
            },
        };

        if value.len() > value_limit {
            log::warn!("not interpolating oversized value of parameter '{name}'");
            continue;
        }

        out += &text[flushed..at];
        let nested = if is_default { params } else { None };
        match replace_template_parameters(model, value, nested) {
            Some(value) => out += &value,
            None => out += value,
        }
        flushed = end;
        replaced = true;

        if out.len() > buffer_limit {
            log::warn!("parameter substitution output limit exceeded in '{}'", model.title());
            return Some(out);
        }
    }

    if !replaced {
        return None;
    }
    out += &text[flushed..];
    Some(out)
}

/// Returns the target of a redirect, if `text` is a redirect page.
pub(crate) fn parse_redirect(text: &str) -> Option<&str> {
    static REDIRECT: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^\s*#redirect\s*:?\s*\[\[([^\]|]+)").expect("redirect regex is valid")
    });
    REDIRECT
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|target| target.as_str().trim())
        .filter(|target| !target.is_empty())
}
