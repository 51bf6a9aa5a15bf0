//! Template call binding and transclusion.

use super::{
    Error, Model, Result, parser_fns,
    preprocess::{self, parse_recursive},
    scanner,
    stack::{self, ParameterMap},
};
use crate::title::{Namespace, ParsedPageName};
use core::fmt::Write as _;
use std::sync::Arc;

/// Expands the body of a `{{...}}` expression (without its braces) and
/// appends the result to `out`.
///
/// Returns false, having written nothing, if the body does not name a valid
/// template; the caller keeps it as plain text.
pub(super) fn parse_template(out: &mut String, model: &mut Model<'_>, body: &str) -> Result<bool> {
    let parts = scanner::split_by_pipe(body);

    let mut name = String::new();
    parse_recursive(&mut name, model, parts[0].trim(), false, None)?;
    let name = name.trim();

    if let Some(offset) = check_parser_function(name) {
        let function_name = name[..offset - 1].trim();
        if let Some(function) = model.engine().function(function_name) {
            let call = parser_fns::FunctionCall::new(
                function_name,
                name[offset..].to_string(),
                &parts,
                body,
                false,
            );
            match function.call(&call, model) {
                Ok(Some(text)) => parse_recursive(out, model, &text, false, None)?,
                Ok(None) => {}
                Err(err) => {
                    log::warn!("{function_name} failed in '{}': {err}", model.title());
                    *out += &parser_fns::error_span(function_name, &err);
                }
            }
            return Ok(true);
        }
    }

    if is_invalid_template_name(name) {
        return Ok(false);
    }

    let mut named = ParameterMap::new();
    let mut unnamed = Vec::new();
    for segment in &parts[1..] {
        stack::create_single_parameter(model, segment, &mut named, &mut unnamed)?;
    }
    stack::merge_parameters(&mut named, unnamed);

    substitute_template_call(out, model, name, &named)?;
    Ok(true)
}

/// Returns the offset just past the `:` if `name` has parser function syntax,
/// i.e. an identifier made of letters, digits, `#`, and `$` followed by a
/// colon.
pub(crate) fn check_parser_function(name: &str) -> Option<usize> {
    let mut chars = name.char_indices().skip_while(|(_, c)| c.is_whitespace());
    let (_, first) = chars.next()?;
    if !(first.is_alphabetic() || first == '#' || first == '$') {
        return None;
    }

    for (index, c) in chars {
        if c == ':' {
            return Some(index + 1);
        } else if !(c.is_alphanumeric() || c == '$') {
            return None;
        }
    }
    None
}

/// Returns true if `name` cannot be a template name.
pub(crate) fn is_invalid_template_name(name: &str) -> bool {
    name.is_empty() || name.contains(['<', '>', '[', ']', '{', '}', '|', '\n'])
}

/// Transcludes the template `name` with the bound arguments `params`.
///
/// Template calls are memoised in the engine cache, when there is one. A
/// template which is already being expanded further up the call stack is not
/// expanded again, and emits a loop diagnostic instead.
pub(crate) fn substitute_template_call(
    out: &mut String,
    model: &mut Model<'_>,
    name: &str,
    params: &ParameterMap,
) -> Result {
    let page = ParsedPageName::parse(name, Namespace::template());
    if !page.valid {
        write!(out, "{{{{{name}}}}}")?;
        return Ok(());
    }

    let is_template = page.namespace.id == Namespace::TEMPLATE;
    if is_template
        && params.is_empty()
        && let Some(literal) = parser_fns::magic_literal(&page.pagename)
    {
        // Deferred inside arguments so that a `|` cannot split a value once
        // it is substituted into a template body
        if model.parameter_mode {
            write!(out, "{{{{{}}}}}", page.pagename)?;
        } else {
            *out += literal;
        }
        return Ok(());
    }

    let full_name = page.full_pagename();

    *model.in_flight.entry(full_name.clone()).or_default() += 1;
    let mut guard = scopeguard::guard(model, |model| {
        if let Some(count) = model.in_flight.get_mut(&full_name) {
            *count -= 1;
        }
    });
    let model = &mut **guard;

    if model.in_flight.get(&full_name).copied().unwrap_or_default() > 1 {
        log::warn!("template loop detected in '{}': {full_name}", model.title());
        write!(
            out,
            r#"<span class="error">Template loop detected: <strong class="selflink">{full_name}</strong></span>"#
        )?;
        return Ok(());
    }

    if page.magic_word.is_none() {
        if is_template {
            model.add_template(&page.pagename);
        } else {
            model.add_include(&full_name);
        }
    }

    let cache = model.engine().cache();
    let cache_key = cache
        .filter(|_| is_template && page.magic_word.is_none())
        .and_then(|_| stack::cache_key(&full_name, params, model.config().max_cache_key_length));

    if let (Some(cache), Some(key)) = (cache, &cache_key)
        && let Some(text) = cache.get(key)
    {
        log::debug!("template cache hit: {key}");
        *out += &text;
        return Ok(());
    }

    let content = match model.raw_content(&page, params) {
        Ok(Some(content)) => content,
        Ok(None) => {
            write!(out, "[[:{full_name}]]")?;
            return Ok(());
        }
        Err(err @ (Error::Content(_) | Error::Io(_))) => {
            log::warn!("could not load {full_name}: {err}");
            write!(out, "[[:{full_name}]]")?;
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    let content = follow_redirect(model, content, params);

    model.template_stack.push(full_name.clone());
    let mut expansion = String::new();
    let result = parse_recursive(&mut expansion, model, content.trim(), false, Some(params));
    model.template_stack.pop();
    result?;

    if let (Some(cache), Some(key)) = (cache, cache_key) {
        log::debug!("template cache store: {key}");
        cache.insert(key, Arc::from(expansion.as_str()));
    }

    *out += &expansion;
    Ok(())
}

/// Replaces redirect `content` with the content of its target. Only one
/// redirect is followed.
fn follow_redirect(model: &Model<'_>, content: String, params: &ParameterMap) -> String {
    let Some(target) = preprocess::parse_redirect(&content) else {
        return content;
    };

    let page = ParsedPageName::parse(target, Namespace::main());
    match model.raw_content(&page, params) {
        Ok(Some(target)) => {
            log::debug!("following redirect to {page}");
            target
        }
        Ok(None) => content,
        Err(err) => {
            log::warn!("could not follow redirect to {page}: {err}");
            content
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_parser_function() {
        assert_eq!(check_parser_function("#if: x"), Some(4));
        assert_eq!(check_parser_function(" lc:X"), Some(4));
        assert_eq!(check_parser_function("$a1:"), Some(4));
        assert_eq!(check_parser_function("Template:X"), Some(9));
        assert_eq!(check_parser_function("two words:x"), None);
        assert_eq!(check_parser_function("1abc:x"), None);
        assert_eq!(check_parser_function("noColon"), None);
    }

    #[test]
    fn test_is_invalid_template_name() {
        assert!(is_invalid_template_name(""));
        assert!(is_invalid_template_name("a[b"));
        assert!(is_invalid_template_name("a\nb"));
        assert!(!is_invalid_template_name("Foo bar"));
    }
}
