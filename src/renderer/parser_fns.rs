//! Parser function implementations.
//!
//! <https://www.mediawiki.org/wiki/Help:Extension:ParserFunctions>

// Clippy: Functions signatures all conform to a specific API; inline modules
// are clearer with wildcard import.
#![allow(clippy::unnecessary_wraps, clippy::wildcard_imports)]

use super::{Error, Model, Result, preprocess::parse_recursive, scanner};
use crate::{
    common::{encode_dot_url, url_encode},
    expr,
    title::Namespace,
};
use core::{iter, ops::Range};
use regex::Regex;
use std::sync::LazyLock;

/// A parser function, called as `{{name: argument | argument ...}}`.
///
/// Functions are registered on an [`Engine`](super::Engine) by name. Any
/// `Fn` with the right signature is a parser function.
pub trait ParserFunction: Send + Sync {
    /// Calls the function. Returned text is expanded again before it is
    /// emitted; returning `None` emits nothing.
    fn call(&self, call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>>;
}

impl<F> ParserFunction for F
where
    F: Fn(&FunctionCall<'_>, &mut Model<'_>) -> Result<Option<String>> + Send + Sync,
{
    fn call(&self, call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        self(call, model)
    }
}

/// The function signature of a built-in parser function.
type ParserFn = fn(&FunctionCall<'_>, &mut Model<'_>) -> Result<Option<String>>;

/// A single parser function call.
#[derive(Debug)]
pub struct FunctionCall<'a> {
    /// The name of the function, as written.
    pub name: &'a str,
    /// The raw, unexpanded arguments. The first argument is the expanded text
    /// after the `:`.
    pub arguments: Vec<String>,
    /// The source text of the whole call, without its braces.
    pub source: &'a str,
    /// The range of `source` holding the arguments.
    pub span: Range<usize>,
    /// Whether the call is being made by `subst:`, in which case arguments
    /// are not expanded.
    pub is_subst: bool,
}

impl<'a> FunctionCall<'a> {
    /// Creates a call from the pipe-separated `parts` of `source`, where
    /// `first` is the text after the `:` of the first part.
    pub(crate) fn new(
        name: &'a str,
        first: String,
        parts: &[&str],
        source: &'a str,
        is_subst: bool,
    ) -> Self {
        let begin = parts
            .first()
            .and_then(|part| part.find(':'))
            .map_or(0, |colon| colon + 1);
        let mut arguments = Vec::with_capacity(parts.len());
        arguments.push(first);
        arguments.extend(parts.iter().skip(1).map(|part| part.to_string()));
        Self {
            name,
            arguments,
            source,
            span: begin..source.len(),
            is_subst,
        }
    }

    /// The number of arguments.
    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    /// Returns true if there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    /// The raw text of the argument at `index`.
    pub fn raw(&self, index: usize) -> Option<&str> {
        self.arguments.get(index).map(String::as_str)
    }

    /// Expands and trims the argument at `index`.
    pub fn eval(&self, model: &mut Model<'_>, index: usize) -> Result<Option<String>> {
        self.raw(index).map(|raw| self.expand(model, raw)).transpose()
    }

    /// Expands and trims some text in the context of this call.
    pub fn expand(&self, model: &mut Model<'_>, text: &str) -> Result<String> {
        if self.is_subst {
            return Ok(text.trim().to_string());
        }
        let mut out = String::new();
        parse_recursive(&mut out, model, text.trim(), false, None)?;
        Ok(out.trim().to_string())
    }
}

mod cond {
    //! Flow control parser functions.

    use super::*;

    /// `{{#expr: expression}}`
    pub fn expr(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let Some(expr) = call.eval(model, 0)? else {
            return Ok(None);
        };
        let result = expr::do_expression(&expr);
        // log::trace!("#expr: '{expr}' = {result:?}");
        Ok(match result {
            Ok(value) => value.map(expr::format_result),
            Err(err) => Some(expression_error(&err)),
        })
    }

    /// `{{#if: condition | consequent (!condition.trim().is_empty()) | alternate }}`
    pub fn r#if(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let lhs_is_empty = call.eval(model, 0)?.is_none_or(|lhs| lhs.is_empty());
        let index = 1 + usize::from(lhs_is_empty);
        // log::trace!("#if: '{lhs}'? {}", index == 1);
        call.eval(model, index)
    }

    /// `{{#ifeq: lhs | rhs | consequent (lhs == rhs) | alternate }}`
    pub fn if_eq(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let lhs = call.eval(model, 0)?.unwrap_or_default();
        let rhs = call.eval(model, 1)?.unwrap_or_default();
        let is_eq = fuzzy_cmp(&lhs, &rhs);
        // log::trace!("#ifeq: '{lhs:?}' == '{rhs:?}'? {is_eq}");
        call.eval(model, 2 + usize::from(!is_eq))
    }

    /// `{{#iferror: condition | consequent (error) | alternate (no error) }}`
    pub fn if_error(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        static I_AM_BAD: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r#"<(?:strong|span|p|div)\s(?:[^\s>]*\s+)*?class="(?:[^"\s>]*\s+)*?error(?:\s[^">]*)?""#)
                .expect("error regex is valid")
        });

        let lhs = call.eval(model, 0)?.unwrap_or_default();
        if I_AM_BAD.is_match(&lhs) {
            call.eval(model, 1)
        } else if call.len() > 2 {
            call.eval(model, 2)
        } else {
            Ok(Some(lhs))
        }
    }

    /// `{{#ifexpr: expression | consequent (expression != 0.0) | alternate }}`
    pub fn if_expr(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let expr = call.eval(model, 0)?.unwrap_or_default();
        if expr.is_empty() {
            return call.eval(model, 2);
        }

        match expr::do_expression(&expr) {
            Ok(result) => {
                // log::trace!("#ifexpr: {expr:?} = {result:?}");
                let index = if result.is_some_and(|result| result != 0.0) {
                    1
                } else {
                    2
                };
                call.eval(model, index)
            }
            Err(err) => Ok(Some(expression_error(&err))),
        }
    }

    /// `{{#switch: value | case = consequent | case | case = consequent | default }}`
    pub fn switch(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let lhs = call.eval(model, 0)?.unwrap_or_default();
        let mut found = false;
        let mut consequent = None;

        let len = call.len();
        for (index, arg) in call.arguments.iter().enumerate().skip(1) {
            // log::trace!("#switch: arg '{arg}'");

            // If the case is in the form `k=v` then it is a new case,
            // otherwise we must record whether the case matched and
            // continue processing until a `k=v` is encountered to know
            // the consequent
            let (name, value) = scanner::split_parameter(arg);
            let is_kv = name.is_some();
            let rhs = call.expand(model, name.unwrap_or(value))?;

            // Default value can either be a bare final parameter or it
            // can be `#default = value`
            if rhs == "#default" && is_kv {
                consequent = Some(value);
            }

            if !found {
                found = fuzzy_cmp(&lhs, &rhs);
                // log::trace!("#switch: '{lhs}' == '{rhs}'? {found}");
            }

            if found && is_kv {
                consequent = Some(value);
                break;
            }

            // If the case is the last one, there was no `#default`, and it
            // is not a `k=v`, then it is the default value
            if index + 1 == len && consequent.is_none() && !is_kv {
                consequent = Some(value);
                break;
            }
        }

        consequent
            .map(|value| call.expand(model, value))
            .transpose()
    }

    /// Formats an expression error the way the expression functions emit
    /// them.
    fn expression_error(err: &expr::Error) -> String {
        format!(
            r#"<div class="error">Expression error: {}</div>"#,
            html_escape::encode_text(&err.to_string())
        )
    }

    /// Compares two values numerically if they are both numbers, otherwise
    /// as strings.
    pub(super) fn fuzzy_cmp(lhs: &str, rhs: &str) -> bool {
        match (lhs.parse::<f64>(), rhs.parse::<f64>()) {
            (Ok(lhs), Ok(rhs)) => lhs == rhs,
            _ => lhs == rhs,
        }
    }
}

mod string {
    //! String functions.

    use super::*;

    /// `{{anchorencode: value}}`
    pub fn anchor_encode(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        Ok(call.eval(model, 0)?.map(|value| encode_dot_url(&value)))
    }

    /// `{{formatnum: value [| R]}}`
    pub fn format_number(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let Some(value) = call.eval(model, 0)? else {
            return Ok(None);
        };
        let reverse = call.eval(model, 1)?.is_some_and(|flag| flag == "R");
        Ok(Some(if reverse {
            value.replace(',', "")
        } else {
            group_digits(&value)
        }))
    }

    /// `{{lc: value}}`
    pub fn lc(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        Ok(call.eval(model, 0)?.map(|value| value.to_lowercase()))
    }

    /// `{{lcfirst: value}}`
    pub fn lc_first(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        Ok(call.eval(model, 0)?.map(|value| {
            let mut chars = value.chars();
            chars
                .next()
                .map(|first| first.to_lowercase().chain(chars).collect())
                .unwrap_or_default()
        }))
    }

    /// The longest string `padleft` will pad to.
    const MAX_PAD_LENGTH: usize = 500;

    /// `{{padleft: value | length [| padding]}}`
    pub fn pad_left(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let (Some(value), Some(len)) = (call.eval(model, 0)?, call.eval(model, 1)?) else {
            return Ok(None);
        };
        let len = len.trim().parse::<usize>().unwrap_or(0).min(MAX_PAD_LENGTH);
        let value_len = value.chars().count();
        if value_len >= len {
            return Ok(Some(value));
        }

        let pad = call.eval(model, 2)?.unwrap_or_else(|| "0".into());
        // log::trace!("padleft({value}, {len}, {pad})");
        let mut out = String::new();
        if !pad.is_empty() {
            out.extend(
                iter::repeat(pad.as_str())
                    .flat_map(str::chars)
                    .take(len - value_len),
            );
        }
        out += &value;
        Ok(Some(out))
    }

    /// `{{uc: value}}`
    pub fn uc(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        Ok(call.eval(model, 0)?.map(|value| value.to_uppercase()))
    }

    /// `{{ucfirst: value}}`
    pub fn uc_first(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        Ok(call.eval(model, 0)?.map(|value| {
            let mut chars = value.chars();
            chars
                .next()
                .map(|first| first.to_uppercase().chain(chars).collect())
                .unwrap_or_default()
        }))
    }

    /// `{{urlencode: value}}`
    pub fn url_encode(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        Ok(call
            .eval(model, 0)?
            .map(|value| super::url_encode(&value).to_string()))
    }

    /// Inserts thousands separators into the integer part of a number. Text
    /// which is not a plain decimal number is returned unchanged.
    pub(super) fn group_digits(value: &str) -> String {
        let (sign, rest) = value
            .strip_prefix('-')
            .map_or(("", value), |rest| ("-", rest));
        let (int, frac) = rest
            .split_once('.')
            .map_or((rest, None), |(int, frac)| (int, Some(frac)));
        if int.is_empty()
            || !int.bytes().all(|b| b.is_ascii_digit())
            || !frac.is_none_or(|frac| frac.bytes().all(|b| b.is_ascii_digit()))
        {
            return value.to_string();
        }

        let mut out = String::with_capacity(value.len() + int.len() / 3);
        out += sign;
        for (index, c) in int.chars().enumerate() {
            if index != 0 && (int.len() - index) % 3 == 0 {
                out.push(',');
            }
            out.push(c);
        }
        if let Some(frac) = frac {
            out.push('.');
            out += frac;
        }
        out
    }
}

mod page {
    //! Page and namespace functions.

    use super::*;

    /// `{{ns: number or name}}`
    pub fn ns(call: &FunctionCall<'_>, model: &mut Model<'_>) -> Result<Option<String>> {
        let Some(value) = call.eval(model, 0)? else {
            return Ok(None);
        };
        let namespace = match value.parse::<i32>() {
            Ok(id) => Namespace::find_by_id(id),
            Err(_) => Namespace::find_by_name(&value),
        };
        Ok(Some(match namespace {
            Some(namespace) => namespace.name.to_string(),
            None => format!("[[:Template:Ns:{value}]]"),
        }))
    }
}

mod subst {
    //! Substitution control functions, as seen at render time.

    use super::*;

    /// `{{safesubst: template | arguments...}}`, which is an ordinary
    /// transclusion when not saving.
    pub fn safe_subst(call: &FunctionCall<'_>, _: &mut Model<'_>) -> Result<Option<String>> {
        let mut out = String::from("{{");
        for (index, arg) in call.arguments.iter().enumerate() {
            if index != 0 {
                out.push('|');
            }
            out += arg;
        }
        out += "}}";
        Ok(Some(out))
    }

    /// `{{subst: template | arguments...}}`, which is emitted as-is when not
    /// saving.
    pub fn subst(call: &FunctionCall<'_>, _: &mut Model<'_>) -> Result<Option<String>> {
        Ok(Some(format!("<nowiki>{{{{{}}}}}</nowiki>", call.source)))
    }
}

/// Returns the built-in parser function with the given lowercase name.
pub(crate) fn builtin(name: &str) -> Option<&'static dyn ParserFunction> {
    PARSER_FUNCTIONS
        .get(name)
        .map(|function| function as &'static dyn ParserFunction)
}

/// Returns the literal text of an argument-less magic word like `{{!}}`.
pub(crate) fn magic_literal(name: &str) -> Option<&'static str> {
    MAGIC_LITERALS.get(name).copied()
}

/// Formats a parser function failure as inline text.
pub(crate) fn error_span(name: &str, err: &Error) -> String {
    format!(
        r#"<span class="error">{} in {}: {}</span>"#,
        err.kind(),
        html_escape::encode_text(name),
        html_escape::encode_text(&err.to_string())
    )
}

/// Magic words which expand to literal text.
static MAGIC_LITERALS: phf::Map<&'static str, &'static str> = phf::phf_map! {
    "!" => "|",
    "=" => "=",
};

/// All built-in parser functions.
static PARSER_FUNCTIONS: phf::Map<&'static str, ParserFn> = phf::phf_map! {
    "#expr" => cond::expr,
    "#if" => cond::r#if,
    "#ifeq" => cond::if_eq,
    "#iferror" => cond::if_error,
    "#ifexpr" => cond::if_expr,
    "#switch" => cond::switch,

    "anchorencode" => string::anchor_encode,
    "formatnum" => string::format_number,
    "lc" => string::lc,
    "lcfirst" => string::lc_first,
    "padleft" => string::pad_left,
    "uc" => string::uc,
    "ucfirst" => string::uc_first,
    "urlencode" => string::url_encode,

    "ns" => page::ns,
    "safesubst" => subst::safe_subst,
    "subst" => subst::subst,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_cmp() {
        assert!(cond::fuzzy_cmp("1.0", "1"));
        assert!(cond::fuzzy_cmp("abc", "abc"));
        assert!(!cond::fuzzy_cmp("01a", "1a"));
    }

    #[test]
    fn group_digits() {
        assert_eq!(string::group_digits("1234567.891"), "1,234,567.891");
        assert_eq!(string::group_digits("-1000"), "-1,000");
        assert_eq!(string::group_digits("999"), "999");
        assert_eq!(string::group_digits("1e10"), "1e10");
        assert_eq!(string::group_digits("abc"), "abc");
    }

    #[test]
    fn registry() {
        assert!(builtin("#if").is_some());
        assert!(builtin("#invoke").is_none());
        assert_eq!(magic_literal("!"), Some("|"));
        assert_eq!(magic_literal("?"), None);
    }

    #[test]
    fn call_span() {
        let source = "#if: x |a|b";
        let parts = scanner::split_by_pipe(source);
        let call = FunctionCall::new("#if", " x ".into(), &parts, source, false);
        assert_eq!(call.arguments, vec![" x ", "a", "b"]);
        assert_eq!(&source[call.span.clone()], " x |a|b");
        assert_eq!(call.len(), 3);
    }
}
