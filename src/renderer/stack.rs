//! Template argument binding.

use super::{Model, Result, preprocess, scanner};
use crate::common::trim_newline_right;
use indexmap::IndexMap;

/// The arguments bound to a template call, by name. Positional arguments use
/// the keys `"1"`, `"2"`, and so on.
pub type ParameterMap = IndexMap<String, String>;

/// Expands one raw template argument and binds it as either a named or a
/// positional argument.
///
/// Named values are trimmed, except for a trailing line break. Positional
/// values are kept exactly, since their whitespace is significant.
pub(crate) fn create_single_parameter(
    model: &mut Model<'_>,
    segment: &str,
    named: &mut ParameterMap,
    unnamed: &mut Vec<String>,
) -> Result {
    let (name, value) = scanner::split_parameter(segment);

    let was_parameter_mode = core::mem::replace(&mut model.parameter_mode, true);
    let result = (|| -> Result<(Option<String>, String)> {
        let name = match name {
            Some(name) => {
                let mut out = String::new();
                preprocess::parse_recursive(&mut out, model, name.trim(), false, None)?;
                Some(out.trim().to_string())
            }
            None => None,
        };
        let mut out = String::new();
        preprocess::parse_recursive(&mut out, model, value, false, None)?;
        Ok((name, out))
    })();
    model.parameter_mode = was_parameter_mode;

    match result? {
        (Some(name), value) => {
            named.insert(name, trim_newline_right(&value).to_string());
        }
        (None, value) => unnamed.push(value),
    }
    Ok(())
}

/// Merges positional arguments into the named argument map. An explicitly
/// named argument always wins over a positional one with the same key.
pub(crate) fn merge_parameters(named: &mut ParameterMap, unnamed: Vec<String>) {
    for (index, value) in unnamed.into_iter().enumerate() {
        named.entry((index + 1).to_string()).or_insert(value);
    }
}

/// Binds raw, unexpanded template arguments. Used by substitution, where the
/// arguments are spliced into the template source before anything is
/// expanded.
pub(crate) fn raw_parameters<'a>(segments: impl IntoIterator<Item = &'a str>) -> ParameterMap {
    let mut named = ParameterMap::new();
    let mut unnamed = Vec::new();
    for segment in segments {
        match scanner::split_parameter(segment) {
            (Some(name), value) => {
                named.insert(name.trim().to_string(), value.trim().to_string());
            }
            (None, value) => unnamed.push(value.to_string()),
        }
    }
    merge_parameters(&mut named, unnamed);
    named
}

/// Builds the template call cache key for a call, or returns `None` if the
/// key would be `max_len` bytes or longer.
pub(crate) fn cache_key(full_name: &str, params: &ParameterMap, max_len: usize) -> Option<String> {
    let len = full_name.len()
        + 1
        + params
            .iter()
            .map(|(key, value)| key.len() + value.len() + 2)
            .sum::<usize>();
    if len >= max_len {
        return None;
    }

    let mut key = String::with_capacity(len);
    key += full_name;
    key.push('|');
    for (name, value) in params {
        key += name;
        key.push('=');
        key += value;
        key.push('|');
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_arguments_do_not_override_named() {
        let mut named = ParameterMap::from([("2".to_string(), "explicit".to_string())]);
        merge_parameters(&mut named, vec!["a".into(), "b".into(), "c".into()]);
        assert_eq!(named.get("1").map(String::as_str), Some("a"));
        assert_eq!(named.get("2").map(String::as_str), Some("explicit"));
        assert_eq!(named.get("3").map(String::as_str), Some("c"));
    }

    #[test]
    fn test_raw_parameters() {
        let params = raw_parameters([" x ", " k = v ", "[[a=b]]", "{{t|y=z}}"]);
        assert_eq!(
            params.into_iter().collect::<Vec<_>>(),
            vec![
                ("k".to_string(), "v".to_string()),
                ("1".to_string(), " x ".to_string()),
                ("2".to_string(), "[[a=b]]".to_string()),
                ("3".to_string(), "{{t|y=z}}".to_string()),
            ]
        );
    }

    #[test]
    fn test_cache_key() {
        let params = ParameterMap::from([
            ("1".to_string(), "a".to_string()),
            ("x".to_string(), "y".to_string()),
        ]);
        let key = cache_key("Template:T", &params, 1024);
        assert_eq!(key.as_deref(), Some("Template:T|1=a|x=y|"));
        assert_eq!(key.unwrap().len(), "Template:T|1=a|x=y|".len());
        assert_eq!(cache_key("Template:T", &params, 19), None, "key at the limit");
        assert!(cache_key("Template:T", &params, 20).is_some());
    }
}
