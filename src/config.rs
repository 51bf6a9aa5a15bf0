//! Renderer configuration.
//!
//! A [`Configuration`] holds the limits which keep expansion of hostile or
//! cyclic markup bounded, plus the site data (interwiki prefixes, URI schemes)
//! that the tag parser needs to resolve links. It is immutable during a render
//! and can be shared between threads.

use crate::lru_limiter::{ByteSize, EntrySize};
use indexmap::IndexMap;
use parking_lot::RwLock;
use schnellru::LruMap;
use std::{collections::HashMap, path::Path, sync::Arc};
use unicase::UniCase;

/// A configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration file could not be read.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file was not valid.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Renderer limits and site data.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// The maximum nesting depth of template expansion.
    pub template_recursion_limit: u32,
    /// The maximum nesting depth of parameter substitution.
    pub parser_recursion_limit: u32,
    /// Parameter values longer than this many bytes are not interpolated.
    pub template_value_limit: usize,
    /// Parameter substitution stops once its output exceeds this many bytes.
    pub template_buffer_limit: usize,
    /// Template calls whose cache key would be this long or longer are not
    /// cached.
    pub max_cache_key_length: usize,
    /// The maximum size of the template call cache, in bytes.
    pub cache_size: usize,
    /// Characters used to suffix the back-link anchors of reused references.
    pub reference_suffixes: String,
    /// The back-link anchor suffix used once `reference_suffixes` runs out.
    pub reference_suffix_fallback: String,
    /// The table of contents is shown once there are more headers than this.
    pub toc_threshold: usize,
    /// Interwiki link prefixes.
    pub interwiki: InterWikiMap,
    /// URI schemes recognised in external links.
    pub uri_schemes: Vec<String>,
    /// Whether `[[a::b]]` relation and `[[a:=b]]` attribute links are parsed.
    pub semantic_web: bool,
    /// The user name to use for `~~~` signatures. If unset, signatures are
    /// left as-is.
    pub signature: Option<String>,
    /// The URL pattern for internal links. `${title}` is replaced by the
    /// encoded page name.
    pub link_base_url: String,
    /// The URL pattern for image files. `${image}` is replaced by the encoded
    /// file name.
    pub image_base_url: String,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            template_recursion_limit: 40,
            parser_recursion_limit: 100,
            template_value_limit: 1 << 20,
            template_buffer_limit: 2 << 20,
            max_cache_key_length: 1024,
            cache_size: 64 << 20,
            reference_suffixes: "abcdefghijklmnopqrstuvwxyz".into(),
            reference_suffix_fallback: "Z".into(),
            toc_threshold: 3,
            interwiki: InterWikiMap::default(),
            uri_schemes: [
                "http://", "https://", "ftp://", "mailto:", "news:", "irc://", "//",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            semantic_web: false,
            signature: None,
            link_base_url: "/wiki/${title}".into(),
            image_base_url: "/images/${image}".into(),
        }
    }
}

impl Configuration {
    /// Loads a configuration from a JSON string. Missing keys take their
    /// default values.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Returns the reference back-link suffix for the `count`th reuse of a
    /// named reference, where the second use is `count == 1`.
    pub fn reference_suffix(&self, count: usize) -> &str {
        self.reference_suffixes
            .char_indices()
            .nth(count.saturating_sub(1))
            .map_or(&*self.reference_suffix_fallback, |(index, c)| {
                &self.reference_suffixes[index..index + c.len_utf8()]
            })
    }

    /// Builds the URL of the page `title`.
    pub fn link_url(&self, title: &str) -> String {
        self.link_base_url
            .replace("${title}", &crate::common::url_encode_title(title))
    }

    /// Builds the URL of the image file `name`.
    pub fn image_url(&self, name: &str) -> String {
        self.image_base_url
            .replace("${image}", &crate::common::url_encode_title(name))
    }

    /// Returns the URI scheme which `text` starts with, if any.
    pub fn uri_scheme(&self, text: &str) -> Option<&str> {
        self.uri_schemes
            .iter()
            .find(|scheme| {
                text.get(..scheme.len())
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
            })
            .map(String::as_str)
    }
}

/// A case-insensitive map of interwiki prefixes to URL patterns. A `$1` in
/// the pattern is replaced by the encoded page name.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(from = "IndexMap<String, String>")]
pub struct InterWikiMap(HashMap<UniCase<String>, String>);

impl InterWikiMap {
    /// Builds the URL for `title` on the wiki identified by `prefix`.
    pub fn url(&self, prefix: &str, title: &str) -> Option<String> {
        self.0
            .get(&UniCase::new(prefix.trim().to_string()))
            .map(|pattern| pattern.replace("$1", &crate::common::url_encode_title(title)))
    }
}

impl Default for InterWikiMap {
    fn default() -> Self {
        [
            ("commons", "https://commons.wikimedia.org/wiki/$1"),
            ("meta", "https://meta.wikimedia.org/wiki/$1"),
            ("mediawiki", "https://www.mediawiki.org/wiki/$1"),
            ("wikipedia", "https://en.wikipedia.org/wiki/$1"),
            ("wiktionary", "https://en.wiktionary.org/wiki/$1"),
            ("wikiquote", "https://en.wikiquote.org/wiki/$1"),
        ]
        .into_iter()
        .map(|(prefix, pattern)| (prefix.to_string(), pattern.to_string()))
        .collect::<IndexMap<_, _>>()
        .into()
    }
}

impl From<IndexMap<String, String>> for InterWikiMap {
    fn from(value: IndexMap<String, String>) -> Self {
        Self(
            value
                .into_iter()
                .map(|(prefix, pattern)| (UniCase::new(prefix), pattern))
                .collect(),
        )
    }
}

/// The size calculator for [`TemplateCache`] entries.
#[derive(Clone, Copy, Debug)]
pub struct CachedText;

impl EntrySize for CachedText {
    type Key = String;
    type Value = Arc<str>;

    fn size_of(key: &String, value: &Arc<str>) -> usize {
        key.len() + value.len()
    }
}

/// A memoisation cache of rendered template calls, keyed by the template name
/// plus its parameters. One cache may be shared by any number of concurrent
/// renders.
#[derive(Clone)]
pub struct TemplateCache(Arc<RwLock<LruMap<String, Arc<str>, ByteSize<CachedText>>>>);

impl TemplateCache {
    /// Creates a new cache holding at most `max_bytes` of keys and values.
    pub fn new(max_bytes: usize) -> Self {
        Self(Arc::new(RwLock::new(LruMap::new(ByteSize::new(max_bytes)))))
    }

    /// Gets a cached expansion.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        self.0.read().peek(key).cloned()
    }

    /// Stores an expansion.
    pub fn insert(&self, key: String, value: Arc<str>) {
        self.0.write().insert(key, value);
    }

    /// The number of cached expansions.
    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of bytes held by cached keys and values.
    pub fn heap_usage(&self) -> usize {
        self.0.read().limiter().heap_usage()
    }
}

impl core::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("len", &self.len())
            .field("heap_usage", &self.heap_usage())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_json() {
        let config = Configuration::from_json(
            r#"{
                "template_recursion_limit": 5,
                "interwiki": { "Foo": "https://foo.example/$1" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.template_recursion_limit, 5);
        assert_eq!(config.parser_recursion_limit, 100, "missing keys should default");
        assert_eq!(
            config.interwiki.url("FOO", "Main page"),
            Some("https://foo.example/Main_page".into()),
            "interwiki prefixes should be case-insensitive"
        );
        assert_eq!(
            config.interwiki.url("wikipedia", "Main page"),
            None,
            "given map replaces defaults"
        );
    }

    #[test]
    fn reference_suffix() {
        let mut config = Configuration::default();
        assert_eq!(config.reference_suffix(1), "a");
        assert_eq!(config.reference_suffix(26), "z");
        assert_eq!(config.reference_suffix(27), "Z");
        config.reference_suffixes = "xy".into();
        config.reference_suffix_fallback = "END".into();
        assert_eq!(config.reference_suffix(3), "END");
    }

    #[test]
    fn urls() {
        let config = Configuration::default();
        assert_eq!(config.link_url("Main page"), "/wiki/Main_page");
        assert_eq!(config.link_url("A&B?"), "/wiki/A%26B%3F");
        assert_eq!(config.image_url("Foo bar.png"), "/images/Foo_bar.png");
    }

    #[test]
    fn uri_scheme() {
        let config = Configuration::default();
        assert_eq!(config.uri_scheme("HTTPS://example.com"), Some("https://"));
        assert_eq!(config.uri_scheme("//example.com"), Some("//"));
        assert_eq!(config.uri_scheme("example.com"), None);
    }

    #[test]
    fn template_cache() {
        let cache = TemplateCache::new(1024);
        assert!(cache.is_empty());
        cache.insert("Template:A|1=x|".into(), Arc::from("X"));
        assert_eq!(cache.get("Template:A|1=x|").as_deref(), Some("X"));
        assert_eq!(cache.get("Template:A|"), None);
        assert_eq!(cache.heap_usage(), "Template:A|1=x|".len() + 1);
    }
}
