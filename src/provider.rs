//! Sources of raw page content.

use crate::{
    renderer::{Error, ParameterMap, Result},
    title::{Namespace, ParsedPageName},
};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::atomic::{AtomicUsize, Ordering},
};

/// A source of raw page Wikitext.
pub trait ContentProvider: Send + Sync {
    /// Fetches the raw Wikitext of `page`, transcluded with the arguments
    /// `params`.
    ///
    /// Returns `Ok(None)` if the page does not exist, and
    /// [`Error::Content`] or [`Error::Io`] if it may exist but could not be
    /// read.
    fn fetch(&self, page: &ParsedPageName, params: &ParameterMap) -> Result<Option<String>>;
}

impl<T: ContentProvider + ?Sized> ContentProvider for std::sync::Arc<T> {
    fn fetch(&self, page: &ParsedPageName, params: &ParameterMap) -> Result<Option<String>> {
        (**self).fetch(page, params)
    }
}

/// An in-memory content provider.
#[derive(Debug, Default)]
pub struct MapContentProvider {
    /// Page content, by full page name.
    pages: HashMap<String, String>,
    /// The number of fetches made so far.
    fetch_count: AtomicUsize,
}

impl MapContentProvider {
    /// Adds a page. The name is normalised the same way as a link target, so
    /// `"template:foo bar"` and `"Template:Foo_bar"` are the same page.
    pub fn insert(&mut self, name: &str, content: impl Into<String>) {
        let page = ParsedPageName::parse(name, Namespace::main());
        self.pages.insert(page.full_pagename(), content.into());
    }

    /// The number of fetches made so far.
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::Relaxed)
    }
}

impl ContentProvider for MapContentProvider {
    fn fetch(&self, page: &ParsedPageName, _: &ParameterMap) -> Result<Option<String>> {
        self.fetch_count.fetch_add(1, Ordering::Relaxed);
        Ok(self.pages.get(&page.full_pagename()).cloned())
    }
}

/// A content provider which reads pages from files.
#[derive(Debug)]
pub struct FileContentProvider {
    /// The file path pattern. `${title}` is replaced by the full page name,
    /// with spaces as underscores.
    pattern: String,
}

impl FileContentProvider {
    /// Creates a new provider with the given file path pattern.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// The path of the file holding `page`.
    fn path(&self, page: &ParsedPageName) -> PathBuf {
        let title = page.full_pagename().replace(' ', "_");
        // Subpages stay inside the directory
        let title = title.replace(['/', '\\'], "%2F");
        PathBuf::from(self.pattern.replace("${title}", &title))
    }
}

impl ContentProvider for FileContentProvider {
    fn fetch(&self, page: &ParsedPageName, _: &ParameterMap) -> Result<Option<String>> {
        let path = self.path(page);
        log::trace!("reading {}", path.display());
        match std::fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_provider() {
        let mut provider = MapContentProvider::default();
        provider.insert("template:foo bar", "x");
        let params = ParameterMap::new();
        let page = ParsedPageName::parse("Foo_bar", Namespace::template());
        assert_eq!(provider.fetch(&page, &params).unwrap(), Some("x".into()));
        let page = ParsedPageName::parse("Baz", Namespace::template());
        assert_eq!(provider.fetch(&page, &params).unwrap(), None);
        assert_eq!(provider.fetch_count(), 2);
    }

    #[test]
    fn file_provider() {
        let dir = std::env::temp_dir().join(format!("wiki-expand-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Template:Foo_bar.wiki"), "content").unwrap();

        let provider = FileContentProvider::new(format!("{}/${{title}}.wiki", dir.display()));
        let params = ParameterMap::new();
        let page = ParsedPageName::parse("foo bar", Namespace::template());
        assert_eq!(provider.fetch(&page, &params).unwrap(), Some("content".into()));
        let page = ParsedPageName::parse("Missing", Namespace::template());
        assert_eq!(provider.fetch(&page, &params).unwrap(), None);
        let page = ParsedPageName::parse("../x", Namespace::template());
        assert_eq!(provider.path(&page).parent(), Some(dir.as_path()));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
