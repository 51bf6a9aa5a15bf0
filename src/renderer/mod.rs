//! Article rendering types and functions.
//!
//! Rendering a Wikitext document happens in two passes which run as-if in
//! this order:
//!
//! 1. Expand templates. The source text is preprocessed (comments removed,
//!    verbatim spans skipped, inclusion control tags applied, `subst:` calls
//!    substituted) and then every template call, parameter reference, parser
//!    function, and signature is expanded, recursively, until only plain
//!    Wikitext remains. The result of a template expansion is as-if the fully
//!    expanded text of the template already existed in the root document
//!    before parsing ever began.
//!
//!    If the expression is a template parameter, interpolate:
//!
//!    1. The expansion of the matching argument from the caller; otherwise
//!    2. The expansion of the default value from the parameter; otherwise
//!    3. The template parameter expression itself, as plain text.
//!
//!    If the expression is a template, interpolate:
//!
//!    1. If it has parser function syntax and names a registered function,
//!       the result of calling the function; otherwise
//!    2. If it names an argument-less magic word, the value of the word;
//!       otherwise
//!    3. If it names a valid and existing page, the result of expanding that
//!       page with the bound arguments; otherwise
//!    4. If it names a valid but missing page, the Wikitext `[[:Template:X]]`;
//!       otherwise
//!    5. The template expression itself, as plain text.
//!
//! 2. Build the document tree. The fully expanded Wikitext is converted into
//!    [`Node`]s through a [`TagStack`] which recovers from malformed nesting,
//!    while headers, references, links, categories, and images are collected
//!    into the side lists of the [`Model`].
//!
//! The finished tree can then be handed to a
//! [`Converter`](crate::converter::Converter) or streamed to an
//! [`EventListener`](crate::converter::EventListener).

use crate::{
    common::format_signature_time,
    config::{Configuration, TemplateCache},
    converter::{Converter as _, HtmlConverter},
    provider::ContentProvider,
    title::{Namespace, ParsedPageName},
};
use core::fmt;
use indexmap::{IndexMap, IndexSet};
pub use globals::{
    Citation, Reference, References, SectionHeader, TableOfContents, TocEntry, TocSwitches,
};
pub use image::ImageFormat;
pub use parser_fns::{FunctionCall, ParserFunction};
pub use stack::ParameterMap;
use std::collections::HashMap;
pub use tags::{Node, ObjectAttribute, TagNode, TagStack};

mod document;
mod globals;
mod image;
mod links;
mod parser_fns;
mod preprocess;
mod scanner;
mod stack;
mod tags;
mod template;
#[cfg(test)]
mod tests;

/// An article rendering error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A content provider could not deliver a page which may exist.
    #[error("content unavailable: {0}")]
    Content(String),

    /// An arithmetic expression evaluation error.
    #[error("eval error: {0}")]
    Expr(#[from] crate::expr::Error),

    /// A write to a buffer failed.
    #[error("fmt error: {0}")]
    Fmt(#[from] fmt::Error),

    /// A file content provider failed to read a page.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A signature timestamp could not be formatted.
    #[error("time error: {0}")]
    Time(#[from] time::error::Format),

    /// A user parser function failed.
    #[error(transparent)]
    Function(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// The stable name of the kind of error, as shown in inline diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Content(_) => "ContentUnavailable",
            Error::Expr(_) => "ExpressionError",
            Error::Fmt(_) => "FormatError",
            Error::Io(_) => "IoError",
            Error::Time(_) => "TimeError",
            Error::Function(_) => "FunctionError",
        }
    }
}

/// The standard result type used by all fallible renderer functions.
pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// Everything which stays the same across renders: configuration, page
/// content, the template call cache, and registered parser functions.
///
/// An engine is immutable once configured, so many renders may share one.
pub struct Engine {
    /// Renderer limits and site data.
    config: Configuration,
    /// The source of page content.
    provider: Box<dyn ContentProvider>,
    /// The template call cache, if caching is enabled.
    cache: Option<TemplateCache>,
    /// User parser functions, by lowercase name.
    functions: HashMap<String, Box<dyn ParserFunction>>,
}

impl Engine {
    /// Creates a new engine with no template call cache.
    pub fn new(config: Configuration, provider: impl ContentProvider + 'static) -> Self {
        Self {
            config,
            provider: Box::new(provider),
            cache: None,
            functions: HashMap::new(),
        }
    }

    /// Enables memoisation of template calls in `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: TemplateCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Registers a parser function. A function registered with the name of a
    /// built-in function replaces the built-in.
    pub fn register_function(&mut self, name: &str, function: impl ParserFunction + 'static) {
        self.functions.insert(name.to_lowercase(), Box::new(function));
    }

    /// Finds the parser function with the given case-insensitive name.
    pub fn function(&self, name: &str) -> Option<&(dyn ParserFunction + 'static)> {
        let name = name.to_lowercase();
        self.functions
            .get(&name)
            .map(|function| &**function)
            .or_else(|| parser_fns::builtin(&name))
    }

    /// The template call cache.
    pub fn cache(&self) -> Option<&TemplateCache> {
        self.cache.as_ref()
    }

    /// The renderer configuration.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The content provider.
    pub fn provider(&self) -> &dyn ContentProvider {
        &*self.provider
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("cache", &self.cache.as_ref().map(TemplateCache::len))
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Recursion counters.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Depth {
    /// Nesting of parameter substitution and markup fragment parsing.
    pub parser: u32,
    /// Nesting of template expansion.
    pub template: u32,
}

/// The state of a single render.
///
/// Every counter, stack, and side list lives here rather than in any global,
/// so renders on different models never interfere.
#[derive(Debug)]
pub struct Model<'e> {
    /// The engine.
    engine: &'e Engine,
    /// The full name of the page being rendered.
    title: String,
    /// Recursion counters.
    pub(crate) depth: Depth,
    /// Template arguments are being expanded.
    pub(crate) parameter_mode: bool,
    /// The number of in-progress expansions of each template, by full name.
    pub(crate) in_flight: HashMap<String, usize>,
    /// The full names of the templates being expanded, outermost first.
    pub(crate) template_stack: Vec<String>,
    /// The document tree under construction.
    pub(crate) stack: TagStack,
    /// Collected `<ref>` footnotes.
    pub(crate) references: References,
    /// Collected section headers.
    pub(crate) toc: TableOfContents,
    /// Table of contents behaviour switches.
    pub(crate) switches: TocSwitches,
    /// Category names and their sort keys.
    pub(crate) categories: IndexMap<String, String>,
    /// Internal link targets.
    pub(crate) links: IndexSet<String>,
    /// Transcluded templates, without their namespace.
    pub(crate) templates: IndexSet<String>,
    /// Transcluded pages outside of the template namespace.
    pub(crate) includes: IndexSet<String>,
    /// Interwiki link targets.
    pub(crate) interwiki_links: IndexSet<String>,
    /// Embedded image file names.
    pub(crate) images: IndexSet<String>,
    /// Semantic `[[relation::value]]` links.
    pub(crate) relations: Vec<(String, String)>,
    /// Semantic `[[attribute:=value]]` links.
    pub(crate) attributes: Vec<(String, String)>,
    /// The target of the page, if it is a redirect.
    redirect: Option<String>,
    /// The last ordinal used by an unlabelled external link.
    pub(crate) external_link_count: usize,
}

impl<'e> Model<'e> {
    /// Creates a new model for rendering the page `title`.
    pub fn new(engine: &'e Engine, title: impl Into<String>) -> Self {
        Self {
            engine,
            title: title.into(),
            depth: Depth::default(),
            parameter_mode: false,
            in_flight: HashMap::new(),
            template_stack: Vec::new(),
            stack: TagStack::default(),
            references: References::default(),
            toc: TableOfContents::default(),
            switches: TocSwitches::empty(),
            categories: IndexMap::new(),
            links: IndexSet::new(),
            templates: IndexSet::new(),
            includes: IndexSet::new(),
            interwiki_links: IndexSet::new(),
            images: IndexSet::new(),
            relations: Vec::new(),
            attributes: Vec::new(),
            redirect: None,
            external_link_count: 0,
        }
    }

    /// The engine.
    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// The renderer configuration.
    pub fn config(&self) -> &'e Configuration {
        self.engine.config()
    }

    /// The full name of the page being rendered.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Resets all per-render state.
    pub fn set_up(&mut self) {
        *self = Self::new(self.engine, core::mem::take(&mut self.title));
    }

    /// Fully expands all templates in `text`, returning plain Wikitext.
    pub fn parse_templates(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        if let Err(err) = preprocess::parse_recursive(&mut out, self, text, true, None) {
            log::warn!("could not expand '{}': {err}", self.title);
            out = error_text(&err);
        }
        out
    }

    /// Renders `text` into a document tree.
    ///
    /// A redirect page renders only as a notice pointing to its target, which
    /// is also available from [`Model::redirect`] afterwards.
    pub fn render(&mut self, text: &str) -> Vec<Node> {
        self.set_up();

        if let Some(target) = preprocess::parse_redirect(text) {
            let page = ParsedPageName::parse(target, Namespace::main());
            let title = page.full_pagename();
            log::debug!("'{}' redirects to {title}", self.title);
            let link = TagNode::new("a")
                .with_attribute("href", self.config().link_url(&title))
                .with_attribute("title", &*title)
                .with_text(&title);
            let mut notice = TagNode::new("div")
                .with_attribute("class", "redirectMsg")
                .with_text("#REDIRECT ");
            notice.append(Node::Tag(link));
            self.stack.append(Node::Tag(notice));
            self.redirect = Some(title);
            return self.stack.take();
        }

        let text = self.parse_templates(text);
        document::parse(self, &text);
        self.stack.take()
    }

    /// Renders `text` to HTML with the bundled [`HtmlConverter`].
    pub fn render_html(&mut self, text: &str) -> String {
        let nodes = self.render(text);
        let mut out = String::new();
        if let Err(err) = HtmlConverter.convert(&nodes, self, &mut out) {
            log::warn!("could not convert '{}': {err}", self.title);
            out = error_text(&err);
        }
        out
    }

    /// Transcludes the template `name` with the bound arguments `params` and
    /// appends the expansion to `out`.
    pub fn substitute_template_call(
        &mut self,
        out: &mut String,
        name: &str,
        params: &ParameterMap,
    ) -> Result {
        template::substitute_template_call(out, self, name, params)
    }

    /// Fetches the raw Wikitext of `page`, or the value of the magic word it
    /// names. Returns `None` if the page does not exist.
    pub fn raw_content(&self, page: &ParsedPageName, params: &ParameterMap) -> Result<Option<String>> {
        if let Some(magic_word) = page.magic_word {
            return Ok(Some(magic_word.evaluate(&self.title)));
        }
        self.engine.provider.fetch(page, params)
    }

    /// Appends a `~~~` (3), `~~~~` (4), or `~~~~~` (5) signature to `out`.
    pub(crate) fn append_signature(&self, out: &mut String, count: usize) -> Result {
        use fmt::Write as _;

        let Some(user) = &self.config().signature else {
            for _ in 0..count {
                out.push('~');
            }
            return Ok(());
        };

        let now = time::OffsetDateTime::now_utc();
        match count {
            3 => write!(out, "[[User:{user}|{user}]]")?,
            4 => write!(out, "[[User:{user}|{user}]] {}", format_signature_time(now)?)?,
            _ => *out += &format_signature_time(now)?,
        }
        Ok(())
    }

    /// Records a transcluded template.
    pub(crate) fn add_template(&mut self, name: &str) {
        self.templates.insert(name.to_string());
    }

    /// Records a transcluded page outside of the template namespace.
    pub(crate) fn add_include(&mut self, name: &str) {
        self.includes.insert(name.to_string());
    }

    /// Logs the current template stack.
    pub(crate) fn debug_backtrace(&self) {
        log::error!("template recursion limit exceeded in '{}'; backtrace:", self.title);
        for (index, title) in self.template_stack.iter().rev().enumerate() {
            log::error!("{index:>2}. {title}");
        }
    }

    /// The target of the page, if the last render was of a redirect.
    pub fn redirect(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    /// Category names and their sort keys, in order of first appearance.
    pub fn categories(&self) -> &IndexMap<String, String> {
        &self.categories
    }

    /// Internal link targets, in order of first appearance.
    pub fn links(&self) -> &IndexSet<String> {
        &self.links
    }

    /// Transcluded templates, without their namespace.
    pub fn templates(&self) -> &IndexSet<String> {
        &self.templates
    }

    /// Transcluded pages outside of the template namespace.
    pub fn includes(&self) -> &IndexSet<String> {
        &self.includes
    }

    /// Interwiki link targets.
    pub fn interwiki_links(&self) -> &IndexSet<String> {
        &self.interwiki_links
    }

    /// Embedded image file names.
    pub fn images(&self) -> &IndexSet<String> {
        &self.images
    }

    /// Semantic relations, as `(relation, value)`.
    pub fn relations(&self) -> &[(String, String)] {
        &self.relations
    }

    /// Semantic attributes, as `(attribute, value)`.
    pub fn semantic_attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// The collected references.
    pub fn references(&self) -> &References {
        &self.references
    }

    /// The collected section headers.
    pub fn toc(&self) -> &TableOfContents {
        &self.toc
    }

    /// The table of contents switches seen so far.
    pub fn switches(&self) -> TocSwitches {
        self.switches
    }

    /// Returns true if the table of contents should be shown.
    pub fn show_toc(&self) -> bool {
        self.toc.show(self.switches, self.config().toc_threshold)
    }
}

/// Formats an error which escaped to the top level as inline text.
fn error_text(err: &Error) -> String {
    format!(
        r#"<span class="error">{}: {}</span>"#,
        err.kind(),
        html_escape::encode_text(&err.to_string())
    )
}
