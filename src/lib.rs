//! A template-expanding Wikitext renderer.
//!
//! Page content comes from a [`ContentProvider`]. An [`Engine`] bundles the
//! provider with a [`Configuration`], an optional shared [`TemplateCache`],
//! and any user parser functions; each render then runs on its own
//! [`Model`]:
//!
//! ```
//! use wiki_expand::{Configuration, Engine, MapContentProvider, Model};
//!
//! let mut provider = MapContentProvider::default();
//! provider.insert("Template:Hello", "Hello, {{{1|world}}}!");
//! let engine = Engine::new(Configuration::default(), provider);
//!
//! let mut model = Model::new(&engine, "Example");
//! assert_eq!(model.parse_templates("{{hello|you}}"), "Hello, you!");
//! ```

pub mod common;
pub mod config;
pub mod converter;
pub mod expr;
mod lru_limiter;
pub mod provider;
pub mod renderer;
pub mod title;

pub use config::{Configuration, TemplateCache};
pub use converter::{Converter, EventListener, HtmlConverter, walk};
pub use provider::{ContentProvider, FileContentProvider, MapContentProvider};
pub use renderer::{Engine, Error, Model, Node, ParserFunction, Result, TagNode};
