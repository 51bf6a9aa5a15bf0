//! Types and functions for parsing page names and resolving namespaces.

use std::borrow::Cow;

/// A page namespace.
#[derive(Debug, Eq)]
pub struct Namespace {
    /// The namespace ID.
    pub id: i32,
    /// The display name of the namespace.
    pub name: &'static str,
    /// The canonical name of the namespace, if it differs from the display
    /// name.
    pub canonical: Option<&'static str>,
    /// Named aliases for the namespace.
    pub aliases: &'static [&'static str],
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Namespace {
    /// The special namespace ID used for direct links to media files.
    pub const MEDIA: i32 = -2;
    /// The special namespace ID used for dynamic pages.
    pub const SPECIAL: i32 = -1;
    /// The main namespace ID.
    pub const MAIN: i32 = 0;
    /// The talk namespace ID.
    pub const TALK: i32 = 1;
    /// The user namespace ID.
    pub const USER: i32 = 2;
    /// The project namespace ID.
    pub const PROJECT: i32 = 4;
    /// The file namespace ID.
    pub const FILE: i32 = 6;
    /// The system namespace ID.
    pub const MEDIAWIKI: i32 = 8;
    /// The template namespace ID.
    pub const TEMPLATE: i32 = 10;
    /// The help namespace ID.
    pub const HELP: i32 = 12;
    /// The category namespace ID.
    pub const CATEGORY: i32 = 14;

    /// Returns a list of all known namespaces.
    pub fn all() -> &'static [Self] {
        NAMESPACES
    }

    /// Finds the namespace with the given numeric ID.
    pub fn find_by_id(id: i32) -> Option<&'static Self> {
        NAMESPACES.iter().find(|ns| ns.id == id)
    }

    /// Finds the namespace with the given case-insensitive name. Searches the
    /// name, the canonical name, and all aliases.
    pub fn find_by_name(name: &str) -> Option<&'static Self> {
        let name = normalize(name);
        let name = unicase::UniCase::new(&*name);
        NAMESPACES.iter().find(|ns| {
            unicase::UniCase::new(ns.name) == name
                || ns
                    .canonical
                    .is_some_and(|canonical| unicase::UniCase::new(canonical) == name)
                || ns
                    .aliases
                    .iter()
                    .any(|alias| unicase::UniCase::new(*alias) == name)
        })
    }

    /// Returns true if this is a talk namespace.
    #[inline]
    pub const fn is_talk(&self) -> bool {
        self.id > Namespace::MAIN && self.id % 2 == 1
    }

    /// Returns the talk namespace for this namespace.
    pub fn talk(&self) -> Option<&'static Namespace> {
        if self.is_talk() || self.id < Namespace::MAIN {
            Namespace::find_by_id(self.id)
        } else {
            Namespace::find_by_id(self.id + 1)
        }
    }

    /// Returns the main namespace.
    pub fn main() -> &'static Self {
        &NAMESPACES[2]
    }

    /// Returns the template namespace.
    pub fn template() -> &'static Self {
        &NAMESPACES[12]
    }
}

/// All known namespaces.
#[rustfmt::skip]
static NAMESPACES: &[Namespace] = &[
    Namespace { id: Namespace::MEDIA, name: "Media", canonical: None, aliases: &[] },
    Namespace { id: Namespace::SPECIAL, name: "Special", canonical: None, aliases: &[] },
    Namespace { id: Namespace::MAIN, name: "", canonical: None, aliases: &[] },
    Namespace { id: Namespace::TALK, name: "Talk", canonical: None, aliases: &[] },
    Namespace { id: Namespace::USER, name: "User", canonical: None, aliases: &[] },
    Namespace { id: 3, name: "User talk", canonical: None, aliases: &[] },
    Namespace { id: Namespace::PROJECT, name: "Wikipedia", canonical: Some("Project"), aliases: &["WP"] },
    Namespace { id: 5, name: "Wikipedia talk", canonical: Some("Project talk"), aliases: &["WT"] },
    Namespace { id: Namespace::FILE, name: "File", canonical: None, aliases: &["Image"] },
    Namespace { id: 7, name: "File talk", canonical: None, aliases: &["Image talk"] },
    Namespace { id: Namespace::MEDIAWIKI, name: "MediaWiki", canonical: None, aliases: &[] },
    Namespace { id: 9, name: "MediaWiki talk", canonical: None, aliases: &[] },
    Namespace { id: Namespace::TEMPLATE, name: "Template", canonical: None, aliases: &[] },
    Namespace { id: 11, name: "Template talk", canonical: None, aliases: &[] },
    Namespace { id: Namespace::HELP, name: "Help", canonical: None, aliases: &[] },
    Namespace { id: 13, name: "Help talk", canonical: None, aliases: &[] },
    Namespace { id: Namespace::CATEGORY, name: "Category", canonical: None, aliases: &[] },
    Namespace { id: 15, name: "Category talk", canonical: None, aliases: &[] },
];

/// A built-in variable which resolves to page data instead of page content.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MagicWord {
    /// `{{PAGENAME}}`
    PageName,
    /// `{{PAGENAMEE}}`
    PageNameE,
    /// `{{FULLPAGENAME}}`
    FullPageName,
    /// `{{BASEPAGENAME}}`
    BasePageName,
    /// `{{SUBPAGENAME}}`
    SubPageName,
    /// `{{NAMESPACE}}`
    Namespace,
    /// `{{TALKPAGENAME}}`
    TalkPageName,
}

/// Known magic words, by their exact (case-sensitive) names.
static MAGIC_WORDS: phf::Map<&'static str, MagicWord> = phf::phf_map! {
    "PAGENAME" => MagicWord::PageName,
    "PAGENAMEE" => MagicWord::PageNameE,
    "FULLPAGENAME" => MagicWord::FullPageName,
    "BASEPAGENAME" => MagicWord::BasePageName,
    "SUBPAGENAME" => MagicWord::SubPageName,
    "NAMESPACE" => MagicWord::Namespace,
    "TALKPAGENAME" => MagicWord::TalkPageName,
};

impl MagicWord {
    /// Evaluates the magic word for the page with the given full name.
    pub fn evaluate(self, page: &str) -> String {
        let (namespace, text) = split_namespace(page);
        match self {
            MagicWord::PageName => text.to_string(),
            MagicWord::PageNameE => crate::common::url_encode_title(text),
            MagicWord::FullPageName => page.to_string(),
            MagicWord::BasePageName => text.rsplit_once('/').map_or(text, |(base, _)| base).to_string(),
            MagicWord::SubPageName => text.rsplit_once('/').map_or(text, |(_, sub)| sub).to_string(),
            MagicWord::Namespace => namespace.name.to_string(),
            MagicWord::TalkPageName => match namespace.talk() {
                Some(talk) => format!("{}:{text}", talk.name),
                None => page.to_string(),
            },
        }
    }
}

/// A page name resolved against the namespace table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedPageName {
    /// The namespace of the page.
    pub namespace: &'static Namespace,
    /// The page name, without its namespace.
    pub pagename: String,
    /// Whether the page name is usable as a page title.
    pub valid: bool,
    /// The magic word the name refers to, if any.
    pub magic_word: Option<MagicWord>,
}

impl ParsedPageName {
    /// Resolves a fully expanded page name. Names with no namespace prefix are
    /// placed in `default_ns`. A leading `:` forces the main namespace.
    pub fn parse(name: &str, default_ns: &'static Namespace) -> Self {
        let name = normalize(name);

        if let Some(&magic_word) = MAGIC_WORDS.get(&*name) {
            return Self {
                namespace: default_ns,
                pagename: name.into_owned(),
                valid: true,
                magic_word: Some(magic_word),
            };
        }

        let (namespace, pagename) = if let Some(rest) = name.strip_prefix(':') {
            split_namespace(rest.trim_start())
        } else {
            match name.split_once(':') {
                Some((prefix, rest)) => match Namespace::find_by_name(prefix) {
                    Some(namespace) => (namespace, rest.trim_start()),
                    None => (default_ns, &*name),
                },
                None => (default_ns, &*name),
            }
        };

        let pagename = pagename
            .split_once('#')
            .map_or(pagename, |(pagename, _)| pagename.trim_end());
        let pagename = ucfirst(pagename);
        let valid = is_valid_pagename(&pagename);
        Self {
            namespace,
            pagename,
            valid,
            magic_word: None,
        }
    }

    /// The page name, prefixed by its namespace.
    pub fn full_pagename(&self) -> String {
        if self.namespace.name.is_empty() {
            self.pagename.clone()
        } else {
            format!("{}:{}", self.namespace.name, self.pagename)
        }
    }
}

impl core::fmt::Display for ParsedPageName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if !self.namespace.name.is_empty() {
            write!(f, "{}:", self.namespace.name)?;
        }
        f.write_str(&self.pagename)
    }
}

/// Splits a page name into its namespace and the rest of the name. A name
/// with no known namespace prefix is in the main namespace.
pub fn split_namespace(name: &str) -> (&'static Namespace, &str) {
    name.split_once(':')
        .and_then(|(prefix, rest)| {
            Namespace::find_by_name(prefix).map(|namespace| (namespace, rest.trim_start()))
        })
        .unwrap_or((Namespace::main(), name))
}

/// Returns true if the page name contains no characters which are forbidden
/// in page titles.
fn is_valid_pagename(name: &str) -> bool {
    !name.is_empty()
        && !name.contains(['<', '>', '[', ']', '|', '{', '}', '\n'])
        && !name.starts_with(':')
}

/// Uppercases the first letter of a page name.
fn ucfirst(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => name.to_string(),
    }
}

/// Returns true if the given character `c` is a bidirectional text control
/// character.
fn bidi(c: char) -> bool {
    ('\u{200e}'..='\u{200f}').contains(&c) || ('\u{202a}'..='\u{202e}').contains(&c)
}

/// Normalises a page name by stripping bidi marks and converting runs of
/// whitespace and underscores to a single space.
pub fn normalize(text: &str) -> Cow<'_, str> {
    let trimmable = |c: char| bidi(c) || c == '_' || c.is_whitespace();
    let trimmed = text.trim_matches(trimmable);
    if !trimmed.contains(|c: char| bidi(c) || c == '_' || (c.is_whitespace() && c != ' '))
        && !trimmed.contains("  ")
    {
        return Cow::Borrowed(trimmed);
    }

    let mut out = String::with_capacity(trimmed.len());
    let mut in_space = false;
    for c in trimmed.chars() {
        if bidi(c) {
            continue;
        } else if trimmable(c) {
            in_space = true;
        } else {
            if in_space {
                out.push(' ');
                in_space = false;
            }
            out.push(c);
        }
    }
    Cow::Owned(out)
}
