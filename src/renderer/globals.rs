//! Collections for semi-structured document data.

use super::tags::Node;
use crate::{common::encode_dot_url, config::Configuration};
use core::ops::Range;
use std::collections::{HashMap, HashSet};

bitflags::bitflags! {
    /// Double-underscore behaviour switches which control the table of
    /// contents.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct TocSwitches: u8 {
        /// `__NOTOC__`
        const NO_TOC = 1 << 0;
        /// `__FORCETOC__`
        const FORCE_TOC = 1 << 1;
        /// `__TOC__`
        const TOC = 1 << 2;
    }
}

/// A document section header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionHeader {
    /// The header level, from 1 to 6.
    pub level: u8,
    /// The span of the header line in the expanded text.
    pub span: Range<usize>,
    /// The plain text of the header.
    pub text: String,
    /// The unique anchor of the header.
    pub anchor: String,
}

/// An entry in a [`TableOfContents`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TocEntry {
    /// A header.
    Section(SectionHeader),
    /// A nested list of deeper headers.
    List(Vec<TocEntry>),
}

/// A document outline.
///
/// Level 1 headers are siblings of each other. A header at a deeper level
/// goes into the list nested after the last entry one level up, which is
/// created if it does not exist yet.
#[derive(Debug, Default)]
pub struct TableOfContents {
    /// The top-level entries.
    entries: Vec<TocEntry>,
    /// Every anchor given out so far.
    anchors: HashSet<String>,
    /// The total number of headers.
    len: usize,
}

impl TableOfContents {
    /// Adds a header and returns its unique anchor.
    pub fn add(&mut self, level: u8, span: Range<usize>, text: &str) -> String {
        let anchor = self.unique_anchor(text);
        let header = SectionHeader {
            level,
            span,
            text: text.to_string(),
            anchor: anchor.clone(),
        };

        let mut list = &mut self.entries;
        for _ in 1..level.max(1) {
            if !matches!(list.last(), Some(TocEntry::List(_))) {
                list.push(TocEntry::List(Vec::new()));
            }
            let Some(TocEntry::List(nested)) = list.last_mut() else {
                unreachable!("list was just pushed");
            };
            list = nested;
        }
        list.push(TocEntry::Section(header));
        self.len += 1;
        anchor
    }

    /// Derives an anchor from header text which is not yet in use, by adding
    /// `_2`, `_3`, and so on to the encoded text.
    fn unique_anchor(&mut self, text: &str) -> String {
        let base = encode_dot_url(text);
        let mut anchor = base.clone();
        let mut suffix = 1;
        while self.anchors.contains(&anchor) {
            suffix += 1;
            anchor = format!("{base}_{suffix}");
        }
        self.anchors.insert(anchor.clone());
        anchor
    }

    /// The top-level entries.
    pub fn entries(&self) -> &[TocEntry] {
        &self.entries
    }

    /// The total number of headers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the table of contents should be rendered.
    pub fn show(&self, switches: TocSwitches, threshold: usize) -> bool {
        if switches.contains(TocSwitches::NO_TOC) {
            false
        } else {
            !self.is_empty()
                && (switches.intersects(TocSwitches::FORCE_TOC | TocSwitches::TOC)
                    || self.len > threshold)
        }
    }
}

/// A footnote collected from a `<ref>` tag.
#[derive(Clone, Debug, Default)]
pub struct Reference {
    /// The raw Wikitext content.
    pub content: String,
    /// The rendered content.
    pub nodes: Vec<Node>,
    /// The name given with `name=`, if any.
    pub name: Option<String>,
    /// How many times the reference has been cited.
    pub count: usize,
}

impl Reference {
    /// The key used to build the anchors of this reference, given its
    /// position in the reference list.
    pub fn key(&self, index: usize) -> String {
        self.name
            .as_deref()
            .map_or_else(|| (index + 1).to_string(), encode_dot_url)
    }
}

/// A citation of a [`Reference`], as placed in the text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Citation {
    /// The position of the reference in the reference list.
    pub index: usize,
    /// The anchor of this citation, which the reference list links back to.
    pub anchor: String,
    /// The anchor of the reference in the reference list.
    pub target: String,
}

/// The ordered list of references.
#[derive(Debug, Default)]
pub struct References {
    /// The references, in order of first citation.
    list: Vec<Reference>,
    /// The positions of named references.
    by_name: HashMap<String, usize>,
}

impl References {
    /// Records a citation of a reference.
    ///
    /// The first citation of a name creates a new entry. Later ones increase
    /// its count and get back-link anchors suffixed from the configured suffix
    /// alphabet.
    pub fn cite(
        &mut self,
        config: &Configuration,
        name: Option<&str>,
        content: &str,
        nodes: Vec<Node>,
    ) -> Citation {
        let name = name.map(str::trim).filter(|name| !name.is_empty());

        let index = match name.and_then(|name| self.by_name.get(name)) {
            Some(&index) => {
                let reference = &mut self.list[index];
                reference.count += 1;
                if reference.content.trim().is_empty() && !content.trim().is_empty() {
                    reference.content = content.to_string();
                    reference.nodes = nodes;
                }
                index
            }
            None => {
                let index = self.list.len();
                if let Some(name) = name {
                    self.by_name.insert(name.to_string(), index);
                }
                self.list.push(Reference {
                    content: content.to_string(),
                    nodes,
                    name: name.map(String::from),
                    count: 1,
                });
                index
            }
        };

        let reference = &self.list[index];
        let key = reference.key(index);
        let anchor = if reference.count == 1 {
            format!("_ref-{key}")
        } else {
            format!("_ref-{key}_{}", config.reference_suffix(reference.count - 1))
        };
        Citation {
            index,
            anchor,
            target: format!("_note-{key}"),
        }
    }

    /// The references, in order of first citation.
    pub fn list(&self) -> &[Reference] {
        &self.list
    }

    /// The number of distinct references.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns true if there are no references.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}
