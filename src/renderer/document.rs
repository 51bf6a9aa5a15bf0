//! The second pass: building a document tree from fully expanded Wikitext.
//!
//! The parser walks the text line by line. The start of each line decides
//! its block structure (headings, lists, tables, preformatted text, rules,
//! or paragraphs), and the rest of the line is inline markup. Every element
//! goes through the tag stack of the model, which keeps the tree well formed
//! no matter how malformed the input is.

use super::{
    Model,
    globals::TocSwitches,
    links::{self, WikiLink},
    scanner::{self, Tag},
    tags::{self, Node, ObjectAttribute, TagNode},
};
use crate::common::decode_html;

/// Builds the document tree for the expanded Wikitext `text` on the tag
/// stack of the model.
pub(crate) fn parse(model: &mut Model<'_>, text: &str) {
    let mut parser = Parser::new(model);
    let mut pos = 0;
    while pos < text.len() {
        pos = parser.parse_line(text, pos);
        // The line parser stops at the line break
        pos += 1;
    }
    parser.end_line();
    parser.close_blocks();
    parser.close_paragraph();
}

/// Parses `text` as inline markup into detached nodes, without touching the
/// open elements of the model. Line breaks are kept as text.
pub(crate) fn parse_fragment(model: &mut Model<'_>, text: &str) -> Vec<Node> {
    model.depth.parser += 1;
    let mut guard = scopeguard::guard(model, |model| model.depth.parser -= 1);
    let model = &mut **guard;
    if model.depth.parser > model.config().parser_recursion_limit {
        log::warn!("markup nesting limit exceeded in '{}'", model.title());
        return vec![Node::Text(text.to_string())];
    }

    let nested = model.stack.nested();
    let outer = core::mem::replace(&mut model.stack, nested);
    {
        let mut parser = Parser::new(model);
        let mut pos = 0;
        loop {
            pos = parser.parse_inline(text, pos, Stop::Line);
            parser.end_line();
            if pos >= text.len() {
                break;
            }
            parser.model.stack.append_text("\n");
            pos += 1;
        }
    }
    core::mem::replace(&mut model.stack, outer).finish()
}

/// Where inline parsing stops.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stop {
    /// At the end of the line.
    Line,
    /// At the end of the line, or at the `||` (or `!!`, in a header row) which
    /// starts the next table cell.
    Cell {
        /// Whether the cell is a header cell.
        header: bool,
    },
    /// At the end of the line, or at the `:` which ends a definition list
    /// term.
    Term,
}

/// The kind of block the previous line was.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LastLine {
    /// Nothing which continues onto the next line.
    Other,
    /// Text which the next line of text continues.
    Text,
}

/// A Wikitext block and inline markup parser.
struct Parser<'m, 'e> {
    /// The model which owns the tag stack and the side lists.
    model: &'m mut Model<'e>,
    /// The prefix characters of the open list items, one per nesting level.
    list_prefix: Vec<u8>,
    /// The stack length before each open list element was pushed.
    list_positions: Vec<usize>,
    /// The stack length before the open leading-space `<pre>`, if there is
    /// one.
    pre: Option<usize>,
    /// A paragraph should be opened before the next visible inline content.
    pending_paragraph: bool,
    /// What the previous line was.
    last_line: LastLine,
    /// `''` is open.
    italic: bool,
    /// `'''` is open.
    bold: bool,
}

impl<'m, 'e> Parser<'m, 'e> {
    /// Creates a new parser appending to the stack of `model`.
    fn new(model: &'m mut Model<'e>) -> Self {
        Self {
            model,
            list_prefix: Vec::new(),
            list_positions: Vec::new(),
            pre: None,
            pending_paragraph: false,
            last_line: LastLine::Other,
            italic: false,
            bold: false,
        }
    }

    /// Parses the line starting at `start`. Returns the offset of the line
    /// break which ended it, or the end of the text. A line may extend over
    /// several physical lines if it contains a multi-line inline construct.
    fn parse_line(&mut self, text: &str, start: usize) -> usize {
        let bytes = text.as_bytes();
        let line_end = memchr::memchr(b'\n', &bytes[start..]).map_or(text.len(), |len| start + len);
        let line = &text[start..line_end];

        let end = if line.trim().is_empty() {
            self.close_blocks();
            self.close_paragraph();
            self.last_line = LastLine::Other;
            line_end
        } else if let Some(end) = self.table_line(text, start, line_end) {
            end
        } else if bytes[start] == b'='
            && let Some(end) = self.heading(text, start, line_end)
        {
            end
        } else {
            match bytes[start] {
                b'*' | b'#' | b':' | b';' => self.list_item(text, start),
                b' ' => self.preformatted(text, start),
                b'-' if line.starts_with("----") => self.horizontal_rule(text, start),
                _ => self.paragraph_line(text, start),
            }
        };

        self.end_line();
        end
    }

    /// Closes inline styles which do not continue past the end of a line.
    fn end_line(&mut self) {
        if self.italic {
            self.model.stack.close("i");
            self.italic = false;
        }
        if self.bold {
            self.model.stack.close("b");
            self.bold = false;
        }
    }

    /// Closes open lists and preformatted text.
    fn close_blocks(&mut self) {
        if let Some(&position) = self.list_positions.first() {
            self.model.stack.close_to(position);
            self.list_positions.clear();
            self.list_prefix.clear();
        }
        if let Some(position) = self.pre.take() {
            self.model.stack.close_to(position);
        }
    }

    /// Closes the open paragraph, if any.
    fn close_paragraph(&mut self) {
        if let Some(position) = self.model.stack.position("p") {
            self.model.stack.close_to(position);
        }
        self.pending_paragraph = false;
    }

    /// Opens the pending paragraph, if the content is at the document root.
    fn ensure_paragraph(&mut self) {
        if self.pending_paragraph {
            self.pending_paragraph = false;
            if self.model.stack.is_empty() {
                self.model.stack.push(TagNode::new("p"));
            }
        }
    }

    /// Appends plain text, decoding entities.
    fn text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if !text.trim().is_empty() {
            self.ensure_paragraph();
        }
        self.model.stack.append_text(&decode_html(text));
    }

    /// Appends an inline node.
    fn inline(&mut self, node: TagNode) {
        self.ensure_paragraph();
        self.model.stack.append(Node::Tag(node));
    }

    /// Opens an element, after reducing the stack for it.
    fn open(&mut self, node: TagNode) {
        if tags::parents(&node.name) == tags::Parents::Any {
            self.ensure_paragraph();
        } else {
            self.pending_paragraph = false;
        }
        self.model.stack.open_tag(node);
    }

    /// A line of running text.
    fn paragraph_line(&mut self, text: &str, start: usize) -> usize {
        self.close_blocks();
        if self.last_line == LastLine::Text {
            self.model.stack.append_text("\n");
        } else {
            self.pending_paragraph = true;
        }
        let end = self.parse_inline(text, start, Stop::Line);
        self.last_line = LastLine::Text;
        end
    }

    /// A `= heading =` line. Returns `None` if the line is not a heading.
    fn heading(&mut self, text: &str, start: usize, line_end: usize) -> Option<usize> {
        let line = text[start..line_end].trim_end();
        let open = line.bytes().take_while(|&b| b == b'=').count();
        let close = line.bytes().rev().take_while(|&b| b == b'=').count();
        let level = open.min(close).min(6);
        if open == line.len() || level == 0 {
            return None;
        }
        let content = &line[level..line.len() - level];

        self.close_blocks();
        self.close_paragraph();
        self.last_line = LastLine::Other;

        let nodes = parse_fragment(self.model, content.trim());
        let title = nodes.iter().map(Node::text_content).collect::<String>();
        let level = u8::try_from(level).unwrap_or(6);
        let anchor = self.model.toc.add(level, start..line_end, title.trim());

        let mut headline = TagNode::new("span")
            .with_attribute("class", "mw-headline")
            .with_attribute("id", anchor);
        headline.children = nodes;
        let mut heading = TagNode::new(format!("h{level}"));
        heading.append(Node::Tag(headline));
        self.model.stack.reduce(&heading.name);
        self.model.stack.append(Node::Tag(heading));
        Some(line_end)
    }

    /// A `*`, `#`, `:`, or `;` list item line.
    fn list_item(&mut self, text: &str, start: usize) -> usize {
        fn kind(prefix: u8) -> &'static str {
            match prefix {
                b'*' => "ul",
                b'#' => "ol",
                _ => "dl",
            }
        }

        fn item(prefix: u8) -> &'static str {
            match prefix {
                b'*' | b'#' => "li",
                b';' => "dt",
                _ => "dd",
            }
        }

        if let Some(position) = self.pre.take() {
            self.model.stack.close_to(position);
        }

        let prefix = text.as_bytes()[start..]
            .iter()
            .take_while(|b| matches!(b, b'*' | b'#' | b':' | b';'))
            .copied()
            .collect::<Vec<_>>();
        let common = prefix
            .iter()
            .zip(&self.list_prefix)
            .take_while(|(new, old)| kind(**new) == kind(**old))
            .count();

        if common < self.list_prefix.len() {
            self.model.stack.close_to(self.list_positions[common]);
            self.list_positions.truncate(common);
            self.list_prefix.truncate(common);
        }

        if common == prefix.len() {
            // A new item in an already open list
            self.model.stack.close_to(self.list_positions[common - 1] + 1);
            self.model.stack.push(TagNode::new(item(prefix[common - 1])));
            self.list_prefix[common - 1] = prefix[common - 1];
        } else {
            if self.list_positions.is_empty() {
                self.close_paragraph();
                self.model.stack.reduce(kind(prefix[0]));
            }
            for &level in &prefix[common..] {
                self.list_positions.push(self.model.stack.len());
                self.list_prefix.push(level);
                self.model.stack.push(TagNode::new(kind(level)));
                self.model.stack.push(TagNode::new(item(level)));
            }
        }

        self.last_line = LastLine::Other;
        let mut pos = start + prefix.len();
        if prefix.last() == Some(&b';') {
            pos = self.parse_inline(text, pos, Stop::Term);
            if text.as_bytes().get(pos) == Some(&b':') {
                self.end_line();
                let depth = self.list_positions.len();
                self.model.stack.close_to(self.list_positions[depth - 1] + 1);
                self.model.stack.push(TagNode::new("dd"));
                pos += 1;
            } else {
                return pos;
            }
        }
        self.parse_inline(text, pos, Stop::Line)
    }

    /// A line of preformatted text, starting with a space.
    fn preformatted(&mut self, text: &str, start: usize) -> usize {
        if let Some(&position) = self.list_positions.first() {
            self.model.stack.close_to(position);
            self.list_positions.clear();
            self.list_prefix.clear();
        }

        if self.pre.is_some() {
            self.model.stack.append_text("\n");
        } else {
            self.close_paragraph();
            self.model.stack.reduce("pre");
            self.pre = Some(self.model.stack.len());
            self.model.stack.push(TagNode::new("pre"));
        }
        self.last_line = LastLine::Other;
        self.parse_inline(text, start + 1, Stop::Line)
    }

    /// A `----` horizontal rule line.
    fn horizontal_rule(&mut self, text: &str, start: usize) -> usize {
        self.close_blocks();
        self.close_paragraph();
        self.model.stack.open_tag(TagNode::new("hr"));
        let rest = start + text.as_bytes()[start..].iter().take_while(|&&b| b == b'-').count();
        self.last_line = LastLine::Other;
        self.pending_paragraph = true;
        self.parse_inline(text, rest, Stop::Line)
    }

    /// Handles a line of Wikitext table syntax. Returns `None` if the line is
    /// not one.
    fn table_line(&mut self, text: &str, start: usize, line_end: usize) -> Option<usize> {
        let line = &text[start..line_end];
        let trimmed = line.trim_start();
        let at = start + line.len() - trimmed.len();

        if let Some(attributes) = trimmed.strip_prefix("{|") {
            self.close_blocks();
            self.last_line = LastLine::Other;
            self.open(element("table", attributes));
            return Some(line_end);
        }

        let table = self.model.stack.position("table")?;
        let marker = trimmed.as_bytes().first().copied()?;
        if !matches!(marker, b'|' | b'!') {
            return None;
        }

        self.close_blocks();
        self.last_line = LastLine::Other;
        match trimmed.as_bytes().get(1).copied() {
            Some(b'}') if marker == b'|' => {
                self.end_line();
                self.model.stack.close_to(table);
                self.pending_paragraph = true;
                Some(self.parse_inline(text, at + 2, Stop::Line))
            }
            Some(b'-') if marker == b'|' => {
                self.model.stack.close_to(table + 1);
                let attributes = trimmed[2..].trim_start_matches('-');
                self.model.stack.push(element("tr", attributes));
                Some(line_end)
            }
            Some(b'+') if marker == b'|' => {
                self.model.stack.close_to(table + 1);
                self.model.stack.push(TagNode::new("caption"));
                Some(self.parse_inline(text, at + 2, Stop::Line))
            }
            _ => Some(self.table_cells(text, at + 1, marker == b'!')),
        }
    }

    /// Parses the cells of a table row line, starting just after the first
    /// cell marker.
    fn table_cells(&mut self, text: &str, mut pos: usize, header: bool) -> usize {
        let bytes = text.as_bytes();
        loop {
            self.ensure_row();
            let name = if header { "th" } else { "td" };
            let cell = match cell_attributes(text, pos, header) {
                Some(bar) => {
                    let node = element(name, &text[pos..bar]);
                    pos = bar + 1;
                    node
                }
                None => TagNode::new(name),
            };
            self.model.stack.push(cell);

            pos = self.parse_inline(text, pos, Stop::Cell { header });
            self.end_line();
            if bytes[pos..].starts_with(b"||") || (header && bytes[pos..].starts_with(b"!!")) {
                pos += 2;
            } else {
                self.last_line = LastLine::Text;
                return pos;
            }
        }
    }

    /// Makes sure a row is open in the innermost table, closing any open cell.
    fn ensure_row(&mut self) {
        let stack = &mut self.model.stack;
        let Some(table) = stack.position("table") else {
            return;
        };
        match stack.position("tr") {
            Some(row) if row > table => stack.close_to(row + 1),
            _ => {
                stack.close_to(table + 1);
                stack.push(TagNode::new("tr"));
            }
        }
    }

    /// Parses inline markup from `start` until `stop`. Returns the offset of
    /// the stopping character, or the end of the text.
    fn parse_inline(&mut self, text: &str, start: usize, stop: Stop) -> usize {
        let bytes = text.as_bytes();
        let mut flushed = start;
        let mut pos = start;

        while pos < bytes.len() {
            let end = match bytes[pos] {
                b'\n' => break,
                b'|' if matches!(stop, Stop::Cell { .. }) && bytes[pos..].starts_with(b"||") => {
                    break;
                }
                b'!' if stop == (Stop::Cell { header: true }) && bytes[pos..].starts_with(b"!!") => {
                    break;
                }
                b':' if stop == Stop::Term => break,
                b'[' => self.bracket(text, pos, flushed),
                b'<' => self.html(text, pos, flushed),
                b'\'' if bytes.get(pos + 1) == Some(&b'\'') => {
                    self.text(&text[flushed..pos]);
                    flushed = pos;
                    Some(self.apostrophes(text, pos))
                }
                b'_' if bytes[pos..].starts_with(b"__") => self.behavior_switch(text, pos, flushed),
                b if b.is_ascii_alphabetic()
                    && (pos == start || !bytes[pos - 1].is_ascii_alphanumeric()) =>
                {
                    self.free_url(text, pos, flushed)
                }
                _ => None,
            };

            match end {
                Some(end) => {
                    pos = end;
                    flushed = end;
                }
                None => pos += 1,
            }
        }

        self.text(&text[flushed..pos]);
        pos
    }

    /// Handles a run of apostrophes starting at `pos`. Returns the offset just
    /// past the run.
    fn apostrophes(&mut self, text: &str, pos: usize) -> usize {
        let count = text.as_bytes()[pos..].iter().take_while(|&&b| b == b'\'').count();
        let (literal, count) = match count {
            4 => (1, 3),
            n if n > 5 => (n - 5, 5),
            n => (0, n),
        };
        self.text(&text[pos..pos + literal]);

        match count {
            2 => self.toggle_style(false),
            3 => self.toggle_style(true),
            _ => {
                if self.italic && self.bold {
                    let stack = &self.model.stack;
                    let bold_outer = stack.position("b") < stack.position("i");
                    self.toggle_style(!bold_outer);
                    self.toggle_style(bold_outer);
                } else if self.italic {
                    self.toggle_style(false);
                    self.toggle_style(true);
                } else {
                    self.toggle_style(true);
                    self.toggle_style(false);
                }
            }
        }
        pos + literal + count
    }

    /// Opens or closes `'''` bold or `''` italic text.
    fn toggle_style(&mut self, bold: bool) {
        let (name, other, other_open) = if bold {
            ("b", "i", self.italic)
        } else {
            ("i", "b", self.bold)
        };
        let open = if bold { self.bold } else { self.italic };

        if open {
            let stack = &mut self.model.stack;
            let reopen = other_open && stack.position(other) > stack.position(name);
            stack.close(name);
            if reopen {
                stack.push(TagNode::new(other));
            }
        } else {
            self.ensure_paragraph();
            self.model.stack.push(TagNode::new(name));
        }

        if bold {
            self.bold = !open;
        } else {
            self.italic = !open;
        }
    }

    /// Handles a `[`. Returns the offset just past the link, or `None` if this
    /// is not a link.
    fn bracket(&mut self, text: &str, pos: usize, flushed: usize) -> Option<usize> {
        let bytes = text.as_bytes();
        if bytes[pos..].starts_with(b"[[") {
            let end = scanner::find_nested_link_end(text, pos + 2)?;
            self.text(&text[flushed..pos]);
            let trail = bytes[end..]
                .iter()
                .take_while(|b| b.is_ascii_alphabetic())
                .count();
            let consumed = self.wiki_link(&text[pos + 2..end - 2], &text[end..end + trail]);
            Some(if consumed { end + trail } else { end })
        } else {
            self.model.config().uri_scheme(&text[pos + 1..])?;
            let line_end = memchr::memchr(b'\n', &bytes[pos..]).map_or(bytes.len(), |len| pos + len);
            let close = pos + memchr::memchr(b']', &bytes[pos..line_end])?;
            let inner = &text[pos + 1..close];
            let (url, label) = inner
                .split_once([' ', '\t'])
                .map_or((inner, ""), |(url, label)| (url, label.trim()));

            self.text(&text[flushed..pos]);
            let mut node = TagNode::new("a").with_attribute("href", decode_html(url));
            if label.is_empty() {
                self.model.external_link_count += 1;
                node = node
                    .with_attribute("class", "external autonumber")
                    .with_text(&format!("[{}]", self.model.external_link_count));
            } else {
                node = node.with_attribute("class", "external text");
                node.children = parse_fragment(self.model, label);
            }
            node.attributes.insert("rel".into(), "nofollow".into());
            self.inline(node);
            Some(close + 1)
        }
    }

    /// Appends a wikilink with the body `body`. Returns true if the link
    /// trail `trail` became part of the link label.
    fn wiki_link(&mut self, body: &str, trail: &str) -> bool {
        match links::resolve(self.model, body) {
            WikiLink::Internal {
                href,
                title,
                text,
                is_self,
            } => {
                let label = format!("{text}{trail}");
                let node = if is_self {
                    TagNode::new("strong").with_attribute("class", "selflink")
                } else {
                    TagNode::new("a")
                        .with_attribute("href", href)
                        .with_attribute("title", title)
                };
                self.link_node(node, &label);
                true
            }
            WikiLink::Interwiki { href, text } => {
                let node = TagNode::new("a")
                    .with_attribute("href", href)
                    .with_attribute("class", "extiw");
                self.link_node(node, &format!("{text}{trail}"));
                true
            }
            WikiLink::Media { href, text } => {
                let node = TagNode::new("a")
                    .with_attribute("href", href)
                    .with_attribute("class", "internal");
                self.link_node(node, &format!("{text}{trail}"));
                true
            }
            WikiLink::Image(format) => {
                let mut node = TagNode::new("img")
                    .with_attribute("src", format.src(self.model.config()))
                    .with_attribute(
                        "alt",
                        format.alt.clone().unwrap_or_else(|| format.caption.clone()),
                    );
                node.children = parse_fragment(self.model, &format.caption);
                node.object = Some(ObjectAttribute::Image(format));
                self.inline(node);
                false
            }
            WikiLink::Attribute { text } => {
                let nodes = parse_fragment(self.model, &text);
                self.ensure_paragraph();
                for node in nodes {
                    self.model.stack.append(node);
                }
                false
            }
            WikiLink::Category => false,
            WikiLink::Invalid => {
                self.text(&format!("[[{body}]]"));
                false
            }
        }
    }

    /// Appends a link element whose label is the Wikitext `label`.
    fn link_node(&mut self, mut node: TagNode, label: &str) {
        node.children = parse_fragment(self.model, label);
        self.inline(node);
    }

    /// Handles a `<`. Returns the offset just past the tag (and its content,
    /// for tags with verbatim content), or `None` if this is not a tag.
    fn html(&mut self, text: &str, pos: usize, flushed: usize) -> Option<usize> {
        let tag = scanner::parse_tag(text, pos)?;
        let name = tag.name.as_str();

        if tag.is_end {
            if !tags::ALLOWED_TAGS.contains(name) {
                return None;
            }
            self.text(&text[flushed..pos]);
            if !self.model.stack.close(name) {
                // log::trace!("dropping unbalanced </{name}>");
            }
            return Some(tag.end);
        }

        match name {
            "nowiki" | "pre" | "math" | "source" => {
                let (body, end) = verbatim(text, &tag)?;
                self.text(&text[flushed..pos]);
                match name {
                    "nowiki" => self.text(body),
                    "math" => self.inline(TagNode::new("math").with_text(body)),
                    _ => {
                        let name = if name == "pre" { "pre" } else { "source" };
                        self.open(element_from(name, &tag).with_text(body.trim_start_matches('\n')));
                        self.model.stack.pop();
                    }
                }
                Some(end)
            }
            "ref" => {
                let (body, end) = verbatim(text, &tag)?;
                self.text(&text[flushed..pos]);
                self.reference(&tag, body);
                Some(end)
            }
            "references" => {
                let end = if tag.is_empty {
                    tag.end
                } else {
                    scanner::find_end_tag(text, tag.end, name).map_or(tag.end, |(_, end)| end)
                };
                self.text(&text[flushed..pos]);
                self.open(TagNode::new("references"));
                self.model.stack.pop();
                Some(end)
            }
            name if tags::ALLOWED_TAGS.contains(name) => {
                self.text(&text[flushed..pos]);
                let node = element_from(name, &tag);
                let is_void = node.is_void();
                self.open(node);
                if tag.is_empty && !is_void {
                    self.model.stack.pop();
                }
                Some(tag.end)
            }
            _ => None,
        }
    }

    /// Records a `<ref>` and appends its citation mark.
    fn reference(&mut self, tag: &Tag, content: &str) {
        let nodes = parse_fragment(self.model, content.trim());
        let engine = self.model.engine();
        let name = tag.attributes.get("name").map(String::as_str);
        let citation = self.model.references.cite(engine.config(), name, content, nodes);

        let link = TagNode::new("a")
            .with_attribute("href", format!("#{}", citation.target))
            .with_text(&format!("[{}]", citation.index + 1));
        let mut mark = TagNode::new("sup")
            .with_attribute("id", citation.anchor)
            .with_attribute("class", "reference");
        mark.append(Node::Tag(link));
        self.inline(mark);
    }

    /// Handles a `__SWITCH__`. Returns `None` if this is not a known switch.
    fn behavior_switch(&mut self, text: &str, pos: usize, flushed: usize) -> Option<usize> {
        let rest = &text[pos..];
        let (switch, len) = [
            ("__NOTOC__", TocSwitches::NO_TOC),
            ("__FORCETOC__", TocSwitches::FORCE_TOC),
            ("__TOC__", TocSwitches::TOC),
        ]
        .into_iter()
        .find_map(|(word, switch)| rest.starts_with(word).then_some((switch, word.len())))?;

        self.text(&text[flushed..pos]);
        if switch == TocSwitches::TOC && !self.model.switches.contains(TocSwitches::TOC) {
            self.model.stack.append(Node::Tag(TagNode::new("toc")));
        }
        self.model.switches |= switch;
        Some(pos + len)
    }

    /// Handles a bare URL like `https://example.com`. Returns `None` if the
    /// text at `pos` is not one.
    fn free_url(&mut self, text: &str, pos: usize, flushed: usize) -> Option<usize> {
        let rest = &text[pos..];
        let scheme = self.model.config().uri_scheme(rest)?;
        if scheme == "//" {
            return None;
        }
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '<' | '>' | '[' | ']' | '"' | '{' | '}' | '|'))
            .unwrap_or(rest.len());
        let url = rest[..len].trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '\'']);
        if url.len() <= scheme.len() {
            return None;
        }

        self.text(&text[flushed..pos]);
        let end = pos + url.len();
        let url = decode_html(url);
        let node = TagNode::new("a")
            .with_attribute("href", &*url)
            .with_attribute("class", "external free")
            .with_attribute("rel", "nofollow")
            .with_text(&url);
        self.inline(node);
        Some(end)
    }
}

/// Creates an element with attributes parsed from Wikitext.
fn element(name: &str, attributes: &str) -> TagNode {
    let mut node = TagNode::new(name);
    node.attributes = scanner::parse_attributes(attributes)
        .into_iter()
        .filter(|(name, value)| tags::is_safe_attribute(name, value))
        .collect();
    node
}

/// Creates an element from a parsed HTML tag.
fn element_from(name: &str, tag: &Tag) -> TagNode {
    let mut node = TagNode::new(name);
    node.attributes = tag
        .attributes
        .iter()
        .filter(|(name, value)| tags::is_safe_attribute(name, value))
        .map(|(name, value)| (name.clone(), decode_html(value).into_owned()))
        .collect();
    node
}

/// Returns the content of a tag with verbatim content and the offset just
/// past its end tag, or `None` if it is never closed.
fn verbatim<'a>(text: &'a str, tag: &Tag) -> Option<(&'a str, usize)> {
    if tag.is_empty {
        Some(("", tag.end))
    } else {
        let (close, end) = scanner::find_end_tag(text, tag.end, &tag.name)?;
        Some((&text[tag.end..close], end))
    }
}

/// Returns the offset of the `|` separating the attributes of a table cell
/// from its content, if the cell starting at `start` has attributes.
fn cell_attributes(text: &str, start: usize, header: bool) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut pos = start;
    while let Some(&b) = bytes.get(pos) {
        match b {
            b'\n' | b'[' | b'{' | b'<' => return None,
            b'!' if header && bytes[pos..].starts_with(b"!!") => return None,
            b'|' => {
                return (!bytes[pos..].starts_with(b"||")).then_some(pos);
            }
            _ => pos += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Configuration, provider::MapContentProvider, renderer::Engine};

    fn engine() -> Engine {
        Engine::new(Configuration::default(), MapContentProvider::default())
    }

    /// Renders the tree as compact markup for comparison.
    fn tree(nodes: &[Node]) -> String {
        let mut out = String::new();
        for node in nodes {
            match node {
                Node::Text(text) => out += text,
                Node::Tag(tag) => {
                    out.push('<');
                    out += &tag.name;
                    for (name, value) in &tag.attributes {
                        out += &format!(" {name}={value:?}");
                    }
                    out.push('>');
                    out += &tree(&tag.children);
                    out += &format!("</{}>", tag.name);
                }
            }
        }
        out
    }

    fn render(text: &str) -> String {
        let engine = engine();
        let mut model = Model::new(&engine, "Test");
        parse(&mut model, text);
        tree(&model.stack.take())
    }

    #[test]
    fn paragraphs() {
        assert_eq!(render("a\nb\n\nc"), "<p>a\nb</p><p>c</p>");
        assert_eq!(render("<div>a</div>"), "<div>a</div>", "no empty paragraph");
    }

    #[test]
    fn styles() {
        assert_eq!(render("''a'''b'''c''"), "<p><i>a<b>b</b>c</i></p>");
        assert_eq!(render("'''a''b'''c''"), "<p><b>a<i>b</i></b><i>c</i></p>");
        assert_eq!(render("'''''a'''''"), "<p><b><i>a</i></b></p>");
        assert_eq!(render("''a\nb"), "<p><i>a</i>\nb</p>", "closed at end of line");
        assert_eq!(render("''''a'''"), "<p>'<b>a</b></p>");
    }

    #[test]
    fn lists() {
        assert_eq!(
            render("* a\n** b\n* c\n# d"),
            "<ul><li> a<ul><li> b</li></ul></li><li> c</li></ul><ol><li> d</li></ol>"
        );
        assert_eq!(render("; t : d"), "<dl><dt> t </dt><dd> d</dd></dl>");
        assert_eq!(render(":a\n::b"), "<dl><dd>a<dl><dd>b</dd></dl></dd></dl>");
    }

    #[test]
    fn tables() {
        assert_eq!(
            render("{| class=\"t\"\n|+ Cap\n! H1 !! H2\n|-\n| a || style=\"x\" | b\n|}"),
            "<table class=\"t\"><caption> Cap</caption><tr><th> H1 </th><th> H2</th></tr>\
             <tr><td> a </td><td style=\"x\"> b</td></tr></table>"
        );
        assert_eq!(
            render("{|\n| [[a|b]]\n|}"),
            "<table><tr><td> <a href=\"/wiki/A\" title=\"A\">b</a></td></tr></table>",
            "a pipe inside a link is not a cell attribute separator"
        );
        assert_eq!(render("| not a table"), "<p>| not a table</p>");
    }

    #[test]
    fn headings_and_toc() {
        let engine = engine();
        let mut model = Model::new(&engine, "Test");
        parse(&mut model, "= A =\n== B ==\n== C ==\ntext\n== B ==");
        assert_eq!(
            tree(&model.stack.take()[..1]),
            "<h1><span class=\"mw-headline\" id=\"A\">A</span></h1>"
        );
        let anchors = model
            .toc
            .entries()
            .iter()
            .flat_map(|entry| match entry {
                crate::renderer::globals::TocEntry::Section(header) => vec![header.anchor.clone()],
                crate::renderer::globals::TocEntry::List(list) => list
                    .iter()
                    .filter_map(|entry| match entry {
                        crate::renderer::globals::TocEntry::Section(header) => {
                            Some(header.anchor.clone())
                        }
                        crate::renderer::globals::TocEntry::List(_) => None,
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();
        assert_eq!(anchors, ["A", "B", "C", "B_2"]);
        assert_eq!(render("=="), "<p>==</p>", "not a heading");
    }

    #[test]
    fn links() {
        assert_eq!(
            render("[[foo]]bar baz"),
            "<p><a href=\"/wiki/Foo\" title=\"Foo\">foobar</a> baz</p>"
        );
        assert_eq!(
            render("[http://example.com Ex] [http://example.com]"),
            "<p><a href=\"http://example.com\" class=\"external text\" rel=\"nofollow\">Ex</a> \
             <a href=\"http://example.com\" class=\"external autonumber\" rel=\"nofollow\">[1]</a></p>"
        );
        assert_eq!(
            render("see https://example.com/a."),
            "<p>see <a href=\"https://example.com/a\" class=\"external free\" rel=\"nofollow\">https://example.com/a</a>.</p>"
        );
        assert_eq!(render("[[a<b]]"), "<p>[[a<b]]</p>");
        assert_eq!(render("[[Category:X]]"), "");
    }

    #[test]
    fn html_tags() {
        assert_eq!(
            render("<b onclick=\"x\" class=\"y\">a</b></i>"),
            "<p><b class=\"y\">a</b></p>"
        );
        assert_eq!(render("a<br>b"), "<p>a<br></br>b</p>");
        assert_eq!(render("<nowiki>''x'' &lt;</nowiki>"), "<p>''x'' <</p>");
        assert_eq!(render("<script>x</script>"), "<p><script>x</script></p>");
        assert_eq!(render("<nowiki>open"), "<p><nowiki>open</p>", "unterminated is text");
    }

    #[test]
    fn preformatted() {
        assert_eq!(render(" a\n b\nc"), "<pre>a\nb</pre><p>c</p>");
        assert_eq!(render("<pre>\n''x''\n</pre>"), "<pre>''x''\n</pre>");
        assert_eq!(render("----\nx"), "<hr></hr><p>x</p>");
    }

    #[test]
    fn references() {
        let engine = engine();
        let mut model = Model::new(&engine, "Test");
        parse(
            &mut model,
            "a<ref name=\"x\">A</ref> b<ref name=\"x\">A</ref>\n<references/>",
        );
        assert_eq!(
            tree(&model.stack.take()),
            "<p>a<sup id=\"_ref-x\" class=\"reference\"><a href=\"#_note-x\">[1]</a></sup> \
             b<sup id=\"_ref-x_a\" class=\"reference\"><a href=\"#_note-x\">[1]</a></sup>\n</p>\
             <references></references>"
        );
        assert_eq!(model.references.len(), 1);
        assert_eq!(model.references.list()[0].count, 2);
        assert_eq!(model.references.list()[0].content, "A");
    }

    #[test]
    fn switches() {
        let engine = engine();
        let mut model = Model::new(&engine, "Test");
        parse(&mut model, "__NOTOC__a__TOC__");
        assert!(model.switches.contains(TocSwitches::NO_TOC | TocSwitches::TOC));
        assert_eq!(tree(&model.stack.take()), "<p>a<toc></toc></p>");
    }
}
