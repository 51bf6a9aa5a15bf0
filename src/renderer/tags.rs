//! Document tree nodes and the open tag stack.

use super::image::ImageFormat;
use indexmap::IndexMap;

/// A node in a rendered document tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Node {
    /// An element.
    Tag(TagNode),
    /// A run of plain text.
    Text(String),
}

impl Node {
    /// The concatenated text of this node and all its descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.write_text(&mut out);
        out
    }

    /// Appends the text of this node and all its descendants to `out`.
    fn write_text(&self, out: &mut String) {
        match self {
            Node::Tag(tag) => {
                for child in &tag.children {
                    child.write_text(out);
                }
            }
            Node::Text(text) => *out += text,
        }
    }

    /// The element, if this node is one.
    pub fn as_tag(&self) -> Option<&TagNode> {
        match self {
            Node::Tag(tag) => Some(tag),
            Node::Text(_) => None,
        }
    }
}

impl From<TagNode> for Node {
    fn from(value: TagNode) -> Self {
        Self::Tag(value)
    }
}

/// Extra data attached to an element which does not fit into its attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ObjectAttribute {
    /// Image metadata for an `[[File:...]]` link.
    Image(ImageFormat),
}

/// An element in a rendered document tree.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagNode {
    /// The lowercase tag name.
    pub name: String,
    /// The attributes, in source order.
    pub attributes: IndexMap<String, String>,
    /// The child nodes.
    pub children: Vec<Node>,
    /// Extra data, if any.
    pub object: Option<ObjectAttribute>,
}

impl TagNode {
    /// Creates a new empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds an attribute and returns the element.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Adds a child text node and returns the element.
    #[must_use]
    pub fn with_text(mut self, text: &str) -> Self {
        self.append_text(text);
        self
    }

    /// Gets the value of an attribute.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Appends a child node. Adjacent text nodes are merged.
    pub fn append(&mut self, node: Node) {
        append_to(&mut self.children, node);
    }

    /// Appends text as a child node.
    pub fn append_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.append(Node::Text(text.to_string()));
        }
    }

    /// The concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            child.write_text(&mut out);
        }
        out
    }

    /// Returns true if the element is void, i.e. it can never have children.
    pub fn is_void(&self) -> bool {
        VOID_TAGS.contains(self.name.as_str())
    }
}

/// Appends `node` to `nodes`, merging it into the last node if both are text.
fn append_to(nodes: &mut Vec<Node>, node: Node) {
    if let Node::Text(text) = &node
        && let Some(Node::Text(last)) = nodes.last_mut()
    {
        *last += text;
        return;
    }
    nodes.push(node);
}

/// The structurally valid parents of an element.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Parents {
    /// The element may go anywhere.
    Any,
    /// The element may only be a child of one of these elements, or of the
    /// document root.
    Only(&'static [&'static str]),
}

impl Parents {
    /// Returns true if an element with this policy can be a child of `parent`.
    fn allows(self, parent: &str) -> bool {
        match self {
            Parents::Any => true,
            Parents::Only(parents) => parents.contains(&parent),
        }
    }
}

/// Returns the parent policy for the element with the given name.
pub(crate) fn parents(name: &str) -> Parents {
    const BLOCK_CONTAINERS: &[&str] = &[
        "td", "th", "li", "dd", "dt", "div", "blockquote", "caption", "center",
    ];

    match name {
        "td" | "th" => Parents::Only(&["tr"]),
        "tr" => Parents::Only(&["table", "tbody", "thead", "tfoot"]),
        "caption" | "tbody" | "thead" | "tfoot" => Parents::Only(&["table"]),
        "li" => Parents::Only(&["ul", "ol"]),
        "dd" | "dt" => Parents::Only(&["dl"]),
        "table" => Parents::Only(&["td", "th", "li", "dd", "div", "blockquote", "center"]),
        name if BLOCK_TAGS.contains(name) => Parents::Only(BLOCK_CONTAINERS),
        _ => Parents::Any,
    }
}

/// Creates a fresh instance of the element which is opened implicitly when
/// an element with the given name has no valid parent.
pub(crate) fn default_parent(name: &str) -> Option<TagNode> {
    match name {
        "td" | "th" => Some(TagNode::new("tr")),
        "tr" => Some(TagNode::new("table")),
        "li" => Some(TagNode::new("ul")),
        "dd" | "dt" => Some(TagNode::new("dl")),
        _ => None,
    }
}

/// The stack of currently open elements, plus the finished nodes of the
/// document root.
///
/// The stack owns every open element. When an element is popped, it is
/// appended to the children of the element below it, or to the root.
///
/// Elements opened past the nesting limit are dropped, and their content goes
/// to the innermost kept element. They still count as open, so every push
/// stays paired with a pop.
#[derive(Debug)]
pub struct TagStack {
    /// The finished top-level nodes.
    root: Vec<Node>,
    /// The open elements, from outermost to innermost.
    open: Vec<TagNode>,
    /// The maximum number of kept open elements.
    limit: usize,
    /// The number of open elements dropped for exceeding the limit.
    dropped: usize,
}

impl Default for TagStack {
    fn default() -> Self {
        Self::with_limit(MAX_DEPTH)
    }
}

impl TagStack {
    /// Creates an empty stack which keeps at most `limit` nested elements.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            root: Vec::new(),
            open: Vec::new(),
            limit,
            dropped: 0,
        }
    }

    /// Creates an empty stack for nodes which will be attached as children
    /// of a new element inside the innermost open element of this stack.
    pub fn nested(&self) -> Self {
        Self::with_limit(self.limit.saturating_sub(self.open.len() + 1))
    }

    /// Opens an element without any structural checks.
    pub fn push(&mut self, node: TagNode) {
        if self.open.len() < self.limit {
            self.open.push(node);
        } else {
            // log::trace!("dropping <{}>: nesting too deep", node.name);
            self.dropped += 1;
        }
    }

    /// Closes the innermost open element. Returns false if there was none.
    pub fn pop(&mut self) -> bool {
        if self.dropped != 0 {
            self.dropped -= 1;
            return true;
        }
        let Some(node) = self.open.pop() else {
            return false;
        };
        self.append(Node::Tag(node));
        true
    }

    /// The innermost open element.
    pub fn peek(&self) -> Option<&TagNode> {
        self.open.last()
    }

    /// The innermost open element.
    pub fn peek_mut(&mut self) -> Option<&mut TagNode> {
        self.open.last_mut()
    }

    /// The number of open elements.
    pub fn len(&self) -> usize {
        self.open.len() + self.dropped
    }

    /// Returns true if no elements are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if an element with the given name is open.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// The stack index of the innermost kept open element with the given
    /// name.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.open.iter().rposition(|node| node.name == name)
    }

    /// Appends a node to the innermost open element, or to the root.
    pub fn append(&mut self, node: Node) {
        match self.open.last_mut() {
            Some(parent) => parent.append(node),
            None => append_to(&mut self.root, node),
        }
    }

    /// Appends text to the innermost open element, or to the root.
    pub fn append_text(&mut self, text: &str) {
        if !text.is_empty() {
            self.append(Node::Text(text.to_string()));
        }
    }

    /// Closes open elements until the innermost one is a valid parent for an
    /// element named `name`.
    ///
    /// If the stack empties and the element has a default parent, the default
    /// parent is opened (itself reduced first) so the element never lands
    /// under an invalid parent.
    pub fn reduce(&mut self, name: &str) {
        let policy = parents(name);
        if policy == Parents::Any {
            return;
        }

        while let Some(top) = self.open.last()
            && !policy.allows(&top.name)
        {
            // log::trace!("reduce {name}: closing <{}>", top.name);
            self.pop();
        }

        if self.open.is_empty()
            && let Some(parent) = default_parent(name)
        {
            self.open_tag(parent);
        }
    }

    /// Reduces the stack for `node`, then opens it. Void elements are
    /// appended instead.
    pub fn open_tag(&mut self, node: TagNode) {
        self.reduce(&node.name);
        if node.is_void() {
            self.append(Node::Tag(node));
        } else {
            self.push(node);
        }
    }

    /// Closes the innermost open element named `name` and everything inside
    /// it. Returns false, changing nothing, if no such element is open.
    pub fn close(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(index) => {
                self.close_to(index);
                true
            }
            None => false,
        }
    }

    /// Closes open elements until only `len` remain.
    pub fn close_to(&mut self, len: usize) {
        while self.open.len() > len {
            self.pop();
        }
    }

    /// Closes everything and returns the finished document.
    pub fn finish(mut self) -> Vec<Node> {
        self.close_to(0);
        self.root
    }

    /// Closes everything and returns the finished document, leaving this
    /// stack empty.
    pub fn take(&mut self) -> Vec<Node> {
        core::mem::replace(self, Self::with_limit(self.limit)).finish()
    }
}

/// The default maximum element nesting depth.
pub const MAX_DEPTH: usize = 256;

/// Block-level elements which may not be nested inside of inline elements.
static BLOCK_TAGS: phf::Set<&str> = phf::phf_set! {
    "blockquote", "center", "div", "dl", "h1", "h2", "h3", "h4", "h5", "h6",
    "hr", "ol", "p", "pre", "references", "ul"
};

/// HTML elements which may be written directly in Wikitext.
pub(crate) static ALLOWED_TAGS: phf::Set<&str> = phf::phf_set! {
    "abbr", "b", "bdi", "bdo", "big", "blockquote", "br", "caption", "center",
    "cite", "code", "data", "dd", "del", "dfn", "div", "dl", "dt", "em", "font",
    "h1", "h2", "h3", "h4", "h5", "h6", "hr", "i", "ins", "kbd", "li", "mark",
    "ol", "p", "q", "rb", "rp", "rt", "ruby", "s", "samp", "small", "span",
    "strike", "strong", "sub", "sup", "table", "tbody", "td", "tfoot", "th",
    "thead", "time", "tr", "tt", "u", "ul", "var", "wbr"
};

/// Elements with no end tag.
pub(crate) static VOID_TAGS: phf::Set<&str> = phf::phf_set! {
    "br", "hr", "img", "wbr"
};

/// Returns true if an attribute given in Wikitext is safe to keep.
pub(crate) fn is_safe_attribute(name: &str, value: &str) -> bool {
    if name.starts_with("on") {
        return false;
    }
    let value = value.trim_start().to_ascii_lowercase();
    !(value.starts_with("javascript:") || value.contains("expression("))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_names(stack: &TagStack) -> Vec<&str> {
        stack.open.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn reduce_is_noop_for_valid_parent() {
        let mut stack = TagStack::default();
        stack.push(TagNode::new("table"));
        stack.push(TagNode::new("tr"));
        stack.reduce("td");
        assert_eq!(open_names(&stack), ["table", "tr"]);
    }

    #[test]
    fn reduce_recovers_from_unclosed_table() {
        // <table><tr><td>1<tr><td>2</table>
        let mut stack = TagStack::default();
        stack.open_tag(TagNode::new("table"));
        stack.open_tag(TagNode::new("tr"));
        stack.open_tag(TagNode::new("td"));
        stack.append_text("1");
        stack.open_tag(TagNode::new("tr"));
        assert_eq!(open_names(&stack), ["table", "tr"]);
        stack.open_tag(TagNode::new("td"));
        stack.append_text("2");
        assert!(stack.close("table"));
        assert!(stack.is_empty());

        let root = stack.finish();
        assert_eq!(root.len(), 1);
        let table = root[0].as_tag().unwrap();
        assert_eq!(table.children.len(), 2, "two rows");
        assert_eq!(table.text_content(), "12");

        let mut stack = TagStack::default();
        stack.push(TagNode::new("table"));
        stack.push(TagNode::new("tr"));
        stack.reduce("table");
        assert!(stack.is_empty(), "a nested table needs a cell");
    }

    #[test]
    fn default_parents() {
        let mut stack = TagStack::default();
        stack.open_tag(TagNode::new("td"));
        assert_eq!(open_names(&stack), ["table", "tr", "td"]);

        let mut stack = TagStack::default();
        stack.open_tag(TagNode::new("li"));
        assert_eq!(open_names(&stack), ["ul", "li"]);
    }

    #[test]
    fn inline_and_void_tags() {
        let mut stack = TagStack::default();
        stack.open_tag(TagNode::new("b"));
        stack.open_tag(TagNode::new("br"));
        stack.open_tag(TagNode::new("i"));
        assert_eq!(open_names(&stack), ["b", "i"]);
        assert!(!stack.close("u"), "closing an unopened tag changes nothing");
        assert_eq!(stack.len(), 2);
        assert!(stack.close("b"));
        assert!(stack.is_empty());
    }

    #[test]
    fn nesting_limit() {
        let mut stack = TagStack::with_limit(2);
        stack.push(TagNode::new("b"));
        stack.push(TagNode::new("i"));
        stack.push(TagNode::new("u"));
        stack.push(TagNode::new("s"));
        assert_eq!(open_names(&stack), ["b", "i"]);
        assert_eq!(stack.len(), 4, "dropped elements still count as open");
        stack.append_text("x");
        assert!(stack.close("i"), "closing pops the dropped elements first");
        assert_eq!(open_names(&stack), ["b"]);
        stack.append_text("y");

        let nested = stack.nested();
        assert_eq!(nested.limit, 0);

        let root = stack.finish();
        assert_eq!(root.len(), 1);
        let b = root[0].as_tag().unwrap();
        assert_eq!(b.children.len(), 2);
        assert_eq!(b.children[0].as_tag().unwrap().children, [Node::Text("x".into())]);
        assert_eq!(b.text_content(), "xy");
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut stack = TagStack::default();
        for _ in 0..100_000 {
            stack.open_tag(TagNode::new("span"));
        }
        stack.append_text("deep");
        assert_eq!(stack.len(), 100_000);
        let root = stack.finish();

        let mut depth = 0;
        let mut node = root[0].as_tag();
        while let Some(tag) = node {
            depth += 1;
            node = tag.children.first().and_then(Node::as_tag);
        }
        assert_eq!(depth, MAX_DEPTH);
        assert_eq!(root[0].text_content(), "deep");
    }

    #[test]
    fn text_merges() {
        let mut node = TagNode::new("p");
        node.append_text("a");
        node.append_text("b");
        node.append(Node::Tag(TagNode::new("br")));
        node.append_text("c");
        assert_eq!(node.children.len(), 3);
        assert_eq!(node.text_content(), "abc");
    }

    #[test]
    fn attributes() {
        assert!(is_safe_attribute("class", "x"));
        assert!(!is_safe_attribute("onclick", "x"));
        assert!(!is_safe_attribute("href", " JavaScript:alert(1)"));
    }
}
