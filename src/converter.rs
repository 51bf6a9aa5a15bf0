//! Output sinks for finished document trees.

use crate::{
    common::escape_xml,
    renderer::{ImageFormat, Model, Node, ObjectAttribute, Result, TagNode, TocEntry, TocSwitches},
};
use core::fmt::Write as _;

/// Converts a finished document tree into some text format.
pub trait Converter {
    /// Converts `nodes`, which were rendered by `model`, appending the result
    /// to `out`.
    fn convert(&self, nodes: &[Node], model: &Model<'_>, out: &mut String) -> Result;
}

/// Receives the structure of a document tree as a stream of events.
pub trait EventListener {
    /// An element starts.
    fn on_start(&mut self, node: &TagNode) -> Result;
    /// Some text.
    fn on_text(&mut self, text: &str) -> Result;
    /// An element ends.
    fn on_end(&mut self, node: &TagNode) -> Result;
}

/// Walks the tree `nodes` in document order, sending each element and text
/// node to `listener`.
pub fn walk<L: EventListener + ?Sized>(nodes: &[Node], listener: &mut L) -> Result {
    let mut stack = vec![(None::<&TagNode>, nodes.iter())];
    while let Some((_, iter)) = stack.last_mut() {
        match iter.next() {
            Some(Node::Text(text)) => listener.on_text(text)?,
            Some(Node::Tag(node)) => {
                listener.on_start(node)?;
                stack.push((Some(node), node.children.iter()));
            }
            None => {
                if let Some((Some(node), _)) = stack.pop() {
                    listener.on_end(node)?;
                }
            }
        }
    }
    Ok(())
}

/// A basic HTML converter.
///
/// Besides the elements of the tree, it writes the table of contents (at the
/// `__TOC__` marker, or else before the first header) and the reference list
/// (at `<references/>`, or else at the end of the document).
#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlConverter;

impl Converter for HtmlConverter {
    fn convert(&self, nodes: &[Node], model: &Model<'_>, out: &mut String) -> Result {
        let mut writer = HtmlWriter {
            out,
            model,
            toc_pending: model.show_toc(),
            toc_at_marker: model.switches().contains(TocSwitches::TOC),
            references_written: false,
            skip: 0,
        };
        walk(nodes, &mut writer)?;
        if !writer.references_written && !model.references().is_empty() {
            writer.references()?;
        }
        Ok(())
    }
}

/// The event listener behind [`HtmlConverter`].
struct HtmlWriter<'a, 'e> {
    /// The output buffer.
    out: &'a mut String,
    /// The model which rendered the tree.
    model: &'a Model<'e>,
    /// The table of contents still needs to be written.
    toc_pending: bool,
    /// The table of contents goes at the `__TOC__` marker instead of before
    /// the first header.
    toc_at_marker: bool,
    /// The reference list has been written.
    references_written: bool,
    /// The depth of elements whose content has already been written.
    skip: usize,
}

impl HtmlWriter<'_, '_> {
    /// Writes the start tag of an ordinary element.
    fn start_tag(&mut self, name: &str, node: &TagNode) -> Result {
        write!(self.out, "<{name}")?;
        for (key, value) in &node.attributes {
            write!(self.out, r#" {key}="{}""#, escape_xml(value))?;
        }
        if node.is_void() {
            *self.out += " />";
        } else {
            self.out.push('>');
        }
        Ok(())
    }

    /// Writes the table of contents.
    fn toc(&mut self) -> Result {
        self.toc_pending = false;
        *self.out += r#"<table id="toc" class="toc"><tr><td><div id="toctitle"><h2>Contents</h2></div>"#;
        // A document with no top level headers nests everything one deeper
        let mut entries = self.model.toc().entries();
        while let [TocEntry::List(list)] = entries {
            entries = list.as_slice();
        }
        toc_list(self.out, entries)?;
        *self.out += "</td></tr></table>";
        Ok(())
    }

    /// Writes the reference list.
    fn references(&mut self) -> Result {
        self.references_written = true;
        let model = self.model;
        let skip = core::mem::take(&mut self.skip);

        *self.out += r#"<ol class="references">"#;
        for (index, reference) in model.references().list().iter().enumerate() {
            let key = reference.key(index);
            write!(self.out, r#"<li id="_note-{key}">"#)?;
            if reference.count == 1 {
                write!(self.out, r##"<b><a href="#_ref-{key}" title="">↑</a></b> "##)?;
            } else {
                *self.out += "↑ ";
                for count in 0..reference.count {
                    let anchor = if count == 0 {
                        format!("_ref-{key}")
                    } else {
                        format!("_ref-{key}_{}", model.config().reference_suffix(count))
                    };
                    write!(
                        self.out,
                        r##"<sup><a href="#{anchor}" title="">{}</a></sup> "##,
                        count + 1
                    )?;
                }
            }
            walk(&reference.nodes, self)?;
            *self.out += "</li>";
        }
        *self.out += "</ol>";

        self.skip = skip;
        Ok(())
    }

    /// Writes an image, with its link and frame.
    fn image(&mut self, node: &TagNode, format: &ImageFormat) -> Result {
        let config = self.model.config();
        let caption = node.text_content();
        let framed = format.has_visible_caption();

        if framed {
            let location = format.location.as_deref().unwrap_or("right");
            write!(self.out, r#"<div class="thumb t{location}"><div class="thumbinner">"#)?;
        } else {
            match format.location.as_deref() {
                Some(location @ ("left" | "right")) => {
                    write!(self.out, r#"<div class="float{location}">"#)?;
                }
                Some("center") => *self.out += r#"<div class="center">"#,
                _ => {}
            }
        }

        let href = match format.link.as_deref() {
            None => Some(config.link_url(&format!("File:{}", format.filename))),
            Some("") => None,
            Some(link) if config.uri_scheme(link).is_some() => Some(link.to_string()),
            Some(link) => Some(config.link_url(link)),
        };
        if let Some(href) = &href {
            write!(self.out, r#"<a href="{}" class="image""#, escape_xml(href))?;
            if !caption.is_empty() {
                write!(self.out, r#" title="{}""#, escape_xml(&caption))?;
            }
            self.out.push('>');
        }

        write!(self.out, "<img")?;
        for (key, value) in &node.attributes {
            write!(self.out, r#" {key}="{}""#, escape_xml(value))?;
        }
        if let Some(width) = format.width {
            write!(self.out, r#" width="{width}""#)?;
        }
        if let Some(height) = format.height {
            write!(self.out, r#" height="{height}""#)?;
        }
        *self.out += " />";

        if href.is_some() {
            *self.out += "</a>";
        }

        if framed {
            *self.out += r#"<div class="thumbcaption">"#;
            let skip = core::mem::take(&mut self.skip);
            walk(&node.children, self)?;
            self.skip = skip;
            *self.out += "</div></div></div>";
        } else if matches!(format.location.as_deref(), Some("left" | "right" | "center")) {
            *self.out += "</div>";
        }
        Ok(())
    }
}

impl EventListener for HtmlWriter<'_, '_> {
    fn on_start(&mut self, node: &TagNode) -> Result {
        if self.skip != 0 {
            self.skip += 1;
            return Ok(());
        }

        match node.name.as_str() {
            "toc" => {
                if self.toc_pending {
                    self.toc()?;
                }
                self.skip = 1;
            }
            "references" => {
                self.references()?;
                self.skip = 1;
            }
            "img" if node.object.is_some() => {
                if let Some(ObjectAttribute::Image(format)) = &node.object {
                    self.image(node, format)?;
                }
                self.skip = 1;
            }
            "source" => {
                *self.out += r#"<pre class="source">"#;
            }
            name => {
                if self.toc_pending
                    && !self.toc_at_marker
                    && matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
                {
                    self.toc()?;
                }
                self.start_tag(name, node)?;
            }
        }
        Ok(())
    }

    fn on_text(&mut self, text: &str) -> Result {
        if self.skip == 0 {
            *self.out += &escape_xml(text);
        }
        Ok(())
    }

    fn on_end(&mut self, node: &TagNode) -> Result {
        if self.skip != 0 {
            self.skip -= 1;
        } else if node.name == "source" {
            *self.out += "</pre>";
        } else if !node.is_void() {
            write!(self.out, "</{}>", node.name)?;
        }
        Ok(())
    }
}

/// Writes one level of the table of contents. A nested list goes inside the
/// item of the header before it.
fn toc_list(out: &mut String, entries: &[TocEntry]) -> Result {
    *out += "<ul>";
    let mut item_open = false;
    for entry in entries {
        match entry {
            TocEntry::Section(header) => {
                if item_open {
                    *out += "</li>";
                }
                write!(
                    out,
                    r##"<li class="toclevel-{}"><a href="#{}">{}</a>"##,
                    header.level,
                    escape_xml(&header.anchor),
                    escape_xml(&header.text)
                )?;
                item_open = true;
            }
            TocEntry::List(list) => {
                if !item_open {
                    *out += "<li>";
                    item_open = true;
                }
                toc_list(out, list)?;
            }
        }
    }
    if item_open {
        *out += "</li>";
    }
    *out += "</ul>";
    Ok(())
}

/// An event listener which writes an indented trace of the events it
/// receives.
#[derive(Debug, Default)]
pub struct EventTrace {
    /// The trace.
    pub out: String,
    /// The current nesting depth.
    depth: usize,
}

impl EventListener for EventTrace {
    fn on_start(&mut self, node: &TagNode) -> Result {
        write!(self.out, "{:1$}start {2}", "", self.depth * 2, node.name)?;
        for (key, value) in &node.attributes {
            write!(self.out, " {key}={value:?}")?;
        }
        self.out.push('\n');
        self.depth += 1;
        Ok(())
    }

    fn on_text(&mut self, text: &str) -> Result {
        writeln!(self.out, "{:1$}text {2:?}", "", self.depth * 2, text)?;
        Ok(())
    }

    fn on_end(&mut self, node: &TagNode) -> Result {
        self.depth -= 1;
        writeln!(self.out, "{:1$}end {2}", "", self.depth * 2, node.name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Configuration, provider::MapContentProvider, renderer::Engine};

    fn html(text: &str) -> String {
        let engine = Engine::new(Configuration::default(), MapContentProvider::default());
        let mut model = Model::new(&engine, "Test");
        model.render_html(text)
    }

    #[test]
    fn escapes() {
        assert_eq!(html("a &lt; b & c"), "<p>a &lt; b &amp; c</p>");
        assert_eq!(
            html(r#"<span title="x&quot;y">z</span>"#),
            r#"<p><span title="x&quot;y">z</span></p>"#
        );
        assert_eq!(html("a<br>b"), "<p>a<br />b</p>");
    }

    #[test]
    fn events() {
        let mut p = TagNode::new("p").with_attribute("class", "x");
        p.append(Node::Text("a".into()));
        p.append(Node::Tag(TagNode::new("br")));
        let mut trace = EventTrace::default();
        walk(&[Node::Tag(p), Node::Text("b".into())], &mut trace).unwrap();
        assert_eq!(
            trace.out,
            "start p class=\"x\"\n  text \"a\"\n  start br\n  end br\nend p\ntext \"b\"\n"
        );
    }

    #[test]
    fn toc_before_first_header() {
        let out = html("intro\n== A ==\n== B ==\n=== C ===\n== D ==\n");
        let toc = out.find(r#"<table id="toc""#).expect("toc is written");
        assert!(toc > out.find("intro").unwrap());
        assert!(toc < out.find("<h2><span").unwrap());
        assert!(out.contains(
            r##"<ul><li class="toclevel-2"><a href="#A">A</a></li><li class="toclevel-2"><a href="#B">B</a><ul><li class="toclevel-3"><a href="#C">C</a></li></ul></li>"##
        ));
        assert!(!html("__NOTOC__\n== A ==\n== B ==\n== C ==\n== D ==").contains("toc"));
        assert!(!html("== A ==").contains(r#"id="toc""#));
    }

    #[test]
    fn toc_at_marker() {
        let out = html("== A ==\n__TOC__\n");
        let toc = out.find(r#"<table id="toc""#).expect("toc is written");
        assert!(toc > out.find("<h2><span").unwrap());
    }

    #[test]
    fn reference_list() {
        let out = html("a<ref>Note ''one''</ref>");
        assert!(out.ends_with(
            r##"<ol class="references"><li id="_note-1"><b><a href="#_ref-1" title="">↑</a></b> Note <i>one</i></li></ol>"##
        ));

        let out = html("a<ref name=\"n\">N</ref>b<ref name=\"n\"/>\n\n<references/>\n\nend");
        assert!(out.contains(
            r##"<li id="_note-n">↑ <sup><a href="#_ref-n" title="">1</a></sup> <sup><a href="#_ref-n_a" title="">2</a></sup> N</li>"##
        ));
        assert!(out.ends_with("<p>end</p>"), "list is not repeated");
    }

    #[test]
    fn images() {
        assert_eq!(
            html("[[File:A b.png|thumb|left|100px|The ''cap'']]"),
            r#"<p><div class="thumb tleft"><div class="thumbinner"><a href="/wiki/File:A_b.png" class="image" title="The cap"><img src="/images/A_b.png" alt="The &#x27;&#x27;cap&#x27;&#x27;" width="100" /></a><div class="thumbcaption">The <i>cap</i></div></div></div></p>"#
        );
        assert_eq!(
            html("[[Image:A.png|link=|alt=x]]"),
            r#"<p><img src="/images/A.png" alt="x" /></p>"#
        );
    }
}
