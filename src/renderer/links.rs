//! Wikilink resolution.

use super::{Model, image::ImageFormat, scanner};
use crate::{
    common::{decode_html, encode_dot_url},
    title::{Namespace, ParsedPageName, split_namespace},
};

/// What a `[[...]]` link turned out to be.
#[derive(Debug, Eq, PartialEq)]
pub(crate) enum WikiLink {
    /// A link to a page on this wiki.
    Internal {
        /// The link URL.
        href: String,
        /// The full name of the target page.
        title: String,
        /// The raw Wikitext of the link label.
        text: String,
        /// Whether the link points to the page being rendered.
        is_self: bool,
    },
    /// A link to a page on another wiki.
    Interwiki {
        /// The link URL.
        href: String,
        /// The raw Wikitext of the link label.
        text: String,
    },
    /// A category assignment, which produces no inline output.
    Category,
    /// An embedded image.
    Image(ImageFormat),
    /// A direct link to a media file.
    Media {
        /// The file URL.
        href: String,
        /// The raw Wikitext of the link label.
        text: String,
    },
    /// A semantic attribute, which is shown as its value.
    Attribute {
        /// The raw Wikitext to show.
        text: String,
    },
    /// Not a valid link; the source is shown as-is.
    Invalid,
}

/// Resolves the body of a `[[...]]` link, recording it in the side lists of
/// the model.
///
/// The target is tried as a semantic relation or attribute, an interwiki
/// link, a category, a file, and finally an ordinary page, in that order. A
/// leading `:` skips straight to an ordinary link.
pub(crate) fn resolve(model: &mut Model<'_>, body: &str) -> WikiLink {
    let body = decode_html(body);
    let body = body.trim();
    let parts = scanner::split_by_pipe(body);
    let target = parts[0].trim();
    let alias = (parts.len() > 1).then(|| &body[parts[0].len() + 1..]);

    let config = model.engine().config();
    let forced = target.starts_with(':');

    let mut target = target;
    if config.semantic_web && !forced {
        if let Some((relation, value)) = target.split_once("::") {
            model
                .relations
                .push((relation.trim().to_string(), value.trim().to_string()));
            target = value.trim();
        } else if let Some((attribute, value)) = target.split_once(":=") {
            model
                .attributes
                .push((attribute.trim().to_string(), value.trim().to_string()));
            return WikiLink::Attribute {
                text: alias.unwrap_or(value).trim().to_string(),
            };
        }
    }

    if !forced
        && let Some((prefix, rest)) = target.split_once(':')
        && Namespace::find_by_name(prefix).is_none()
        && let Some(href) = config.interwiki.url(prefix, rest.trim())
    {
        model.interwiki_links.insert(target.to_string());
        return WikiLink::Interwiki {
            href,
            text: alias.unwrap_or(target).to_string(),
        };
    }

    let (page_name, hash) = match target.rsplit_once('#') {
        Some((page_name, hash)) => (page_name.trim(), Some(hash.trim())),
        None => (target, None),
    };

    if page_name.is_empty() || page_name == ":" {
        return match hash {
            Some(hash) if !hash.is_empty() => WikiLink::Internal {
                href: format!("#{}", encode_dot_url(hash)),
                title: model.title().to_string(),
                text: alias.unwrap_or(target).to_string(),
                is_self: false,
            },
            _ => WikiLink::Invalid,
        };
    }

    let page = ParsedPageName::parse(page_name, Namespace::main());
    if !page.valid {
        return WikiLink::Invalid;
    }

    if !forced {
        match page.namespace.id {
            Namespace::CATEGORY => {
                let sort_key = alias
                    .map(str::trim)
                    .filter(|alias| !alias.is_empty())
                    .unwrap_or(model.title())
                    .to_string();
                model.categories.insert(page.pagename, sort_key);
                return WikiLink::Category;
            }
            Namespace::FILE => {
                model.images.insert(page.pagename.clone());
                return WikiLink::Image(ImageFormat::parse(
                    &page.pagename,
                    parts[1..].iter().copied(),
                ));
            }
            Namespace::MEDIA => {
                return WikiLink::Media {
                    href: config.image_url(&page.pagename),
                    text: alias.unwrap_or(&page.pagename).to_string(),
                };
            }
            _ => {}
        }
    }

    let title = page.full_pagename();
    model.links.insert(title.clone());

    let mut href = config.link_url(&title);
    if let Some(hash) = hash.filter(|hash| !hash.is_empty()) {
        href.push('#');
        href += &encode_dot_url(hash);
    }

    let text = match alias {
        Some(alias) if alias.trim().is_empty() => pipe_trick(target),
        Some(alias) => alias.to_string(),
        None => target.trim_start_matches(':').to_string(),
    };

    WikiLink::Internal {
        is_self: hash.is_none() && title == model.title(),
        href,
        title,
        text,
    }
}

/// Derives a link label for an empty alias, like `[[Help:Foo (bar)|]]`, by
/// dropping the namespace and anything from the first `(` or `,` onwards.
fn pipe_trick(target: &str) -> String {
    let (_, name) = split_namespace(target.trim_start_matches(':'));
    let end = name.find(['(', ',']).unwrap_or(name.len());
    name[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Configuration, provider::MapContentProvider, renderer::Engine};

    fn engine(semantic_web: bool) -> Engine {
        let config = Configuration {
            semantic_web,
            ..Default::default()
        };
        Engine::new(config, MapContentProvider::default())
    }

    #[test]
    fn internal_links() {
        let engine = engine(false);
        let mut model = Model::new(&engine, "Test");
        assert_eq!(
            resolve(&mut model, "foo bar#Some section|the label"),
            WikiLink::Internal {
                href: "/wiki/Foo_bar#Some_section".into(),
                title: "Foo bar".into(),
                text: "the label".into(),
                is_self: false,
            }
        );
        assert_eq!(
            resolve(&mut model, "Test"),
            WikiLink::Internal {
                href: "/wiki/Test".into(),
                title: "Test".into(),
                text: "Test".into(),
                is_self: true,
            }
        );
        assert!(matches!(
            resolve(&mut model, "#Local"),
            WikiLink::Internal { href, .. } if href == "#Local"
        ));
        assert_eq!(resolve(&mut model, "a<b"), WikiLink::Invalid);
        assert_eq!(resolve(&mut model, ""), WikiLink::Invalid);
        assert!(model.links.contains("Foo bar"));
    }

    #[test]
    fn pipe_tricks() {
        assert_eq!(pipe_trick("Help:Foo (bar)"), "Foo");
        assert_eq!(pipe_trick("Paris, Texas"), "Paris");
        assert_eq!(pipe_trick(":Template:X"), "X");

        let engine = engine(false);
        let mut model = Model::new(&engine, "Test");
        assert!(matches!(
            resolve(&mut model, "Help:Foo (bar)|"),
            WikiLink::Internal { text, .. } if text == "Foo"
        ));
    }

    #[test]
    fn side_lists() {
        let engine = engine(false);
        let mut model = Model::new(&engine, "Test");
        assert_eq!(resolve(&mut model, "Category:Foo|Key"), WikiLink::Category);
        assert_eq!(resolve(&mut model, "Category:Bar"), WikiLink::Category);
        assert_eq!(
            model.categories.iter().collect::<Vec<_>>(),
            [
                (&"Foo".to_string(), &"Key".to_string()),
                (&"Bar".to_string(), &"Test".to_string())
            ]
        );

        assert!(matches!(
            resolve(&mut model, ":Category:Foo"),
            WikiLink::Internal { title, .. } if title == "Category:Foo"
        ));

        let WikiLink::Image(format) = resolve(&mut model, "Image:Foo.png|thumb|A [[b|c]] d") else {
            panic!("expected an image");
        };
        assert_eq!(format.filename, "Foo.png");
        assert_eq!(format.caption, "A [[b|c]] d");
        assert!(model.images.contains("Foo.png"));

        assert_eq!(
            resolve(&mut model, "wiktionary:some word|WT"),
            WikiLink::Interwiki {
                href: "https://en.wiktionary.org/wiki/some_word".into(),
                text: "WT".into(),
            }
        );
        assert!(model.interwiki_links.contains("wiktionary:some word"));
        assert!(
            matches!(
                resolve(&mut model, "Wikipedia:About"),
                WikiLink::Internal { title, .. } if title == "Wikipedia:About"
            ),
            "namespaces win over interwiki prefixes"
        );

        assert_eq!(
            resolve(&mut model, "Media:Foo.ogg"),
            WikiLink::Media {
                href: "/images/Foo.ogg".into(),
                text: "Foo.ogg".into(),
            }
        );
    }

    #[test]
    fn semantic_links() {
        let engine = engine(true);
        let mut model = Model::new(&engine, "Test");
        assert!(matches!(
            resolve(&mut model, "capital of::France"),
            WikiLink::Internal { title, .. } if title == "France"
        ));
        assert_eq!(
            resolve(&mut model, "population:=2,000"),
            WikiLink::Attribute { text: "2,000".into() }
        );
        assert_eq!(model.relations, [("capital of".into(), "France".into())]);
        assert_eq!(model.attributes, [("population".into(), "2,000".into())]);

        let engine = self::engine(false);
        let mut model = Model::new(&engine, "Test");
        assert!(
            matches!(
                resolve(&mut model, "a::b"),
                WikiLink::Internal { title, .. } if title == "A::b"
            ),
            "semantic links are off by default"
        );
        assert!(model.relations.is_empty());
    }
}
