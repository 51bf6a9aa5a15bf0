//! Code for handling `[[File:...]]` image links.

use crate::config::Configuration;

/// Display options for an image link.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ImageFormat {
    /// The file name, without its namespace.
    pub filename: String,
    /// The target of the image link. `None` links to the file page, and an
    /// empty string disables the link.
    pub link: Option<String>,
    /// The caption. Rendered below the image in `thumb` or `frame` format, and
    /// otherwise as a tooltip.
    pub caption: String,
    /// The alternative text.
    pub alt: Option<String>,
    /// One of `frameless`, `frame`, or `thumb`.
    pub kind: Option<String>,
    /// One of `left`, `right`, `center`, or `none`.
    pub location: Option<String>,
    /// The requested width, in pixels.
    pub width: Option<u32>,
    /// The requested height, in pixels.
    pub height: Option<u32>,
}

impl ImageFormat {
    /// Parses the pipe-separated options of an image link. Any option which is
    /// not recognised is the caption; the last one wins.
    pub(crate) fn parse<'a>(filename: &str, options: impl IntoIterator<Item = &'a str>) -> Self {
        let mut format = Self {
            filename: filename.to_string(),
            ..Default::default()
        };

        for option in options {
            let value = option.trim();
            if let Some((name, rest)) = value.split_once('=') {
                // “If there is a space character between link and the equals
                // sign, the link statement will be treated as a caption.”
                match name {
                    "link" => {
                        format.link = Some(rest.trim().to_string());
                        continue;
                    }
                    "alt" => {
                        format.alt = Some(rest.trim().to_string());
                        continue;
                    }
                    _ => {}
                }
            }

            if let Some(size) = value.strip_suffix("px") {
                let size = size.trim_end();
                let (w, h) = size.split_once('x').unwrap_or((size, ""));
                let (width, height) = (w.parse::<u32>().ok(), h.parse::<u32>().ok());
                if width.is_some() || height.is_some() {
                    format.width = width;
                    format.height = height;
                    continue;
                }
            }

            match value {
                "left" | "right" | "center" | "none" => {
                    format.location = Some(value.to_string());
                }
                "frameless" | "frame" | "framed" | "thumb" | "thumbnail" => {
                    format.kind = Some(
                        match value {
                            "framed" => "frame",
                            "thumbnail" => "thumb",
                            _ => value,
                        }
                        .to_string(),
                    );
                }
                _ => format.caption = value.to_string(),
            }
        }

        format
    }

    /// Returns true if the caption is shown under the image instead of as a
    /// tooltip.
    pub fn has_visible_caption(&self) -> bool {
        matches!(self.kind.as_deref(), Some("thumb" | "frame"))
    }

    /// The URL of the image file.
    pub fn src(&self, config: &Configuration) -> String {
        config.image_url(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options() {
        let format = ImageFormat::parse(
            "Foo.png",
            ["thumb", "200px", "left", "alt=A foo", "A caption", "link=Bar"],
        );
        assert_eq!(
            format,
            ImageFormat {
                filename: "Foo.png".into(),
                link: Some("Bar".into()),
                caption: "A caption".into(),
                alt: Some("A foo".into()),
                kind: Some("thumb".into()),
                location: Some("left".into()),
                width: Some(200),
                height: None,
            }
        );
        assert!(format.has_visible_caption());
    }

    #[test]
    fn sizes() {
        let format = ImageFormat::parse("a.png", ["100x50px"]);
        assert_eq!((format.width, format.height), (Some(100), Some(50)));
        let format = ImageFormat::parse("a.png", ["x50px"]);
        assert_eq!((format.width, format.height), (None, Some(50)));
        let format = ImageFormat::parse("a.png", ["wide px"]);
        assert_eq!(format.caption, "wide px", "not a size");
    }

    #[test]
    fn spaced_keyword_is_caption() {
        let format = ImageFormat::parse("a.png", ["link =Bar"]);
        assert_eq!(format.link, None);
        assert_eq!(format.caption, "link =Bar");
    }
}
