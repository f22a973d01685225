use std::borrow::Cow;
use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::bytes::Regex as BytesRegex;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack exhaustion from maliciously crafted deeply nested OPMLs.
pub const MAX_OPML_DEPTH: usize = 50;

/// OPML versions accepted on the root element without repair.
pub const SUPPORTED_VERSIONS: [&str; 2] = ["1.0", "2.0"];

/// Link prefix of the retired Google News feed source. Entries using it are
/// dropped on import.
pub const DEFAULT_DEPRECATED_LINK_PREFIX: &str = "http://news.google.com/news?";

/// Custom outline attribute marking full-text retrieval.
pub const DEFAULT_FULL_TEXT_ATTRIBUTE: &str = "retrieveFullText";

/// Root tag carrying a `N.N` version, the one header shape the repair pass rewrites.
static VERSIONED_ROOT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<opml\s+version\s*=\s*['"][0-9]\.[0-9]['"]\s*>"#)
        .expect("versioned root pattern is valid")
});

/// `encoding` label of a leading XML declaration.
static DECLARED_ENCODING: LazyLock<BytesRegex> = LazyLock::new(|| {
    BytesRegex::new(r#"^\s*<\?xml[^>]*?\sencoding\s*=\s*['"]([A-Za-z0-9._:-]+)['"]"#)
        .expect("declared encoding pattern is valid")
});

/// Labels read as ISO-8859-1, where every byte is the code point of the same value.
const LATIN1_LABELS: [&str; 6] = [
    "iso-8859-1",
    "iso8859-1",
    "iso_8859-1",
    "latin1",
    "latin-1",
    "l1",
];

/// Attributes the encoder writes on every feed outline.
pub const RESERVED_OUTLINE_ATTRIBUTES: [&str; 4] = ["text", "title", "type", "xmlUrl"];

/// Errors that can occur while reading or writing OPML.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// The content is not well-formed XML.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// The root element is not `<opml>`.
    #[error("Not an OPML document (root element: {0})")]
    NotOpml(String),

    /// The root element declares a version we do not read.
    #[error("Unsupported OPML version: {0}")]
    UnsupportedVersion(String),

    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// Reading the source or writing the destination failed.
    #[error("OPML I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for OpmlError {
    fn from(err: quick_xml::Error) -> Self {
        match err {
            quick_xml::Error::Io(io) => OpmlError::Io(std::io::Error::new(io.kind(), io.to_string())),
            other => OpmlError::XmlParse(other.to_string()),
        }
    }
}

/// Names the decoder and encoder depend on, loaded from the `[opml]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OpmlOptions {
    /// Feeds whose link starts with this prefix are skipped on import.
    pub deprecated_link_prefix: String,
    /// Outline attribute that carries the full-text flag.
    pub full_text_attribute: String,
}

impl Default for OpmlOptions {
    fn default() -> Self {
        Self {
            deprecated_link_prefix: DEFAULT_DEPRECATED_LINK_PREFIX.to_string(),
            full_text_attribute: DEFAULT_FULL_TEXT_ATTRIBUTE.to_string(),
        }
    }
}

impl OpmlOptions {
    /// Checks that `full_text_attribute` can be written as its own attribute.
    ///
    /// It must be a non-empty XML name and must not collide with
    /// [`RESERVED_OUTLINE_ATTRIBUTES`] or a namespace declaration.
    pub fn validate(&self) -> Result<(), String> {
        let name = self.full_text_attribute.as_str();
        if name.is_empty() {
            return Err("opml.full_text_attribute must not be empty".to_string());
        }
        if !is_xml_name(name) {
            return Err(format!(
                "opml.full_text_attribute '{}' is not a valid XML attribute name",
                name
            ));
        }
        if RESERVED_OUTLINE_ATTRIBUTES.contains(&name)
            || name == "xmlns"
            || name.starts_with("xmlns:")
        {
            return Err(format!(
                "opml.full_text_attribute '{}' clashes with an attribute written on every outline",
                name
            ));
        }
        Ok(())
    }

    pub(crate) fn is_deprecated(&self, link: &str) -> bool {
        !self.deprecated_link_prefix.is_empty() && link.starts_with(&self.deprecated_link_prefix)
    }
}

/// One `<outline>` element with all of its attributes and nested outlines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outline {
    attributes: Vec<(String, String)>,
    pub children: Vec<Outline>,
}

impl Outline {
    /// Unescaped value of the attribute `name`, if present.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Display title: `title`, falling back to `text`, then empty.
    pub fn title(&self) -> &str {
        self.attribute("title")
            .or_else(|| self.attribute("text"))
            .unwrap_or_default()
    }

    /// Feed URL from `xmlUrl`. A blank value counts as absent.
    pub fn xml_url(&self) -> Option<&str> {
        self.attribute("xmlUrl").filter(|url| !url.trim().is_empty())
    }

    fn from_element(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Self, OpmlError> {
        Ok(Self {
            attributes: read_attributes(e, reader)?,
            children: Vec::new(),
        })
    }
}

/// A parsed OPML document: the root version and the outlines under `<body>`.
#[derive(Debug, Clone, Default)]
pub struct OpmlDocument {
    pub version: Option<String>,
    pub outlines: Vec<Outline>,
}

impl OpmlDocument {
    /// Parses OPML text into an outline tree.
    ///
    /// The root element must be `<opml>`, with a version from
    /// [`SUPPORTED_VERSIONS`] when one is declared. Outlines are collected
    /// from `<body>` only; nesting beyond [`MAX_OPML_DEPTH`] is rejected.
    ///
    /// # Security
    ///
    /// SEC-002: quick-xml (0.37) never parses `<!ENTITY>` declarations.
    /// `decode_and_unescape_value()` resolves only the five XML builtins, so
    /// a custom entity reference is a parse error rather than an expansion.
    pub fn parse(content: &str) -> Result<Self, OpmlError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        let mut document = Self::default();
        let mut root_seen = false;
        let mut open: usize = 0;
        let mut in_body = false;
        // Outlines still waiting for their end tag, innermost last
        let mut pending: Vec<Outline> = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    if open == 0 {
                        document.version = read_root(&e, &reader, root_seen)?;
                        root_seen = true;
                    } else if open == 1 && e.name().as_ref() == b"body" {
                        in_body = true;
                    } else if in_body && e.name().as_ref() == b"outline" {
                        // SEC-003: Reject excessively nested OPMLs
                        if pending.len() >= MAX_OPML_DEPTH {
                            return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                        }
                        pending.push(Outline::from_element(&e, &reader)?);
                    }
                    open += 1;
                }
                Ok(Event::Empty(e)) => {
                    if open == 0 {
                        document.version = read_root(&e, &reader, root_seen)?;
                        root_seen = true;
                    } else if in_body && e.name().as_ref() == b"outline" {
                        let outline = Outline::from_element(&e, &reader)?;
                        attach(&mut pending, &mut document.outlines, outline);
                    }
                }
                Ok(Event::End(e)) => {
                    open = open.saturating_sub(1);
                    if in_body && e.name().as_ref() == b"outline" {
                        if let Some(outline) = pending.pop() {
                            attach(&mut pending, &mut document.outlines, outline);
                        }
                    } else if open == 1 && e.name().as_ref() == b"body" {
                        in_body = false;
                    }
                }
                Ok(Event::Eof) => break,
                Err(e) => {
                    return Err(OpmlError::XmlParse(format!(
                        "{} (at byte {})",
                        e,
                        reader.buffer_position()
                    )))
                }
                _ => {}
            }
        }

        if !root_seen {
            return Err(OpmlError::XmlParse("document has no root element".to_string()));
        }
        if open > 0 {
            return Err(OpmlError::XmlParse(format!(
                "unexpected end of document with {} unclosed element(s)",
                open
            )));
        }

        Ok(document)
    }

    /// Parses OPML text, retrying once with a repaired header on failure.
    ///
    /// The repair strips a `version="N.N"` attribute from the root tag (see
    /// [`repair_header`]). If there is nothing to repair, or the retry fails
    /// as well, the first error is returned.
    pub fn parse_or_repair(content: &str) -> Result<Self, OpmlError> {
        let first_err = match Self::parse(content) {
            Ok(document) => return Ok(document),
            Err(e) => e,
        };

        let Some(repaired) = repair_header(content) else {
            return Err(first_err);
        };

        tracing::debug!(error = %first_err, "OPML parse failed, retrying without root version");
        Self::parse(&repaired).map_err(|retry_err| {
            tracing::warn!(
                error = %first_err,
                retry_error = %retry_err,
                "OPML parse failed after header repair"
            );
            first_err
        })
    }
}

/// Rewrites `<opml version="N.N">` (single or double quotes) to a bare `<opml>`.
///
/// Returns `None` when the content has no such root tag.
pub fn repair_header(content: &str) -> Option<String> {
    match VERSIONED_ROOT.replace(content, "<opml>") {
        Cow::Borrowed(_) => None,
        Cow::Owned(repaired) => Some(repaired),
    }
}

/// Text of a raw OPML document.
///
/// UTF-8 input is borrowed as-is. Otherwise a declared ISO-8859-1 encoding
/// is honored, and anything else is read lossily with U+FFFD in place of
/// invalid sequences.
pub fn document_text(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(text);
    }

    let label = DECLARED_ENCODING
        .captures(bytes)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).to_ascii_lowercase());

    match label {
        Some(label) if LATIN1_LABELS.contains(&label.as_str()) => {
            Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect())
        }
        label => {
            tracing::warn!(
                encoding = label.as_deref().unwrap_or("undeclared"),
                "OPML is not valid UTF-8, replacing invalid bytes"
            );
            String::from_utf8_lossy(bytes)
        }
    }
}

/// XML `Name` production, restricted to what an attribute may carry.
fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.' | '\u{B7}'))
}

/// Hands a finished outline to its parent, or to the top level.
fn attach(pending: &mut [Outline], top_level: &mut Vec<Outline>, outline: Outline) {
    match pending.last_mut() {
        Some(parent) => parent.children.push(outline),
        None => top_level.push(outline),
    }
}

/// Validates the root element and returns its declared version.
fn read_root(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    root_seen: bool,
) -> Result<Option<String>, OpmlError> {
    if root_seen {
        return Err(OpmlError::XmlParse(
            "multiple root elements in document".to_string(),
        ));
    }
    if e.name().as_ref() != b"opml" {
        return Err(OpmlError::NotOpml(
            String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ));
    }

    let version = read_attributes(e, reader)?
        .into_iter()
        .find(|(key, _)| key == "version")
        .map(|(_, value)| value);

    if let Some(v) = &version {
        if !SUPPORTED_VERSIONS.contains(&v.as_str()) {
            return Err(OpmlError::UnsupportedVersion(v.clone()));
        }
    }

    Ok(version)
}

/// Reads and unescapes every attribute of an element.
///
/// Malformed attributes are skipped with a warning; an unknown entity in a
/// value is an error.
fn read_attributes(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
) -> Result<Vec<(String, String)>, OpmlError> {
    let decoder = reader.decoder();
    let mut attributes = Vec::new();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            value.into_owned(),
        ));
    }

    Ok(attributes)
}
