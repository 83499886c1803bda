//! Markup reader.
//!
//! Turns a configuration document into a small element tree. Names keep
//! their original spelling; lookups are case-insensitive. Repeated
//! attributes keep the first value and are returned separately so the
//! caller can apply its duplicate policy once the strict flag is known.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::config::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    pub text: String,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn required_attr(&self, name: &str) -> Result<&str> {
        self.attr(name)
            .ok_or_else(|| ConfigError::missing(&self.name, name))
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.children.iter().filter(move |c| c.is(name))
    }
}

/// An attribute that appeared more than once on one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateAttribute {
    pub element: String,
    pub attribute: String,
    pub skipped: String,
    pub kept: String,
}

impl DuplicateAttribute {
    /// Diagnostic line for the internal logger.
    pub fn message(&self) -> String {
        format!(
            "Skipping Duplicate value for '{}'. PropertyName={}. Skips Value={}. Existing Value={}",
            self.element, self.attribute, self.skipped, self.kept
        )
    }
}

#[derive(Debug, Clone)]
pub struct XmlDocument {
    pub root: XmlElement,
    pub duplicates: Vec<DuplicateAttribute>,
}

fn xml_error(reader: &Reader<&[u8]>, message: impl std::fmt::Display) -> ConfigError {
    ConfigError::Xml(format!("{} (at byte {})", message, reader.buffer_position()))
}

fn element(
    reader: &Reader<&[u8]>,
    start: &BytesStart<'_>,
    duplicates: &mut Vec<DuplicateAttribute>,
) -> Result<XmlElement> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut out = XmlElement::new(name);

    for attribute in start.attributes().with_checks(false) {
        let attribute = attribute.map_err(|e| xml_error(reader, e))?;
        let key = attribute.key;
        if key.as_ref() == b"xmlns" || key.prefix().is_some_and(|p| p.as_ref() == b"xmlns") {
            continue;
        }
        let local = String::from_utf8_lossy(key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| xml_error(reader, e))?
            .into_owned();

        match out.attr(&local) {
            Some(kept) => duplicates.push(DuplicateAttribute {
                element: out.name.clone(),
                attribute: local,
                skipped: value,
                kept: kept.to_string(),
            }),
            None => out.attributes.push((local, value)),
        }
    }
    Ok(out)
}

/// Parse `text` into an element tree.
pub fn parse_document(text: &str) -> Result<XmlDocument> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut duplicates = Vec::new();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let finished = match reader.read_event() {
            Ok(Event::Start(start)) => {
                let el = element(&reader, &start, &mut duplicates)?;
                stack.push(el);
                None
            }
            Ok(Event::Empty(start)) => Some(element(&reader, &start, &mut duplicates)?),
            Ok(Event::End(_)) => Some(
                stack
                    .pop()
                    .ok_or_else(|| xml_error(&reader, "unexpected closing tag"))?,
            ),
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| xml_error(&reader, e))?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text);
                }
                None
            }
            Ok(Event::CData(data)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
                None
            }
            Ok(Event::Eof) => break,
            Ok(_) => None,
            Err(e) => return Err(xml_error(&reader, e)),
        };

        if let Some(el) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(el),
                None if root.is_none() => root = Some(el),
                None => return Err(xml_error(&reader, "multiple root elements")),
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(xml_error(&reader, format!("element '{}' is not closed", open.name)));
    }
    let root = root.ok_or_else(|| ConfigError::Xml("document has no root element".to_string()))?;
    Ok(XmlDocument { root, duplicates })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_nested_elements_case_insensitively() {
        let doc = parse_document(
            r#"<?xml version="1.0"?>
            <nlog xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" autoReload="true">
                <targets><target xsi:type="Memory" name="m" layout="${message}"/></targets>
                <rules><logger name="*" writeTo="m"/></rules>
            </nlog>"#,
        )
        .unwrap();
        assert!(doc.root.is("NLOG"));
        assert_eq!(doc.root.attr("AUTORELOAD"), Some("true"));
        let target = &doc.root.children[0].children[0];
        assert_eq!(target.attr("type"), Some("Memory"));
        assert_eq!(target.attr("layout"), Some("${message}"));
        assert_eq!(doc.root.children_named("rules").count(), 1);
        assert!(doc.duplicates.is_empty());
    }

    #[test]
    fn test_duplicate_attributes_keep_first() {
        let doc = parse_document(r#"<nlog><logger name="a" Name="b"/></nlog>"#).unwrap();
        let logger = &doc.root.children[0];
        assert_eq!(logger.attr("name"), Some("a"));
        assert_eq!(
            doc.duplicates[0].message(),
            "Skipping Duplicate value for 'logger'. PropertyName=Name. Skips Value=b. Existing Value=a"
        );
    }

    #[test]
    fn test_malformed_markup_is_an_error() {
        assert!(matches!(parse_document("<nlog><targets></nlog>"), Err(ConfigError::Xml(_))));
        assert!(matches!(parse_document("<nlog>"), Err(ConfigError::Xml(_))));
        assert!(matches!(parse_document(""), Err(ConfigError::Xml(_))));
    }

    #[test]
    fn test_text_and_entities() {
        let doc = parse_document("<nlog><variable name='v'>a &amp; b</variable></nlog>").unwrap();
        assert_eq!(doc.root.children[0].text, "a & b");
    }
}
