//! Minimal owned element tree on top of the `xml-rs` pull parser.
//!
//! The AQHI documents don't share a schema, so records are found by walking
//! the tree and looking at tag names instead of deserializing into structs.

use thiserror::Error;
use xml::reader::{EventReader, XmlEvent};

#[derive(Debug, Error)]
pub enum XmlTreeError {
    #[error("malformed xml: {0}")]
    Malformed(#[from] xml::reader::Error),
    #[error("document has no root element")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Lowercased local name, namespace prefix dropped
    pub tag: String,
    /// Direct text content, trimmed
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn parse(bytes: &[u8]) -> Result<Element, XmlTreeError> {
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        for event in EventReader::new(bytes) {
            match event? {
                XmlEvent::StartElement { name, .. } => stack.push(Element {
                    tag: name.local_name.to_lowercase(),
                    ..Default::default()
                }),
                XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
                XmlEvent::EndElement { .. } => {
                    let Some(mut finished) = stack.pop() else {
                        continue;
                    };
                    finished.text = finished.text.trim().to_string();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(finished),
                        None => root = Some(finished),
                    }
                }
                _ => {}
            }
        }

        root.ok_or(XmlTreeError::Empty)
    }

    /// Pre-order walk over this element and everything below it
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}
