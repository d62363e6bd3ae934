//! XML document handling
//!
//! Two kinds of documents flow through the crate. Target documents are
//! parsed with `roxmltree` and validated in place. Schema documents are
//! parsed the same way and then copied into an owned [`Element`] tree, so
//! that include resolution can splice fragments from several files into a
//! single tree before the typed schema model is built.

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::namespaces::{QName, SCHEMATRON_NAMESPACE};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

/// Parse a target document
///
/// DTDs are rejected, which also rules out entity expansion attacks.
pub fn parse_document<'input>(
    text: &'input str,
    limits: &Limits,
) -> Result<roxmltree::Document<'input>> {
    limits.check_xml_size(text.len())?;
    // default parsing options reject DTDs
    Ok(roxmltree::Document::parse(text)?)
}

/// Child of an owned element
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Nested element
    Element(Element),
    /// Character data
    Text(String),
}

/// Owned XML element
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Element qualified name
    pub qname: QName,
    /// Prefix used in the source, kept for serialization
    pub prefix: Option<String>,
    /// Element attributes, in document order
    pub attributes: Vec<(QName, String)>,
    /// Child nodes
    pub children: Vec<Node>,
}

impl Element {
    /// Create a new element
    pub fn new(qname: QName) -> Self {
        Self {
            qname,
            prefix: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Create an element in the Schematron namespace
    pub fn schematron(local_name: &str) -> Self {
        Self::new(QName::namespaced(SCHEMATRON_NAMESPACE, local_name))
    }

    /// Parse text into an owned element tree
    pub fn parse(text: &str, limits: &Limits) -> Result<Self> {
        let document = parse_document(text, limits)?;
        Ok(Self::from_node(document.root_element()))
    }

    /// Copy a roxmltree element and its subtree
    pub fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
        let tag = node.tag_name();
        let mut element = Element::new(QName::new(tag.namespace(), tag.name()));
        element.prefix = tag
            .namespace()
            .and_then(|ns| node.lookup_prefix(ns))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        for attr in node.attributes() {
            element
                .attributes
                .push((QName::new(attr.namespace(), attr.name()), attr.value().to_string()));
        }

        for child in node.children() {
            if child.is_element() {
                element.children.push(Node::Element(Self::from_node(child)));
            } else if child.is_text() {
                if let Some(text) = child.text() {
                    element.children.push(Node::Text(text.to_string()));
                }
            }
        }

        element
    }

    /// Get the local name of the element
    pub fn local_name(&self) -> &str {
        &self.qname.local_name
    }

    /// Get the namespace of the element
    pub fn namespace(&self) -> Option<&str> {
        self.qname.namespace.as_deref()
    }

    /// Whether this element is `local_name` in the Schematron namespace
    pub fn is_schematron(&self, local_name: &str) -> bool {
        self.qname.is_schematron(local_name)
    }

    /// Get an unqualified attribute value by name
    pub fn get_attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(qname, _)| qname.namespace.is_none() && qname.local_name == name)
            .map(|(_, value)| value.as_str())
    }

    /// Get an attribute value by qualified name
    pub fn get_attribute_qname(&self, qname: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(q, _)| q == qname)
            .map(|(_, value)| value.as_str())
    }

    /// Set an unqualified attribute, replacing an existing value
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .attributes
            .iter_mut()
            .find(|(q, _)| q.namespace.is_none() && q.local_name == name)
        {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((QName::local(name), value)),
        }
    }

    /// Add a child element
    pub fn add_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Iterate over child elements
    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Concatenated descendant text
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Serialize the element as XML markup
    ///
    /// Namespace declarations are not emitted; prefixes are kept as written.
    pub fn to_xml_string(&self) -> String {
        let mut writer = Writer::new(Vec::new());
        // writing into a Vec cannot fail
        let _ = self.write_to(&mut writer);
        String::from_utf8_lossy(&writer.into_inner()).into_owned()
    }

    fn lexical_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.qname.local_name),
            None => self.qname.local_name.clone(),
        }
    }

    fn write_to(&self, writer: &mut Writer<Vec<u8>>) -> std::result::Result<(), quick_xml::Error> {
        let name = self.lexical_name();
        let mut start = BytesStart::new(name.as_str());
        for (qname, value) in &self.attributes {
            start.push_attribute((qname.local_name.as_str(), value.as_str()));
        }

        if self.children.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        for child in &self.children {
            match child {
                Node::Text(t) => writer.write_event(Event::Text(BytesText::new(t)))?,
                Node::Element(e) => e.write_to(writer)?,
            }
        }
        writer.write_event(Event::End(BytesEnd::new(name.as_str())))?;
        Ok(())
    }

    /// Short description used in error messages, e.g. `<rule id="r1">`
    pub fn describe(&self) -> String {
        let mut out = format!("<{}", self.local_name());
        for key in ["id", "name", "href", "context", "test", "is-a", "pattern"] {
            if let Some(value) = self.get_attribute(key) {
                out.push_str(&format!(" {}=\"{}\"", key, value));
            }
        }
        out.push('>');
        out
    }
}

/// Convert a parse failure of a named source into a crate error
pub(crate) fn xml_error(source: &str, err: Error) -> Error {
    match err {
        Error::Xml(msg) => Error::Xml(format!("{}: {}", source, msg)),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_xml() {
        let xml = r#"<root><child>text</child></root>"#;
        let root = Element::parse(xml, &Limits::default()).unwrap();

        assert_eq!(root.local_name(), "root");
        let children: Vec<_> = root.child_elements().collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].text_content(), "text");
    }

    #[test]
    fn test_parse_with_attributes() {
        let xml = r#"<root attr1="value1" attr2="value2"><child/></root>"#;
        let root = Element::parse(xml, &Limits::default()).unwrap();

        assert_eq!(root.get_attribute("attr1"), Some("value1"));
        assert_eq!(root.get_attribute("attr2"), Some("value2"));
        assert_eq!(root.get_attribute("missing"), None);
    }

    #[test]
    fn test_schematron_namespace() {
        let xml = r#"<sch:schema xmlns:sch="http://purl.oclc.org/dsdl/schematron"><sch:pattern/></sch:schema>"#;
        let root = Element::parse(xml, &Limits::default()).unwrap();

        assert!(root.is_schematron("schema"));
        assert_eq!(root.prefix.as_deref(), Some("sch"));
        assert!(root.child_elements().all(|c| c.is_schematron("pattern")));
    }

    #[test]
    fn test_mixed_content_is_kept() {
        let xml = r#"<assert>Weight <value-of select="@w"/> too high</assert>"#;
        let root = Element::parse(xml, &Limits::default()).unwrap();

        assert_eq!(root.children.len(), 3);
        assert!(matches!(&root.children[0], Node::Text(t) if t == "Weight "));
        assert!(matches!(&root.children[2], Node::Text(t) if t == " too high"));
    }

    #[test]
    fn test_to_xml_string() {
        let xml = r#"<list><item n="1">a &amp; b</item><empty/></list>"#;
        let root = Element::parse(xml, &Limits::default()).unwrap();

        assert_eq!(
            root.to_xml_string(),
            r#"<list><item n="1">a &amp; b</item><empty/></list>"#
        );
    }

    #[test]
    fn test_dtd_rejected() {
        let xml = r#"<!DOCTYPE r [<!ENTITY e "x">]><r>&e;</r>"#;
        assert!(matches!(parse_document(xml, &Limits::default()), Err(Error::Xml(_))));
    }

    #[test]
    fn test_describe() {
        let mut rule = Element::schematron("rule");
        rule.set_attribute("id", "r1");
        rule.set_attribute("context", "item");
        assert_eq!(rule.describe(), r#"<rule id="r1" context="item">"#);
    }
}
