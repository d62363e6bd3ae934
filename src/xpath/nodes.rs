//! Node view over a roxmltree document
//!
//! roxmltree does not model attributes as nodes, so [`XNode`] wraps tree
//! nodes and addresses attributes by their owner element and index.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use roxmltree::NodeType;

use crate::namespaces::XML_NAMESPACE;

/// Kind of an XPath node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Document node
    Root,
    /// Element node
    Element,
    /// Attribute node
    Attribute,
    /// Text node
    Text,
    /// Comment node
    Comment,
    /// Processing instruction node
    ProcessingInstruction,
}

/// A node of a target document
#[derive(Debug, Clone, Copy)]
pub enum XNode<'a, 'i: 'a> {
    /// A node of the roxmltree tree
    Tree(roxmltree::Node<'a, 'i>),
    /// The `index`-th attribute of `owner`
    Attribute {
        /// Element carrying the attribute
        owner: roxmltree::Node<'a, 'i>,
        /// Attribute position on the element
        index: usize,
    },
}

impl<'a, 'i: 'a> XNode<'a, 'i> {
    /// The document node of `document`
    pub fn root_of(document: &'a roxmltree::Document<'i>) -> Self {
        XNode::Tree(document.root())
    }

    /// Sort key in document order; attributes sort after their element
    pub fn order_key(&self) -> (usize, usize) {
        match self {
            XNode::Tree(node) => (node.id().get_usize(), 0),
            XNode::Attribute { owner, index } => (owner.id().get_usize(), index + 1),
        }
    }

    /// Node kind
    pub fn kind(&self) -> NodeKind {
        match self {
            XNode::Attribute { .. } => NodeKind::Attribute,
            XNode::Tree(node) => match node.node_type() {
                NodeType::Root => NodeKind::Root,
                NodeType::Element => NodeKind::Element,
                NodeType::Text => NodeKind::Text,
                NodeType::Comment => NodeKind::Comment,
                NodeType::PI => NodeKind::ProcessingInstruction,
            },
        }
    }

    /// The wrapped tree node, if this is not an attribute
    pub fn as_tree(&self) -> Option<roxmltree::Node<'a, 'i>> {
        match self {
            XNode::Tree(node) => Some(*node),
            XNode::Attribute { .. } => None,
        }
    }

    fn attribute(&self) -> Option<roxmltree::Attribute<'a, 'i>> {
        match self {
            XNode::Attribute { owner, index } => owner.attributes().nth(*index),
            XNode::Tree(_) => None,
        }
    }

    /// Expanded name as `(namespace, local name)`
    ///
    /// Processing instructions are named by their target.
    pub fn expanded_name(&self) -> Option<(Option<&'a str>, &'a str)> {
        match self {
            XNode::Attribute { .. } => self.attribute().map(|a| (a.namespace(), a.name())),
            XNode::Tree(node) => match node.node_type() {
                NodeType::Element => {
                    let tag = node.tag_name();
                    Some((tag.namespace(), tag.name()))
                }
                NodeType::PI => node.pi().map(|pi| (None, pi.target)),
                _ => None,
            },
        }
    }

    /// Local name, or `""` for unnamed nodes
    pub fn local_name(&self) -> &'a str {
        self.expanded_name().map(|(_, local)| local).unwrap_or("")
    }

    /// Namespace URI, or `""`
    pub fn namespace_uri(&self) -> &'a str {
        self.expanded_name().and_then(|(ns, _)| ns).unwrap_or("")
    }

    /// Qualified name using the prefix in scope at the node
    pub fn qualified_name(&self) -> String {
        let Some((namespace, local)) = self.expanded_name() else {
            return String::new();
        };
        let scope = match self {
            XNode::Tree(node) => *node,
            XNode::Attribute { owner, .. } => *owner,
        };
        let prefix = match namespace {
            Some(XML_NAMESPACE) => Some("xml"),
            Some(uri) => scope.lookup_prefix(uri).filter(|p| !p.is_empty()),
            None => None,
        };
        match prefix {
            Some(prefix) => format!("{}:{}", prefix, local),
            None => local.to_string(),
        }
    }

    /// XPath string value
    pub fn string_value(&self) -> String {
        match self {
            XNode::Attribute { .. } => self
                .attribute()
                .map(|a| a.value().to_string())
                .unwrap_or_default(),
            XNode::Tree(node) => match node.node_type() {
                NodeType::Root | NodeType::Element => node
                    .descendants()
                    .filter(|n| n.is_text())
                    .filter_map(|n| n.text())
                    .collect(),
                NodeType::Text | NodeType::Comment => node.text().unwrap_or("").to_string(),
                NodeType::PI => node
                    .pi()
                    .and_then(|pi| pi.value)
                    .unwrap_or("")
                    .to_string(),
            },
        }
    }

    /// Parent node; the owner element for attributes
    pub fn parent(&self) -> Option<XNode<'a, 'i>> {
        match self {
            XNode::Tree(node) => node.parent().map(XNode::Tree),
            XNode::Attribute { owner, .. } => Some(XNode::Tree(*owner)),
        }
    }

    /// The document node
    pub fn root(&self) -> XNode<'a, 'i> {
        match self {
            XNode::Tree(node) => XNode::Tree(node.document().root()),
            XNode::Attribute { owner, .. } => XNode::Tree(owner.document().root()),
        }
    }

    /// Attribute nodes of an element
    pub fn attributes(&self) -> Vec<XNode<'a, 'i>> {
        match self {
            XNode::Tree(node) if node.is_element() => (0..node.attributes().count())
                .map(|index| XNode::Attribute { owner: *node, index })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Value of `xml:lang` in scope at this node
    pub fn language(&self) -> Option<&'a str> {
        let start = match self {
            XNode::Tree(node) => *node,
            XNode::Attribute { owner, .. } => *owner,
        };
        start
            .ancestors()
            .find_map(|n| n.attribute((XML_NAMESPACE, "lang")))
    }
}

impl PartialEq for XNode<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for XNode<'_, '_> {}

impl Hash for XNode<'_, '_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.order_key().hash(state);
    }
}

impl PartialOrd for XNode<'_, '_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XNode<'_, '_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Sort nodes in document order and drop duplicates
pub fn sort_document_order(nodes: &mut Vec<XNode<'_, '_>>) {
    nodes.sort();
    nodes.dedup();
}

/// Every node the executor visits, in document order
///
/// Text nodes are skipped; attributes follow their element.
pub fn document_nodes<'a, 'i>(document: &'a roxmltree::Document<'i>) -> Vec<XNode<'a, 'i>> {
    let mut out = Vec::new();
    for node in document.root().descendants() {
        if node.is_text() {
            continue;
        }
        let x = XNode::Tree(node);
        out.push(x);
        out.extend(x.attributes());
    }
    out
}
