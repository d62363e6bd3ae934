//! XML namespace handling
//!
//! This module provides expanded names (QNames) and the ordered prefix
//! table a schema declares with `<ns prefix="..." uri="..."/>`. The table
//! is what XPath expressions see when they resolve prefixed names.

use crate::error::{schema_error, Result, SchemaErrorKind};
use indexmap::IndexMap;
use std::fmt;

/// ISO Schematron namespace
pub const SCHEMATRON_NAMESPACE: &str = "http://purl.oclc.org/dsdl/schematron";

/// Schematron Validation Report Language namespace
pub const SVRL_NAMESPACE: &str = "http://purl.oclc.org/dsdl/svrl";

/// XML namespace (bound to the `xml` prefix)
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// XPath functions namespace (the `fn` prefix)
pub const XPATH_FUNCTIONS_NAMESPACE: &str = "http://www.w3.org/2005/xpath-functions";

/// XML Schema namespace (the `xs` prefix in type names and constructors)
pub const XSD_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema";

/// XSLT namespace, used to recognise host-language elements in a schema
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Qualified name (QName) - combination of namespace and local name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QName {
    /// Namespace URI (None for no namespace)
    pub namespace: Option<String>,
    /// Local name
    pub local_name: String,
}

impl QName {
    /// Create a new QName
    pub fn new(namespace: Option<impl Into<String>>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.map(|s| s.into()),
            local_name: local_name.into(),
        }
    }

    /// Create a QName without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            local_name: local_name.into(),
        }
    }

    /// Create a QName with a namespace
    pub fn namespaced(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            local_name: local_name.into(),
        }
    }

    /// Whether this name is `local_name` in the Schematron namespace
    pub fn is_schematron(&self, local_name: &str) -> bool {
        self.namespace.as_deref() == Some(SCHEMATRON_NAMESPACE) && self.local_name == local_name
    }
}

impl fmt::Display for QName {
    /// Clark notation: `{uri}local`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{{{}}}{}", ns, self.local_name),
            None => write!(f, "{}", self.local_name),
        }
    }
}

/// Ordered prefix to namespace URI table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceTable {
    prefixes: IndexMap<String, String>,
}

impl NamespaceTable {
    /// Create a new table with only the `xml` prefix bound
    pub fn new() -> Self {
        let mut prefixes = IndexMap::new();
        prefixes.insert("xml".to_string(), XML_NAMESPACE.to_string());
        Self { prefixes }
    }

    /// Bind a prefix; a later binding of the same prefix replaces the earlier one
    pub fn bind(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.prefixes.insert(prefix.into(), uri.into());
    }

    /// Get the namespace for a prefix
    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.prefixes.get(prefix).map(|s| s.as_str())
    }

    /// Find a prefix bound to `uri`
    pub fn prefix_for(&self, uri: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(_, u)| u.as_str() == uri)
            .map(|(p, _)| p.as_str())
    }

    /// Iterate over the declared bindings, `xml` excluded
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes
            .iter()
            .filter(|(p, _)| p.as_str() != "xml")
            .map(|(p, u)| (p.as_str(), u.as_str()))
    }

    /// Number of declared bindings, `xml` excluded
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True if nothing besides `xml` is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve a lexical QName; unprefixed names are in no namespace
    pub fn resolve(&self, lexical: &str) -> Result<QName> {
        if let Some((prefix, local)) = lexical.split_once(':') {
            let namespace = self.get(prefix).ok_or_else(|| {
                schema_error(
                    SchemaErrorKind::UnresolvedReference,
                    format!("unknown namespace prefix '{}'", prefix),
                )
            })?;
            Ok(QName::namespaced(namespace, local))
        } else {
            Ok(QName::local(lexical))
        }
    }
}
