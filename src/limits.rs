//! Limits and constraints for schema compilation and validation
//!
//! This module defines limits that keep hostile or accidentally recursive
//! inputs from exhausting resources: oversized documents, runaway include
//! chains, deep `extends` hierarchies and pathologically nested expressions.

use crate::error::{Error, Result};

/// Global limits configuration
#[derive(Debug, Clone)]
pub struct Limits {
    /// Maximum XML file size in bytes
    pub max_xml_size: usize,

    /// Maximum nesting of `<include>` fragments
    pub max_include_depth: usize,

    /// Maximum length of an `extends` chain
    pub max_extends_depth: usize,

    /// Maximum nesting of sub-expressions inside one XPath expression
    pub max_expression_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_xml_size: 100 * 1024 * 1024, // 100 MB
            max_include_depth: 64,
            max_extends_depth: 64,
            max_expression_depth: 256,
        }
    }
}

impl Limits {
    /// Create a new Limits with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create strict limits (more restrictive)
    pub fn strict() -> Self {
        Self {
            max_xml_size: 10 * 1024 * 1024, // 10 MB
            max_include_depth: 8,
            max_extends_depth: 8,
            max_expression_depth: 64,
        }
    }

    /// Create permissive limits (less restrictive, use with caution)
    pub fn permissive() -> Self {
        Self {
            max_xml_size: 1024 * 1024 * 1024, // 1 GB
            max_include_depth: 1024,
            max_extends_depth: 1024,
            max_expression_depth: 2048,
        }
    }

    /// Check if XML size is within limits
    pub fn check_xml_size(&self, size: usize) -> Result<()> {
        if size > self.max_xml_size {
            Err(Error::LimitExceeded(format!(
                "XML size {} bytes exceeds maximum {} bytes",
                size, self.max_xml_size
            )))
        } else {
            Ok(())
        }
    }

    /// Check if include nesting is within limits
    pub fn check_include_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_include_depth {
            Err(Error::LimitExceeded(format!(
                "Include depth {} exceeds maximum {}",
                depth, self.max_include_depth
            )))
        } else {
            Ok(())
        }
    }

    /// Check if an extends chain is within limits
    pub fn check_extends_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_extends_depth {
            Err(Error::LimitExceeded(format!(
                "Extends depth {} exceeds maximum {}",
                depth, self.max_extends_depth
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = Limits::default();
        assert_eq!(limits.max_include_depth, 64);
        assert!(limits.check_include_depth(10).is_ok());
        assert!(limits.check_include_depth(65).is_err());
    }

    #[test]
    fn test_strict_limits() {
        let limits = Limits::strict();
        assert!(limits.max_extends_depth < Limits::default().max_extends_depth);
        assert!(limits.check_extends_depth(9).is_err());
    }

    #[test]
    fn test_permissive_limits() {
        let limits = Limits::permissive();
        assert!(limits.max_xml_size > Limits::default().max_xml_size);
        assert!(limits.check_include_depth(500).is_ok());
    }

    #[test]
    fn test_check_xml_size() {
        let limits = Limits::default();
        assert!(limits.check_xml_size(1024).is_ok());
        assert!(matches!(
            limits.check_xml_size(200 * 1024 * 1024),
            Err(Error::LimitExceeded(_))
        ));
    }
}
