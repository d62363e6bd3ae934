//! Resource loading utilities
//!
//! This module loads schema files, schema fragments and target documents
//! as text, enforcing the configured size limit.

use crate::error::{Error, Result};
use crate::limits::Limits;
use crate::locations::Location;
use indexmap::IndexMap;
use std::fs;
use std::io::ErrorKind;

/// Resource loader for schemas and documents
#[derive(Debug, Clone)]
pub struct Loader {
    /// Resource limits
    limits: Limits,
    /// Whether to allow remote resources
    allow_remote: bool,
    /// In-memory resources, keyed by location string
    memory: IndexMap<String, String>,
}

impl Loader {
    /// Create a new loader with default settings
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
            allow_remote: false,
            memory: IndexMap::new(),
        }
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set whether to allow remote resources
    pub fn with_allow_remote(mut self, allow: bool) -> Self {
        self.allow_remote = allow;
        self
    }

    /// Register an in-memory resource served for `Location::String(name)`
    pub fn with_resource(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.memory.insert(name.into(), content.into());
        self
    }

    /// Load a resource as a string
    pub fn load(&self, location: &Location) -> Result<String> {
        let content = match location {
            Location::Path(path) => fs::read_to_string(path).map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    Error::NotFound(path.display().to_string())
                } else {
                    Error::Resource(format!("Failed to read file '{}': {}", path.display(), e))
                }
            })?,
            Location::Url(url) => {
                if !self.allow_remote {
                    return Err(Error::Resource(format!(
                        "Remote resources are not allowed: {}",
                        url
                    )));
                }
                // No network client is bundled; file URLs are mapped to paths
                // by Location::parse before reaching here.
                return Err(Error::Resource(format!(
                    "No handler for URL scheme '{}': {}",
                    url.scheme(),
                    url
                )));
            }
            Location::String(name) => self
                .memory
                .get(name)
                .cloned()
                .ok_or_else(|| Error::NotFound(name.clone()))?,
        };

        self.limits.check_xml_size(content.len())?;
        Ok(content)
    }

    /// The limits this loader enforces
    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "<schema/>").unwrap();

        let location = Location::Path(file.path().to_path_buf());
        let content = Loader::new().load(&location).unwrap();

        assert!(content.contains("<schema/>"));
    }

    #[test]
    fn test_load_missing_file() {
        let location = Location::from_path("/nonexistent/dir/schema.sch");
        let result = Loader::new().load(&location);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_load_in_memory() {
        let loader = Loader::new().with_resource("inc.sch", "<pattern/>");
        let content = loader.load(&Location::String("inc.sch".to_string())).unwrap();
        assert_eq!(content, "<pattern/>");

        let missing = loader.load(&Location::String("other.sch".to_string()));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_remote_rejected() {
        let location = Location::parse("http://example.com/schema.sch").unwrap();
        assert!(matches!(Loader::new().load(&location), Err(Error::Resource(_))));
    }

    #[test]
    fn test_size_limit() {
        let mut file = NamedTempFile::new().unwrap();
        let large_content = "x".repeat(11 * 1024 * 1024); // 11 MB
        write!(file, "{}", large_content).unwrap();

        let location = Location::Path(file.path().to_path_buf());
        let loader = Loader::new().with_limits(Limits::strict());

        // Strict limits (10 MB max) should reject 11MB file
        assert!(matches!(loader.load(&location), Err(Error::LimitExceeded(_))));
    }
}
