//! Resource location resolution
//!
//! This module resolves the locations of schema fragments: the main schema
//! file, `<include href>` targets and external `<extends href>` rules. Hrefs
//! are always resolved against the location of the fragment that contains
//! them.

use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Resource location - can be a URL, file path, or string identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// File system path
    Path(PathBuf),
    /// URL (http, https, ftp, etc.)
    Url(Url),
    /// String identifier (for in-memory resources)
    String(String),
}

impl Location {
    /// Create a location from a string (auto-detect type)
    pub fn parse(s: &str) -> Result<Self> {
        if let Ok(url) = Url::parse(s) {
            if url.scheme() == "file" {
                if let Ok(path) = url.to_file_path() {
                    return Ok(Location::Path(path));
                }
            } else if url.scheme().len() > 1 {
                // single letter schemes are drive letters
                return Ok(Location::Url(url));
            }
        }

        let path = PathBuf::from(s);
        if path.exists() || s.starts_with('/') || s.starts_with('.') {
            return Ok(Location::Path(path));
        }

        Ok(Location::String(s.to_string()))
    }

    /// Location of a file on disk
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        Location::Path(path.as_ref().to_path_buf())
    }

    /// Resolve `href` relative to this location
    pub fn join(&self, href: &str) -> Result<Location> {
        if let Ok(url) = Url::parse(href) {
            if url.scheme().len() > 1 {
                return Location::parse(href);
            }
        }

        match self {
            Location::Path(base) => {
                let href_path = Path::new(href);
                if href_path.is_absolute() {
                    return Ok(Location::Path(href_path.to_path_buf()));
                }
                let dir = base.parent().unwrap_or_else(|| Path::new(""));
                Ok(Location::Path(normalize(&dir.join(href_path))))
            }
            Location::Url(base) => Ok(Location::Url(base.join(href)?)),
            Location::String(base) => {
                // in-memory identifiers resolve like relative paths
                let dir = Path::new(base).parent().unwrap_or_else(|| Path::new(""));
                let joined = normalize(&dir.join(href));
                Ok(Location::String(joined.to_string_lossy().replace('\\', "/")))
            }
        }
    }

    /// Get the location as a string
    pub fn as_str(&self) -> String {
        match self {
            Location::Path(p) => p.to_string_lossy().to_string(),
            Location::Url(u) => u.to_string(),
            Location::String(s) => s.clone(),
        }
    }

    /// Check if this is a remote location (URL)
    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Url(_))
    }

    /// Check if this is a local file
    pub fn is_file(&self) -> bool {
        matches!(self, Location::Path(_))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lexically remove `.` and `..` components
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
