//! Error types for schematron-rs
//!
//! This module defines the error types used throughout the library. Errors
//! fall into two families: schema errors (the schema itself is broken, either
//! structurally or because an expression cannot be bound) and input errors
//! (a file is missing, a fragment is unreachable, XML is malformed).
//! Runtime expression failures are not errors at this level; they are
//! recorded inside the validation report.

use std::fmt;
use thiserror::Error;

/// Result type alias using the schematron Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for schematron operations
#[derive(Error, Debug)]
pub enum Error {
    /// The schema is structurally invalid or cannot be bound
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Resource loading error
    #[error("resource error: {0}")]
    Resource(String),

    /// A referenced resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Limit exceeded error
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML parsing error
    #[error("XML error: {0}")]
    Xml(String),

    /// URL parsing error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error is a schema-authoring problem
    pub fn is_schema_error(&self) -> bool {
        matches!(self, Error::Schema(_))
    }

    /// True when the error comes from the environment or the input documents
    pub fn is_input_error(&self) -> bool {
        !self.is_schema_error()
    }

    /// The schema error kind, if this is a schema error
    pub fn schema_kind(&self) -> Option<SchemaErrorKind> {
        match self {
            Error::Schema(err) => Some(err.kind),
            _ => None,
        }
    }
}

impl From<roxmltree::Error> for Error {
    fn from(err: roxmltree::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

/// Classification of schema errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaErrorKind {
    /// An include chain refers back to one of its own ancestors
    CyclicInclude,
    /// A rule extends itself, directly or indirectly
    CyclicExtends,
    /// An `extends` references a rule id that does not exist
    UnresolvedExtends,
    /// An `is-a` references a missing or non-abstract pattern
    UnknownAbstractPattern,
    /// An id that must be unique is declared twice
    DuplicateId,
    /// A phase, property or diagnostic reference has no target
    UnresolvedReference,
    /// The requested phase does not exist
    UnknownPhase,
    /// The query binding is not supported
    UnsupportedBinding,
    /// An expression failed to compile
    ExpressionCompile,
    /// The schema document does not have the expected shape
    InvalidStructure,
}

impl SchemaErrorKind {
    /// Binding errors are raised after the schema has been made concrete
    pub fn is_binding_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownPhase | Self::UnsupportedBinding | Self::ExpressionCompile
        )
    }
}

impl fmt::Display for SchemaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CyclicInclude => "cyclic include",
            Self::CyclicExtends => "cyclic extends",
            Self::UnresolvedExtends => "unresolved extends",
            Self::UnknownAbstractPattern => "unknown abstract pattern",
            Self::DuplicateId => "duplicate id",
            Self::UnresolvedReference => "unresolved reference",
            Self::UnknownPhase => "unknown phase",
            Self::UnsupportedBinding => "unsupported query binding",
            Self::ExpressionCompile => "expression compile error",
            Self::InvalidStructure => "invalid schema structure",
        };
        write!(f, "{}", s)
    }
}

/// Schema error with context
#[derive(Debug, Clone)]
pub struct SchemaError {
    /// What went wrong
    pub kind: SchemaErrorKind,
    /// Error message
    pub message: String,
    /// The schema element implicated in the error
    pub element: Option<String>,
    /// The offending expression, for compile errors
    pub expression: Option<String>,
    /// Underlying reason reported by a collaborator
    pub reason: Option<String>,
}

impl SchemaError {
    /// Create a new schema error
    pub fn new(kind: SchemaErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            element: None,
            expression: None,
            reason: None,
        }
    }

    /// Set the implicated schema element
    pub fn with_element(mut self, element: impl Into<String>) -> Self {
        self.element = Some(element.into());
        self
    }

    /// Set the offending expression
    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    /// Set the reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Error kind
    pub fn kind(&self) -> SchemaErrorKind {
        self.kind
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;

        if let Some(ref expression) = self.expression {
            write!(f, "\n\nExpression: {}", expression)?;
        }

        if let Some(ref reason) = self.reason {
            write!(f, "\n\nReason: {}", reason)?;
        }

        if let Some(ref element) = self.element {
            write!(f, "\n\nElement: {}", element)?;
        }

        Ok(())
    }
}

impl std::error::Error for SchemaError {}

/// Shorthand for building a schema error wrapped in [`Error`]
pub(crate) fn schema_error(kind: SchemaErrorKind, message: impl Into<String>) -> Error {
    Error::Schema(SchemaError::new(kind, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_error_display() {
        let err = SchemaError::new(SchemaErrorKind::ExpressionCompile, "cannot compile test")
            .with_expression("count(")
            .with_reason("unexpected end of expression")
            .with_element("rule 'r1' in pattern 'p1'");

        let msg = format!("{}", err);
        assert!(msg.starts_with("expression compile error: cannot compile test"));
        assert!(msg.contains("Expression: count("));
        assert!(msg.contains("Reason:"));
        assert!(msg.contains("Element: rule 'r1'"));
    }

    #[test]
    fn test_error_classification() {
        let err: Error = SchemaError::new(SchemaErrorKind::UnknownPhase, "no phase 'x'").into();
        assert!(err.is_schema_error());
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::UnknownPhase));
        assert!(SchemaErrorKind::UnknownPhase.is_binding_error());
        assert!(!SchemaErrorKind::CyclicInclude.is_binding_error());

        let io = Error::NotFound("missing.sch".to_string());
        assert!(io.is_input_error());
        assert_eq!(io.schema_kind(), None);
    }

    #[test]
    fn test_xml_error_conversion() {
        let err = roxmltree::Document::parse("<a>").unwrap_err();
        let err: Error = err.into();
        assert!(matches!(err, Error::Xml(_)));
    }
}
