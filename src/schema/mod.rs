//! Schematron schema model
//!
//! The raw, typed mirror of a schema document and the parser that builds it
//! from an element tree whose includes have already been resolved.

mod model;
mod parsing;

pub use model::{
    Check, CheckKind, Diagnostic, Extends, Let, LetValue, Namespace, Param, Paragraph, Pattern,
    Phase, Property, Rule, Schema, Segment,
};
pub use parsing::parse_schema;
