//! # schematron
//!
//! An ISO Schematron validator.
//!
//! A schema goes through a fixed pipeline before it can validate anything:
//!
//! 1. includes are inlined ([`resolvers::resolve_includes`])
//! 2. abstract rules and patterns are flattened ([`resolvers::resolve_abstractions`])
//! 3. a phase and a query binding are selected ([`resolvers::select_phase`],
//!    [`resolvers::select_binding`])
//! 4. every expression is compiled ([`binding::bind_schema`])
//!
//! The result, a [`BoundSchema`], is immutable and validates any number of
//! documents, from any number of threads.
//!
//! ## Example
//!
//! ```rust,ignore
//! use schematron::{compile_schema, validate, CompileOptions};
//!
//! let schema = compile_schema(&schema_text, &CompileOptions::new())?;
//! let document = roxmltree::Document::parse(&xml_text)?;
//!
//! let report = validate(&schema, &document);
//! if !report.is_valid() {
//!     print!("{}", report.to_text());
//! }
//! ```
//!
//! ## Query bindings
//!
//! `xslt` and `xpath` run with XPath 1.0; `xslt2`, `xpath2`, `xslt3`,
//! `xpath3` and `xpath31` with the corresponding later dialect. Other names
//! can be mapped onto these with [`CompileOptions::with_binding_alias`].

#![warn(missing_docs)]
#![warn(clippy::all)]

// Foundation
pub mod error;
pub mod limits;

// Utilities
pub mod locations;
pub mod names;
pub mod namespaces;

// Resource loading
pub mod documents;
pub mod loaders;

// Schema pipeline
pub mod binding;
pub mod resolvers;
pub mod schema;
pub mod xpath;

// Execution and reports
pub mod validation;

pub mod api;

pub use api::{
    compile_parsed, compile_schema, compile_schema_file, load_schema, load_schema_file,
    CompileOptions,
};
pub use binding::BoundSchema;
pub use error::{Error, Result, SchemaError, SchemaErrorKind};
pub use limits::Limits;
pub use validation::{
    to_svrl, validate, validate_batch, validate_file, validate_files, CheckOutcome, SvrlOptions,
    ValidationEvent, ValidationReport,
};

/// Version of the schematron library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
