//! Compiling schemas
//!
//! The entry points most callers need: turn schema text or a schema file
//! into a [`BoundSchema`], then validate documents with it.
//!
//! ```rust,ignore
//! use schematron::{compile_schema_file, validate, CompileOptions};
//!
//! let options = CompileOptions::new().with_phase("check-weights");
//! let schema = compile_schema_file("cargo.sch", &options)?;
//!
//! let text = std::fs::read_to_string("cargo.xml")?;
//! let document = roxmltree::Document::parse(&text)?;
//! let report = validate(&schema, &document);
//! println!("{}", report.to_text());
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::binding::{bind_schema, BoundSchema};
use crate::documents::{xml_error, Element};
use crate::error::Result;
use crate::limits::Limits;
use crate::loaders::Loader;
use crate::locations::Location;
use crate::namespaces::QName;
use crate::resolvers::{
    resolve_abstractions, resolve_includes, select_binding, select_phase, FragmentFetcher,
};
use crate::schema::{parse_schema, Schema};
use crate::xpath::{CustomFunction, FunctionRegistry};

pub use crate::validation::{validate, validate_batch};

/// Options for compiling a schema
#[derive(Clone, Default)]
pub struct CompileOptions {
    /// Phase to activate; `None` uses the schema's `defaultPhase`
    pub phase: Option<String>,
    /// Query binding, overriding the schema's `queryBinding`
    pub query_binding: Option<String>,
    /// Custom functions available to expressions
    pub functions: FunctionRegistry,
    /// Extra binding names mapped onto standard ones
    pub binding_aliases: IndexMap<String, String>,
    /// Resource limits
    pub limits: Limits,
    /// Location the schema text was read from; base for relative hrefs
    pub base: Option<Location>,
    /// Source of included fragments; a file [`Loader`] when unset
    pub fetcher: Option<Arc<dyn FragmentFetcher>>,
}

impl CompileOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a phase
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    /// Override the query binding
    pub fn with_query_binding(mut self, binding: impl Into<String>) -> Self {
        self.query_binding = Some(binding.into());
        self
    }

    /// Use a function registry
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    /// Register one custom function
    pub fn with_function(mut self, name: QName, function: impl CustomFunction + 'static) -> Self {
        self.functions = self.functions.with_function(name, function);
        self
    }

    /// Accept `alias` as a query binding with the dialect of `target`
    pub fn with_binding_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.binding_aliases.insert(alias.into(), target.into());
        self
    }

    /// Set the limits
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set the base location for relative hrefs
    pub fn with_base(mut self, base: Location) -> Self {
        self.base = Some(base);
        self
    }

    /// Fetch included fragments with `fetcher`
    pub fn with_fetcher(mut self, fetcher: impl FragmentFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }
}

impl fmt::Debug for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileOptions")
            .field("phase", &self.phase)
            .field("query_binding", &self.query_binding)
            .field("functions", &self.functions)
            .field("binding_aliases", &self.binding_aliases)
            .field("limits", &self.limits)
            .field("base", &self.base)
            .field("fetcher", &self.fetcher.as_ref().map(|_| "custom"))
            .finish()
    }
}

/// Parse schema text and make it concrete
///
/// Includes are inlined and abstract patterns and rules resolved; no phase
/// is selected and no expression compiled.
pub fn load_schema(source: &str, options: &CompileOptions) -> Result<Schema> {
    let name = options
        .base
        .as_ref()
        .map(Location::as_str)
        .unwrap_or_else(|| "schema".to_string());
    let root = Element::parse(source, &options.limits).map_err(|e| xml_error(&name, e))?;

    let resolved = match &options.fetcher {
        Some(fetcher) => resolve_includes(&root, options.base.as_ref(), fetcher.as_ref(), &options.limits)?,
        None => {
            let loader = Loader::new().with_limits(options.limits.clone());
            resolve_includes(&root, options.base.as_ref(), &loader, &options.limits)?
        }
    };

    let schema = parse_schema(&resolved)?;
    let concrete = resolve_abstractions(&schema, &options.limits)?;
    debug!(
        schema = %name,
        patterns = concrete.patterns.len(),
        phases = concrete.phases.len(),
        "schema loaded"
    );
    Ok(concrete)
}

/// Select the phase and binding of a concrete schema and compile it
pub fn compile_parsed(schema: &Schema, options: &CompileOptions) -> Result<BoundSchema> {
    let selection = select_phase(schema, options.phase.as_deref())?;
    let binding = select_binding(
        options.query_binding.as_deref(),
        schema.query_binding.as_deref(),
        &options.binding_aliases,
    )?;
    info!(
        phase = selection.phase.as_deref().unwrap_or("#ALL"),
        binding = %binding,
        patterns = selection.patterns.len(),
        "compiling schema"
    );
    bind_schema(schema, &selection, binding, &options.functions, &options.limits)
}

/// Compile schema text
pub fn compile_schema(source: &str, options: &CompileOptions) -> Result<BoundSchema> {
    let schema = load_schema(source, options)?;
    compile_parsed(&schema, options)
}

/// Compile a schema file
///
/// Relative hrefs resolve against the file unless `options.base` is set.
pub fn compile_schema_file(path: impl AsRef<Path>, options: &CompileOptions) -> Result<BoundSchema> {
    let schema = load_schema_file(path, options)?;
    compile_parsed(&schema, options)
}

/// Load a schema file and make it concrete
pub fn load_schema_file(path: impl AsRef<Path>, options: &CompileOptions) -> Result<Schema> {
    let location = Location::from_path(path.as_ref());
    let text = Loader::new()
        .with_limits(options.limits.clone())
        .load(&location)?;

    let mut options = options.clone();
    if options.base.is_none() {
        options.base = Some(location);
    }
    load_schema(&text, &options)
}
