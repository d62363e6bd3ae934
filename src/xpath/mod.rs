//! XPath Support for Schematron
//!
//! Rule contexts, assertion tests, variable values and message fragments are
//! XPath expressions. This module compiles them once, when the schema is
//! bound, and evaluates the compiled form against target documents.
//!
//! ## Overview
//!
//! - [`lexer`] and [`parsers`] turn expression text into an [`Expr`] tree,
//!   resolving prefixes, variables and functions as they go
//! - [`evaluator`] walks the tree over a roxmltree document
//! - [`functions`] holds the built-in library and the custom-function
//!   registry
//! - [`types`] casts values to XML Schema types and checks sequence types
//!
//! The dialect follows the schema's query binding: XPath 1.0 for `xslt`,
//! XPath 2.0 and later for `xslt2`, `xslt3` and friends. Features outside the
//! selected dialect are compile errors.
//!
//! ## Pluggability
//!
//! [`ExpressionEngine`] is the seam for other engines. The binder only sees
//! [`CompiledExpression`] trait objects.

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod nodes;
pub mod parsers;
pub mod types;
pub mod values;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::limits::Limits;
use crate::namespaces::NamespaceTable;

pub use evaluator::{EvaluationError, Variables};
pub use functions::{Builtin, CustomFunction, FunctionRegistry};
pub use nodes::{document_nodes, NodeKind, XNode};
pub use parsers::{parse_expression, Expr, XPathAxis, XPathParseError};
pub use types::{AtomicType, SequenceType};
pub use values::{Atomic, Item, Value};

use evaluator::{Evaluator, Focus};

/// XPath language level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Dialect {
    /// XPath 1.0
    XPath1,
    /// XPath 2.0
    XPath2,
    /// XPath 3.0
    XPath3,
    /// XPath 3.1
    XPath31,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dialect::XPath1 => "XPath 1.0",
            Dialect::XPath2 => "XPath 2.0",
            Dialect::XPath3 => "XPath 3.0",
            Dialect::XPath31 => "XPath 3.1",
        };
        f.write_str(s)
    }
}

/// Role of an expression in the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    /// Evaluated for a value: tests, lets, message fragments
    Value,
    /// A rule context: a pattern matched against nodes of the document
    Match,
}

/// Static context for compiling an expression
#[derive(Debug, Clone, Copy)]
pub struct CompileContext<'c> {
    /// Prefixes in scope
    pub namespaces: &'c NamespaceTable,
    /// Variables visible to the expression, without the `$`
    pub variables: &'c [String],
    /// Custom functions
    pub functions: &'c FunctionRegistry,
    /// Language level
    pub dialect: Dialect,
    /// What the expression is used for
    pub kind: ExpressionKind,
    /// Maximum nesting of sub-expressions
    pub max_depth: usize,
}

impl<'c> CompileContext<'c> {
    /// Context for a value expression with no visible variables
    pub fn new(namespaces: &'c NamespaceTable, functions: &'c FunctionRegistry, dialect: Dialect) -> Self {
        Self {
            namespaces,
            variables: &[],
            functions,
            dialect,
            kind: ExpressionKind::Value,
            max_depth: Limits::default().max_expression_depth,
        }
    }

    /// Set the visible variables
    pub fn with_variables(mut self, variables: &'c [String]) -> Self {
        self.variables = variables;
        self
    }

    /// Set the expression kind
    pub fn with_kind(mut self, kind: ExpressionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the nesting limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Dynamic context for evaluating an expression
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a, 'i, 'v> {
    /// Context node
    pub node: XNode<'a, 'i>,
    /// Variable values
    pub variables: &'v Variables<'a, 'i>,
}

impl<'a, 'i, 'v> EvaluationContext<'a, 'i, 'v> {
    /// Create a context
    pub fn new(node: XNode<'a, 'i>, variables: &'v Variables<'a, 'i>) -> Self {
        Self { node, variables }
    }
}

/// An expression ready for evaluation
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Expression text as written
    fn source(&self) -> &str;

    /// Evaluate against a context node
    fn evaluate<'a, 'i>(
        &self,
        context: &EvaluationContext<'a, 'i, '_>,
    ) -> Result<Value<'a, 'i>, EvaluationError>;
}

/// Compiles expression text
pub trait ExpressionEngine: Send + Sync {
    /// Compile `text` in `context`
    fn compile(
        &self,
        text: &str,
        context: &CompileContext<'_>,
    ) -> Result<Arc<dyn CompiledExpression>, XPathParseError>;
}

/// The built-in XPath engine
#[derive(Debug, Clone, Copy, Default)]
pub struct XPathEngine;

impl XPathEngine {
    /// Create the engine
    pub fn new() -> Self {
        XPathEngine
    }
}

impl ExpressionEngine for XPathEngine {
    fn compile(
        &self,
        text: &str,
        context: &CompileContext<'_>,
    ) -> Result<Arc<dyn CompiledExpression>, XPathParseError> {
        let expr = parse_expression(text, context)?;
        Ok(Arc::new(XPathExpression {
            source: text.to_string(),
            expr,
            dialect: context.dialect,
        }))
    }
}

/// Expression compiled by [`XPathEngine`]
#[derive(Debug, Clone)]
pub struct XPathExpression {
    source: String,
    expr: Expr,
    dialect: Dialect,
}

impl XPathExpression {
    /// Parsed expression tree
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Language level the expression was compiled for
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }
}

impl CompiledExpression for XPathExpression {
    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate<'a, 'i>(
        &self,
        context: &EvaluationContext<'a, 'i, '_>,
    ) -> Result<Value<'a, 'i>, EvaluationError> {
        let mut evaluator = Evaluator::new(context.variables, self.dialect, Item::Node(context.node));
        evaluator.evaluate(&self.expr, &Focus::node_focus(context.node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_ordering() {
        assert!(Dialect::XPath1 < Dialect::XPath2);
        assert!(Dialect::XPath3 < Dialect::XPath31);
        assert_eq!(Dialect::XPath2.to_string(), "XPath 2.0");
    }

    #[test]
    fn test_compile_and_evaluate() {
        let namespaces = NamespaceTable::new();
        let functions = FunctionRegistry::new();
        let context = CompileContext::new(&namespaces, &functions, Dialect::XPath1);
        let compiled = XPathEngine::new().compile("count(//b) * 2", &context).unwrap();
        assert_eq!(compiled.source(), "count(//b) * 2");

        let doc = roxmltree::Document::parse("<a><b/><b/></a>").unwrap();
        let variables = Variables::new();
        let value = compiled
            .evaluate(&EvaluationContext::new(XNode::root_of(&doc), &variables))
            .unwrap();
        assert_eq!(value, Value::Number(4.0));
    }

    #[test]
    fn test_custom_function_call() {
        let namespaces = {
            let mut table = NamespaceTable::new();
            table.bind("ext", "urn:ext");
            table
        };
        let functions = FunctionRegistry::new().with_function(
            crate::namespaces::QName::namespaced("urn:ext", "total"),
            |args: &[Vec<Atomic>]| -> Result<Atomic, EvaluationError> {
                Ok(Atomic::Number(args[0].iter().map(Atomic::to_number).sum()))
            },
        );
        let context = CompileContext::new(&namespaces, &functions, Dialect::XPath2);
        let compiled = XPathEngine::new().compile("ext:total(//@w) > 10", &context).unwrap();

        let doc = roxmltree::Document::parse(r#"<a><b w="4"/><b w="7"/></a>"#).unwrap();
        let variables = Variables::new();
        let value = compiled
            .evaluate(&EvaluationContext::new(XNode::root_of(&doc), &variables))
            .unwrap();
        assert_eq!(value, Value::Boolean(true));
    }
}
