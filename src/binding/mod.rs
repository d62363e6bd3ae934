//! Bound schemas
//!
//! A [`BoundSchema`] is the executable form of a concrete schema: the active
//! patterns of one phase, every expression compiled for one query binding.
//! It holds no reference to the schema it came from and can validate any
//! number of documents, from any number of threads.

mod binder;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

pub use binder::{bind_schema, Binder};

use crate::namespaces::NamespaceTable;
use crate::resolvers::QueryBinding;
use crate::schema::{CheckKind, Paragraph};
use crate::xpath::{CompiledExpression, EvaluationContext, EvaluationError, Value};

/// A compiled expression together with its source text
#[derive(Clone)]
pub struct BoundExpr {
    text: String,
    compiled: Arc<dyn CompiledExpression>,
}

impl BoundExpr {
    /// Wrap a compiled expression
    pub fn new(text: impl Into<String>, compiled: Arc<dyn CompiledExpression>) -> Self {
        Self {
            text: text.into(),
            compiled,
        }
    }

    /// Expression text as written in the schema
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Evaluate the expression
    pub fn evaluate<'a, 'i>(
        &self,
        context: &EvaluationContext<'a, 'i, '_>,
    ) -> Result<Value<'a, 'i>, EvaluationError> {
        self.compiled.evaluate(context)
    }
}

impl fmt::Debug for BoundExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundExpr({:?})", self.text)
    }
}

/// Value of a bound variable
#[derive(Debug, Clone)]
pub enum BoundLetValue {
    /// Evaluated at run time
    Query(BoundExpr),
    /// Literal XML content, bound as a string
    Literal(String),
}

/// A bound `<let>`
#[derive(Debug, Clone)]
pub struct BoundLet {
    /// Variable name
    pub name: String,
    /// Value
    pub value: BoundLetValue,
}

/// Part of a message template
#[derive(Debug, Clone)]
pub enum BoundSegment {
    /// Literal text
    Text(String),
    /// Evaluated and converted to a string
    Value(BoundExpr),
}

/// A property or diagnostic referenced by a check
#[derive(Debug, Clone)]
pub struct BoundAnnotation {
    /// Property or diagnostic id
    pub id: String,
    /// `role` attribute
    pub role: Option<String>,
    /// `scheme` attribute of a property
    pub scheme: Option<String>,
    /// `xml:lang` attribute of a diagnostic
    pub xml_lang: Option<String>,
    /// Content template, evaluated at the check's context node
    pub content: Vec<BoundSegment>,
}

/// A bound assert or report
#[derive(Debug, Clone)]
pub struct BoundCheck {
    /// Assert or report
    pub kind: CheckKind,
    /// `id` attribute
    pub id: Option<String>,
    /// The test
    pub test: BoundExpr,
    /// Message template
    pub message: Vec<BoundSegment>,
    /// Referenced properties
    pub properties: Vec<BoundAnnotation>,
    /// Referenced diagnostics
    pub diagnostics: Vec<BoundAnnotation>,
    /// `role` attribute
    pub role: Option<String>,
    /// `flag` attribute
    pub flag: Option<String>,
    /// `subject` expression, overriding the rule's
    pub subject: Option<BoundExpr>,
}

/// A bound rule
#[derive(Debug, Clone)]
pub struct BoundRule {
    /// Declared id, or `<pattern>/rule[<n>]` when the rule has none
    pub id: String,
    /// Whether `id` was declared in the schema
    pub has_declared_id: bool,
    /// Context match pattern
    pub context: BoundExpr,
    /// `subject` expression
    pub subject: Option<BoundExpr>,
    /// `role` attribute
    pub role: Option<String>,
    /// `flag` attribute
    pub flag: Option<String>,
    /// Rule variables
    pub lets: Vec<BoundLet>,
    /// Checks in declaration order, extended rules' checks last
    pub checks: Vec<BoundCheck>,
}

/// A bound pattern
#[derive(Debug, Clone)]
pub struct BoundPattern {
    /// Declared id
    pub id: Option<String>,
    /// Position in the schema's pattern list, from 0
    pub index: usize,
    /// Content of `<title>`
    pub title: Option<String>,
    /// `<p>` paragraphs
    pub paragraphs: Vec<Paragraph>,
    /// Pattern variables
    pub lets: Vec<BoundLet>,
    /// Rules in declaration order
    pub rules: Vec<BoundRule>,
}

impl BoundPattern {
    /// The pattern id, or `#<index>` for anonymous patterns
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("#{}", self.index),
        }
    }
}

/// An executable schema
#[derive(Debug, Clone)]
pub struct BoundSchema {
    /// Schema title
    pub title: Option<String>,
    /// `schemaVersion` attribute
    pub schema_version: Option<String>,
    /// Active phase; `None` when every pattern is active
    pub phase: Option<String>,
    /// Ids of every phase the schema declares
    pub phases: Vec<String>,
    /// Query binding the expressions were compiled for
    pub binding: QueryBinding,
    /// Namespace declarations, as seen by every expression
    pub namespaces: NamespaceTable,
    /// Schema variables followed by phase variables
    pub lets: Vec<BoundLet>,
    /// Active patterns
    pub patterns: Vec<BoundPattern>,
    /// Top-level `<p>` paragraphs
    pub paragraphs: Vec<Paragraph>,
}

impl BoundSchema {
    /// Number of bound rules across all patterns
    pub fn rule_count(&self) -> usize {
        self.patterns.iter().map(|p| p.rules.len()).sum()
    }

    /// Number of bound checks across all patterns
    pub fn check_count(&self) -> usize {
        self.patterns
            .iter()
            .flat_map(|p| &p.rules)
            .map(|r| r.checks.len())
            .sum()
    }

    /// Summary of the schema's structure
    pub fn outline(&self) -> SchemaOutline {
        SchemaOutline {
            title: self.title.clone(),
            binding: self.binding.clone(),
            phase: self.phase.clone(),
            phases: self.phases.clone(),
            patterns: self
                .patterns
                .iter()
                .map(|pattern| PatternOutline {
                    id: pattern.label(),
                    title: pattern.title.clone(),
                    rules: pattern
                        .rules
                        .iter()
                        .map(|rule| RuleOutline {
                            id: rule.id.clone(),
                            context: rule.context.text().to_string(),
                            checks: rule.checks.len(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Serializable summary of a bound schema
#[derive(Debug, Clone, Serialize)]
pub struct SchemaOutline {
    /// Schema title
    pub title: Option<String>,
    /// Query binding
    pub binding: QueryBinding,
    /// Active phase
    pub phase: Option<String>,
    /// Declared phases
    pub phases: Vec<String>,
    /// Active patterns
    pub patterns: Vec<PatternOutline>,
}

/// Pattern entry of a [`SchemaOutline`]
#[derive(Debug, Clone, Serialize)]
pub struct PatternOutline {
    /// Pattern id or `#<index>`
    pub id: String,
    /// Pattern title
    pub title: Option<String>,
    /// Rules
    pub rules: Vec<RuleOutline>,
}

/// Rule entry of a [`PatternOutline`]
#[derive(Debug, Clone, Serialize)]
pub struct RuleOutline {
    /// Rule id
    pub id: String,
    /// Context expression
    pub context: String,
    /// Number of checks
    pub checks: usize,
}
