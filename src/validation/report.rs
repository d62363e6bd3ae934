//! Validation reports
//!
//! The executor emits a flat, ordered event stream: each active pattern,
//! then the rules fired in it and the outcome of every check those rules
//! evaluated. [`ReportBuilder`] collects the stream and settles the verdict.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::binding::BoundSchema;
use crate::error::Result;
use crate::schema::{CheckKind, Paragraph};
use crate::xpath::EvaluationError;

fn serialize_error<S: Serializer>(
    error: &Option<EvaluationError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(err) => serializer.collect_str(err),
        None => serializer.serialize_none(),
    }
}

fn serialize_display<T: fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// A pattern became active
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivePattern {
    /// Declared id
    pub id: Option<String>,
    /// Declared id or `#<index>`
    pub label: String,
    /// Pattern title
    pub name: Option<String>,
}

/// A rule matched a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FiredRule {
    /// Pattern label
    pub pattern: String,
    /// Rule id, declared or synthesized
    pub id: String,
    /// Whether the id was declared in the schema
    pub has_declared_id: bool,
    /// Context expression
    pub context: String,
    /// `path()` of the matched node
    pub location: String,
    /// `role` attribute
    pub role: Option<String>,
    /// `flag` attribute
    pub flag: Option<String>,
}

/// A rendered property or diagnostic
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// Property or diagnostic id
    pub id: String,
    /// `role` attribute
    pub role: Option<String>,
    /// `scheme` attribute of a property
    pub scheme: Option<String>,
    /// `xml:lang` attribute of a diagnostic
    pub xml_lang: Option<String>,
    /// Rendered text
    pub text: String,
}

/// Result of evaluating one check on one node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    /// Pattern label
    pub pattern: String,
    /// Rule id, declared or synthesized
    pub rule: String,
    /// Assert or report
    pub kind: CheckKind,
    /// `id` attribute of the check
    pub id: Option<String>,
    /// Test expression
    pub test: String,
    /// `path()` of the context node
    pub location: String,
    /// `path()` of the subject node, when a subject is declared and selects one
    pub subject_location: Option<String>,
    /// An assert whose test was false, or a report whose test was true
    pub fired: bool,
    /// Rendered message; empty unless fired
    pub message: String,
    /// `role` attribute
    pub role: Option<String>,
    /// `flag` attribute
    pub flag: Option<String>,
    /// Rendered properties; empty unless fired
    pub properties: Vec<Annotation>,
    /// Rendered diagnostics; empty unless fired
    pub diagnostics: Vec<Annotation>,
    /// Dynamic error raised by the test or the message
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<EvaluationError>,
}

impl CheckOutcome {
    /// True when the check makes the document invalid
    pub fn is_failure(&self) -> bool {
        self.fired || self.error.is_some()
    }
}

/// An expression outside a check failed
///
/// Pattern variables and rule contexts fail for the whole pattern or rule;
/// rule variables and subjects fail for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionFailure {
    /// Pattern label; `None` for schema and phase variables
    pub pattern: Option<String>,
    /// Rule id, if the failure belongs to a rule
    pub rule: Option<String>,
    /// `path()` of the node being processed, if any
    pub location: Option<String>,
    /// The failing expression
    pub expression: String,
    /// The error
    #[serde(serialize_with = "serialize_display")]
    pub error: EvaluationError,
}

/// One step of a validation run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ValidationEvent {
    /// Pattern processing started
    ActivePattern(ActivePattern),
    /// The first matching rule of a pattern fired on a node
    FiredRule(FiredRule),
    /// A later rule of the same pattern also matched the node
    SuppressedRule(FiredRule),
    /// A check was evaluated
    Check(CheckOutcome),
    /// An expression outside a check failed
    ExecutionError(ExecutionFailure),
}

/// Outcome of validating one document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Document name, when known
    pub document: Option<String>,
    /// Schema title
    pub title: Option<String>,
    /// `schemaVersion` of the schema
    pub schema_version: Option<String>,
    /// Active phase
    pub phase: Option<String>,
    /// Query binding name
    pub query_binding: String,
    /// Namespace declarations of the schema
    pub namespaces: Vec<(String, String)>,
    /// Top-level schema paragraphs
    pub paragraphs: Vec<Paragraph>,
    /// Events in emission order
    pub events: Vec<ValidationEvent>,
    /// Verdict
    pub valid: bool,
}

impl ValidationReport {
    /// No assert or report fired and nothing failed to evaluate
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Every evaluated check, in order
    pub fn outcomes(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.events.iter().filter_map(|event| match event {
            ValidationEvent::Check(outcome) => Some(outcome),
            _ => None,
        })
    }

    /// Checks that fired
    pub fn fired(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes().filter(|o| o.fired)
    }

    /// Fired asserts
    pub fn failed_asserts(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.fired().filter(|o| o.kind == CheckKind::Assert)
    }

    /// Fired reports
    pub fn successful_reports(&self) -> impl Iterator<Item = &CheckOutcome> {
        self.fired().filter(|o| o.kind == CheckKind::Report)
    }

    /// Rules that fired
    pub fn fired_rules(&self) -> impl Iterator<Item = &FiredRule> {
        self.events.iter().filter_map(|event| match event {
            ValidationEvent::FiredRule(rule) => Some(rule),
            _ => None,
        })
    }

    /// Failures outside checks
    pub fn execution_errors(&self) -> impl Iterator<Item = &ExecutionFailure> {
        self.events.iter().filter_map(|event| match event {
            ValidationEvent::ExecutionError(failure) => Some(failure),
            _ => None,
        })
    }

    /// Number of checks and other expressions that raised an error
    pub fn error_count(&self) -> usize {
        self.outcomes().filter(|o| o.error.is_some()).count() + self.execution_errors().count()
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable summary, one line per failure
    pub fn to_text(&self) -> String {
        static WHITESPACE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"\s+").expect("static regex is valid"));
        let flatten = |text: &str| WHITESPACE.replace_all(text.trim(), " ").into_owned();

        let name = self.document.as_deref().unwrap_or("document");
        let mut out = format!(
            "{}: {} ({} failed asserts, {} successful reports, {} errors)\n",
            name,
            if self.valid { "valid" } else { "invalid" },
            self.failed_asserts().count(),
            self.successful_reports().count(),
            self.error_count()
        );

        for event in &self.events {
            match event {
                ValidationEvent::Check(outcome) if outcome.is_failure() => {
                    let kind = match (&outcome.error, outcome.kind) {
                        (Some(_), _) => "error",
                        (None, CheckKind::Assert) => "assert",
                        (None, CheckKind::Report) => "report",
                    };
                    let text = match &outcome.error {
                        Some(err) => format!("{} ({})", outcome.test, err),
                        None if outcome.message.is_empty() => outcome.test.clone(),
                        None => flatten(&outcome.message),
                    };
                    out.push_str(&format!(
                        "  [{}] {} {} at {}: {}\n",
                        kind, outcome.pattern, outcome.rule, outcome.location, text
                    ));
                }
                ValidationEvent::ExecutionError(failure) => {
                    out.push_str(&format!(
                        "  [error] {} {} at {}: {} ({})\n",
                        failure.pattern.as_deref().unwrap_or("schema"),
                        failure.rule.as_deref().unwrap_or("-"),
                        failure.location.as_deref().unwrap_or("/"),
                        failure.expression,
                        failure.error
                    ));
                }
                _ => {}
            }
        }
        out
    }
}

/// Collects events and settles the verdict
#[derive(Debug)]
pub struct ReportBuilder {
    report: ValidationReport,
}

impl ReportBuilder {
    /// Start a report for `schema`
    pub fn new(schema: &BoundSchema) -> Self {
        Self {
            report: ValidationReport {
                document: None,
                title: schema.title.clone(),
                schema_version: schema.schema_version.clone(),
                phase: schema.phase.clone(),
                query_binding: schema.binding.name.clone(),
                namespaces: schema
                    .namespaces
                    .iter()
                    .map(|(p, u)| (p.to_string(), u.to_string()))
                    .collect(),
                paragraphs: schema.paragraphs.clone(),
                events: Vec::new(),
                valid: true,
            },
        }
    }

    /// Name the validated document
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.report.document = Some(document.into());
        self
    }

    /// Append an event
    pub fn push(&mut self, event: ValidationEvent) {
        self.report.events.push(event);
    }

    /// Events pushed so far
    pub fn events(&self) -> &[ValidationEvent] {
        &self.report.events
    }

    /// Finish the report
    pub fn finish(mut self) -> ValidationReport {
        self.report.valid = self.report.events.iter().all(|event| match event {
            ValidationEvent::Check(outcome) => !outcome.is_failure(),
            ValidationEvent::ExecutionError(_) => false,
            _ => true,
        });
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceTable;
    use crate::resolvers::QueryBinding;
    use crate::xpath::Dialect;

    fn schema() -> BoundSchema {
        BoundSchema {
            title: Some("Cargo".into()),
            schema_version: None,
            phase: None,
            phases: Vec::new(),
            binding: QueryBinding {
                name: "xslt".into(),
                dialect: Dialect::XPath1,
            },
            namespaces: NamespaceTable::new(),
            lets: Vec::new(),
            patterns: Vec::new(),
            paragraphs: Vec::new(),
        }
    }

    fn outcome(kind: CheckKind, fired: bool) -> CheckOutcome {
        CheckOutcome {
            pattern: "p".into(),
            rule: "p/rule[1]".into(),
            kind,
            id: None,
            test: "@weight".into(),
            location: "/Q{}cargo[1]".into(),
            subject_location: None,
            fired,
            message: if fired { "Weight\n   not correct ".into() } else { String::new() },
            role: None,
            flag: None,
            properties: Vec::new(),
            diagnostics: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_validity_rule() {
        let mut builder = ReportBuilder::new(&schema());
        builder.push(ValidationEvent::Check(outcome(CheckKind::Assert, false)));
        builder.push(ValidationEvent::Check(outcome(CheckKind::Report, false)));
        assert!(builder.finish().is_valid());

        for kind in [CheckKind::Assert, CheckKind::Report] {
            let mut builder = ReportBuilder::new(&schema());
            builder.push(ValidationEvent::Check(outcome(kind, true)));
            assert!(!builder.finish().is_valid());
        }

        let mut builder = ReportBuilder::new(&schema());
        let mut broken = outcome(CheckKind::Assert, false);
        broken.error = Some(EvaluationError::DivisionByZero);
        builder.push(ValidationEvent::Check(broken));
        let report = builder.finish();
        assert!(!report.is_valid());
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.fired().count(), 0);
    }

    #[test]
    fn test_text_summary() {
        let mut builder = ReportBuilder::new(&schema()).with_document("cargo.xml");
        builder.push(ValidationEvent::Check(outcome(CheckKind::Assert, true)));
        let text = builder.finish().to_text();
        assert!(text.starts_with("cargo.xml: invalid (1 failed asserts, 0 successful reports, 0 errors)"));
        assert!(text.contains("[assert] p p/rule[1] at /Q{}cargo[1]: Weight not correct"));
    }

    #[test]
    fn test_json_shape() {
        let mut builder = ReportBuilder::new(&schema());
        let mut broken = outcome(CheckKind::Report, false);
        broken.error = Some(EvaluationError::Type("bad operand".into()));
        builder.push(ValidationEvent::Check(broken));
        let json: serde_json::Value = serde_json::from_str(&builder.finish().to_json().unwrap()).unwrap();

        assert_eq!(json["valid"], serde_json::Value::Bool(false));
        assert_eq!(json["events"][0]["event"], "check");
        assert_eq!(json["events"][0]["kind"], "report");
        assert_eq!(json["events"][0]["error"], "type error: bad operand");
    }
}
