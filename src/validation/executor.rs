//! Validation executor
//!
//! Runs a bound schema against one document. For every active pattern the
//! executor evaluates the rule contexts once from the root, then walks the
//! document in order and fires, per node, the first rule whose context
//! selected it. Dynamic errors are recorded in the report and never abort
//! the run.

use std::collections::HashSet;

use tracing::debug;

use super::report::{
    ActivePattern, Annotation, CheckOutcome, ExecutionFailure, FiredRule, ReportBuilder,
    ValidationEvent, ValidationReport,
};
use crate::binding::{
    BoundAnnotation, BoundCheck, BoundExpr, BoundLet, BoundLetValue, BoundPattern, BoundRule,
    BoundSchema, BoundSegment,
};
use crate::xpath::functions::node_path;
use crate::xpath::{
    document_nodes, Dialect, EvaluationContext, EvaluationError, Item, Value, Variables, XNode,
};

/// Validate `document` against `schema`
pub fn validate(schema: &BoundSchema, document: &roxmltree::Document<'_>) -> ValidationReport {
    Executor::new(schema).run(document, ReportBuilder::new(schema))
}

/// A failed expression outside a check
struct Failed {
    expression: String,
    error: EvaluationError,
}

impl Failed {
    fn new(expr: &BoundExpr, error: EvaluationError) -> Self {
        Self {
            expression: expr.text().to_string(),
            error,
        }
    }

    fn into_event(
        self,
        pattern: Option<&str>,
        rule: Option<&str>,
        location: Option<&str>,
    ) -> ValidationEvent {
        ValidationEvent::ExecutionError(ExecutionFailure {
            pattern: pattern.map(str::to_string),
            rule: rule.map(str::to_string),
            location: location.map(str::to_string),
            expression: self.expression,
            error: self.error,
        })
    }
}

/// Runs one bound schema
#[derive(Debug, Clone, Copy)]
pub struct Executor<'s> {
    schema: &'s BoundSchema,
}

impl<'s> Executor<'s> {
    /// Create an executor for `schema`
    pub fn new(schema: &'s BoundSchema) -> Self {
        Self { schema }
    }

    /// Validate `document`, appending events to `report`
    pub fn run<'a, 'i>(
        &self,
        document: &'a roxmltree::Document<'i>,
        mut report: ReportBuilder,
    ) -> ValidationReport {
        let root = XNode::root_of(document);
        let nodes = document_nodes(document);
        let mut variables = Variables::new();

        for failed in bind_scope_lets(&self.schema.lets, root, &mut variables) {
            report.push(failed.into_event(None, None, None));
        }

        let global = variables.len();
        for pattern in &self.schema.patterns {
            self.run_pattern(pattern, root, &nodes, &mut variables, &mut report);
            variables.truncate(global);
        }

        let report = report.finish();
        debug!(
            document = report.document.as_deref().unwrap_or("-"),
            nodes = nodes.len(),
            fired = report.fired().count(),
            errors = report.error_count(),
            valid = report.valid,
            "document validated"
        );
        report
    }

    fn run_pattern<'a, 'i>(
        &self,
        pattern: &BoundPattern,
        root: XNode<'a, 'i>,
        nodes: &[XNode<'a, 'i>],
        variables: &mut Variables<'a, 'i>,
        report: &mut ReportBuilder,
    ) {
        let label = pattern.label();
        report.push(ValidationEvent::ActivePattern(ActivePattern {
            id: pattern.id.clone(),
            label: label.clone(),
            name: pattern.title.clone(),
        }));

        for failed in bind_scope_lets(&pattern.lets, root, variables) {
            report.push(failed.into_event(Some(&label), None, None));
        }

        let mut rules: Vec<(&BoundRule, HashSet<XNode<'a, 'i>>)> =
            Vec::with_capacity(pattern.rules.len());
        for rule in &pattern.rules {
            match match_set(&rule.context, root, variables) {
                Ok(matched) => rules.push((rule, matched)),
                Err(failed) => report.push(failed.into_event(Some(&label), Some(&rule.id), None)),
            }
        }

        for &node in nodes {
            let mut matching = rules
                .iter()
                .filter(|(_, matched)| matched.contains(&node))
                .map(|(rule, _)| *rule);
            let Some(rule) = matching.next() else {
                continue;
            };

            let location = node_path(node);
            report.push(ValidationEvent::FiredRule(fired_rule(&label, rule, &location)));
            self.fire_rule(&label, rule, node, &location, variables, report);

            for suppressed in matching {
                report.push(ValidationEvent::SuppressedRule(fired_rule(
                    &label, suppressed, &location,
                )));
            }
        }
    }

    fn fire_rule<'a, 'i>(
        &self,
        pattern: &str,
        rule: &BoundRule,
        node: XNode<'a, 'i>,
        location: &str,
        variables: &mut Variables<'a, 'i>,
        report: &mut ReportBuilder,
    ) {
        let mark = variables.len();
        if let Err(failed) = bind_lets(&rule.lets, node, variables) {
            report.push(failed.into_event(Some(pattern), Some(&rule.id), Some(location)));
            variables.truncate(mark);
            return;
        }

        let subject = match &rule.subject {
            Some(expr) => {
                match subject_location(expr, &EvaluationContext::new(node, variables)) {
                    Ok(subject) => subject,
                    Err(error) => {
                        report.push(Failed::new(expr, error).into_event(
                            Some(pattern),
                            Some(&rule.id),
                            Some(location),
                        ));
                        variables.truncate(mark);
                        return;
                    }
                }
            }
            None => None,
        };

        let context = EvaluationContext::new(node, variables);
        for check in &rule.checks {
            let mut outcome = CheckOutcome {
                pattern: pattern.to_string(),
                rule: rule.id.clone(),
                kind: check.kind,
                id: check.id.clone(),
                test: check.test.text().to_string(),
                location: location.to_string(),
                subject_location: subject.clone(),
                fired: false,
                message: String::new(),
                role: check.role.clone(),
                flag: check.flag.clone(),
                properties: Vec::new(),
                diagnostics: Vec::new(),
                error: None,
            };
            if let Err(error) = self.evaluate_check(check, &context, &mut outcome) {
                outcome.error = Some(error);
            }
            report.push(ValidationEvent::Check(outcome));
        }

        variables.truncate(mark);
    }

    fn evaluate_check(
        &self,
        check: &BoundCheck,
        context: &EvaluationContext<'_, '_, '_>,
        outcome: &mut CheckOutcome,
    ) -> Result<(), EvaluationError> {
        let result = check.test.evaluate(context)?.to_boolean();
        outcome.fired = check.kind.fires(result);
        if !outcome.fired {
            return Ok(());
        }

        if let Some(subject) = &check.subject {
            outcome.subject_location = subject_location(subject, context)?;
        }
        outcome.message = self.render(&check.message, context)?;
        outcome.properties = self.annotations(&check.properties, context)?;
        outcome.diagnostics = self.annotations(&check.diagnostics, context)?;
        Ok(())
    }

    fn annotations(
        &self,
        annotations: &[BoundAnnotation],
        context: &EvaluationContext<'_, '_, '_>,
    ) -> Result<Vec<Annotation>, EvaluationError> {
        annotations
            .iter()
            .map(|annotation| {
                Ok(Annotation {
                    id: annotation.id.clone(),
                    role: annotation.role.clone(),
                    scheme: annotation.scheme.clone(),
                    xml_lang: annotation.xml_lang.clone(),
                    text: self.render(&annotation.content, context)?,
                })
            })
            .collect()
    }

    /// Concatenate a template's segments and trim the result
    fn render(
        &self,
        segments: &[BoundSegment],
        context: &EvaluationContext<'_, '_, '_>,
    ) -> Result<String, EvaluationError> {
        let mut text = String::new();
        for segment in segments {
            match segment {
                BoundSegment::Text(literal) => text.push_str(literal),
                BoundSegment::Value(expr) => {
                    let value = expr.evaluate(context)?;
                    text.push_str(&value_text(value, self.schema.binding.dialect));
                }
            }
        }
        Ok(text.trim().to_string())
    }
}

/// String form of a `value-of` result
///
/// XPath 1.0 takes the string value of the first node; later dialects join
/// every item with a space.
fn value_text(value: Value<'_, '_>, dialect: Dialect) -> String {
    if dialect == Dialect::XPath1 {
        return value.to_xpath_string();
    }
    value
        .into_items()
        .iter()
        .map(Item::to_xpath_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Evaluate lets in order, each seeing the ones before it
fn bind_lets<'a, 'i>(
    lets: &[BoundLet],
    node: XNode<'a, 'i>,
    variables: &mut Variables<'a, 'i>,
) -> Result<(), Failed> {
    for binding in lets {
        let value = match &binding.value {
            BoundLetValue::Query(expr) => expr
                .evaluate(&EvaluationContext::new(node, variables))
                .map_err(|error| Failed::new(expr, error))?,
            BoundLetValue::Literal(text) => Value::String(text.clone()),
        };
        variables.push(binding.name.as_str(), value);
    }
    Ok(())
}

/// Evaluate schema, phase or pattern lets, carrying on past failures
///
/// A failed let stays declared without a value, so only the expressions
/// that refer to it report errors.
fn bind_scope_lets<'a, 'i>(
    lets: &[BoundLet],
    root: XNode<'a, 'i>,
    variables: &mut Variables<'a, 'i>,
) -> Vec<Failed> {
    let mut failures = Vec::new();
    for binding in lets {
        match &binding.value {
            BoundLetValue::Query(expr) => {
                match expr.evaluate(&EvaluationContext::new(root, variables)) {
                    Ok(value) => variables.push(binding.name.as_str(), value),
                    Err(error) => {
                        variables.push_failed(binding.name.as_str());
                        failures.push(Failed::new(expr, error));
                    }
                }
            }
            BoundLetValue::Literal(text) => {
                variables.push(binding.name.as_str(), Value::String(text.clone()))
            }
        }
    }
    failures
}

/// Nodes selected by a rule context evaluated from the root
fn match_set<'a, 'i>(
    context: &BoundExpr,
    root: XNode<'a, 'i>,
    variables: &Variables<'a, 'i>,
) -> Result<HashSet<XNode<'a, 'i>>, Failed> {
    match context.evaluate(&EvaluationContext::new(root, variables)) {
        Ok(Value::Nodes(nodes)) => Ok(nodes.into_iter().collect()),
        Ok(other) => Err(Failed::new(
            context,
            EvaluationError::Type(format!(
                "a rule context must select nodes, not a {}",
                other.type_name()
            )),
        )),
        Err(error) => Err(Failed::new(context, error)),
    }
}

/// `path()` of the first node a subject expression selects
fn subject_location(
    subject: &BoundExpr,
    context: &EvaluationContext<'_, '_, '_>,
) -> Result<Option<String>, EvaluationError> {
    let value = subject.evaluate(context)?;
    Ok(value.into_items().into_iter().find_map(|item| match item {
        Item::Node(node) => Some(node_path(node)),
        Item::Atomic(_) => None,
    }))
}

fn fired_rule(pattern: &str, rule: &BoundRule, location: &str) -> FiredRule {
    FiredRule {
        pattern: pattern.to_string(),
        id: rule.id.clone(),
        has_declared_id: rule.has_declared_id,
        context: rule.context.text().to_string(),
        location: location.to_string(),
        role: rule.role.clone(),
        flag: rule.flag.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::bind_schema;
    use crate::documents::Element;
    use crate::limits::Limits;
    use crate::resolvers::{select_binding, select_phase};
    use crate::schema::{parse_schema, CheckKind};
    use crate::xpath::FunctionRegistry;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    fn bound(text: &str) -> BoundSchema {
        let limits = Limits::default();
        let schema = parse_schema(&Element::parse(text, &limits).unwrap()).unwrap();
        let selection = select_phase(&schema, None).unwrap();
        let binding = select_binding(None, schema.query_binding.as_deref(), &IndexMap::new()).unwrap();
        bind_schema(&schema, &selection, binding, &FunctionRegistry::new(), &limits).unwrap()
    }

    fn run(schema: &str, document: &str) -> ValidationReport {
        let schema = bound(schema);
        let doc = roxmltree::Document::parse(document).unwrap();
        validate(&schema, &doc)
    }

    const CARGO: &str = r#"<cargo><item id="a" weight="40"/><item id="b" weight="90"/><note/></cargo>"#;

    #[test]
    fn test_assert_and_report_polarity() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern id="weights">
                    <rule context="item">
                        <assert test="@weight &lt; 50">Item <value-of select="@id"/> weighs <value-of select="@weight"/></assert>
                        <report test="@weight &gt; 80">Heavy</report>
                    </rule>
                </pattern>
            </schema>"#,
            CARGO,
        );

        assert!(!report.is_valid());
        let fired: Vec<_> = report
            .fired()
            .map(|o| (o.kind, o.location.as_str(), o.message.as_str()))
            .collect();
        assert_eq!(
            fired,
            vec![
                (CheckKind::Assert, "/Q{}cargo[1]/Q{}item[2]", "Item b weighs 90"),
                (CheckKind::Report, "/Q{}cargo[1]/Q{}item[2]", "Heavy"),
            ]
        );
        assert_eq!(report.outcomes().count(), 4);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern id="p">
                    <rule id="specific" context="item[@id = 'a']">
                        <report test="true()">specific</report>
                    </rule>
                    <rule id="general" context="item">
                        <report test="true()">general</report>
                    </rule>
                </pattern>
            </schema>"#,
            CARGO,
        );

        let messages: Vec<_> = report.fired().map(|o| o.message.as_str()).collect();
        assert_eq!(messages, vec!["specific", "general"]);

        let suppressed: Vec<_> = report
            .events
            .iter()
            .filter_map(|e| match e {
                ValidationEvent::SuppressedRule(rule) => Some(rule.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(suppressed, vec!["general"]);
    }

    #[test]
    fn test_each_pattern_sees_every_node() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern><rule context="item"><report test="true()">one</report></rule></pattern>
                <pattern><rule context="item"><report test="true()">two</report></rule></pattern>
            </schema>"#,
            CARGO,
        );
        let messages: Vec<_> = report.fired().map(|o| (o.pattern.as_str(), o.message.as_str())).collect();
        assert_eq!(
            messages,
            vec![("#0", "one"), ("#0", "one"), ("#1", "two"), ("#1", "two")]
        );
    }

    #[test]
    fn test_attributes_and_root_are_visited() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern>
                    <rule context="/"><report test="count(//item) = 2">root</report></rule>
                    <rule context="@weight"><assert test=". &lt; 50"><name/> too large</assert></rule>
                </pattern>
            </schema>"#,
            CARGO,
        );
        let fired: Vec<_> = report.fired().map(|o| (o.location.as_str(), o.message.as_str())).collect();
        assert_eq!(
            fired,
            vec![("/", "root"), ("/Q{}cargo[1]/Q{}item[2]/@weight", "weight too large")]
        );
    }

    #[test]
    fn test_variables_across_scopes() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
                <let name="limit" value="100"/>
                <pattern>
                    <let name="total" value="sum(//item/@weight)"/>
                    <let name="limit" value="120"/>
                    <rule context="cargo">
                        <let name="over" value="$total - $limit"/>
                        <report test="$over gt 0">Over by <value-of select="$over"/>: <value-of select="item/@id"/></report>
                    </rule>
                </pattern>
            </schema>"#,
            CARGO,
        );
        let messages: Vec<_> = report.fired().map(|o| o.message.as_str()).collect();
        assert_eq!(messages, vec!["Over by 10: a b"]);
    }

    #[test]
    fn test_check_errors_are_recorded() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
                <pattern>
                    <rule context="item">
                        <assert test="@weight idiv 0 = 1">never</assert>
                        <assert test="true()">fine</assert>
                    </rule>
                </pattern>
            </schema>"#,
            CARGO,
        );

        assert!(!report.is_valid());
        assert_eq!(report.fired().count(), 0);
        let errors: Vec<_> = report.outcomes().filter_map(|o| o.error.clone()).collect();
        assert_eq!(errors, vec![EvaluationError::DivisionByZero; 2]);
        assert_eq!(report.outcomes().count(), 4);
    }

    #[test]
    fn test_context_errors_skip_only_that_rule() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
                <pattern id="p">
                    <rule id="broken" context="item[@weight idiv 0]"><report test="true()">broken</report></rule>
                    <rule id="note" context="note"><report test="true()">note</report></rule>
                </pattern>
            </schema>"#,
            CARGO,
        );

        let failures: Vec<_> = report.execution_errors().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].rule.as_deref(), Some("broken"));
        let messages: Vec<_> = report.fired().map(|o| o.message.as_str()).collect();
        assert_eq!(messages, vec!["note"]);
    }

    #[test]
    fn test_pattern_let_errors_keep_the_pattern_running() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
                <let name="limit" value="50"/>
                <pattern id="p">
                    <let name="limit" value="1 idiv 0"/>
                    <let name="count" value="count(//item)"/>
                    <rule context="cargo"><report test="$count = 2">two items</report></rule>
                    <rule context="item"><assert test="@weight lt $limit">too heavy</assert></rule>
                </pattern>
            </schema>"#,
            CARGO,
        );

        assert!(!report.is_valid());
        let failures: Vec<_> = report.execution_errors().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].pattern.as_deref(), Some("p"));
        assert_eq!(failures[0].error, EvaluationError::DivisionByZero);

        let messages: Vec<_> = report.fired().map(|o| o.message.as_str()).collect();
        assert_eq!(messages, vec!["two items"]);

        // the failed let hides the schema-level one
        let errors: Vec<_> = report.outcomes().filter_map(|o| o.error.clone()).collect();
        assert_eq!(errors, vec![EvaluationError::UnboundVariable("limit".into()); 2]);
    }

    #[test]
    fn test_schema_let_errors_do_not_stop_patterns() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
                <let name="bad" value="1 idiv 0"/>
                <pattern><rule context="note"><report test="true()">note</report></rule></pattern>
                <pattern><rule context="note"><report test="$bad">bad</report></rule></pattern>
            </schema>"#,
            CARGO,
        );

        assert_eq!(report.execution_errors().count(), 1);
        let messages: Vec<_> = report.fired().map(|o| o.message.as_str()).collect();
        assert_eq!(messages, vec!["note"]);
        assert_eq!(report.error_count(), 2);
    }

    #[test]
    fn test_rule_let_errors_skip_the_node() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
                <pattern>
                    <rule context="item">
                        <let name="ratio" value="100 idiv (@weight - 40)"/>
                        <report test="$ratio gt 0">ratio <value-of select="$ratio"/></report>
                    </rule>
                </pattern>
            </schema>"#,
            CARGO,
        );

        let failures: Vec<_> = report.execution_errors().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].location.as_deref(), Some("/Q{}cargo[1]/Q{}item[1]"));
        let messages: Vec<_> = report.fired().map(|o| o.message.as_str()).collect();
        assert_eq!(messages, vec!["ratio 2"]);
    }

    #[test]
    fn test_subject_and_annotations() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern>
                    <rule context="item" subject="@weight">
                        <assert test="@weight &lt; 50" properties="w" diagnostics="d">Too heavy</assert>
                    </rule>
                </pattern>
                <properties><property id="w" scheme="kg">weight <value-of select="@weight"/></property></properties>
                <diagnostics><diagnostic id="d" xml:lang="en"> Item <value-of select="@id"/> </diagnostic></diagnostics>
            </schema>"#,
            CARGO,
        );

        let outcome = report.fired().next().unwrap();
        assert_eq!(outcome.subject_location.as_deref(), Some("/Q{}cargo[1]/Q{}item[2]/@weight"));
        assert_eq!(outcome.properties[0].text, "weight 90");
        assert_eq!(outcome.properties[0].scheme.as_deref(), Some("kg"));
        assert_eq!(outcome.diagnostics[0].text, "Item b");
        assert_eq!(outcome.diagnostics[0].xml_lang.as_deref(), Some("en"));
    }

    #[test]
    fn test_value_of_in_xpath1_takes_first_node() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern>
                    <rule context="cargo"><report test="item">ids: <value-of select="item/@id"/></report></rule>
                </pattern>
            </schema>"#,
            CARGO,
        );
        assert_eq!(report.fired().next().unwrap().message, "ids: a");
    }

    #[test]
    fn test_valid_document() {
        let report = run(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                <pattern><rule context="item"><assert test="@weight">weight missing</assert></rule></pattern>
            </schema>"#,
            CARGO,
        );
        assert!(report.is_valid());
        assert_eq!(report.fired_rules().count(), 2);
    }
}
