//! Expression binding
//!
//! Compiles every expression of the active patterns. Variables are visible
//! in declaration scope: schema, then phase, then pattern, then rule, and a
//! `let` only sees the lets declared before it. A name declared again in an
//! inner scope hides the outer one.

use tracing::debug;

use super::{
    BoundAnnotation, BoundCheck, BoundExpr, BoundLet, BoundLetValue, BoundPattern, BoundRule,
    BoundSchema, BoundSegment,
};
use crate::error::{schema_error, Error, Result, SchemaError, SchemaErrorKind};
use crate::limits::Limits;
use crate::namespaces::NamespaceTable;
use crate::resolvers::{PhaseSelection, QueryBinding};
use crate::schema::{Check, Let, LetValue, Pattern, Rule, Schema, Segment};
use crate::xpath::{
    CompileContext, Dialect, ExpressionEngine, ExpressionKind, FunctionRegistry, XPathEngine,
};

/// Binds concrete schemas with one expression engine
pub struct Binder<'b> {
    engine: &'b dyn ExpressionEngine,
    functions: &'b FunctionRegistry,
    limits: &'b Limits,
}

impl<'b> Binder<'b> {
    /// Create a binder
    pub fn new(
        engine: &'b dyn ExpressionEngine,
        functions: &'b FunctionRegistry,
        limits: &'b Limits,
    ) -> Self {
        Self {
            engine,
            functions,
            limits,
        }
    }

    /// Compile the active patterns of `schema`
    ///
    /// `schema` must be concrete. Binding stops at the first expression that
    /// does not compile.
    pub fn bind(
        &self,
        schema: &Schema,
        selection: &PhaseSelection,
        binding: QueryBinding,
    ) -> Result<BoundSchema> {
        let mut namespaces = NamespaceTable::new();
        for ns in &schema.namespaces {
            namespaces.bind(ns.prefix.as_str(), ns.uri.as_str());
        }

        let mut scope = Scope {
            binder: self,
            schema,
            namespaces: &namespaces,
            dialect: binding.dialect,
            visible: Vec::new(),
        };

        let mut lets = scope.bind_lets(&schema.lets, "schema")?;
        if let Some(phase) = &selection.phase {
            lets.extend(scope.bind_lets(&selection.lets, &format!("phase '{}'", phase))?);
        }

        let global = scope.visible.len();
        let mut patterns = Vec::with_capacity(selection.patterns.len());
        for (position, pattern) in selection.patterns.iter().enumerate() {
            // schema position; anonymous patterns are only active when every pattern is
            let index = pattern
                .id
                .as_deref()
                .and_then(|id| schema.patterns.iter().position(|p| p.id.as_deref() == Some(id)))
                .unwrap_or(position);
            patterns.push(scope.bind_pattern(index, pattern)?);
            scope.visible.truncate(global);
        }

        let bound = BoundSchema {
            title: schema.title.clone(),
            schema_version: schema.schema_version.clone(),
            phase: selection.phase.clone(),
            phases: schema.phases.iter().map(|p| p.id.clone()).collect(),
            binding,
            namespaces,
            lets,
            patterns,
            paragraphs: schema.paragraphs.clone(),
        };

        debug!(
            binding = %bound.binding,
            patterns = bound.patterns.len(),
            rules = bound.rule_count(),
            checks = bound.check_count(),
            "schema bound"
        );
        Ok(bound)
    }
}

/// Bind with the built-in XPath engine
pub fn bind_schema(
    schema: &Schema,
    selection: &PhaseSelection,
    binding: QueryBinding,
    functions: &FunctionRegistry,
    limits: &Limits,
) -> Result<BoundSchema> {
    Binder::new(&XPathEngine, functions, limits).bind(schema, selection, binding)
}

/// Compilation state: the variables visible at the current point
struct Scope<'s> {
    binder: &'s Binder<'s>,
    schema: &'s Schema,
    namespaces: &'s NamespaceTable,
    dialect: Dialect,
    visible: Vec<String>,
}

impl<'s> Scope<'s> {
    fn compile(&self, text: &str, kind: ExpressionKind, owner: &str) -> Result<BoundExpr> {
        let context = CompileContext::new(self.namespaces, self.binder.functions, self.dialect)
            .with_variables(&self.visible)
            .with_kind(kind)
            .with_max_depth(self.binder.limits.max_expression_depth);

        self.binder
            .engine
            .compile(text, &context)
            .map(|compiled| BoundExpr::new(text, compiled))
            .map_err(|err| {
                Error::Schema(
                    SchemaError::new(
                        SchemaErrorKind::ExpressionCompile,
                        format!("cannot compile expression of {}", owner),
                    )
                    .with_expression(text)
                    .with_element(owner)
                    .with_reason(err.to_string()),
                )
            })
    }

    fn value(&self, text: &str, owner: &str) -> Result<BoundExpr> {
        self.compile(text, ExpressionKind::Value, owner)
    }

    fn bind_lets(&mut self, lets: &[Let], owner: &str) -> Result<Vec<BoundLet>> {
        let mut bound = Vec::with_capacity(lets.len());
        for binding in lets {
            let value = match &binding.value {
                LetValue::Query(query) => BoundLetValue::Query(
                    self.value(query, &format!("let '{}' in {}", binding.name, owner))?,
                ),
                LetValue::Xml(content) => BoundLetValue::Literal(content.clone()),
            };
            self.visible.push(binding.name.clone());
            bound.push(BoundLet {
                name: binding.name.clone(),
                value,
            });
        }
        Ok(bound)
    }

    fn bind_pattern(&mut self, index: usize, pattern: &Pattern) -> Result<BoundPattern> {
        let label = match &pattern.id {
            Some(id) => id.clone(),
            None => format!("#{}", index),
        };
        let owner = format!("pattern '{}'", label);
        let lets = self.bind_lets(&pattern.lets, &owner)?;

        let outer = self.visible.len();
        let mut rules = Vec::with_capacity(pattern.rules.len());
        for (position, rule) in pattern.rules.iter().enumerate() {
            rules.push(self.bind_rule(&label, position + 1, rule)?);
            self.visible.truncate(outer);
        }

        Ok(BoundPattern {
            id: pattern.id.clone(),
            index,
            title: pattern.title.clone(),
            paragraphs: pattern.paragraphs.clone(),
            lets,
            rules,
        })
    }

    fn bind_rule(&mut self, pattern: &str, position: usize, rule: &Rule) -> Result<BoundRule> {
        let id = match &rule.id {
            Some(id) => id.clone(),
            None => format!("{}/rule[{}]", pattern, position),
        };
        let owner = format!("rule '{}' in pattern '{}'", id, pattern);

        let context_text = rule.context.as_deref().ok_or_else(|| {
            Error::Schema(
                SchemaError::new(SchemaErrorKind::InvalidStructure, "rule has no context")
                    .with_element(owner.as_str()),
            )
        })?;
        let context = self.compile(context_text, ExpressionKind::Match, &owner)?;

        let lets = self.bind_lets(&rule.lets, &owner)?;
        let subject = rule
            .subject
            .as_deref()
            .map(|s| self.value(s, &owner))
            .transpose()?;
        let checks = rule
            .checks
            .iter()
            .map(|check| self.bind_check(check, &owner))
            .collect::<Result<Vec<_>>>()?;

        Ok(BoundRule {
            id,
            has_declared_id: rule.id.is_some(),
            context,
            subject,
            role: rule.role.clone(),
            flag: rule.flag.clone(),
            lets,
            checks,
        })
    }

    fn bind_check(&self, check: &Check, rule_owner: &str) -> Result<BoundCheck> {
        let owner = match &check.id {
            Some(id) => format!("{} '{}' in {}", check.kind.as_str(), id, rule_owner),
            None => format!("{} in {}", check.kind.as_str(), rule_owner),
        };

        let properties = check
            .properties
            .iter()
            .map(|id| self.bind_property(id, &owner))
            .collect::<Result<Vec<_>>>()?;
        let diagnostics = check
            .diagnostics
            .iter()
            .map(|id| self.bind_diagnostic(id, &owner))
            .collect::<Result<Vec<_>>>()?;

        Ok(BoundCheck {
            kind: check.kind,
            id: check.id.clone(),
            test: self.value(&check.test, &owner)?,
            message: self.bind_template(&check.message, &owner)?,
            properties,
            diagnostics,
            role: check.role.clone(),
            flag: check.flag.clone(),
            subject: check
                .subject
                .as_deref()
                .map(|s| self.value(s, &owner))
                .transpose()?,
        })
    }

    fn bind_property(&self, id: &str, owner: &str) -> Result<BoundAnnotation> {
        let property = self.schema.property(id).ok_or_else(|| {
            schema_error(
                SchemaErrorKind::UnresolvedReference,
                format!("{} references unknown property '{}'", owner, id),
            )
        })?;
        Ok(BoundAnnotation {
            id: property.id.clone(),
            role: property.role.clone(),
            scheme: property.scheme.clone(),
            xml_lang: None,
            content: self.bind_template(&property.content, &format!("property '{}'", id))?,
        })
    }

    fn bind_diagnostic(&self, id: &str, owner: &str) -> Result<BoundAnnotation> {
        let diagnostic = self.schema.diagnostic(id).ok_or_else(|| {
            schema_error(
                SchemaErrorKind::UnresolvedReference,
                format!("{} references unknown diagnostic '{}'", owner, id),
            )
        })?;
        Ok(BoundAnnotation {
            id: diagnostic.id.clone(),
            role: diagnostic.role.clone(),
            scheme: None,
            xml_lang: diagnostic.xml_lang.clone(),
            content: self.bind_template(&diagnostic.content, &format!("diagnostic '{}'", id))?,
        })
    }

    fn bind_template(&self, segments: &[Segment], owner: &str) -> Result<Vec<BoundSegment>> {
        segments
            .iter()
            .map(|segment| match segment {
                Segment::Text(text) => Ok(BoundSegment::Text(text.clone())),
                Segment::ValueOf(select) => self.value(select, owner).map(BoundSegment::Value),
                Segment::Name(None) => self.value("name(.)", owner).map(BoundSegment::Value),
                Segment::Name(Some(path)) => self
                    .value(&format!("name({})", path), owner)
                    .map(BoundSegment::Value),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::Element;
    use crate::resolvers::{select_binding, select_phase};
    use crate::schema::parse_schema;
    use indexmap::IndexMap;

    fn bind(text: &str, phase: Option<&str>) -> Result<BoundSchema> {
        let limits = Limits::default();
        let schema = parse_schema(&Element::parse(text, &limits)?)?;
        let selection = select_phase(&schema, phase)?;
        let binding = select_binding(None, schema.query_binding.as_deref(), &IndexMap::new())?;
        bind_schema(&schema, &selection, binding, &FunctionRegistry::new(), &limits)
    }

    const SCHEMA: &str = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt2">
        <ns prefix="c" uri="urn:cargo"/>
        <let name="limit" value="100"/>
        <phase id="weights">
            <active pattern="p1"/>
            <let name="unit" value="'kg'"/>
        </phase>
        <pattern id="p1">
            <let name="total" value="sum(//c:item/@weight)"/>
            <rule context="c:item">
                <let name="w" value="@weight"/>
                <assert test="$w le $limit" diagnostics="d1">Too heavy: <value-of select="$w"/> <value-of select="$unit"/></assert>
            </rule>
            <rule id="cargo" context="c:cargo">
                <report test="$total > $limit" properties="pr1"><name/> over limit</report>
            </rule>
        </pattern>
        <pattern>
            <rule context="/">
                <assert test="true()"/>
            </rule>
        </pattern>
        <properties><property id="pr1" role="info">total <value-of select="$total"/></property></properties>
        <diagnostics><diagnostic id="d1" xml:lang="en">Item <value-of select="@id"/></diagnostic></diagnostics>
    </schema>"#;

    #[test]
    fn test_bind_phase() {
        let bound = bind(SCHEMA, Some("weights")).unwrap();

        assert_eq!(bound.phase.as_deref(), Some("weights"));
        assert_eq!(bound.phases, vec!["weights".to_string()]);
        assert_eq!(bound.binding.dialect, Dialect::XPath2);
        assert_eq!(bound.lets.len(), 2);
        assert_eq!(bound.patterns.len(), 1);

        let pattern = &bound.patterns[0];
        assert_eq!(pattern.rules[0].id, "p1/rule[1]");
        assert!(!pattern.rules[0].has_declared_id);
        assert_eq!(pattern.rules[1].id, "cargo");
        assert_eq!(pattern.rules[0].checks[0].diagnostics[0].id, "d1");
        assert_eq!(pattern.rules[1].checks[0].properties[0].role.as_deref(), Some("info"));
        assert_eq!(bound.check_count(), 2);
    }

    #[test]
    fn test_phase_variables_are_only_visible_in_their_phase() {
        let err = bind(SCHEMA, None).unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::ExpressionCompile));
        let Error::Schema(err) = err else { panic!("expected a schema error") };
        assert_eq!(err.expression.as_deref(), Some("$unit"));
        assert_eq!(err.element.as_deref(), Some("assert in rule 'p1/rule[1]' in pattern 'p1'"));
    }

    #[test]
    fn test_let_sees_only_earlier_lets() {
        let err = bind(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <let name="a" value="$b"/>
                 <let name="b" value="1"/>
               </schema>"#,
            None,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::ExpressionCompile));
    }

    #[test]
    fn test_rule_variables_do_not_leak() {
        let err = bind(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <pattern id="p">
                   <rule context="a"><let name="x" value="1"/><assert test="$x"/></rule>
                   <rule context="b"><assert test="$x"/></rule>
                 </pattern>
               </schema>"#,
            None,
        )
        .unwrap_err();
        let Error::Schema(err) = err else { panic!("expected a schema error") };
        assert_eq!(err.element.as_deref(), Some("assert in rule 'p/rule[2]' in pattern 'p'"));
    }

    #[test]
    fn test_dialect_is_enforced() {
        let err = bind(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="xslt">
                 <pattern><rule context="a"><assert test="1 eq 1"/></rule></pattern>
               </schema>"#,
            None,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::ExpressionCompile));
    }

    #[test]
    fn test_unknown_diagnostic_reference() {
        let err = bind(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <pattern><rule context="a"><assert test="b" diagnostics="missing"/></rule></pattern>
               </schema>"#,
            None,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::UnresolvedReference));
    }

    #[test]
    fn test_anonymous_pattern_labels() {
        let bound = bind(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <pattern><rule context="a"><assert test="b"/></rule></pattern>
                 <pattern><rule context="/"><assert test="true()"/></rule></pattern>
               </schema>"#,
            None,
        )
        .unwrap();
        assert_eq!(bound.patterns[1].label(), "#1");
        assert_eq!(bound.patterns[1].rules[0].id, "#1/rule[1]");
    }

    #[test]
    fn test_pattern_index_does_not_depend_on_phase() {
        let text = r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <phase id="last"><active pattern="p3"/></phase>
                 <pattern id="p1"><rule context="a"><assert test="b"/></rule></pattern>
                 <pattern><rule context="/"><assert test="true()"/></rule></pattern>
                 <pattern id="p3"><rule context="c"><assert test="d"/></rule></pattern>
               </schema>"#;

        let all = bind(text, Some("#ALL")).unwrap();
        let indexes: Vec<_> = all.patterns.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(all.patterns[1].label(), "#1");

        let phase = bind(text, Some("last")).unwrap();
        assert_eq!(phase.patterns.len(), 1);
        assert_eq!(phase.patterns[0].index, 2);
        assert_eq!(phase.patterns[0].rules[0].id, all.patterns[2].rules[0].id);
    }
}
