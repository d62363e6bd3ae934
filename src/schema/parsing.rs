//! Schematron document parsing
//!
//! Builds the typed [`Schema`] model from an include-resolved element tree.
//! Elements outside the Schematron namespace are ignored, XSLT elements and
//! the unsupported `<library>`/`<rules>` elements with a warning.

use tracing::{debug, warn};

use super::model::{
    Check, CheckKind, Diagnostic, Extends, Let, LetValue, Namespace, Param, Paragraph, Pattern,
    Phase, Property, Rule, Schema, Segment,
};
use crate::documents::{Element, Node};
use crate::error::{schema_error, Error, Result, SchemaError, SchemaErrorKind};
use crate::names::validate_variable_name;
use crate::namespaces::{QName, SCHEMATRON_NAMESPACE, XML_NAMESPACE, XSLT_NAMESPACE};

/// Schematron element local names
mod sch_elements {
    pub const SCHEMA: &str = "schema";
    pub const TITLE: &str = "title";
    pub const NS: &str = "ns";
    pub const P: &str = "p";
    pub const LET: &str = "let";
    pub const PHASE: &str = "phase";
    pub const ACTIVE: &str = "active";
    pub const PATTERN: &str = "pattern";
    pub const PARAM: &str = "param";
    pub const RULE: &str = "rule";
    pub const ASSERT: &str = "assert";
    pub const REPORT: &str = "report";
    pub const EXTENDS: &str = "extends";
    pub const INCLUDE: &str = "include";
    pub const DIAGNOSTICS: &str = "diagnostics";
    pub const DIAGNOSTIC: &str = "diagnostic";
    pub const PROPERTIES: &str = "properties";
    pub const PROPERTY: &str = "property";
    pub const VALUE_OF: &str = "value-of";
    pub const NAME: &str = "name";
    pub const LIBRARY: &str = "library";
    pub const RULES: &str = "rules";
}

use sch_elements as sch;

/// Where a rule element was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleOrigin {
    /// Child of a `<pattern>`
    Pattern,
    /// Root of a fragment loaded by `<extends href>`
    External,
}

/// Parse a schema from an include-resolved `<schema>` element
pub fn parse_schema(root: &Element) -> Result<Schema> {
    if !root.is_schematron(sch::SCHEMA) {
        return Err(invalid(
            format!(
                "expected a <schema> element in namespace {}, found {}",
                SCHEMATRON_NAMESPACE, root.qname
            ),
            root,
        ));
    }

    let mut schema = Schema {
        id: attr(root, "id"),
        schema_version: attr(root, "schemaVersion"),
        default_phase: attr(root, "defaultPhase"),
        query_binding: attr(root, "queryBinding").map(|b| b.trim().to_lowercase()),
        ..Schema::default()
    };

    for child in schematron_children(root)? {
        match child.local_name() {
            sch::TITLE => schema.title = Some(parse_title(child)),
            sch::NS => schema.namespaces.push(parse_namespace(child)?),
            sch::P => schema.paragraphs.push(parse_paragraph(child)),
            sch::LET => schema.lets.push(parse_let(child)?),
            sch::PHASE => schema.phases.push(parse_phase(child)?),
            sch::PATTERN => schema.patterns.push(parse_pattern(child)?),
            sch::DIAGNOSTICS => {
                for diagnostic in schematron_children(child)? {
                    if expect(diagnostic, sch::DIAGNOSTIC)? {
                        schema.diagnostics.push(parse_diagnostic(diagnostic)?);
                    }
                }
            }
            sch::PROPERTIES => {
                for property in schematron_children(child)? {
                    if expect(property, sch::PROPERTY)? {
                        schema.properties.push(parse_property(property)?);
                    }
                }
            }
            _ => unexpected(child, sch::SCHEMA)?,
        }
    }

    check_unique("phase", schema.phases.iter().map(|p| p.id.as_str()))?;
    check_unique("property", schema.properties.iter().map(|p| p.id.as_str()))?;
    check_unique("diagnostic", schema.diagnostics.iter().map(|d| d.id.as_str()))?;

    debug!(
        patterns = schema.patterns.len(),
        phases = schema.phases.len(),
        "parsed schema"
    );
    Ok(schema)
}

/// Schematron children of an element, with foreign elements filtered out
fn schematron_children(element: &Element) -> Result<Vec<&Element>> {
    let mut children = Vec::new();
    for child in element.child_elements() {
        match child.namespace() {
            Some(SCHEMATRON_NAMESPACE) => {
                if child.local_name() == sch::INCLUDE {
                    return Err(invalid("unresolved <include>", child));
                }
                children.push(child);
            }
            Some(XSLT_NAMESPACE) => {
                warn!(element = %child.qname, "ignoring XSLT element in schema");
            }
            _ => debug!(element = %child.qname, "ignoring foreign element"),
        }
    }
    Ok(children)
}

/// True if `element` is the expected child; unsupported elements are skipped
fn expect(element: &Element, local_name: &str) -> Result<bool> {
    if element.local_name() == local_name {
        Ok(true)
    } else {
        unexpected(element, local_name)?;
        Ok(false)
    }
}

fn unexpected(element: &Element, parent: &str) -> Result<()> {
    match element.local_name() {
        sch::LIBRARY | sch::RULES => {
            warn!(element = element.local_name(), "unsupported Schematron element skipped");
            Ok(())
        }
        sch::P | sch::TITLE => Ok(()),
        _ => Err(invalid(
            format!("unexpected <{}> inside <{}>", element.local_name(), parent),
            element,
        )),
    }
}

fn parse_title(element: &Element) -> String {
    element.text_content().trim().to_string()
}

fn parse_namespace(element: &Element) -> Result<Namespace> {
    Ok(Namespace {
        prefix: required(element, "prefix")?,
        uri: required(element, "uri")?,
    })
}

fn parse_paragraph(element: &Element) -> Paragraph {
    let text = element
        .children
        .iter()
        .map(|node| match node {
            Node::Text(t) => t.clone(),
            Node::Element(e) => e.to_xml_string(),
        })
        .collect::<String>();

    Paragraph {
        id: attr(element, "id"),
        class: attr(element, "class"),
        icon: attr(element, "icon"),
        text: text.trim().to_string(),
    }
}

fn parse_let(element: &Element) -> Result<Let> {
    let name = required(element, "name")?;
    validate_variable_name(&name, sch::LET)?;

    let value = match element.get_attribute("value") {
        Some(value) => LetValue::Query(value.to_string()),
        None => {
            let content = element
                .children
                .iter()
                .map(|node| match node {
                    Node::Text(t) => t.clone(),
                    Node::Element(e) => e.to_xml_string(),
                })
                .collect::<String>();
            LetValue::Xml(content.trim().to_string())
        }
    };

    Ok(Let { name, value })
}

fn parse_phase(element: &Element) -> Result<Phase> {
    let mut phase = Phase {
        id: required(element, "id")?,
        active: Vec::new(),
        lets: Vec::new(),
    };

    for child in schematron_children(element)? {
        match child.local_name() {
            sch::ACTIVE => phase.active.push(required(child, "pattern")?),
            sch::LET => phase.lets.push(parse_let(child)?),
            _ => unexpected(child, sch::PHASE)?,
        }
    }
    Ok(phase)
}

fn parse_pattern(element: &Element) -> Result<Pattern> {
    let mut pattern = Pattern {
        id: attr(element, "id"),
        is_abstract: flag_attr(element, "abstract")?,
        is_a: attr(element, "is-a"),
        ..Pattern::default()
    };

    if pattern.is_abstract && pattern.is_a.is_some() {
        return Err(invalid("a pattern cannot be both abstract and an instance", element));
    }
    if pattern.is_abstract && pattern.id.is_none() {
        return Err(invalid("abstract patterns require an id", element));
    }

    for child in schematron_children(element)? {
        match child.local_name() {
            sch::TITLE => pattern.title = Some(parse_title(child)),
            sch::P => pattern.paragraphs.push(parse_paragraph(child)),
            sch::LET => pattern.lets.push(parse_let(child)?),
            sch::RULE => pattern.rules.push(parse_rule(child, RuleOrigin::Pattern)?),
            sch::PARAM => {
                let name = required(child, "name")?;
                validate_variable_name(&name, sch::PARAM)?;
                pattern.params.push(Param {
                    name,
                    value: required(child, "value")?,
                });
            }
            _ => unexpected(child, sch::PATTERN)?,
        }
    }

    if !pattern.params.is_empty() && pattern.is_a.is_none() {
        return Err(invalid("<param> is only allowed in patterns with is-a", element));
    }
    Ok(pattern)
}

fn parse_rule(element: &Element, origin: RuleOrigin) -> Result<Rule> {
    let mut rule = Rule {
        id: attr(element, "id"),
        is_abstract: flag_attr(element, "abstract")?,
        context: attr(element, "context"),
        subject: attr(element, "subject"),
        role: attr(element, "role"),
        flag: attr(element, "flag"),
        ..Rule::default()
    };

    match origin {
        RuleOrigin::Pattern => {
            if rule.is_abstract && rule.id.is_none() {
                return Err(invalid("abstract rules require an id", element));
            }
            if !rule.is_abstract && rule.context.is_none() {
                return Err(invalid("rule requires a context attribute", element));
            }
        }
        RuleOrigin::External => {
            if rule.is_abstract || rule.context.is_some() {
                return Err(invalid(
                    "a rule loaded by <extends href> may not be abstract or have a context",
                    element,
                ));
            }
        }
    }

    for child in schematron_children(element)? {
        match child.local_name() {
            sch::LET => rule.lets.push(parse_let(child)?),
            sch::ASSERT => rule.checks.push(parse_check(child, CheckKind::Assert)?),
            sch::REPORT => rule.checks.push(parse_check(child, CheckKind::Report)?),
            sch::EXTENDS => rule.extends.push(parse_extends(child)?),
            _ => unexpected(child, sch::RULE)?,
        }
    }
    Ok(rule)
}

fn parse_extends(element: &Element) -> Result<Extends> {
    if let Some(id) = element.get_attribute("rule") {
        return Ok(Extends::ById(id.to_string()));
    }

    let href = required(element, "href")?;
    let loaded = element
        .child_elements()
        .find(|e| e.is_schematron(sch::RULE))
        .ok_or_else(|| invalid(format!("unresolved <extends href=\"{}\">", href), element))?;

    Ok(Extends::External {
        href,
        rule: Box::new(parse_rule(loaded, RuleOrigin::External)?),
    })
}

fn parse_check(element: &Element, kind: CheckKind) -> Result<Check> {
    Ok(Check {
        kind,
        test: required(element, "test")?,
        message: parse_template(element)?,
        properties: id_list(element, "properties"),
        diagnostics: id_list(element, "diagnostics"),
        id: attr(element, "id"),
        role: attr(element, "role"),
        flag: attr(element, "flag"),
        subject: attr(element, "subject"),
    })
}

fn parse_diagnostic(element: &Element) -> Result<Diagnostic> {
    Ok(Diagnostic {
        id: required(element, "id")?,
        role: attr(element, "role"),
        xml_lang: element
            .get_attribute_qname(&QName::namespaced(XML_NAMESPACE, "lang"))
            .map(str::to_string),
        content: parse_template(element)?,
    })
}

fn parse_property(element: &Element) -> Result<Property> {
    Ok(Property {
        id: required(element, "id")?,
        role: attr(element, "role"),
        scheme: attr(element, "scheme"),
        content: parse_template(element)?,
    })
}

/// Parse mixed content into template segments
///
/// `<value-of>` and `<name>` become expression segments; any other markup
/// is kept as serialized text.
fn parse_template(element: &Element) -> Result<Vec<Segment>> {
    let mut segments: Vec<Segment> = Vec::new();

    for node in &element.children {
        let segment = match node {
            Node::Text(t) => Segment::Text(t.clone()),
            Node::Element(e) if e.is_schematron(sch::VALUE_OF) => {
                Segment::ValueOf(required(e, "select")?)
            }
            Node::Element(e) if e.is_schematron(sch::NAME) => Segment::Name(attr(e, "path")),
            Node::Element(e) => Segment::Text(e.to_xml_string()),
        };

        match (segments.last_mut(), segment) {
            (Some(Segment::Text(prev)), Segment::Text(next)) => prev.push_str(&next),
            (_, segment) => segments.push(segment),
        }
    }
    Ok(segments)
}

fn attr(element: &Element, name: &str) -> Option<String> {
    element.get_attribute(name).map(str::to_string)
}

fn required(element: &Element, name: &str) -> Result<String> {
    attr(element, name).ok_or_else(|| {
        invalid(
            format!("<{}> is missing required attribute '{}'", element.local_name(), name),
            element,
        )
    })
}

fn flag_attr(element: &Element, name: &str) -> Result<bool> {
    match element.get_attribute(name).map(str::trim) {
        None | Some("false") => Ok(false),
        Some("true") => Ok(true),
        Some(other) => Err(invalid(
            format!("attribute '{}' must be true or false, got '{}'", name, other),
            element,
        )),
    }
}

fn id_list(element: &Element, name: &str) -> Vec<String> {
    element
        .get_attribute(name)
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn check_unique<'a>(what: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(schema_error(
                SchemaErrorKind::DuplicateId,
                format!("{} id '{}' is declared more than once", what, id),
            ));
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>, element: &Element) -> Error {
    Error::Schema(
        SchemaError::new(SchemaErrorKind::InvalidStructure, message).with_element(element.describe()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Limits;
    use pretty_assertions::assert_eq;

    fn parse(text: &str) -> Result<Schema> {
        parse_schema(&Element::parse(text, &Limits::default())?)
    }

    #[test]
    fn test_parse_schema_header() {
        let schema = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron" queryBinding="XPath2"
                       defaultPhase="main" schemaVersion="1.2">
                 <title> Cargo checks </title>
                 <ns prefix="c" uri="urn:cargo"/>
                 <let name="limit" value="10"/>
                 <p>First paragraph</p>
               </schema>"#,
        )
        .unwrap();

        assert_eq!(schema.title.as_deref(), Some("Cargo checks"));
        assert_eq!(schema.query_binding.as_deref(), Some("xpath2"));
        assert_eq!(schema.default_phase.as_deref(), Some("main"));
        assert_eq!(schema.schema_version.as_deref(), Some("1.2"));
        assert_eq!(
            schema.namespaces,
            vec![Namespace { prefix: "c".into(), uri: "urn:cargo".into() }]
        );
        assert_eq!(schema.lets[0].value, LetValue::Query("10".into()));
        assert_eq!(schema.paragraphs[0].text, "First paragraph");
    }

    #[test]
    fn test_parse_rule_and_message() {
        let schema = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <pattern id="p">
                   <rule id="r" context="item" role="warning">
                     <assert test="@w" properties="p1 p2" diagnostics="d1">Item <name/> has
                       weight <value-of select="@w"/> and <emph>more</emph></assert>
                     <report test="@x">x</report>
                   </rule>
                 </pattern>
               </schema>"#,
        )
        .unwrap();

        let rule = &schema.patterns[0].rules[0];
        assert_eq!(rule.role.as_deref(), Some("warning"));
        assert_eq!(rule.checks.len(), 2);

        let check = &rule.checks[0];
        assert_eq!(check.kind, CheckKind::Assert);
        assert_eq!(check.properties, vec!["p1", "p2"]);
        assert_eq!(check.diagnostics, vec!["d1"]);
        assert_eq!(check.message[0], Segment::Text("Item ".into()));
        assert_eq!(check.message[1], Segment::Name(None));
        assert_eq!(check.message[3], Segment::ValueOf("@w".into()));
        assert!(matches!(&check.message[4], Segment::Text(t) if t.contains("<emph>more</emph>")));
        assert_eq!(rule.checks[1].kind, CheckKind::Report);
    }

    #[test]
    fn test_xml_let_content() {
        let schema = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <let name="doc"><codes><code>A</code></codes></let>
               </schema>"#,
        )
        .unwrap();
        assert_eq!(
            schema.lets[0].value,
            LetValue::Xml("<codes><code>A</code></codes>".into())
        );
    }

    #[test]
    fn test_missing_context_is_rejected() {
        let err = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <pattern><rule><assert test="true()"/></rule></pattern>
               </schema>"#,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::InvalidStructure));
    }

    #[test]
    fn test_wrong_root() {
        let err = parse(r#"<schema xmlns="http://www.ascc.net/xml/schematron"/>"#).unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::InvalidStructure));
    }

    #[test]
    fn test_duplicate_phase_ids() {
        let err = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <phase id="a"/><phase id="a"/>
               </schema>"#,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::DuplicateId));
    }

    #[test]
    fn test_duplicate_property_ids() {
        let err = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <properties><property id="x"/></properties>
                 <properties><property id="x"/></properties>
               </schema>"#,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::DuplicateId));
    }

    #[test]
    fn test_unsupported_and_foreign_elements_skipped() {
        let schema = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron"
                       xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:function name="f"/>
                 <library/>
                 <pattern id="p"><rule context="a"><assert test="b"/></rule></pattern>
               </schema>"#,
        )
        .unwrap();
        assert_eq!(schema.patterns.len(), 1);
    }

    #[test]
    fn test_abstract_and_instance_patterns() {
        let schema = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <pattern id="base" abstract="true">
                   <rule context="$ctx"><assert test="$test"/></rule>
                 </pattern>
                 <pattern id="inst" is-a="base">
                   <param name="ctx" value="item"/>
                   <param name="test" value="@id"/>
                 </pattern>
               </schema>"#,
        )
        .unwrap();

        assert!(schema.patterns[0].is_abstract);
        assert_eq!(schema.patterns[1].is_a.as_deref(), Some("base"));
        assert_eq!(schema.patterns[1].params.len(), 2);
        assert!(!schema.is_concrete());
    }

    #[test]
    fn test_unresolved_include_is_rejected() {
        let err = parse(
            r#"<schema xmlns="http://purl.oclc.org/dsdl/schematron">
                 <include href="x.sch"/>
               </schema>"#,
        )
        .unwrap_err();
        assert_eq!(err.schema_kind(), Some(SchemaErrorKind::InvalidStructure));
    }
}
