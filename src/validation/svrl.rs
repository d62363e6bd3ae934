//! SVRL output
//!
//! Renders a [`ValidationReport`] in the Schematron Validation Report
//! Language. Dynamic errors have no SVRL element of their own; they are
//! written as `failed-assert` elements flagged `execution-error`.

use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::report::{Annotation, CheckOutcome, ExecutionFailure, FiredRule, ValidationEvent, ValidationReport};
use crate::error::{Error, Result};
use crate::namespaces::SVRL_NAMESPACE;
use crate::schema::CheckKind;

/// Dublin Core terms namespace, used by `svrl:metadata`
pub const DCT_NAMESPACE: &str = "http://purl.org/dc/terms/";

/// Flag marking outcomes that stand for dynamic errors
pub const EXECUTION_ERROR_FLAG: &str = "execution-error";

/// SVRL rendering options
#[derive(Debug, Clone, Default)]
pub struct SvrlOptions {
    /// Emit `svrl:metadata` with the creator and creation time
    pub metadata: bool,
}

impl SvrlOptions {
    /// Default options: no metadata
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle `svrl:metadata`
    pub fn with_metadata(mut self, metadata: bool) -> Self {
        self.metadata = metadata;
        self
    }
}

type XmlResult = std::result::Result<(), quick_xml::Error>;

/// Render `report` as an indented SVRL document
pub fn to_svrl(report: &ValidationReport, options: &SvrlOptions) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write_report(&mut writer, report, options).map_err(|e| Error::Xml(e.to_string()))?;
    String::from_utf8(writer.into_inner()).map_err(|e| Error::Xml(e.to_string()))
}

fn write_report(writer: &mut Writer<Vec<u8>>, report: &ValidationReport, options: &SvrlOptions) -> XmlResult {
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("svrl:schematron-output");
    root.push_attribute(("xmlns:svrl", SVRL_NAMESPACE));
    push_optional(&mut root, "title", report.title.as_deref());
    push_optional(&mut root, "schemaVersion", report.schema_version.as_deref());
    push_optional(&mut root, "phase", report.phase.as_deref());
    writer.write_event(Event::Start(root))?;

    if options.metadata {
        write_metadata(writer, report)?;
    }
    for paragraph in &report.paragraphs {
        write_text(writer, "svrl:text", &paragraph.text)?;
    }
    for (prefix, uri) in &report.namespaces {
        let mut ns = BytesStart::new("svrl:ns-prefix-in-attribute-values");
        ns.push_attribute(("uri", uri.as_str()));
        ns.push_attribute(("prefix", prefix.as_str()));
        writer.write_event(Event::Empty(ns))?;
    }

    for event in &report.events {
        match event {
            ValidationEvent::ActivePattern(pattern) => {
                let mut element = BytesStart::new("svrl:active-pattern");
                push_optional(&mut element, "id", pattern.id.as_deref());
                push_optional(&mut element, "name", pattern.name.as_deref());
                push_optional(&mut element, "documents", report.document.as_deref());
                writer.write_event(Event::Empty(element))?;
            }
            ValidationEvent::FiredRule(rule) => write_rule(writer, "svrl:fired-rule", rule)?,
            ValidationEvent::SuppressedRule(rule) => write_rule(writer, "svrl:suppressed-rule", rule)?,
            ValidationEvent::Check(outcome) if outcome.error.is_some() => write_check_error(writer, outcome)?,
            ValidationEvent::Check(outcome) if outcome.fired => write_check(writer, outcome)?,
            ValidationEvent::Check(_) => {}
            ValidationEvent::ExecutionError(failure) => write_failure(writer, failure)?,
        }
    }

    writer.write_event(Event::End(BytesEnd::new("svrl:schematron-output")))?;
    Ok(())
}

fn write_metadata(writer: &mut Writer<Vec<u8>>, report: &ValidationReport) -> XmlResult {
    let mut metadata = BytesStart::new("svrl:metadata");
    metadata.push_attribute(("xmlns:dct", DCT_NAMESPACE));
    writer.write_event(Event::Start(metadata))?;

    writer.write_event(Event::Start(BytesStart::new("dct:creator")))?;
    writer.write_event(Event::Start(BytesStart::new("dct:agent")))?;
    write_text(writer, "dct:title", &format!("schematron {}", crate::VERSION))?;
    writer.write_event(Event::End(BytesEnd::new("dct:agent")))?;
    writer.write_event(Event::End(BytesEnd::new("dct:creator")))?;

    write_text(writer, "dct:created", &Utc::now().to_rfc3339())?;
    if let Some(document) = &report.document {
        write_text(writer, "dct:source", document)?;
    }

    writer.write_event(Event::End(BytesEnd::new("svrl:metadata")))?;
    Ok(())
}

fn write_rule(writer: &mut Writer<Vec<u8>>, name: &str, rule: &FiredRule) -> XmlResult {
    let mut element = BytesStart::new(name);
    if rule.has_declared_id {
        element.push_attribute(("id", rule.id.as_str()));
    }
    element.push_attribute(("context", rule.context.as_str()));
    push_optional(&mut element, "role", rule.role.as_deref());
    push_optional(&mut element, "flag", rule.flag.as_deref());
    writer.write_event(Event::Empty(element))?;
    Ok(())
}

fn check_start(outcome: &CheckOutcome, flag: Option<&str>) -> BytesStart<'static> {
    let name = match outcome.kind {
        CheckKind::Assert => "svrl:failed-assert",
        CheckKind::Report => "svrl:successful-report",
    };
    let mut element = BytesStart::new(name);
    push_optional(&mut element, "id", outcome.id.as_deref());
    element.push_attribute(("test", outcome.test.as_str()));
    element.push_attribute(("location", outcome.location.as_str()));
    push_optional(&mut element, "subject", outcome.subject_location.as_deref());
    push_optional(&mut element, "role", outcome.role.as_deref());
    push_optional(&mut element, "flag", flag);
    element
}

fn write_check(writer: &mut Writer<Vec<u8>>, outcome: &CheckOutcome) -> XmlResult {
    let start = check_start(outcome, outcome.flag.as_deref());
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    writer.write_event(Event::Start(start))?;

    for diagnostic in &outcome.diagnostics {
        write_annotation(writer, "svrl:diagnostic-reference", "diagnostic", diagnostic)?;
    }
    for property in &outcome.properties {
        write_annotation(writer, "svrl:property-reference", "property", property)?;
    }
    write_text(writer, "svrl:text", &outcome.message)?;

    writer.write_event(Event::End(end))?;
    Ok(())
}

fn write_check_error(writer: &mut Writer<Vec<u8>>, outcome: &CheckOutcome) -> XmlResult {
    let mut failed = outcome.clone();
    failed.kind = CheckKind::Assert;
    let start = check_start(&failed, Some(EXECUTION_ERROR_FLAG));
    writer.write_event(Event::Start(start))?;
    let message = outcome.error.as_ref().map(ToString::to_string).unwrap_or_default();
    write_text(writer, "svrl:text", &message)?;
    writer.write_event(Event::End(BytesEnd::new("svrl:failed-assert")))?;
    Ok(())
}

fn write_failure(writer: &mut Writer<Vec<u8>>, failure: &ExecutionFailure) -> XmlResult {
    let mut element = BytesStart::new("svrl:failed-assert");
    element.push_attribute(("test", failure.expression.as_str()));
    element.push_attribute(("location", failure.location.as_deref().unwrap_or("/")));
    element.push_attribute(("flag", EXECUTION_ERROR_FLAG));
    writer.write_event(Event::Start(element))?;
    write_text(writer, "svrl:text", &failure.error.to_string())?;
    writer.write_event(Event::End(BytesEnd::new("svrl:failed-assert")))?;
    Ok(())
}

fn write_annotation(
    writer: &mut Writer<Vec<u8>>,
    name: &str,
    reference: &str,
    annotation: &Annotation,
) -> XmlResult {
    let mut element = BytesStart::new(name);
    element.push_attribute((reference, annotation.id.as_str()));
    push_optional(&mut element, "role", annotation.role.as_deref());
    push_optional(&mut element, "scheme", annotation.scheme.as_deref());
    push_optional(&mut element, "xml:lang", annotation.xml_lang.as_deref());
    writer.write_event(Event::Start(element))?;
    write_text(writer, "svrl:text", &annotation.text)?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn write_text(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> XmlResult {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn push_optional(element: &mut BytesStart<'_>, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        element.push_attribute((name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Paragraph;
    use crate::validation::report::ActivePattern;
    use crate::xpath::EvaluationError;

    fn report(events: Vec<ValidationEvent>) -> ValidationReport {
        ValidationReport {
            document: Some("cargo.xml".into()),
            title: Some("Cargo & weights".into()),
            schema_version: None,
            phase: Some("check-weights".into()),
            query_binding: "xslt2".into(),
            namespaces: vec![("c".into(), "urn:cargo".into())],
            paragraphs: vec![Paragraph {
                id: None,
                class: None,
                icon: None,
                text: "Checks cargo".into(),
            }],
            events,
            valid: false,
        }
    }

    fn outcome(kind: CheckKind) -> CheckOutcome {
        CheckOutcome {
            pattern: "pa".into(),
            rule: "r1".into(),
            kind,
            id: Some("a1".into()),
            test: "@weight < 10".into(),
            location: "/Q{urn:cargo}cargo[1]".into(),
            subject_location: None,
            fired: true,
            message: "Weight not correct".into(),
            role: Some("error".into()),
            flag: None,
            properties: vec![Annotation {
                id: "p1".into(),
                role: None,
                scheme: Some("kg".into()),
                xml_lang: None,
                text: "12".into(),
            }],
            diagnostics: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn test_svrl_document() {
        let events = vec![
            ValidationEvent::ActivePattern(ActivePattern {
                id: Some("pa".into()),
                label: "pa".into(),
                name: None,
            }),
            ValidationEvent::FiredRule(FiredRule {
                pattern: "pa".into(),
                id: "pa/rule[1]".into(),
                has_declared_id: false,
                context: "c:cargo".into(),
                location: "/Q{urn:cargo}cargo[1]".into(),
                role: None,
                flag: None,
            }),
            ValidationEvent::Check(outcome(CheckKind::Assert)),
        ];
        let svrl = to_svrl(&report(events), &SvrlOptions::new()).unwrap();

        let doc = roxmltree::Document::parse(&svrl).unwrap();
        let root = doc.root_element();
        assert_eq!(root.tag_name().namespace(), Some(SVRL_NAMESPACE));
        assert_eq!(root.tag_name().name(), "schematron-output");
        assert_eq!(root.attribute("title"), Some("Cargo & weights"));
        assert_eq!(root.attribute("phase"), Some("check-weights"));

        let names: Vec<_> = root.children().filter(|n| n.is_element()).map(|n| n.tag_name().name()).collect();
        assert_eq!(
            names,
            vec!["text", "ns-prefix-in-attribute-values", "active-pattern", "fired-rule", "failed-assert"]
        );

        let fired_rule = root.children().find(|n| n.has_tag_name((SVRL_NAMESPACE, "fired-rule"))).unwrap();
        assert_eq!(fired_rule.attribute("id"), None);
        assert_eq!(fired_rule.attribute("context"), Some("c:cargo"));

        let failed = root.children().find(|n| n.has_tag_name((SVRL_NAMESPACE, "failed-assert"))).unwrap();
        assert_eq!(failed.attribute("test"), Some("@weight < 10"));
        assert_eq!(failed.attribute("role"), Some("error"));
        let parts: Vec<_> = failed.children().filter(|n| n.is_element()).map(|n| n.tag_name().name()).collect();
        assert_eq!(parts, vec!["property-reference", "text"]);
        assert!(svrl.contains("Weight not correct"));
    }

    #[test]
    fn test_errors_are_flagged() {
        let mut broken = outcome(CheckKind::Report);
        broken.fired = false;
        broken.error = Some(EvaluationError::DivisionByZero);
        let svrl = to_svrl(&report(vec![ValidationEvent::Check(broken)]), &SvrlOptions::new()).unwrap();

        let doc = roxmltree::Document::parse(&svrl).unwrap();
        let failed = doc
            .descendants()
            .find(|n| n.has_tag_name((SVRL_NAMESPACE, "failed-assert")))
            .unwrap();
        assert_eq!(failed.attribute("flag"), Some(EXECUTION_ERROR_FLAG));
        assert!(svrl.contains("integer division by zero"));
    }

    #[test]
    fn test_metadata() {
        let svrl = to_svrl(&report(Vec::new()), &SvrlOptions::new().with_metadata(true)).unwrap();
        let doc = roxmltree::Document::parse(&svrl).unwrap();
        let source = doc
            .descendants()
            .find(|n| n.has_tag_name((DCT_NAMESPACE, "source")))
            .unwrap();
        assert_eq!(source.text(), Some("cargo.xml"));
        assert!(doc.descendants().any(|n| n.has_tag_name((DCT_NAMESPACE, "created"))));
    }
}
