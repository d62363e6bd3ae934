//! Typed schema model
//!
//! A structural mirror of a Schematron schema document. The model is pure
//! data: each resolution stage consumes one `Schema` value and builds a new
//! one. Expressions are kept as text until the binder compiles them.

use serde::Serialize;

/// A Schematron schema
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Schema {
    /// `id` attribute
    pub id: Option<String>,
    /// Content of `<title>`
    pub title: Option<String>,
    /// `schemaVersion` attribute
    pub schema_version: Option<String>,
    /// `defaultPhase` attribute
    pub default_phase: Option<String>,
    /// `queryBinding` attribute
    pub query_binding: Option<String>,
    /// `<ns>` declarations, in document order
    pub namespaces: Vec<Namespace>,
    /// Schema-level variables
    pub lets: Vec<Let>,
    /// Patterns, in document order
    pub patterns: Vec<Pattern>,
    /// Phases, in document order
    pub phases: Vec<Phase>,
    /// Contents of all `<properties>` sections
    pub properties: Vec<Property>,
    /// Contents of all `<diagnostics>` sections
    pub diagnostics: Vec<Diagnostic>,
    /// Top-level `<p>` paragraphs
    pub paragraphs: Vec<Paragraph>,
}

impl Schema {
    /// Find a pattern by id
    pub fn pattern(&self, id: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id.as_deref() == Some(id))
    }

    /// Find a phase by id
    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    /// Find a property by id
    pub fn property(&self, id: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.id == id)
    }

    /// Find a diagnostic by id
    pub fn diagnostic(&self, id: &str) -> Option<&Diagnostic> {
        self.diagnostics.iter().find(|d| d.id == id)
    }

    /// True when no abstract pattern, abstract rule, `is-a` or `extends` remains
    pub fn is_concrete(&self) -> bool {
        self.patterns.iter().all(|pattern| {
            !pattern.is_abstract
                && pattern.is_a.is_none()
                && pattern
                    .rules
                    .iter()
                    .all(|rule| !rule.is_abstract && rule.extends.is_empty())
        })
    }
}

/// A `<ns>` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    /// Prefix
    pub prefix: String,
    /// Namespace URI
    pub uri: String,
}

/// A `<pattern>`
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Pattern {
    /// `id` attribute
    pub id: Option<String>,
    /// `abstract="true"`
    pub is_abstract: bool,
    /// `is-a` attribute: the abstract pattern this pattern instantiates
    pub is_a: Option<String>,
    /// Content of `<title>`
    pub title: Option<String>,
    /// `<param>` children, used only with `is-a`
    pub params: Vec<Param>,
    /// Pattern-level variables
    pub lets: Vec<Let>,
    /// Rules, in document order
    pub rules: Vec<Rule>,
    /// `<p>` paragraphs
    pub paragraphs: Vec<Paragraph>,
}

impl Pattern {
    /// Every expression string reachable from this pattern
    pub fn expressions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for binding in &self.lets {
            binding.collect_expressions(&mut out);
        }
        for rule in &self.rules {
            rule.collect_expressions(&mut out);
        }
        out
    }
}

/// A `<param>` of an instance pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Param {
    /// Parameter name, referenced as `$name` in the abstract pattern
    pub name: String,
    /// Replacement text
    pub value: String,
}

/// A `<rule>`
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Rule {
    /// `id` attribute
    pub id: Option<String>,
    /// `abstract="true"`
    pub is_abstract: bool,
    /// `context` attribute; absent for abstract and external rules
    pub context: Option<String>,
    /// `subject` attribute
    pub subject: Option<String>,
    /// `role` attribute
    pub role: Option<String>,
    /// `flag` attribute
    pub flag: Option<String>,
    /// `<extends>` references, in document order
    pub extends: Vec<Extends>,
    /// Rule-level variables
    pub lets: Vec<Let>,
    /// Asserts and reports, in document order
    pub checks: Vec<Check>,
}

impl Rule {
    /// Rules without a context that are not abstract are loaded through `<extends href>`
    pub fn is_external(&self) -> bool {
        !self.is_abstract && self.context.is_none()
    }

    /// Apply `f` to every expression string of the rule
    pub fn map_expressions<F: Fn(&str) -> String>(&self, f: &F) -> Rule {
        Rule {
            id: self.id.clone(),
            is_abstract: self.is_abstract,
            context: self.context.as_deref().map(f),
            subject: self.subject.as_deref().map(f),
            role: self.role.clone(),
            flag: self.flag.clone(),
            extends: self
                .extends
                .iter()
                .map(|e| match e {
                    Extends::ById(id) => Extends::ById(id.clone()),
                    Extends::External { href, rule } => Extends::External {
                        href: href.clone(),
                        rule: Box::new(rule.map_expressions(f)),
                    },
                })
                .collect(),
            lets: self.lets.iter().map(|l| l.map_expressions(f)).collect(),
            checks: self.checks.iter().map(|c| c.map_expressions(f)).collect(),
        }
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.extend(self.context.as_deref());
        out.extend(self.subject.as_deref());
        for binding in &self.lets {
            binding.collect_expressions(out);
        }
        for check in &self.checks {
            check.collect_expressions(out);
        }
    }
}

/// An `<extends>` reference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Extends {
    /// `<extends rule="id"/>`
    ById(String),
    /// `<extends href="..."/>` with the rule loaded from the fragment
    External {
        /// The href as written
        href: String,
        /// The loaded rule
        rule: Box<Rule>,
    },
}

/// Check kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Fires when the test is false
    Assert,
    /// Fires when the test is true
    Report,
}

impl CheckKind {
    /// Element name
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckKind::Assert => "assert",
            CheckKind::Report => "report",
        }
    }

    /// Whether a check of this kind fires for the given test result
    pub fn fires(&self, test_result: bool) -> bool {
        match self {
            CheckKind::Assert => !test_result,
            CheckKind::Report => test_result,
        }
    }
}

/// An `<assert>` or `<report>`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    /// Assert or report
    pub kind: CheckKind,
    /// `test` attribute
    pub test: String,
    /// Message template
    pub message: Vec<Segment>,
    /// `properties` attribute, split on whitespace
    pub properties: Vec<String>,
    /// `diagnostics` attribute, split on whitespace
    pub diagnostics: Vec<String>,
    /// `id` attribute
    pub id: Option<String>,
    /// `role` attribute
    pub role: Option<String>,
    /// `flag` attribute
    pub flag: Option<String>,
    /// `subject` attribute
    pub subject: Option<String>,
}

impl Check {
    /// Apply `f` to every expression string of the check
    pub fn map_expressions<F: Fn(&str) -> String>(&self, f: &F) -> Check {
        Check {
            test: f(&self.test),
            message: self.message.iter().map(|s| s.map_expressions(f)).collect(),
            subject: self.subject.as_deref().map(f),
            ..self.clone()
        }
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.test);
        out.extend(self.subject.as_deref());
        for segment in &self.message {
            segment.collect_expressions(out);
        }
    }
}

/// One piece of a message template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Segment {
    /// Literal text (inline markup is kept as serialized XML)
    Text(String),
    /// `<value-of select="..."/>`
    ValueOf(String),
    /// `<name/>` or `<name path="..."/>`
    Name(Option<String>),
}

impl Segment {
    /// Apply `f` to the expression of this segment
    pub fn map_expressions<F: Fn(&str) -> String>(&self, f: &F) -> Segment {
        match self {
            Segment::Text(t) => Segment::Text(t.clone()),
            Segment::ValueOf(select) => Segment::ValueOf(f(select)),
            Segment::Name(path) => Segment::Name(path.as_deref().map(f)),
        }
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Segment::Text(_) | Segment::Name(None) => {}
            Segment::ValueOf(select) => out.push(select),
            Segment::Name(Some(path)) => out.push(path),
        }
    }
}

/// Value of a `<let>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LetValue {
    /// `value` attribute: an expression
    Query(String),
    /// Element content, bound as a string
    Xml(String),
}

/// A `<let>` variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Let {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: LetValue,
}

impl Let {
    /// Apply `f` to the value expression
    pub fn map_expressions<F: Fn(&str) -> String>(&self, f: &F) -> Let {
        Let {
            name: self.name.clone(),
            value: match &self.value {
                LetValue::Query(q) => LetValue::Query(f(q)),
                LetValue::Xml(x) => LetValue::Xml(x.clone()),
            },
        }
    }

    fn collect_expressions<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let LetValue::Query(q) = &self.value {
            out.push(q);
        }
    }
}

/// A `<phase>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    /// `id` attribute
    pub id: String,
    /// Pattern ids from `<active pattern="..."/>`, in order
    pub active: Vec<String>,
    /// Phase-level variables
    pub lets: Vec<Let>,
}

/// A `<property>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Property {
    /// `id` attribute
    pub id: String,
    /// `role` attribute
    pub role: Option<String>,
    /// `scheme` attribute
    pub scheme: Option<String>,
    /// Value template
    pub content: Vec<Segment>,
}

/// A `<diagnostic>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// `id` attribute
    pub id: String,
    /// `role` attribute
    pub role: Option<String>,
    /// `xml:lang` attribute
    pub xml_lang: Option<String>,
    /// Value template
    pub content: Vec<Segment>,
}

/// A `<p>` paragraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paragraph {
    /// `id` attribute
    pub id: Option<String>,
    /// `class` attribute
    pub class: Option<String>,
    /// `icon` attribute
    pub icon: Option<String>,
    /// Paragraph text
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(kind: CheckKind, test: &str) -> Check {
        Check {
            kind,
            test: test.to_string(),
            message: vec![Segment::Text("msg ".into()), Segment::ValueOf("$v".into())],
            properties: Vec::new(),
            diagnostics: Vec::new(),
            id: None,
            role: None,
            flag: None,
            subject: None,
        }
    }

    #[test]
    fn test_check_kind_fires() {
        assert!(CheckKind::Assert.fires(false));
        assert!(!CheckKind::Assert.fires(true));
        assert!(CheckKind::Report.fires(true));
        assert!(!CheckKind::Report.fires(false));
    }

    #[test]
    fn test_map_expressions_touches_only_expressions() {
        let rule = Rule {
            context: Some("$ctx".into()),
            lets: vec![Let {
                name: "v".into(),
                value: LetValue::Query("$ctx/@v".into()),
            }],
            checks: vec![check(CheckKind::Assert, "$ctx > 1")],
            ..Rule::default()
        };

        let mapped = rule.map_expressions(&|s: &str| s.replace("$ctx", "item"));
        assert_eq!(mapped.context.as_deref(), Some("item"));
        assert_eq!(mapped.lets[0].value, LetValue::Query("item/@v".into()));
        assert_eq!(mapped.checks[0].test, "item > 1");
        assert_eq!(mapped.checks[0].message[0], Segment::Text("msg ".into()));
    }

    #[test]
    fn test_pattern_expressions() {
        let pattern = Pattern {
            rules: vec![Rule {
                context: Some("item".into()),
                checks: vec![check(CheckKind::Report, "@a")],
                ..Rule::default()
            }],
            ..Pattern::default()
        };
        assert_eq!(pattern.expressions(), vec!["item", "@a", "$v"]);
    }

    #[test]
    fn test_is_concrete() {
        let mut schema = Schema::default();
        assert!(schema.is_concrete());

        schema.patterns.push(Pattern {
            is_abstract: true,
            ..Pattern::default()
        });
        assert!(!schema.is_concrete());
    }
}
