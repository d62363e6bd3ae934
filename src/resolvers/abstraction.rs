//! Abstraction resolution
//!
//! Turns an include-resolved schema into a concrete one: `extends`
//! references are flattened into the extending rule, `is-a` patterns are
//! instantiated from their abstract pattern with `$param` substitution, and
//! abstract patterns and rules are dropped.

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{schema_error, Error, Result, SchemaError, SchemaErrorKind};
use crate::limits::Limits;
use crate::names::name_prefix_len;
use crate::schema::{Extends, Param, Pattern, Rule, Schema};

/// Return a concrete copy of `schema`
///
/// Concrete input comes back unchanged.
pub fn resolve_abstractions(schema: &Schema, limits: &Limits) -> Result<Schema> {
    let resolver = AbstractionResolver::new(schema, limits)?;

    let flattened = schema
        .patterns
        .iter()
        .map(|pattern| resolver.flatten_pattern(pattern))
        .collect::<Result<Vec<_>>>()?;

    let mut patterns = Vec::with_capacity(flattened.len());
    for (raw, pattern) in schema.patterns.iter().zip(&flattened) {
        if pattern.is_abstract {
            continue;
        }
        match &raw.is_a {
            Some(target) => patterns.push(instantiate(pattern, target, &schema.patterns, &flattened)?),
            None => patterns.push(pattern.clone()),
        }
    }

    debug!(
        patterns_in = schema.patterns.len(),
        patterns_out = patterns.len(),
        "resolved abstract patterns and rules"
    );

    Ok(Schema {
        patterns,
        ..schema.clone()
    })
}

/// Rule and pattern lookup tables over the raw schema
struct AbstractionResolver<'a> {
    rules: IndexMap<&'a str, Vec<&'a Rule>>,
    limits: &'a Limits,
}

impl<'a> AbstractionResolver<'a> {
    fn new(schema: &'a Schema, limits: &'a Limits) -> Result<Self> {
        let mut patterns: IndexMap<&str, &Pattern> = IndexMap::new();
        let mut rules: IndexMap<&str, Vec<&Rule>> = IndexMap::new();

        for pattern in &schema.patterns {
            if let Some(id) = pattern.id.as_deref() {
                if patterns.insert(id, pattern).is_some() {
                    return Err(schema_error(
                        SchemaErrorKind::DuplicateId,
                        format!("pattern id '{}' is declared more than once", id),
                    ));
                }
            }
            for rule in &pattern.rules {
                if let Some(id) = rule.id.as_deref() {
                    rules.entry(id).or_default().push(rule);
                }
            }
        }

        Ok(Self { rules, limits })
    }

    fn flatten_pattern(&self, pattern: &Pattern) -> Result<Pattern> {
        // abstract rules are walked too so their chains are checked
        let mut rules = Vec::with_capacity(pattern.rules.len());
        for rule in &pattern.rules {
            let mut chain = Vec::new();
            let flat = self.flatten_rule(rule, &mut chain)?;
            if !rule.is_abstract {
                rules.push(flat);
            }
        }

        Ok(Pattern {
            rules,
            ..pattern.clone()
        })
    }

    /// Copy `rule` with every extended rule's lets and checks appended
    fn flatten_rule(&self, rule: &Rule, chain: &mut Vec<String>) -> Result<Rule> {
        let mut flat = Rule {
            extends: Vec::new(),
            ..rule.clone()
        };

        for reference in &rule.extends {
            let (key, target) = match reference {
                Extends::ById(id) => (id.clone(), self.lookup(id)?),
                Extends::External { href, rule } => (format!("href:{}", href), rule.as_ref()),
            };

            if chain.contains(&key) {
                let mut cycle = chain.clone();
                cycle.push(key.clone());
                return Err(Error::Schema(
                    SchemaError::new(
                        SchemaErrorKind::CyclicExtends,
                        format!("rule '{}' extends itself: {}", key, cycle.join(" -> ")),
                    )
                    .with_element(describe_rule(rule)),
                ));
            }

            chain.push(key);
            self.limits.check_extends_depth(chain.len())?;
            let inlined = self.flatten_rule(target, chain)?;
            chain.pop();

            flat.lets.extend(inlined.lets);
            flat.checks.extend(inlined.checks);
        }

        Ok(flat)
    }

    fn lookup(&self, id: &str) -> Result<&'a Rule> {
        match self.rules.get(id).map(Vec::as_slice) {
            Some([rule]) => Ok(rule),
            Some(_) => Err(schema_error(
                SchemaErrorKind::DuplicateId,
                format!("rule id '{}' is declared more than once", id),
            )),
            None => Err(schema_error(
                SchemaErrorKind::UnresolvedExtends,
                format!("no rule with id '{}'", id),
            )),
        }
    }
}

fn describe_rule(rule: &Rule) -> String {
    match (&rule.id, &rule.context) {
        (Some(id), _) => format!("<rule id=\"{}\">", id),
        (None, Some(context)) => format!("<rule context=\"{}\">", context),
        (None, None) => "<rule>".to_string(),
    }
}

/// Build the concrete pattern for `instance` from the abstract pattern `target`
fn instantiate(
    instance: &Pattern,
    target: &str,
    raw: &[Pattern],
    flattened: &[Pattern],
) -> Result<Pattern> {
    let abstract_pattern = raw
        .iter()
        .position(|p| p.id.as_deref() == Some(target))
        .map(|idx| &flattened[idx])
        .filter(|p| p.is_abstract)
        .ok_or_else(|| {
            Error::Schema(
                SchemaError::new(
                    SchemaErrorKind::UnknownAbstractPattern,
                    format!("'{}' is not an abstract pattern", target),
                )
                .with_element(format!(
                    "<pattern id=\"{}\" is-a=\"{}\">",
                    instance.id.as_deref().unwrap_or(""),
                    target
                )),
            )
        })?;

    let substitute = |text: &str| substitute_params(text, &instance.params);

    let mut paragraphs = instance.paragraphs.clone();
    paragraphs.extend(abstract_pattern.paragraphs.iter().cloned());

    Ok(Pattern {
        id: instance.id.clone(),
        is_abstract: false,
        is_a: None,
        title: instance.title.clone().or_else(|| abstract_pattern.title.clone()),
        params: Vec::new(),
        lets: abstract_pattern.lets.iter().map(|l| l.map_expressions(&substitute)).collect(),
        rules: abstract_pattern
            .rules
            .iter()
            .map(|r| r.map_expressions(&substitute))
            .collect(),
        paragraphs,
    })
}

/// Replace `$name` tokens with the value of the first param called `name`
///
/// A token covers the whole name following the `$`, so `$pv_item` never
/// matches inside `$pv_items`. Substituted text is not scanned again.
pub fn substitute_params(text: &str, params: &[Param]) -> String {
    if params.is_empty() || !text.contains('$') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let len = name_prefix_len(after);
        let name = &after[..len];

        match params.iter().find(|p| !name.is_empty() && p.name == name) {
            Some(param) => out.push_str(&param.value),
            None => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}
