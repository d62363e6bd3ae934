//! Phase and query binding selection

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{schema_error, Result, SchemaErrorKind};
use crate::schema::{Let, Pattern, Schema};
use crate::xpath::Dialect;

/// Phase name selecting every pattern
pub const PHASE_ALL: &str = "#ALL";

/// Phase name deferring to the schema's `defaultPhase`
pub const PHASE_DEFAULT: &str = "#DEFAULT";

/// Binding used when neither the caller nor the schema names one
pub const DEFAULT_QUERY_BINDING: &str = "xslt";

/// The patterns activated by a phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSelection {
    /// Selected phase id; `None` when all patterns are active
    pub phase: Option<String>,
    /// Active patterns, in `<active>` order (or document order for all)
    pub patterns: Vec<Pattern>,
    /// Phase-level variables, layered on top of the schema variables
    pub lets: Vec<Let>,
}

/// Narrow a concrete schema to the patterns of one phase
///
/// An explicit `requested` phase wins over the schema's `defaultPhase`;
/// without either, every pattern is active.
pub fn select_phase(schema: &Schema, requested: Option<&str>) -> Result<PhaseSelection> {
    let requested = requested.filter(|p| *p != PHASE_DEFAULT);
    let default_phase = schema.default_phase.as_deref().filter(|p| *p != PHASE_DEFAULT);

    let phase_id = match requested.or(default_phase) {
        None | Some(PHASE_ALL) => {
            debug!(patterns = schema.patterns.len(), "all patterns active");
            return Ok(PhaseSelection {
                phase: None,
                patterns: schema.patterns.clone(),
                lets: Vec::new(),
            });
        }
        Some(id) => id,
    };

    let phase = schema.phase(phase_id).ok_or_else(|| {
        schema_error(SchemaErrorKind::UnknownPhase, format!("no phase with id '{}'", phase_id))
    })?;

    let patterns = phase
        .active
        .iter()
        .map(|pattern_id| {
            schema.pattern(pattern_id).cloned().ok_or_else(|| {
                schema_error(
                    SchemaErrorKind::UnresolvedReference,
                    format!("phase '{}' activates unknown pattern '{}'", phase.id, pattern_id),
                )
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(phase = %phase.id, patterns = patterns.len(), "phase selected");
    Ok(PhaseSelection {
        phase: Some(phase.id.clone()),
        patterns,
        lets: phase.lets.clone(),
    })
}

/// A resolved query binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryBinding {
    /// Binding name as requested or declared (possibly an alias)
    pub name: String,
    /// Expression dialect the binding runs with
    pub dialect: Dialect,
}

impl QueryBinding {
    /// Look up one of the standard binding names
    pub fn standard(name: &str) -> Option<QueryBinding> {
        let dialect = match name {
            "xslt" | "xpath" => Dialect::XPath1,
            "xslt2" | "xpath2" => Dialect::XPath2,
            "xslt3" | "xpath3" => Dialect::XPath3,
            "xpath31" => Dialect::XPath31,
            _ => return None,
        };
        Some(QueryBinding {
            name: name.to_string(),
            dialect,
        })
    }
}

impl fmt::Display for QueryBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.dialect)
    }
}

/// Pick the query binding
///
/// The caller's request wins over the schema's `queryBinding`, which wins
/// over `xslt`. `aliases` maps extra binding names onto standard ones.
pub fn select_binding(
    requested: Option<&str>,
    declared: Option<&str>,
    aliases: &IndexMap<String, String>,
) -> Result<QueryBinding> {
    let name = requested
        .or(declared)
        .map(|n| n.trim().to_ascii_lowercase())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| DEFAULT_QUERY_BINDING.to_string());

    let binding = match QueryBinding::standard(&name) {
        Some(binding) => binding,
        None => {
            let target = aliases
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(&name))
                .map(|(_, target)| target.as_str());
            let dialect = target
                .and_then(|t| QueryBinding::standard(&t.to_ascii_lowercase()))
                .map(|b| b.dialect)
                .ok_or_else(|| {
                    schema_error(
                        SchemaErrorKind::UnsupportedBinding,
                        format!("query binding '{}' is not supported", name),
                    )
                })?;
            QueryBinding { name, dialect }
        }
    };

    debug!(binding = %binding, "query binding selected");
    Ok(binding)
}
