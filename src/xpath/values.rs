//! Expression values and XPath type conversions

use std::fmt;

use super::nodes::XNode;
use super::types::AtomicType;

/// Atomic value
#[derive(Debug, Clone, PartialEq)]
pub enum Atomic {
    /// `xs:boolean`
    Boolean(bool),
    /// Numeric value (`xs:double` semantics)
    Number(f64),
    /// `xs:string`
    String(String),
    /// `xs:untypedAtomic`, the result of atomizing a node
    Untyped(String),
    /// Any other schema type, in its lexical form
    Typed(AtomicType, String),
}

impl Atomic {
    /// Effective boolean value of a single atomic
    pub fn to_boolean(&self) -> bool {
        match self {
            Atomic::Boolean(b) => *b,
            Atomic::Number(n) => *n != 0.0 && !n.is_nan(),
            Atomic::String(s) | Atomic::Untyped(s) | Atomic::Typed(_, s) => !s.is_empty(),
        }
    }

    /// XPath `number()` conversion
    pub fn to_number(&self) -> f64 {
        match self {
            Atomic::Boolean(true) => 1.0,
            Atomic::Boolean(false) => 0.0,
            Atomic::Number(n) => *n,
            Atomic::String(s) | Atomic::Untyped(s) | Atomic::Typed(_, s) => parse_number(s),
        }
    }

    /// XPath `string()` conversion
    pub fn to_xpath_string(&self) -> String {
        match self {
            Atomic::Boolean(b) => b.to_string(),
            Atomic::Number(n) => format_number(*n),
            Atomic::String(s) | Atomic::Untyped(s) | Atomic::Typed(_, s) => s.clone(),
        }
    }

    /// Name of the atomic type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Atomic::Boolean(_) => "xs:boolean",
            Atomic::Number(_) => "xs:double",
            Atomic::String(_) => "xs:string",
            Atomic::Untyped(_) => "xs:untypedAtomic",
            Atomic::Typed(kind, _) => kind.name(),
        }
    }
}

impl fmt::Display for Atomic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xpath_string())
    }
}

/// Item of a sequence
#[derive(Debug, Clone, PartialEq)]
pub enum Item<'a, 'i> {
    /// A node
    Node(XNode<'a, 'i>),
    /// An atomic value
    Atomic(Atomic),
}

impl<'a, 'i> Item<'a, 'i> {
    /// Atomize the item
    pub fn atomize(&self) -> Atomic {
        match self {
            Item::Node(node) => Atomic::Untyped(node.string_value()),
            Item::Atomic(atomic) => atomic.clone(),
        }
    }

    /// String value of the item
    pub fn to_xpath_string(&self) -> String {
        match self {
            Item::Node(node) => node.string_value(),
            Item::Atomic(atomic) => atomic.to_xpath_string(),
        }
    }
}

/// Result of evaluating an expression
///
/// XPath 1.0 expressions only produce the four scalar and node-set
/// variants. Sequences that are neither all nodes nor a single atomic use
/// [`Value::Sequence`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a, 'i> {
    /// Boolean
    Boolean(bool),
    /// Number
    Number(f64),
    /// String
    String(String),
    /// Node sequence; empty for the empty sequence
    Nodes(Vec<XNode<'a, 'i>>),
    /// Any other sequence
    Sequence(Vec<Item<'a, 'i>>),
}

impl<'a, 'i> Value<'a, 'i> {
    /// The empty sequence
    pub fn empty() -> Self {
        Value::Nodes(Vec::new())
    }

    /// Wrap one atomic value
    pub fn from_atomic(atomic: Atomic) -> Self {
        match atomic {
            Atomic::Boolean(b) => Value::Boolean(b),
            Atomic::Number(n) => Value::Number(n),
            Atomic::String(s) => Value::String(s),
            other @ (Atomic::Untyped(_) | Atomic::Typed(..)) => Value::Sequence(vec![Item::Atomic(other)]),
        }
    }

    /// Build the most specific value for a sequence of items
    pub fn from_items(items: Vec<Item<'a, 'i>>) -> Self {
        if items.iter().all(|item| matches!(item, Item::Node(_))) {
            return Value::Nodes(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Item::Node(node) => Some(node),
                        Item::Atomic(_) => None,
                    })
                    .collect(),
            );
        }
        if items.len() == 1 {
            if let Some(Item::Atomic(atomic)) = items.first() {
                return Value::from_atomic(atomic.clone());
            }
        }
        Value::Sequence(items)
    }

    /// Flatten into sequence items
    pub fn into_items(self) -> Vec<Item<'a, 'i>> {
        match self {
            Value::Boolean(b) => vec![Item::Atomic(Atomic::Boolean(b))],
            Value::Number(n) => vec![Item::Atomic(Atomic::Number(n))],
            Value::String(s) => vec![Item::Atomic(Atomic::String(s))],
            Value::Nodes(nodes) => nodes.into_iter().map(Item::Node).collect(),
            Value::Sequence(items) => items,
        }
    }

    /// Atomized items
    pub fn atomize(&self) -> Vec<Atomic> {
        match self {
            Value::Boolean(b) => vec![Atomic::Boolean(*b)],
            Value::Number(n) => vec![Atomic::Number(*n)],
            Value::String(s) => vec![Atomic::String(s.clone())],
            Value::Nodes(nodes) => nodes
                .iter()
                .map(|n| Atomic::Untyped(n.string_value()))
                .collect(),
            Value::Sequence(items) => items.iter().map(Item::atomize).collect(),
        }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        match self {
            Value::Nodes(nodes) => nodes.len(),
            Value::Sequence(items) => items.len(),
            _ => 1,
        }
    }

    /// True for the empty sequence
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nodes of a node-only value
    pub fn as_nodes(&self) -> Option<&[XNode<'a, 'i>]> {
        match self {
            Value::Nodes(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// Effective boolean value
    ///
    /// A sequence counts as true when it is non-empty and every item is
    /// true; nodes always count as true.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Sequence(items) => {
                !items.is_empty()
                    && items.iter().all(|item| match item {
                        Item::Node(_) => true,
                        Item::Atomic(atomic) => atomic.to_boolean(),
                    })
            }
        }
    }

    /// XPath `number()` conversion, using the first item of a sequence
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Boolean(b) => Atomic::Boolean(*b).to_number(),
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Nodes(nodes) => nodes
                .first()
                .map(|n| parse_number(&n.string_value()))
                .unwrap_or(f64::NAN),
            Value::Sequence(items) => items
                .first()
                .map(|item| item.atomize().to_number())
                .unwrap_or(f64::NAN),
        }
    }

    /// XPath `string()` conversion, using the first item of a sequence
    pub fn to_xpath_string(&self) -> String {
        match self {
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Nodes(nodes) => nodes.first().map(|n| n.string_value()).unwrap_or_default(),
            Value::Sequence(items) => items.first().map(Item::to_xpath_string).unwrap_or_default(),
        }
    }

    /// Name of the value type, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Nodes(_) => "node-set",
            Value::Sequence(_) => "sequence",
        }
    }
}

/// Parse a string with XPath number rules; anything else is NaN
pub fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty()
        || !trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Format a number with XPath string rules
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1e21), "1000000000000000000000");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-1.5"), -1.5);
        assert!(parse_number("").is_nan());
        assert!(parse_number("12kg").is_nan());
        assert!(parse_number("inf").is_nan());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::empty().to_boolean());
        assert!(Value::String("0".into()).to_boolean());
        assert!(!Value::Number(f64::NAN).to_boolean());

        let mixed = Value::Sequence(vec![
            Item::Atomic(Atomic::Boolean(true)),
            Item::Atomic(Atomic::Number(0.0)),
        ]);
        assert!(!mixed.to_boolean());

        let all_true = Value::Sequence(vec![
            Item::Atomic(Atomic::String("a".into())),
            Item::Atomic(Atomic::Number(1.0)),
        ]);
        assert!(all_true.to_boolean());
    }

    #[test]
    fn test_from_items() {
        assert_eq!(Value::from_items(Vec::new()), Value::empty());
        assert_eq!(
            Value::from_items(vec![Item::Atomic(Atomic::Number(3.0))]),
            Value::Number(3.0)
        );
        assert!(matches!(
            Value::from_items(vec![
                Item::Atomic(Atomic::Number(1.0)),
                Item::Atomic(Atomic::Number(2.0))
            ]),
            Value::Sequence(items) if items.len() == 2
        ));
    }
}
