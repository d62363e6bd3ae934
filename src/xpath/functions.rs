//! Function library
//!
//! The XPath 1.0 core library, the XPath 2.0/3.0 functions Schematron
//! schemas commonly use, and caller-registered custom functions.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use regex::Regex;

use super::evaluator::{EvaluationError, Focus};
use super::nodes::{NodeKind, XNode};
use super::parsers::XPathParseError;
use super::types::{cast, compare_typed, date_component, AtomicType, DateComponent};
use super::values::{format_number, parse_number, Atomic, Item, Value};
use super::{CompileContext, Dialect};
use crate::namespaces::{QName, XPATH_FUNCTIONS_NAMESPACE};

/// A function supplied by the caller
///
/// Arguments arrive atomized, one `Vec` per argument. Custom functions are
/// only available with XPath 2.0 and later bindings.
pub trait CustomFunction: Send + Sync {
    /// Call the function
    fn call(&self, args: &[Vec<Atomic>]) -> Result<Atomic, EvaluationError>;
}

impl<F> CustomFunction for F
where
    F: Fn(&[Vec<Atomic>]) -> Result<Atomic, EvaluationError> + Send + Sync,
{
    fn call(&self, args: &[Vec<Atomic>]) -> Result<Atomic, EvaluationError> {
        self(args)
    }
}

/// Custom functions by expanded name
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<QName, Arc<dyn CustomFunction>>,
}

impl FunctionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function, replacing one of the same name
    pub fn register<F>(&mut self, name: QName, function: F)
    where
        F: CustomFunction + 'static,
    {
        self.functions.insert(name, Arc::new(function));
    }

    /// Builder form of [`FunctionRegistry::register`]
    pub fn with_function<F>(mut self, name: QName, function: F) -> Self
    where
        F: CustomFunction + 'static,
    {
        self.register(name, function);
        self
    }

    /// Look up a function
    pub fn get(&self, name: &QName) -> Option<&Arc<dyn CustomFunction>> {
        self.functions.get(name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> impl Iterator<Item = &QName> {
        self.functions.keys()
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

/// A resolved custom function
#[derive(Clone)]
pub struct CustomRef {
    /// Expanded name
    pub name: QName,
    /// Implementation
    pub function: Arc<dyn CustomFunction>,
}

impl fmt::Debug for CustomRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CustomRef({})", self.name)
    }
}

/// Function called by an expression
#[derive(Debug, Clone)]
pub enum Function {
    /// Built-in function
    Builtin(Builtin),
    /// Caller-supplied function
    Custom(CustomRef),
}

/// Built-in functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Builtin {
    Last,
    Position,
    Count,
    LocalName,
    NamespaceUri,
    Name,
    String,
    Concat,
    StartsWith,
    Contains,
    SubstringBefore,
    SubstringAfter,
    Substring,
    StringLength,
    NormalizeSpace,
    Translate,
    Boolean,
    Not,
    True,
    False,
    Lang,
    Number,
    Sum,
    Floor,
    Ceiling,
    Round,
    Exists,
    Empty,
    EndsWith,
    UpperCase,
    LowerCase,
    Matches,
    Replace,
    Tokenize,
    StringJoin,
    DistinctValues,
    Abs,
    Min,
    Max,
    Avg,
    Reverse,
    Data,
    Root,
    CurrentDate,
    CurrentDateTime,
    CurrentTime,
    Path,
    Current,
    FormatNumber,
    IndexOf,
    Compare,
    Subsequence,
    InsertBefore,
    Remove,
    ExactlyOne,
    OneOrMore,
    ZeroOrOne,
    Unordered,
    StringToCodepoints,
    CodepointsToString,
    RoundHalfToEven,
    EncodeForUri,
    Head,
    Tail,
    HasChildren,
    /// A component of a date, dateTime or time value
    Component(AtomicType, DateComponent),
}

const BUILTINS: &[(&str, Builtin, Dialect)] = &[
    ("last", Builtin::Last, Dialect::XPath1),
    ("position", Builtin::Position, Dialect::XPath1),
    ("count", Builtin::Count, Dialect::XPath1),
    ("local-name", Builtin::LocalName, Dialect::XPath1),
    ("namespace-uri", Builtin::NamespaceUri, Dialect::XPath1),
    ("name", Builtin::Name, Dialect::XPath1),
    ("string", Builtin::String, Dialect::XPath1),
    ("concat", Builtin::Concat, Dialect::XPath1),
    ("starts-with", Builtin::StartsWith, Dialect::XPath1),
    ("contains", Builtin::Contains, Dialect::XPath1),
    ("substring-before", Builtin::SubstringBefore, Dialect::XPath1),
    ("substring-after", Builtin::SubstringAfter, Dialect::XPath1),
    ("substring", Builtin::Substring, Dialect::XPath1),
    ("string-length", Builtin::StringLength, Dialect::XPath1),
    ("normalize-space", Builtin::NormalizeSpace, Dialect::XPath1),
    ("translate", Builtin::Translate, Dialect::XPath1),
    ("boolean", Builtin::Boolean, Dialect::XPath1),
    ("not", Builtin::Not, Dialect::XPath1),
    ("true", Builtin::True, Dialect::XPath1),
    ("false", Builtin::False, Dialect::XPath1),
    ("lang", Builtin::Lang, Dialect::XPath1),
    ("number", Builtin::Number, Dialect::XPath1),
    ("sum", Builtin::Sum, Dialect::XPath1),
    ("floor", Builtin::Floor, Dialect::XPath1),
    ("ceiling", Builtin::Ceiling, Dialect::XPath1),
    ("round", Builtin::Round, Dialect::XPath1),
    ("exists", Builtin::Exists, Dialect::XPath2),
    ("empty", Builtin::Empty, Dialect::XPath2),
    ("ends-with", Builtin::EndsWith, Dialect::XPath2),
    ("upper-case", Builtin::UpperCase, Dialect::XPath2),
    ("lower-case", Builtin::LowerCase, Dialect::XPath2),
    ("matches", Builtin::Matches, Dialect::XPath2),
    ("replace", Builtin::Replace, Dialect::XPath2),
    ("tokenize", Builtin::Tokenize, Dialect::XPath2),
    ("string-join", Builtin::StringJoin, Dialect::XPath2),
    ("distinct-values", Builtin::DistinctValues, Dialect::XPath2),
    ("abs", Builtin::Abs, Dialect::XPath2),
    ("min", Builtin::Min, Dialect::XPath2),
    ("max", Builtin::Max, Dialect::XPath2),
    ("avg", Builtin::Avg, Dialect::XPath2),
    ("reverse", Builtin::Reverse, Dialect::XPath2),
    ("data", Builtin::Data, Dialect::XPath2),
    ("root", Builtin::Root, Dialect::XPath2),
    ("current-date", Builtin::CurrentDate, Dialect::XPath2),
    ("current-dateTime", Builtin::CurrentDateTime, Dialect::XPath2),
    ("current-time", Builtin::CurrentTime, Dialect::XPath2),
    ("current", Builtin::Current, Dialect::XPath1),
    ("format-number", Builtin::FormatNumber, Dialect::XPath1),
    ("index-of", Builtin::IndexOf, Dialect::XPath2),
    ("compare", Builtin::Compare, Dialect::XPath2),
    ("subsequence", Builtin::Subsequence, Dialect::XPath2),
    ("insert-before", Builtin::InsertBefore, Dialect::XPath2),
    ("remove", Builtin::Remove, Dialect::XPath2),
    ("exactly-one", Builtin::ExactlyOne, Dialect::XPath2),
    ("one-or-more", Builtin::OneOrMore, Dialect::XPath2),
    ("zero-or-one", Builtin::ZeroOrOne, Dialect::XPath2),
    ("unordered", Builtin::Unordered, Dialect::XPath2),
    ("string-to-codepoints", Builtin::StringToCodepoints, Dialect::XPath2),
    ("codepoints-to-string", Builtin::CodepointsToString, Dialect::XPath2),
    ("round-half-to-even", Builtin::RoundHalfToEven, Dialect::XPath2),
    ("encode-for-uri", Builtin::EncodeForUri, Dialect::XPath2),
    ("year-from-date", Builtin::Component(AtomicType::Date, DateComponent::Year), Dialect::XPath2),
    ("month-from-date", Builtin::Component(AtomicType::Date, DateComponent::Month), Dialect::XPath2),
    ("day-from-date", Builtin::Component(AtomicType::Date, DateComponent::Day), Dialect::XPath2),
    ("year-from-dateTime", Builtin::Component(AtomicType::DateTime, DateComponent::Year), Dialect::XPath2),
    ("month-from-dateTime", Builtin::Component(AtomicType::DateTime, DateComponent::Month), Dialect::XPath2),
    ("day-from-dateTime", Builtin::Component(AtomicType::DateTime, DateComponent::Day), Dialect::XPath2),
    ("hours-from-dateTime", Builtin::Component(AtomicType::DateTime, DateComponent::Hours), Dialect::XPath2),
    ("minutes-from-dateTime", Builtin::Component(AtomicType::DateTime, DateComponent::Minutes), Dialect::XPath2),
    ("seconds-from-dateTime", Builtin::Component(AtomicType::DateTime, DateComponent::Seconds), Dialect::XPath2),
    ("hours-from-time", Builtin::Component(AtomicType::Time, DateComponent::Hours), Dialect::XPath2),
    ("minutes-from-time", Builtin::Component(AtomicType::Time, DateComponent::Minutes), Dialect::XPath2),
    ("seconds-from-time", Builtin::Component(AtomicType::Time, DateComponent::Seconds), Dialect::XPath2),
    ("path", Builtin::Path, Dialect::XPath3),
    ("head", Builtin::Head, Dialect::XPath3),
    ("tail", Builtin::Tail, Dialect::XPath3),
    ("has-children", Builtin::HasChildren, Dialect::XPath3),
];

impl Builtin {
    /// Find a built-in available in `dialect`
    pub fn lookup(name: &str, dialect: Dialect) -> Option<Builtin> {
        BUILTINS
            .iter()
            .find(|(n, _, since)| *n == name && dialect >= *since)
            .map(|(_, builtin, _)| *builtin)
    }

    /// Function name
    pub fn name(&self) -> &'static str {
        BUILTINS
            .iter()
            .find(|(_, b, _)| b == self)
            .map(|(n, _, _)| *n)
            .unwrap_or("")
    }

    /// Accepted number of arguments as `(min, max)`; `None` means unbounded
    pub fn arity(&self, dialect: Dialect) -> (usize, Option<usize>) {
        use Builtin::*;
        let xpath3 = dialect >= Dialect::XPath3;
        match self {
            Last | Position | True | False | CurrentDate | CurrentDateTime | CurrentTime
            | Current => (0, Some(0)),
            LocalName | NamespaceUri | Name | String | StringLength | NormalizeSpace | Number
            | Root | Path | HasChildren => (0, Some(1)),
            Count | Boolean | Not | Lang | Floor | Ceiling | Round | Exists | Empty | UpperCase
            | LowerCase | DistinctValues | Abs | Min | Max | Avg | Reverse | ExactlyOne
            | OneOrMore | ZeroOrOne | Unordered | StringToCodepoints | CodepointsToString
            | EncodeForUri | Head | Tail | Component(..) => (1, Some(1)),
            FormatNumber | IndexOf | Compare | Remove => (2, Some(2)),
            Subsequence => (2, Some(3)),
            InsertBefore => (3, Some(3)),
            RoundHalfToEven => (1, Some(2)),
            Data => (if xpath3 { 0 } else { 1 }, Some(1)),
            Sum => (1, Some(if dialect >= Dialect::XPath2 { 2 } else { 1 })),
            Concat => (2, None),
            StartsWith | Contains | SubstringBefore | SubstringAfter | EndsWith => (2, Some(2)),
            Substring => (2, Some(3)),
            Translate => (3, Some(3)),
            Matches => (2, Some(3)),
            Replace => (3, Some(4)),
            Tokenize => (if xpath3 { 1 } else { 2 }, Some(3)),
            StringJoin => (if xpath3 { 1 } else { 2 }, Some(2)),
        }
    }
}

/// Resolve a function call while parsing
pub fn resolve_function(
    name: &str,
    arity: usize,
    context: &CompileContext<'_>,
) -> Result<Function, XPathParseError> {
    let (prefix, local) = match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    };
    let namespace = match prefix {
        Some(prefix) => Some(match context.namespaces.get(prefix) {
            Some(uri) => uri,
            None if prefix == "fn" => XPATH_FUNCTIONS_NAMESPACE,
            None => return Err(XPathParseError::UnknownPrefix(prefix.to_string())),
        }),
        None => None,
    };

    if namespace.map_or(true, |ns| ns == XPATH_FUNCTIONS_NAMESPACE) {
        if let Some(builtin) = Builtin::lookup(local, context.dialect) {
            let (min, max) = builtin.arity(context.dialect);
            if arity >= min && max.map_or(true, |max| arity <= max) {
                return Ok(Function::Builtin(builtin));
            }
        }
    }

    let qname = match namespace {
        Some(ns) => QName::namespaced(ns, local),
        None => QName::local(local),
    };
    if let Some(function) = context.functions.get(&qname) {
        if context.dialect < Dialect::XPath2 {
            return Err(XPathParseError::NotInDialect {
                feature: format!("custom function {}()", name),
                dialect: context.dialect,
            });
        }
        return Ok(Function::Custom(CustomRef {
            name: qname,
            function: Arc::clone(function),
        }));
    }

    Err(XPathParseError::UnknownFunction {
        name: name.to_string(),
        arity,
    })
}

/// Call a custom function
pub fn call_custom<'a, 'i>(
    function: &CustomRef,
    args: Vec<Value<'a, 'i>>,
) -> Result<Value<'a, 'i>, EvaluationError> {
    let atomized: Vec<Vec<Atomic>> = args.iter().map(Value::atomize).collect();
    function.function.call(&atomized).map(Value::from_atomic)
}

fn fail(builtin: Builtin, message: impl Into<String>) -> EvaluationError {
    EvaluationError::Function {
        function: builtin.name().to_string(),
        message: message.into(),
    }
}

/// The node a node-name function applies to: the argument or the context
fn target_node<'a, 'i>(
    builtin: Builtin,
    args: &[Value<'a, 'i>],
    focus: &Focus<'a, 'i>,
) -> Result<Option<XNode<'a, 'i>>, EvaluationError> {
    match args.first() {
        None => focus.node().map(Some),
        Some(Value::Nodes(nodes)) => Ok(nodes.first().copied()),
        Some(value) if value.is_empty() => Ok(None),
        Some(value) => Err(fail(
            builtin,
            format!("expected a node but got a {}", value.type_name()),
        )),
    }
}

fn string_arg(args: &[Value<'_, '_>], index: usize) -> String {
    args.get(index).map(Value::to_xpath_string).unwrap_or_default()
}

fn string_or_context(args: &[Value<'_, '_>], focus: &Focus<'_, '_>) -> String {
    match args.first() {
        Some(value) => value.to_xpath_string(),
        None => focus.item.to_xpath_string(),
    }
}

/// XPath 1.0 `round()`
pub fn xpath_round(n: f64) -> f64 {
    if n.is_nan() || n.is_infinite() {
        n
    } else if (-0.5..0.0).contains(&n) {
        -0.0
    } else {
        (n + 0.5).floor()
    }
}

fn substring(text: &str, start: f64, length: Option<f64>) -> String {
    let start = xpath_round(start);
    let end = length.map(|l| start + xpath_round(l));
    text.chars()
        .enumerate()
        .filter(|(idx, _)| {
            let p = (*idx + 1) as f64;
            p >= start && end.map_or(true, |end| p < end)
        })
        .map(|(_, c)| c)
        .collect()
}

fn translate(text: &str, from: &str, to: &str) -> String {
    let from: Vec<char> = from.chars().collect();
    let to: Vec<char> = to.chars().collect();
    text.chars()
        .filter_map(|c| match from.iter().position(|f| *f == c) {
            Some(pos) => to.get(pos).copied(),
            None => Some(c),
        })
        .collect()
}

fn normalize_space(text: &str) -> String {
    text.split(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compile an XPath regular expression with its flags
fn compile_regex(builtin: Builtin, pattern: &str, flags: &str) -> Result<Regex, EvaluationError> {
    let mut inline = String::new();
    let mut literal = false;
    for flag in flags.chars() {
        match flag {
            's' | 'm' | 'i' | 'x' => inline.push(flag),
            'q' => literal = true,
            other => return Err(fail(builtin, format!("invalid regular expression flag '{}'", other))),
        }
    }

    let body = if literal {
        regex::escape(pattern)
    } else {
        pattern.to_string()
    };
    let full = if inline.is_empty() {
        body
    } else {
        format!("(?{}){}", inline, body)
    };

    Regex::new(&full).map_err(|err| EvaluationError::Regex {
        pattern: pattern.to_string(),
        reason: err.to_string(),
    })
}

/// Rewrite an XPath replacement string into regex crate syntax
fn replacement_template(builtin: Builtin, replacement: &str) -> Result<String, EvaluationError> {
    let mut out = String::with_capacity(replacement.len());
    let mut chars = replacement.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('$') => out.push_str("$$"),
                Some('\\') => out.push('\\'),
                _ => return Err(fail(builtin, "invalid escape in replacement string")),
            },
            '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                if digits.is_empty() {
                    return Err(fail(builtin, "'$' must be followed by a group number"));
                }
                out.push_str(&format!("${{{}}}", digits));
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn numeric_items(builtin: Builtin, value: &Value<'_, '_>) -> Result<Vec<f64>, EvaluationError> {
    value
        .atomize()
        .into_iter()
        .map(|atomic| match atomic {
            Atomic::Number(n) => Ok(n),
            Atomic::Untyped(s) => Ok(parse_number(&s)),
            other => Err(fail(
                builtin,
                format!("expected numeric values but got {}", other.type_name()),
            )),
        })
        .collect()
}

fn extreme<'a, 'i>(
    builtin: Builtin,
    value: &Value<'a, 'i>,
    pick_greater: bool,
) -> Result<Value<'a, 'i>, EvaluationError> {
    let atoms = value.atomize();
    if atoms.is_empty() {
        return Ok(Value::empty());
    }

    if atoms.iter().any(|a| matches!(a, Atomic::String(_) | Atomic::Typed(..))) {
        let strings: Vec<String> = atoms.iter().map(Atomic::to_xpath_string).collect();
        let best = if pick_greater {
            strings.into_iter().max()
        } else {
            strings.into_iter().min()
        };
        return Ok(best.map(Value::String).unwrap_or_else(Value::empty));
    }

    let numbers = numeric_items(builtin, value)?;
    if numbers.iter().any(|n| n.is_nan()) {
        return Ok(Value::Number(f64::NAN));
    }
    let best = numbers.into_iter().fold(None, |best: Option<f64>, n| match best {
        Some(b) if (pick_greater && b >= n) || (!pick_greater && b <= n) => Some(b),
        _ => Some(n),
    });
    Ok(best.map(Value::Number).unwrap_or_else(Value::empty))
}

fn distinct_values<'a, 'i>(value: &Value<'a, 'i>) -> Value<'a, 'i> {
    let mut seen: Vec<Atomic> = Vec::new();
    for atomic in value.atomize() {
        let duplicate = seen.iter().any(|s| match (s, &atomic) {
            (Atomic::Number(a), Atomic::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Atomic::Boolean(a), Atomic::Boolean(b)) => a == b,
            (Atomic::String(a) | Atomic::Untyped(a), Atomic::String(b) | Atomic::Untyped(b)) => a == b,
            (Atomic::Typed(..), _) | (_, Atomic::Typed(..)) => {
                compare_typed(s, &atomic) == Some(std::cmp::Ordering::Equal)
            }
            _ => false,
        });
        if !duplicate {
            seen.push(atomic);
        }
    }
    Value::from_items(seen.into_iter().map(Item::Atomic).collect())
}

fn atomics_equal(a: &Atomic, b: &Atomic) -> bool {
    match (a, b) {
        (Atomic::Number(x), Atomic::Number(y)) => x == y,
        (Atomic::Number(x), Atomic::Untyped(y)) | (Atomic::Untyped(y), Atomic::Number(x)) => {
            *x == parse_number(y)
        }
        (Atomic::Boolean(x), Atomic::Boolean(y)) => x == y,
        (Atomic::String(x) | Atomic::Untyped(x), Atomic::String(y) | Atomic::Untyped(y)) => x == y,
        _ => compare_typed(a, b) == Some(std::cmp::Ordering::Equal),
    }
}

fn now<'a, 'i>(kind: AtomicType, format: &str) -> Value<'a, 'i> {
    let text = chrono::Local::now().format(format).to_string();
    Value::from_atomic(Atomic::Typed(kind, text))
}

/// `fn:round-half-to-even()`
fn round_half_to_even(n: f64, precision: i32) -> f64 {
    if !n.is_finite() || n == 0.0 {
        return n;
    }
    let scale = 10f64.powi(precision);
    let scaled = n * scale;
    let floor = scaled.floor();
    let rounded = match scaled - floor {
        d if (d - 0.5).abs() < 1e-9 => {
            if floor % 2.0 == 0.0 {
                floor
            } else {
                floor + 1.0
            }
        }
        d if d < 0.5 => floor,
        _ => floor + 1.0,
    };
    rounded / scale
}

/// `fn:encode-for-uri()`: percent-encode all but unreserved characters
fn encode_for_uri(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Decimal picture string, split into its parts
struct Picture {
    prefix: String,
    suffix: String,
    min_integer: usize,
    grouping: Option<usize>,
    min_fraction: usize,
    max_fraction: usize,
    scale: f64,
}

impl Picture {
    fn parse(picture: &str) -> Result<Picture, String> {
        let active = |c: char| matches!(c, '0'..='9' | '#' | '.' | ',');
        let start = picture.find(active).ok_or_else(|| format!("picture '{}' has no digits", picture))?;
        let end = picture.rfind(active).map_or(start, |i| i + 1);
        let (prefix, body, suffix) = (&picture[..start], &picture[start..end], &picture[end..]);

        let (integer, fraction) = match body.split_once('.') {
            Some((_, fraction)) if fraction.contains('.') => {
                return Err(format!("picture '{}' has more than one decimal separator", picture))
            }
            Some((integer, fraction)) => (integer, fraction),
            None => (body, ""),
        };
        if !body.contains(|c: char| c == '#' || c.is_ascii_digit()) {
            return Err(format!("picture '{}' has no digits", picture));
        }

        let digits = |part: &str, c: char| part.chars().filter(|d| *d == c || (c == '0' && d.is_ascii_digit())).count();
        let grouping = integer.rfind(',').map(|i| integer.len() - i - 1).filter(|g| *g > 0);
        let scale = if prefix.contains('%') || suffix.contains('%') {
            100.0
        } else if prefix.contains('\u{2030}') || suffix.contains('\u{2030}') {
            1000.0
        } else {
            1.0
        };

        Ok(Picture {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            min_integer: digits(integer, '0'),
            grouping,
            min_fraction: digits(fraction, '0'),
            max_fraction: digits(fraction, '0') + digits(fraction, '#'),
            scale,
        })
    }

    fn render(&self, n: f64) -> String {
        let formatted = format!("{:.*}", self.max_fraction, n * self.scale);
        let (integer, fraction) = formatted.split_once('.').unwrap_or((formatted.as_str(), ""));

        let mut integer = integer.trim_start_matches('0').to_string();
        while integer.len() < self.min_integer {
            integer.insert(0, '0');
        }
        let mut fraction = fraction.to_string();
        while fraction.len() > self.min_fraction && fraction.ends_with('0') {
            fraction.pop();
        }
        if integer.is_empty() && fraction.is_empty() {
            integer.push('0');
        }

        if let Some(size) = self.grouping {
            let digits: Vec<char> = integer.chars().collect();
            let mut grouped = String::new();
            for (index, digit) in digits.iter().enumerate() {
                if index > 0 && (digits.len() - index) % size == 0 {
                    grouped.push(',');
                }
                grouped.push(*digit);
            }
            integer = grouped;
        }

        let mut out = format!("{}{}", self.prefix, integer);
        if !fraction.is_empty() {
            out.push('.');
            out.push_str(&fraction);
        }
        out.push_str(&self.suffix);
        out
    }
}

/// `format-number()` with the default decimal format
fn format_decimal(n: f64, picture: &str) -> Result<String, String> {
    let (positive, negative) = match picture.split_once(';') {
        Some((positive, negative)) => (Picture::parse(positive)?, Some(Picture::parse(negative)?)),
        None => (Picture::parse(picture)?, None),
    };
    if n.is_nan() {
        return Ok("NaN".to_string());
    }
    let rendered = |p: &Picture, value: f64| {
        if value.is_infinite() {
            format!("{}Infinity{}", p.prefix, p.suffix)
        } else {
            p.render(value)
        }
    };
    let zero = positive.render(0.0);
    let magnitude = rendered(&positive, n.abs());
    if n >= 0.0 || magnitude == zero {
        return Ok(magnitude);
    }
    Ok(match negative {
        Some(negative) => rendered(&negative, n.abs()),
        None => format!("-{}", magnitude),
    })
}

/// Position of `node` among preceding siblings that pass `same`, plus one
fn sibling_index(node: roxmltree::Node<'_, '_>, same: impl Fn(&roxmltree::Node<'_, '_>) -> bool) -> usize {
    node.prev_siblings().skip(1).filter(|n| same(n)).count() + 1
}

/// `fn:path()` rendering of a node
pub fn node_path(node: XNode<'_, '_>) -> String {
    fn element_step(element: roxmltree::Node<'_, '_>) -> String {
        let tag = element.tag_name();
        let index = sibling_index(element, |n| n.is_element() && n.tag_name() == tag);
        format!("Q{{{}}}{}[{}]", tag.namespace().unwrap_or(""), tag.name(), index)
    }

    let (tree, last) = match node {
        XNode::Attribute { owner, .. } => {
            let step = match node.expanded_name() {
                Some((Some(ns), local)) => format!("@Q{{{}}}{}", ns, local),
                Some((None, local)) => format!("@{}", local),
                None => String::from("@"),
            };
            (owner, Some(step))
        }
        XNode::Tree(n) => match node.kind() {
            NodeKind::Root => return "/".to_string(),
            NodeKind::Element => (n, None),
            NodeKind::Text => {
                let step = format!("text()[{}]", sibling_index(n, |s| s.is_text()));
                (n.parent().unwrap_or(n), Some(step))
            }
            NodeKind::Comment => {
                let step = format!("comment()[{}]", sibling_index(n, |s| s.is_comment()));
                (n.parent().unwrap_or(n), Some(step))
            }
            NodeKind::ProcessingInstruction => {
                let target = node.local_name();
                let step = format!(
                    "processing-instruction({})[{}]",
                    target,
                    sibling_index(n, |s| s.pi().map_or(false, |pi| pi.target == target))
                );
                (n.parent().unwrap_or(n), Some(step))
            }
            NodeKind::Attribute => (n, None),
        },
    };

    let mut steps: Vec<String> = tree
        .ancestors()
        .filter(|n| n.is_element())
        .map(element_step)
        .collect();
    steps.reverse();
    steps.extend(last);
    format!("/{}", steps.join("/"))
}

/// Call a built-in function on evaluated arguments
///
/// `current` is the context item the whole expression started from.
pub fn call_builtin<'a, 'i>(
    builtin: Builtin,
    args: Vec<Value<'a, 'i>>,
    focus: &Focus<'a, 'i>,
    current: &Item<'a, 'i>,
) -> Result<Value<'a, 'i>, EvaluationError> {
    use Builtin::*;

    let value = match builtin {
        Last => Value::Number(focus.size as f64),
        Position => Value::Number(focus.position as f64),
        Count => Value::Number(args[0].len() as f64),
        LocalName => Value::String(
            target_node(builtin, &args, focus)?
                .map(|n| n.local_name().to_string())
                .unwrap_or_default(),
        ),
        NamespaceUri => Value::String(
            target_node(builtin, &args, focus)?
                .map(|n| n.namespace_uri().to_string())
                .unwrap_or_default(),
        ),
        Name => Value::String(
            target_node(builtin, &args, focus)?
                .map(|n| n.qualified_name())
                .unwrap_or_default(),
        ),
        String => Value::String(string_or_context(&args, focus)),
        Concat => Value::String(args.iter().map(Value::to_xpath_string).collect()),
        StartsWith => Value::Boolean(string_arg(&args, 0).starts_with(&string_arg(&args, 1))),
        Contains => Value::Boolean(string_arg(&args, 0).contains(&string_arg(&args, 1))),
        EndsWith => Value::Boolean(string_arg(&args, 0).ends_with(&string_arg(&args, 1))),
        SubstringBefore => {
            let (text, needle) = (string_arg(&args, 0), string_arg(&args, 1));
            Value::String(text.find(&needle).map(|i| text[..i].to_string()).unwrap_or_default())
        }
        SubstringAfter => {
            let (text, needle) = (string_arg(&args, 0), string_arg(&args, 1));
            Value::String(
                text.find(&needle)
                    .map(|i| text[i + needle.len()..].to_string())
                    .unwrap_or_default(),
            )
        }
        Substring => Value::String(substring(
            &string_arg(&args, 0),
            args[1].to_number(),
            args.get(2).map(Value::to_number),
        )),
        StringLength => Value::Number(string_or_context(&args, focus).chars().count() as f64),
        NormalizeSpace => Value::String(normalize_space(&string_or_context(&args, focus))),
        Translate => Value::String(translate(
            &string_arg(&args, 0),
            &string_arg(&args, 1),
            &string_arg(&args, 2),
        )),
        UpperCase => Value::String(string_arg(&args, 0).to_uppercase()),
        LowerCase => Value::String(string_arg(&args, 0).to_lowercase()),
        Boolean => Value::Boolean(args[0].to_boolean()),
        Not => Value::Boolean(!args[0].to_boolean()),
        True => Value::Boolean(true),
        False => Value::Boolean(false),
        Lang => {
            let wanted = string_arg(&args, 0).to_lowercase();
            let lang = focus.node()?.language().map(str::to_lowercase);
            Value::Boolean(lang.map_or(false, |lang| {
                lang == wanted || lang.starts_with(&format!("{}-", wanted))
            }))
        }
        Number => Value::Number(match args.first() {
            Some(value) => value.to_number(),
            None => focus.item.atomize().to_number(),
        }),
        Sum => {
            let numbers = numeric_items(builtin, &args[0])?;
            if numbers.is_empty() {
                match args.get(1) {
                    Some(zero) => zero.clone(),
                    None => Value::Number(0.0),
                }
            } else {
                Value::Number(numbers.iter().sum())
            }
        }
        Floor | Ceiling | Round | Abs => {
            if args[0].is_empty() {
                Value::empty()
            } else {
                let n = args[0].to_number();
                Value::Number(match builtin {
                    Floor => n.floor(),
                    Ceiling => n.ceil(),
                    Round => xpath_round(n),
                    _ => n.abs(),
                })
            }
        }
        Exists => Value::Boolean(!args[0].is_empty()),
        Empty => Value::Boolean(args[0].is_empty()),
        Matches => {
            let regex = compile_regex(builtin, &string_arg(&args, 1), &string_arg(&args, 2))?;
            Value::Boolean(regex.is_match(&string_arg(&args, 0)))
        }
        Replace => {
            let regex = compile_regex(builtin, &string_arg(&args, 1), &string_arg(&args, 3))?;
            if regex.is_match("") {
                return Err(fail(builtin, "the pattern matches the empty string"));
            }
            let template = replacement_template(builtin, &string_arg(&args, 2))?;
            Value::String(regex.replace_all(&string_arg(&args, 0), template.as_str()).into_owned())
        }
        Tokenize => {
            let input = string_arg(&args, 0);
            let tokens: Vec<std::string::String> = if args.len() == 1 {
                normalize_space(&input).split(' ').filter(|s| !s.is_empty()).map(str::to_string).collect()
            } else {
                let regex = compile_regex(builtin, &string_arg(&args, 1), &string_arg(&args, 2))?;
                if regex.is_match("") {
                    return Err(fail(builtin, "the pattern matches the empty string"));
                }
                if input.is_empty() {
                    Vec::new()
                } else {
                    regex.split(&input).map(str::to_string).collect()
                }
            };
            Value::from_items(
                tokens
                    .into_iter()
                    .map(|t| Item::Atomic(Atomic::String(t)))
                    .collect(),
            )
        }
        StringJoin => {
            let separator = string_arg(&args, 1);
            Value::String(
                args[0]
                    .atomize()
                    .iter()
                    .map(Atomic::to_xpath_string)
                    .collect::<Vec<_>>()
                    .join(&separator),
            )
        }
        DistinctValues => distinct_values(&args[0]),
        Min => extreme(builtin, &args[0], false)?,
        Max => extreme(builtin, &args[0], true)?,
        Avg => {
            let numbers = numeric_items(builtin, &args[0])?;
            if numbers.is_empty() {
                Value::empty()
            } else {
                Value::Number(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Reverse => {
            let mut items = args[0].clone().into_items();
            items.reverse();
            Value::from_items(items)
        }
        Data => {
            let atoms = match args.first() {
                Some(value) => value.atomize(),
                None => vec![focus.item.atomize()],
            };
            Value::from_items(atoms.into_iter().map(Item::Atomic).collect())
        }
        Root => match target_node(builtin, &args, focus)? {
            Some(node) => Value::Nodes(vec![node.root()]),
            None => Value::empty(),
        },
        CurrentDate => now(AtomicType::Date, "%Y-%m-%d%:z"),
        CurrentDateTime => now(AtomicType::DateTime, "%Y-%m-%dT%H:%M:%S%.3f%:z"),
        CurrentTime => now(AtomicType::Time, "%H:%M:%S%.3f%:z"),
        Path => match target_node(builtin, &args, focus)? {
            Some(node) => Value::String(node_path(node)),
            None => Value::empty(),
        },
        Current => Value::from_items(vec![current.clone()]),
        FormatNumber => {
            let picture = string_arg(&args, 1);
            Value::String(format_decimal(args[0].to_number(), &picture).map_err(|m| fail(builtin, m))?)
        }
        IndexOf => {
            let wanted = match args[1].atomize().as_slice() {
                [wanted] => wanted.clone(),
                _ => return Err(fail(builtin, "the search value must be a single item")),
            };
            let positions = args[0]
                .atomize()
                .iter()
                .enumerate()
                .filter(|(_, atomic)| atomics_equal(atomic, &wanted))
                .map(|(index, _)| Item::Atomic(Atomic::Number((index + 1) as f64)))
                .collect();
            Value::from_items(positions)
        }
        Compare => {
            if args[0].is_empty() || args[1].is_empty() {
                Value::empty()
            } else {
                let ordering = string_arg(&args, 0).cmp(&string_arg(&args, 1));
                Value::Number(ordering as i8 as f64)
            }
        }
        Subsequence => {
            let start = xpath_round(args[1].to_number());
            let end = args.get(2).map(|length| start + xpath_round(length.to_number()));
            let items = args[0]
                .clone()
                .into_items()
                .into_iter()
                .enumerate()
                .filter(|(index, _)| {
                    let position = (*index + 1) as f64;
                    position >= start && end.map_or(true, |end| position < end)
                })
                .map(|(_, item)| item)
                .collect();
            Value::from_items(items)
        }
        InsertBefore => {
            let mut items = args[0].clone().into_items();
            let position = args[1].to_number();
            let at = if position.is_nan() || position < 1.0 {
                0
            } else {
                ((position as usize) - 1).min(items.len())
            };
            items.splice(at..at, args[2].clone().into_items());
            Value::from_items(items)
        }
        Remove => {
            let mut items = args[0].clone().into_items();
            let position = args[1].to_number();
            if position >= 1.0 && position.fract() == 0.0 && (position as usize) <= items.len() {
                items.remove(position as usize - 1);
            }
            Value::from_items(items)
        }
        ExactlyOne | OneOrMore | ZeroOrOne => {
            let count = args[0].len();
            let ok = match builtin {
                ExactlyOne => count == 1,
                OneOrMore => count >= 1,
                _ => count <= 1,
            };
            if !ok {
                return Err(fail(builtin, format!("the argument has {} items", count)));
            }
            args[0].clone()
        }
        Unordered => args[0].clone(),
        StringToCodepoints => Value::from_items(
            string_arg(&args, 0)
                .chars()
                .map(|c| Item::Atomic(Atomic::Number(f64::from(u32::from(c)))))
                .collect(),
        ),
        CodepointsToString => {
            let mut text = std::string::String::new();
            for n in numeric_items(builtin, &args[0])? {
                let c = (n.fract() == 0.0 && n >= 0.0 && n <= f64::from(u32::MAX))
                    .then(|| char::from_u32(n as u32))
                    .flatten()
                    .ok_or_else(|| fail(builtin, format!("{} is not a character", format_number(n))))?;
                text.push(c);
            }
            Value::String(text)
        }
        RoundHalfToEven => {
            if args[0].is_empty() {
                Value::empty()
            } else {
                let precision = args.get(1).map_or(0.0, Value::to_number);
                Value::Number(round_half_to_even(args[0].to_number(), precision as i32))
            }
        }
        EncodeForUri => Value::String(encode_for_uri(&string_arg(&args, 0))),
        Head => Value::from_items(args[0].clone().into_items().into_iter().take(1).collect()),
        Tail => Value::from_items(args[0].clone().into_items().into_iter().skip(1).collect()),
        HasChildren => Value::Boolean(
            target_node(builtin, &args, focus)?
                .and_then(|node| node.as_tree())
                .map_or(false, |node| node.has_children()),
        ),
        Component(kind, component) => match args[0].atomize().as_slice() {
            [] => Value::empty(),
            [atomic] => {
                let text = match cast(atomic, kind)? {
                    Atomic::Typed(_, text) => text,
                    other => other.to_xpath_string(),
                };
                let n = date_component(kind, &text, component)
                    .ok_or_else(|| fail(builtin, format!("'{}' has no such component", text)))?;
                Value::Number(n)
            }
            _ => return Err(fail(builtin, "expected a single value")),
        },
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceTable;

    #[test]
    fn test_substring_rules() {
        assert_eq!(substring("12345", 2.0, Some(3.0)), "234");
        assert_eq!(substring("12345", 1.5, Some(2.6)), "234");
        assert_eq!(substring("12345", 0.0, Some(3.0)), "12");
        assert_eq!(substring("12345", f64::NAN, Some(3.0)), "");
        assert_eq!(substring("12345", -42.0, Some(f64::INFINITY)), "12345");
        assert_eq!(substring("12345", 2.0, None), "2345");
    }

    #[test]
    fn test_translate_and_normalize() {
        assert_eq!(translate("bar", "abc", "ABC"), "BAr");
        assert_eq!(translate("--aaa--", "abc-", "ABC"), "AAA");
        assert_eq!(normalize_space("  a \n b\t c "), "a b c");
    }

    #[test]
    fn test_round() {
        assert_eq!(xpath_round(2.5), 3.0);
        assert_eq!(xpath_round(-2.5), -2.0);
        assert!(xpath_round(-0.2).is_sign_negative());
        assert!(xpath_round(f64::NAN).is_nan());
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(1234.5, "#,##0.00").unwrap(), "1,234.50");
        assert_eq!(format_decimal(0.5, "#.##").unwrap(), ".5");
        assert_eq!(format_decimal(7.0, "000").unwrap(), "007");
        assert_eq!(format_decimal(0.25, "0%").unwrap(), "25%");
        assert_eq!(format_decimal(-3.0, "0;(0)").unwrap(), "(3)");
        assert_eq!(format_decimal(-3.0, "0.0").unwrap(), "-3.0");
        assert_eq!(format_decimal(f64::NAN, "0").unwrap(), "NaN");
        assert_eq!(format_decimal(f64::INFINITY, "0").unwrap(), "Infinity");
        assert!(format_decimal(1.0, "abc").is_err());
        assert!(format_decimal(1.0, "0.0.0").is_err());
    }

    #[test]
    fn test_round_half_to_even() {
        assert_eq!(round_half_to_even(2.5, 0), 2.0);
        assert_eq!(round_half_to_even(3.5, 0), 4.0);
        assert_eq!(round_half_to_even(2.4, 0), 2.0);
        assert!((round_half_to_even(3.567812, 2) - 3.57).abs() < 1e-9);
    }

    #[test]
    fn test_encode_for_uri() {
        assert_eq!(encode_for_uri("a b/c~d"), "a%20b%2Fc~d");
        assert_eq!(encode_for_uri("caf\u{e9}"), "caf%C3%A9");
    }

    #[test]
    fn test_atomics_equal() {
        assert!(atomics_equal(&Atomic::Number(2.0), &Atomic::Untyped("2".to_string())));
        assert!(!atomics_equal(&Atomic::String("2".to_string()), &Atomic::Number(2.0)));
        assert!(atomics_equal(
            &Atomic::Typed(AtomicType::Date, "2024-01-01Z".to_string()),
            &Atomic::Typed(AtomicType::Date, "2024-01-01+00:00".to_string()),
        ));
    }

    #[test]
    fn test_xslt_functions_in_every_dialect() {
        assert_eq!(Builtin::lookup("current", Dialect::XPath1), Some(Builtin::Current));
        assert_eq!(Builtin::lookup("format-number", Dialect::XPath1), Some(Builtin::FormatNumber));
        assert_eq!(Builtin::lookup("index-of", Dialect::XPath1), None);
        assert_eq!(
            Builtin::lookup("year-from-date", Dialect::XPath2),
            Some(Builtin::Component(AtomicType::Date, DateComponent::Year))
        );
        assert_eq!(
            Builtin::Component(AtomicType::Time, DateComponent::Hours).name(),
            "hours-from-time"
        );
        assert_eq!(Builtin::Subsequence.arity(Dialect::XPath2), (2, Some(3)));
        assert_eq!(Builtin::lookup("head", Dialect::XPath2), None);
    }

    #[test]
    fn test_replacement_template() {
        assert_eq!(replacement_template(Builtin::Replace, "$1-x").unwrap(), "${1}-x");
        assert_eq!(replacement_template(Builtin::Replace, r"\$5").unwrap(), "$$5");
        assert!(replacement_template(Builtin::Replace, "$x").is_err());
    }

    #[test]
    fn test_lookup_by_dialect() {
        assert_eq!(Builtin::lookup("count", Dialect::XPath1), Some(Builtin::Count));
        assert_eq!(Builtin::lookup("matches", Dialect::XPath1), None);
        assert_eq!(Builtin::lookup("matches", Dialect::XPath2), Some(Builtin::Matches));
        assert_eq!(Builtin::lookup("path", Dialect::XPath2), None);
        assert_eq!(Builtin::lookup("path", Dialect::XPath31), Some(Builtin::Path));
        assert_eq!(Builtin::Tokenize.arity(Dialect::XPath2), (2, Some(3)));
        assert_eq!(Builtin::Tokenize.arity(Dialect::XPath3), (1, Some(3)));
    }

    #[test]
    fn test_resolve_custom_function() {
        let mut namespaces = NamespaceTable::new();
        namespaces.bind("ext", "urn:ext");
        let functions = FunctionRegistry::new().with_function(
            QName::namespaced("urn:ext", "double"),
            |args: &[Vec<Atomic>]| -> Result<Atomic, EvaluationError> {
                let n = args[0].first().map(Atomic::to_number).unwrap_or(f64::NAN);
                Ok(Atomic::Number(n * 2.0))
            },
        );

        let xpath2 = CompileContext::new(&namespaces, &functions, Dialect::XPath2);
        assert!(matches!(
            resolve_function("ext:double", 1, &xpath2),
            Ok(Function::Custom(_))
        ));
        assert!(matches!(
            resolve_function("fn:count", 1, &xpath2),
            Ok(Function::Builtin(Builtin::Count))
        ));

        let xpath1 = CompileContext::new(&namespaces, &functions, Dialect::XPath1);
        assert!(matches!(
            resolve_function("ext:double", 1, &xpath1),
            Err(XPathParseError::NotInDialect { .. })
        ));
        assert!(matches!(
            resolve_function("count", 2, &xpath1),
            Err(XPathParseError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_node_path() {
        let doc = roxmltree::Document::parse(
            r#"<c:cargo xmlns:c="urn:cargo"><c:item/><c:item w="1">x<!--n--></c:item></c:cargo>"#,
        )
        .unwrap();
        let items: Vec<_> = doc.descendants().filter(|n| n.has_tag_name("item")).collect();

        assert_eq!(node_path(XNode::Tree(doc.root())), "/");
        assert_eq!(node_path(XNode::Tree(items[1])), "/Q{urn:cargo}cargo[1]/Q{urn:cargo}item[2]");
        assert_eq!(
            node_path(XNode::Attribute { owner: items[1], index: 0 }),
            "/Q{urn:cargo}cargo[1]/Q{urn:cargo}item[2]/@w"
        );
        let comment = items[1].children().find(|n| n.is_comment()).unwrap();
        assert_eq!(
            node_path(XNode::Tree(comment)),
            "/Q{urn:cargo}cargo[1]/Q{urn:cargo}item[2]/comment()[1]"
        );
    }
}
