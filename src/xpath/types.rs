//! XML Schema types in expressions
//!
//! `cast as`, `castable as`, `instance of`, `treat as` and the `xs:*`
//! constructor functions all work from lexical forms. A cast checks the
//! text against the target type's lexical space and keeps the result as a
//! number, a boolean or an [`Atomic::Typed`] value holding the text.
//!
//! Numbers carry no type of their own, so `instance of` on a number only
//! asks whether the value fits: any number is an `xs:double`, a finite one
//! an `xs:decimal`, an integral one within range an `xs:integer` or one of
//! its subtypes.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Match, Regex};

use super::evaluator::{node_test_matches, EvaluationError};
use super::parsers::{NodeTest, XPathAxis};
use super::values::{parse_number, Atomic, Item};
use crate::names::{is_name_char, is_name_start_char, is_valid_ncname};

/// Built-in atomic type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum AtomicType {
    AnyAtomic,
    Untyped,
    String,
    NormalizedString,
    Token,
    Language,
    Name,
    NCName,
    NmToken,
    Id,
    IdRef,
    Entity,
    AnyUri,
    Boolean,
    Double,
    Float,
    Decimal,
    Integer,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    PositiveInteger,
    NonPositiveInteger,
    NegativeInteger,
    UnsignedLong,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
    Date,
    DateTime,
    Time,
    Duration,
    DayTimeDuration,
    YearMonthDuration,
    GYear,
    GYearMonth,
    GMonth,
    GDay,
    GMonthDay,
    HexBinary,
    Base64Binary,
}

const ATOMIC_TYPES: &[(&str, AtomicType)] = &[
    ("xs:anyAtomicType", AtomicType::AnyAtomic),
    ("xs:untypedAtomic", AtomicType::Untyped),
    ("xs:string", AtomicType::String),
    ("xs:normalizedString", AtomicType::NormalizedString),
    ("xs:token", AtomicType::Token),
    ("xs:language", AtomicType::Language),
    ("xs:Name", AtomicType::Name),
    ("xs:NCName", AtomicType::NCName),
    ("xs:NMTOKEN", AtomicType::NmToken),
    ("xs:ID", AtomicType::Id),
    ("xs:IDREF", AtomicType::IdRef),
    ("xs:ENTITY", AtomicType::Entity),
    ("xs:anyURI", AtomicType::AnyUri),
    ("xs:boolean", AtomicType::Boolean),
    ("xs:double", AtomicType::Double),
    ("xs:float", AtomicType::Float),
    ("xs:decimal", AtomicType::Decimal),
    ("xs:integer", AtomicType::Integer),
    ("xs:long", AtomicType::Long),
    ("xs:int", AtomicType::Int),
    ("xs:short", AtomicType::Short),
    ("xs:byte", AtomicType::Byte),
    ("xs:nonNegativeInteger", AtomicType::NonNegativeInteger),
    ("xs:positiveInteger", AtomicType::PositiveInteger),
    ("xs:nonPositiveInteger", AtomicType::NonPositiveInteger),
    ("xs:negativeInteger", AtomicType::NegativeInteger),
    ("xs:unsignedLong", AtomicType::UnsignedLong),
    ("xs:unsignedInt", AtomicType::UnsignedInt),
    ("xs:unsignedShort", AtomicType::UnsignedShort),
    ("xs:unsignedByte", AtomicType::UnsignedByte),
    ("xs:date", AtomicType::Date),
    ("xs:dateTime", AtomicType::DateTime),
    ("xs:time", AtomicType::Time),
    ("xs:duration", AtomicType::Duration),
    ("xs:dayTimeDuration", AtomicType::DayTimeDuration),
    ("xs:yearMonthDuration", AtomicType::YearMonthDuration),
    ("xs:gYear", AtomicType::GYear),
    ("xs:gYearMonth", AtomicType::GYearMonth),
    ("xs:gMonth", AtomicType::GMonth),
    ("xs:gDay", AtomicType::GDay),
    ("xs:gMonthDay", AtomicType::GMonthDay),
    ("xs:hexBinary", AtomicType::HexBinary),
    ("xs:base64Binary", AtomicType::Base64Binary),
];

static LANGUAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z]{1,8}(-[a-zA-Z0-9]{1,8})*$").unwrap());
static DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d{4,})-(\d{2})-(\d{2})(Z|[+-]\d{2}:\d{2})?$").unwrap());
static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(-?\d{4,})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})(\.\d+)?(Z|[+-]\d{2}:\d{2})?$",
    )
    .unwrap()
});
static TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2}):(\d{2}):(\d{2})(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap());
static DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-?P(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$").unwrap()
});
static DAY_TIME_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?P(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$").unwrap());
static YEAR_MONTH_DURATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?P(\d+Y)?(\d+M)?$").unwrap());
static G_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{4,}(Z|[+-]\d{2}:\d{2})?$").unwrap());
static G_YEAR_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?\d{4,}-(0[1-9]|1[0-2])(Z|[+-]\d{2}:\d{2})?$").unwrap());
static G_MONTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^--(0[1-9]|1[0-2])(Z|[+-]\d{2}:\d{2})?$").unwrap());
static G_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^---(0[1-9]|[12]\d|3[01])(Z|[+-]\d{2}:\d{2})?$").unwrap());
static G_MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^--(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])(Z|[+-]\d{2}:\d{2})?$").unwrap()
});
static HEX_BINARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([0-9a-fA-F]{2})*$").unwrap());
static BASE64_BINARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9+/]{4})*([A-Za-z0-9+/]{2}==|[A-Za-z0-9+/]{3}=)?$").unwrap()
});
static DECIMAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").unwrap());
static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").unwrap());
static DOUBLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap());

impl AtomicType {
    /// Find a type by local name in the XML Schema namespace
    pub fn lookup(local: &str) -> Option<AtomicType> {
        ATOMIC_TYPES
            .iter()
            .find(|(name, _)| name.strip_prefix("xs:") == Some(local))
            .map(|(_, kind)| *kind)
    }

    /// Name with the `xs` prefix
    pub fn name(&self) -> &'static str {
        ATOMIC_TYPES
            .iter()
            .find(|(_, kind)| kind == self)
            .map(|(name, _)| *name)
            .unwrap_or("xs:anyAtomicType")
    }

    /// Base type in the derivation hierarchy
    pub fn parent(&self) -> Option<AtomicType> {
        use AtomicType as T;
        Some(match self {
            T::AnyAtomic => return None,
            T::NormalizedString => T::String,
            T::Token => T::NormalizedString,
            T::Language | T::Name | T::NmToken => T::Token,
            T::NCName => T::Name,
            T::Id | T::IdRef | T::Entity => T::NCName,
            T::Integer => T::Decimal,
            T::Long | T::NonNegativeInteger | T::NonPositiveInteger => T::Integer,
            T::Int => T::Long,
            T::Short => T::Int,
            T::Byte => T::Short,
            T::PositiveInteger | T::UnsignedLong => T::NonNegativeInteger,
            T::UnsignedInt => T::UnsignedLong,
            T::UnsignedShort => T::UnsignedInt,
            T::UnsignedByte => T::UnsignedShort,
            T::NegativeInteger => T::NonPositiveInteger,
            T::DayTimeDuration | T::YearMonthDuration => T::Duration,
            _ => T::AnyAtomic,
        })
    }

    /// Whether this type is `other` or derived from it
    pub fn derives_from(&self, other: AtomicType) -> bool {
        let mut current = Some(*self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    /// `xs:string` and its subtypes
    pub fn is_string_derived(&self) -> bool {
        self.derives_from(AtomicType::String)
    }

    /// Numeric types, held as [`Atomic::Number`]
    pub fn is_numeric(&self) -> bool {
        matches!(self, AtomicType::Double | AtomicType::Float) || self.derives_from(AtomicType::Decimal)
    }

    /// Value range of `xs:integer` and its subtypes
    pub fn integer_bounds(&self) -> Option<(f64, f64)> {
        use AtomicType as T;
        let unbounded = f64::INFINITY;
        Some(match self {
            T::Integer => (-unbounded, unbounded),
            T::Long => (i64::MIN as f64, i64::MAX as f64),
            T::Int => (f64::from(i32::MIN), f64::from(i32::MAX)),
            T::Short => (f64::from(i16::MIN), f64::from(i16::MAX)),
            T::Byte => (f64::from(i8::MIN), f64::from(i8::MAX)),
            T::NonNegativeInteger => (0.0, unbounded),
            T::PositiveInteger => (1.0, unbounded),
            T::NonPositiveInteger => (-unbounded, 0.0),
            T::NegativeInteger => (-unbounded, -1.0),
            T::UnsignedLong => (0.0, u64::MAX as f64),
            T::UnsignedInt => (0.0, f64::from(u32::MAX)),
            T::UnsignedShort => (0.0, f64::from(u16::MAX)),
            T::UnsignedByte => (0.0, f64::from(u8::MAX)),
            _ => return None,
        })
    }

    /// Primitive type the value space comes from
    fn primitive(&self) -> AtomicType {
        if self.is_string_derived() {
            AtomicType::String
        } else if self.derives_from(AtomicType::Duration) {
            AtomicType::Duration
        } else if self.derives_from(AtomicType::Decimal) {
            AtomicType::Decimal
        } else {
            *self
        }
    }
}

impl fmt::Display for AtomicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Occurrence indicator of a sequence type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    /// Exactly one item
    One,
    /// `?`
    Optional,
    /// `*`
    ZeroOrMore,
    /// `+`
    OneOrMore,
}

/// Item type of a sequence type
#[derive(Debug, Clone, PartialEq)]
pub enum ItemType {
    /// `item()`
    Item,
    /// A kind test such as `node()` or `element(c:item)`
    Node(NodeTest),
    /// An atomic type
    Atomic(AtomicType),
}

/// Type of a sequence in `instance of` and `treat as`
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceType {
    /// `empty-sequence()`
    Empty,
    /// An item type with its occurrence
    Of(ItemType, Occurrence),
}

impl SequenceType {
    /// Whether `items` is an instance of this type
    pub fn matches(&self, items: &[Item<'_, '_>]) -> bool {
        let (item_type, occurrence) = match self {
            SequenceType::Empty => return items.is_empty(),
            SequenceType::Of(item_type, occurrence) => (item_type, *occurrence),
        };
        let count_ok = match occurrence {
            Occurrence::One => items.len() == 1,
            Occurrence::Optional => items.len() <= 1,
            Occurrence::ZeroOrMore => true,
            Occurrence::OneOrMore => !items.is_empty(),
        };
        count_ok && items.iter().all(|item| item_type.matches(item))
    }
}

impl ItemType {
    /// Whether a single item has this type
    pub fn matches(&self, item: &Item<'_, '_>) -> bool {
        match (self, item) {
            (ItemType::Item, _) => true,
            (ItemType::Node(test), Item::Node(node)) => {
                node_test_matches(test, XPathAxis::Self_, node)
            }
            (ItemType::Atomic(kind), Item::Atomic(atomic)) => instance_of(atomic, *kind),
            _ => false,
        }
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (item_type, occurrence) = match self {
            SequenceType::Empty => return f.write_str("empty-sequence()"),
            SequenceType::Of(item_type, occurrence) => (item_type, occurrence),
        };
        match item_type {
            ItemType::Item => f.write_str("item()")?,
            ItemType::Atomic(kind) => write!(f, "{}", kind)?,
            ItemType::Node(test) => f.write_str(match test {
                NodeTest::Element(_) => "element()",
                NodeTest::Attribute(_) => "attribute()",
                NodeTest::Document => "document-node()",
                NodeTest::Text => "text()",
                NodeTest::Comment => "comment()",
                NodeTest::ProcessingInstruction(_) => "processing-instruction()",
                _ => "node()",
            })?,
        }
        f.write_str(match occurrence {
            Occurrence::One => "",
            Occurrence::Optional => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        })
    }
}

/// Whether an atomic value is an instance of `kind`
pub fn instance_of(atomic: &Atomic, kind: AtomicType) -> bool {
    match atomic {
        Atomic::Boolean(_) => AtomicType::Boolean.derives_from(kind),
        Atomic::String(_) => AtomicType::String.derives_from(kind),
        Atomic::Untyped(_) => AtomicType::Untyped.derives_from(kind),
        Atomic::Typed(own, _) => own.derives_from(kind),
        Atomic::Number(n) => match kind {
            AtomicType::AnyAtomic | AtomicType::Double | AtomicType::Float => true,
            AtomicType::Decimal => n.is_finite(),
            other => other.integer_bounds().map_or(false, |(low, high)| {
                n.is_finite() && n.fract() == 0.0 && *n >= low && *n <= high
            }),
        },
    }
}

/// Cast an atomic value to `target`
pub fn cast(value: &Atomic, target: AtomicType) -> Result<Atomic, EvaluationError> {
    let invalid = || EvaluationError::Cast {
        value: value.to_xpath_string(),
        target: target.name(),
    };
    // text a cast may read through the target's lexical space
    let lexical = match value {
        Atomic::String(s) | Atomic::Untyped(s) => Some(s.as_str()),
        Atomic::Typed(kind, s) if kind.is_string_derived() => Some(s.as_str()),
        _ => None,
    };

    match target {
        AtomicType::AnyAtomic => Err(EvaluationError::Type(
            "cannot cast to the abstract type xs:anyAtomicType".to_string(),
        )),
        AtomicType::Untyped => Ok(Atomic::Untyped(value.to_xpath_string())),
        AtomicType::String => Ok(Atomic::String(value.to_xpath_string())),
        AtomicType::Boolean => match (value, lexical) {
            (Atomic::Boolean(b), _) => Ok(Atomic::Boolean(*b)),
            (Atomic::Number(n), _) => Ok(Atomic::Boolean(*n != 0.0 && !n.is_nan())),
            (_, Some(text)) => match collapse(text).as_str() {
                "true" | "1" => Ok(Atomic::Boolean(true)),
                "false" | "0" => Ok(Atomic::Boolean(false)),
                _ => Err(invalid()),
            },
            _ => Err(invalid()),
        },
        numeric if numeric.is_numeric() => {
            let n = match (value, lexical) {
                (Atomic::Boolean(b), _) => f64::from(u8::from(*b)),
                (Atomic::Number(n), _) => *n,
                (_, Some(text)) => parse_lexical_number(&collapse(text), numeric).ok_or_else(invalid)?,
                _ => return Err(invalid()),
            };
            numeric_cast(n, numeric).map(Atomic::Number).ok_or_else(invalid)
        }
        string_type if string_type.is_string_derived() => {
            let text = whitespace(string_type, &value.to_xpath_string());
            if is_lexical(string_type, &text) {
                Ok(Atomic::Typed(string_type, text))
            } else {
                Err(invalid())
            }
        }
        other => {
            let text = match value {
                Atomic::Typed(kind, s) if kind.derives_from(other) || other.derives_from(*kind) => {
                    s.clone()
                }
                Atomic::Typed(AtomicType::DateTime, s) if other == AtomicType::Date => {
                    let (date, time) = s.split_once('T').ok_or_else(invalid)?;
                    format!("{}{}", date, timezone_suffix(time))
                }
                Atomic::Typed(AtomicType::DateTime, s) if other == AtomicType::Time => {
                    let (_, time) = s.split_once('T').ok_or_else(invalid)?;
                    time.to_string()
                }
                Atomic::Typed(AtomicType::Date, s) if other == AtomicType::DateTime => {
                    let zone = timezone_suffix(s);
                    format!("{}T00:00:00{}", &s[..s.len() - zone.len()], zone)
                }
                _ => collapse(lexical.ok_or_else(invalid)?),
            };
            if is_lexical(other, &text) {
                Ok(Atomic::Typed(other, text))
            } else {
                Err(invalid())
            }
        }
    }
}

/// Order two values where at least one is a typed value
///
/// `None` when the values are not comparable. Untyped operands are cast to
/// the other operand's type first.
pub fn compare_typed(a: &Atomic, b: &Atomic) -> Option<Ordering> {
    match (a, b) {
        (Atomic::Typed(x_kind, x), Atomic::Typed(y_kind, y)) => {
            if x_kind.primitive() != y_kind.primitive() {
                return None;
            }
            match x_kind.primitive() {
                AtomicType::Date | AtomicType::DateTime | AtomicType::Time => {
                    Some(instant(*x_kind, x)?.cmp(&instant(*y_kind, y)?))
                }
                _ => Some(x.cmp(y)),
            }
        }
        (Atomic::Typed(kind, x), Atomic::String(y)) if kind.is_string_derived() => Some(x.as_str().cmp(y.as_str())),
        (Atomic::Typed(kind, _), Atomic::Untyped(_)) => {
            compare_typed(a, &cast(b, *kind).ok()?)
        }
        (Atomic::String(_) | Atomic::Untyped(_), Atomic::Typed(..)) => {
            compare_typed(b, a).map(Ordering::reverse)
        }
        _ => None,
    }
}

/// Part of a date, dateTime or time value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DateComponent {
    Year,
    Month,
    Day,
    Hours,
    Minutes,
    Seconds,
}

/// Read one component of a date, dateTime or time value as written
pub fn date_component(kind: AtomicType, text: &str, component: DateComponent) -> Option<f64> {
    use DateComponent as C;
    let group = match (kind, component) {
        (AtomicType::Date | AtomicType::DateTime, C::Year) => 1,
        (AtomicType::Date | AtomicType::DateTime, C::Month) => 2,
        (AtomicType::Date | AtomicType::DateTime, C::Day) => 3,
        (AtomicType::DateTime, C::Hours) => 4,
        (AtomicType::DateTime, C::Minutes) => 5,
        (AtomicType::DateTime, C::Seconds) => 6,
        (AtomicType::Time, C::Hours) => 1,
        (AtomicType::Time, C::Minutes) => 2,
        (AtomicType::Time, C::Seconds) => 3,
        _ => return None,
    };
    let caps = match kind {
        AtomicType::Date => DATE.captures(text)?,
        AtomicType::DateTime => DATE_TIME.captures(text)?,
        _ => TIME.captures(text)?,
    };
    let digits = caps.get(group)?.as_str();
    if component == C::Seconds {
        let fraction = caps.get(group + 1).map_or("", |m| m.as_str());
        return format!("{}{}", digits, fraction).parse().ok();
    }
    digits.parse().ok()
}

/// Timezone designator at the end of a date or time, or `""`
fn timezone_suffix(text: &str) -> &str {
    if text.ends_with('Z') {
        return &text[text.len() - 1..];
    }
    let bytes = text.as_bytes();
    if bytes.len() >= 6 && matches!(bytes[bytes.len() - 6], b'+' | b'-') && bytes[bytes.len() - 3] == b':' {
        return &text[text.len() - 6..];
    }
    ""
}

fn timezone_seconds(zone: Option<Match<'_>>) -> Option<i64> {
    let zone = match zone {
        None => return Some(0),
        Some(m) if m.as_str() == "Z" => return Some(0),
        Some(m) => m.as_str(),
    };
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let hours: i64 = zone[1..3].parse().ok()?;
    let minutes: i64 = zone[4..6].parse().ok()?;
    if hours > 14 || minutes > 59 || (hours == 14 && minutes > 0) {
        return None;
    }
    Some(sign * (hours * 3600 + minutes * 60))
}

fn calendar_date(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Time of day; the flag is set for `24:00:00`, which is midnight of the next day
fn clock_time(hours: &str, minutes: &str, seconds: &str, fraction: Option<Match<'_>>) -> Option<(NaiveTime, bool)> {
    let (h, m, s): (u32, u32, u32) = (hours.parse().ok()?, minutes.parse().ok()?, seconds.parse().ok()?);
    let fraction = fraction.map_or("", |f| &f.as_str()[1..]);
    if h == 24 {
        if m != 0 || s != 0 || fraction.chars().any(|c| c != '0') {
            return None;
        }
        return NaiveTime::from_hms_opt(0, 0, 0).map(|t| (t, true));
    }
    let nanos: u32 = format!("{:0<9}", fraction.chars().take(9).collect::<String>()).parse().ok()?;
    NaiveTime::from_hms_nano_opt(h, m, s, nanos).map(|t| (t, false))
}

fn to_utc(local: NaiveDateTime, zone: Option<Match<'_>>) -> Option<NaiveDateTime> {
    local.checked_sub_signed(chrono::Duration::seconds(timezone_seconds(zone)?))
}

/// Point in time of a date, dateTime or time value, adjusted to UTC
///
/// Values without a timezone are taken as UTC. Times sit on a fixed
/// reference day.
fn instant(kind: AtomicType, text: &str) -> Option<NaiveDateTime> {
    match kind {
        AtomicType::Date => {
            let caps = DATE.captures(text)?;
            let date = calendar_date(&caps[1], &caps[2], &caps[3])?;
            to_utc(date.and_hms_opt(0, 0, 0)?, caps.get(4))
        }
        AtomicType::DateTime => {
            let caps = DATE_TIME.captures(text)?;
            let mut date = calendar_date(&caps[1], &caps[2], &caps[3])?;
            let (time, next_day) = clock_time(&caps[4], &caps[5], &caps[6], caps.get(7))?;
            if next_day {
                date = date.succ_opt()?;
            }
            to_utc(date.and_time(time), caps.get(8))
        }
        AtomicType::Time => {
            let caps = TIME.captures(text)?;
            let (time, _) = clock_time(&caps[1], &caps[2], &caps[3], caps.get(4))?;
            to_utc(NaiveDate::from_ymd_opt(1972, 12, 31)?.and_time(time), caps.get(5))
        }
        _ => None,
    }
}

fn is_xml_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if is_name_start_char(first) || first == ':' => {
            chars.all(|c| is_name_char(c) || c == ':')
        }
        _ => false,
    }
}

fn is_duration(pattern: &Regex, text: &str) -> bool {
    pattern.is_match(text) && !matches!(text, "P" | "-P") && !text.ends_with('T')
}

/// Whether whitespace-processed `text` is in the lexical space of `kind`
fn is_lexical(kind: AtomicType, text: &str) -> bool {
    use AtomicType as T;
    match kind {
        T::Language => LANGUAGE.is_match(text),
        T::Name => is_xml_name(text),
        T::NCName | T::Id | T::IdRef | T::Entity => is_valid_ncname(text),
        T::NmToken => !text.is_empty() && text.chars().all(|c| is_name_char(c) || c == ':'),
        T::Date | T::DateTime | T::Time => instant(kind, text).is_some(),
        T::Duration => is_duration(&DURATION, text),
        T::DayTimeDuration => is_duration(&DAY_TIME_DURATION, text),
        T::YearMonthDuration => is_duration(&YEAR_MONTH_DURATION, text),
        T::GYear => G_YEAR.is_match(text),
        T::GYearMonth => G_YEAR_MONTH.is_match(text),
        T::GMonth => G_MONTH.is_match(text),
        T::GDay => G_DAY.is_match(text),
        T::GMonthDay => G_MONTH_DAY.is_match(text),
        T::HexBinary => HEX_BINARY.is_match(text),
        T::Base64Binary => BASE64_BINARY.is_match(&text.replace(' ', "")),
        T::AnyUri => !text.contains(['\n', '\r', '\t']),
        _ => true,
    }
}

fn collapse(text: &str) -> String {
    text.split(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn whitespace(kind: AtomicType, text: &str) -> String {
    match kind {
        AtomicType::String => text.to_string(),
        AtomicType::NormalizedString => text.replace(['\t', '\r', '\n'], " "),
        _ => collapse(text),
    }
}

fn parse_lexical_number(text: &str, kind: AtomicType) -> Option<f64> {
    match kind {
        AtomicType::Double | AtomicType::Float => match text {
            "INF" | "+INF" => Some(f64::INFINITY),
            "-INF" => Some(f64::NEG_INFINITY),
            "NaN" => Some(f64::NAN),
            _ if DOUBLE.is_match(text) => text.parse().ok(),
            _ => None,
        },
        AtomicType::Decimal => DECIMAL.is_match(text).then(|| parse_number(text)),
        _ => INTEGER.is_match(text).then(|| parse_number(text)),
    }
}

fn numeric_cast(n: f64, kind: AtomicType) -> Option<f64> {
    match kind {
        AtomicType::Double => Some(n),
        AtomicType::Float => Some(f64::from(n as f32)),
        AtomicType::Decimal => n.is_finite().then_some(n),
        _ => {
            let (low, high) = kind.integer_bounds()?;
            let whole = n.trunc();
            (n.is_finite() && whole >= low && whole <= high).then_some(whole)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(kind: AtomicType, text: &str) -> Atomic {
        Atomic::Typed(kind, text.to_string())
    }

    #[test]
    fn test_lookup_and_hierarchy() {
        assert_eq!(AtomicType::lookup("integer"), Some(AtomicType::Integer));
        assert_eq!(AtomicType::lookup("NCName"), Some(AtomicType::NCName));
        assert_eq!(AtomicType::lookup("nope"), None);
        assert_eq!(AtomicType::UnsignedByte.name(), "xs:unsignedByte");

        assert!(AtomicType::Id.derives_from(AtomicType::String));
        assert!(AtomicType::Byte.derives_from(AtomicType::Decimal));
        assert!(!AtomicType::AnyUri.derives_from(AtomicType::String));
        assert!(AtomicType::Date.derives_from(AtomicType::AnyAtomic));
    }

    #[test]
    fn test_numeric_casts() {
        let text = |s: &str| Atomic::String(s.to_string());

        assert_eq!(cast(&text(" 42 "), AtomicType::Integer), Ok(Atomic::Number(42.0)));
        assert_eq!(cast(&Atomic::Number(3.9), AtomicType::Integer), Ok(Atomic::Number(3.0)));
        assert_eq!(cast(&text("1.5"), AtomicType::Decimal), Ok(Atomic::Number(1.5)));
        assert_eq!(cast(&text("-INF"), AtomicType::Double), Ok(Atomic::Number(f64::NEG_INFINITY)));
        assert_eq!(cast(&Atomic::Boolean(true), AtomicType::Integer), Ok(Atomic::Number(1.0)));

        assert!(matches!(
            cast(&text("1.5"), AtomicType::Integer),
            Err(EvaluationError::Cast { target: "xs:integer", .. })
        ));
        assert!(cast(&text("300"), AtomicType::UnsignedByte).is_err());
        assert!(cast(&text("-1"), AtomicType::NonNegativeInteger).is_err());
        assert!(cast(&text("12kg"), AtomicType::Double).is_err());
        assert!(cast(&Atomic::Number(f64::NAN), AtomicType::Integer).is_err());
    }

    #[test]
    fn test_lexical_casts() {
        let untyped = |s: &str| Atomic::Untyped(s.to_string());

        assert_eq!(cast(&untyped(" 2024-02-29 "), AtomicType::Date), Ok(typed(AtomicType::Date, "2024-02-29")));
        assert!(cast(&untyped("2023-02-29"), AtomicType::Date).is_err());
        assert!(cast(&untyped("2024-13-01"), AtomicType::Date).is_err());
        assert!(cast(&untyped("24:00:00"), AtomicType::Time).is_ok());
        assert!(cast(&untyped("24:00:01"), AtomicType::Time).is_err());
        assert!(cast(&untyped("2024-01-01T10:00:00+15:00"), AtomicType::DateTime).is_err());
        assert!(cast(&untyped("P1Y2M"), AtomicType::YearMonthDuration).is_ok());
        assert!(cast(&untyped("PT"), AtomicType::Duration).is_err());
        assert!(cast(&untyped("en-GB"), AtomicType::Language).is_ok());
        assert!(cast(&untyped("a b"), AtomicType::NCName).is_err());
        assert_eq!(cast(&untyped("  a \n b "), AtomicType::Token), Ok(typed(AtomicType::Token, "a b")));
        assert!(cast(&untyped("yes"), AtomicType::Boolean).is_err());
        assert_eq!(cast(&untyped("1"), AtomicType::Boolean), Ok(Atomic::Boolean(true)));

        let stamp = typed(AtomicType::DateTime, "2024-03-01T09:30:00Z");
        assert_eq!(cast(&stamp, AtomicType::Date), Ok(typed(AtomicType::Date, "2024-03-01Z")));
        assert_eq!(cast(&stamp, AtomicType::Time), Ok(typed(AtomicType::Time, "09:30:00Z")));
        assert!(cast(&Atomic::Number(1.0), AtomicType::Date).is_err());
    }

    #[test]
    fn test_instance_of_numbers() {
        assert!(instance_of(&Atomic::Number(5.0), AtomicType::Integer));
        assert!(instance_of(&Atomic::Number(5.0), AtomicType::Byte));
        assert!(!instance_of(&Atomic::Number(500.0), AtomicType::Byte));
        assert!(!instance_of(&Atomic::Number(5.5), AtomicType::Integer));
        assert!(instance_of(&Atomic::Number(5.5), AtomicType::Decimal));
        assert!(!instance_of(&Atomic::Number(f64::INFINITY), AtomicType::Decimal));
        assert!(instance_of(&Atomic::Number(f64::NAN), AtomicType::Double));
        assert!(!instance_of(&Atomic::String("5".into()), AtomicType::Integer));
        assert!(instance_of(&typed(AtomicType::NCName, "a"), AtomicType::String));
    }

    #[test]
    fn test_temporal_ordering() {
        let date = |s: &str| typed(AtomicType::Date, s);
        let stamp = |s: &str| typed(AtomicType::DateTime, s);

        assert_eq!(compare_typed(&date("2024-01-02"), &date("2023-12-31")), Some(Ordering::Greater));
        assert_eq!(
            compare_typed(&stamp("2024-01-01T12:00:00+02:00"), &stamp("2024-01-01T10:00:00Z")),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_typed(&stamp("2024-01-01T24:00:00"), &stamp("2024-01-02T00:00:00")),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_typed(&date("2024-05-01"), &Atomic::Untyped("2024-06-01".into())),
            Some(Ordering::Less)
        );
        assert_eq!(compare_typed(&date("2024-05-01"), &stamp("2024-05-01T00:00:00")), None);
        assert_eq!(compare_typed(&date("2024-05-01"), &Atomic::String("2024-05-01".into())), None);
    }

    #[test]
    fn test_date_components() {
        assert_eq!(date_component(AtomicType::Date, "2024-03-07Z", DateComponent::Month), Some(3.0));
        assert_eq!(
            date_component(AtomicType::DateTime, "2024-03-07T08:15:30.5", DateComponent::Seconds),
            Some(30.5)
        );
        assert_eq!(date_component(AtomicType::Time, "08:15:30", DateComponent::Minutes), Some(15.0));
        assert_eq!(date_component(AtomicType::Time, "08:15:30", DateComponent::Year), None);
    }

    #[test]
    fn test_sequence_type_display() {
        let optional = SequenceType::Of(ItemType::Atomic(AtomicType::Integer), Occurrence::Optional);
        assert_eq!(optional.to_string(), "xs:integer?");
        let elements = SequenceType::Of(ItemType::Node(NodeTest::Element(None)), Occurrence::OneOrMore);
        assert_eq!(elements.to_string(), "element()+");
        assert!(SequenceType::Empty.matches(&[]));
        assert!(optional.matches(&[]));
        assert!(!optional.matches(&[
            Item::Atomic(Atomic::Number(1.0)),
            Item::Atomic(Atomic::Number(2.0))
        ]));
    }
}
