//! XPath parser
//!
//! Builds an expression tree from tokens. Names are resolved while parsing:
//! prefixes against the schema's namespace table, variables against the
//! names visible at the expression, functions against the built-in library
//! and the caller's registry. Whatever cannot be resolved is a compile
//! error, so a parsed expression only fails at run time on dynamic errors.

use std::fmt;

use super::functions::{resolve_function, Function};
use super::lexer::{tokenize, Spanned, Token};
use super::types::{AtomicType, ItemType, Occurrence, SequenceType};
use super::{CompileContext, Dialect, ExpressionKind};
use crate::namespaces::XSD_NAMESPACE;

/// XPath axis types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XPathAxis {
    /// child:: axis (default)
    Child,
    /// descendant:: axis
    Descendant,
    /// descendant-or-self:: axis
    DescendantOrSelf,
    /// self:: axis
    Self_,
    /// parent:: axis
    Parent,
    /// ancestor:: axis
    Ancestor,
    /// ancestor-or-self:: axis
    AncestorOrSelf,
    /// following-sibling:: axis
    FollowingSibling,
    /// preceding-sibling:: axis
    PrecedingSibling,
    /// following:: axis
    Following,
    /// preceding:: axis
    Preceding,
    /// attribute:: axis
    Attribute,
    /// namespace:: axis, recognised but not supported
    Namespace,
}

impl XPathAxis {
    /// Parse axis from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "child" => Some(Self::Child),
            "descendant" => Some(Self::Descendant),
            "descendant-or-self" => Some(Self::DescendantOrSelf),
            "self" => Some(Self::Self_),
            "parent" => Some(Self::Parent),
            "ancestor" => Some(Self::Ancestor),
            "ancestor-or-self" => Some(Self::AncestorOrSelf),
            "following-sibling" => Some(Self::FollowingSibling),
            "preceding-sibling" => Some(Self::PrecedingSibling),
            "following" => Some(Self::Following),
            "preceding" => Some(Self::Preceding),
            "attribute" => Some(Self::Attribute),
            "namespace" => Some(Self::Namespace),
            _ => None,
        }
    }

    /// Check if this axis is forward (selects nodes after context in document order)
    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Self::Child
                | Self::Descendant
                | Self::DescendantOrSelf
                | Self::Self_
                | Self::Following
                | Self::FollowingSibling
                | Self::Attribute
                | Self::Namespace
        )
    }

    /// Check if this axis is reverse
    pub fn is_reverse(&self) -> bool {
        !self.is_forward()
    }
}

impl fmt::Display for XPathAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Child => "child",
            Self::Descendant => "descendant",
            Self::DescendantOrSelf => "descendant-or-self",
            Self::Self_ => "self",
            Self::Parent => "parent",
            Self::Ancestor => "ancestor",
            Self::AncestorOrSelf => "ancestor-or-self",
            Self::FollowingSibling => "following-sibling",
            Self::PrecedingSibling => "preceding-sibling",
            Self::Following => "following",
            Self::Preceding => "preceding",
            Self::Attribute => "attribute",
            Self::Namespace => "namespace",
        };
        write!(f, "{}", s)
    }
}

/// Node test in an XPath step, with prefixes already resolved
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    /// Name test
    Name {
        /// Namespace URI
        namespace: Option<String>,
        /// Local name
        local: String,
    },
    /// `*`
    Wildcard,
    /// `prefix:*`, holding the namespace URI
    NamespaceWildcard(String),
    /// `*:local`
    LocalWildcard(String),
    /// node() test
    Node,
    /// text() test
    Text,
    /// comment() test
    Comment,
    /// processing-instruction() test
    ProcessingInstruction(Option<String>),
    /// `element()` or `element(name)`, the name as `(namespace, local)`
    Element(Option<(Option<String>, String)>),
    /// `attribute()` or `attribute(name)`
    Attribute(Option<(Option<String>, String)>),
    /// `document-node()`
    Document,
}

impl NodeTest {
    /// Check if this test matches any node of the axis' principal kind
    pub fn matches_any(&self) -> bool {
        matches!(self, Self::Wildcard | Self::Node)
    }

    /// Get the local name if this is a name test
    pub fn local_name(&self) -> Option<&str> {
        match self {
            Self::Name { local, .. } => Some(local),
            _ => None,
        }
    }
}

/// Axis step
#[derive(Debug, Clone)]
pub struct Step {
    /// The axis
    pub axis: XPathAxis,
    /// The node test
    pub test: NodeTest,
    /// Predicates
    pub predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Step {
            axis: XPathAxis::DescendantOrSelf,
            test: NodeTest::Node,
            predicates: Vec::new(),
        }
    }
}

/// Step of a path expression
#[derive(Debug, Clone)]
pub enum PathStep {
    /// `axis::test[...]`
    Axis(Step),
    /// A primary expression used as a step, e.g. `a/(b | c)` or `a/string()`
    Filter {
        /// Step expression
        expr: Expr,
        /// Predicates
        predicates: Vec<Expr>,
    },
}

/// What a path expression starts from
#[derive(Debug, Clone)]
pub enum PathStart {
    /// `/...`: the root of the context node's document
    Root,
    /// A relative path: the context node
    Context,
    /// `expr/...`
    Expr(Box<Expr>),
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`, `eq`
    Eq,
    /// `!=`, `ne`
    Ne,
    /// `<`, `lt`
    Lt,
    /// `<=`, `le`
    Le,
    /// `>`, `gt`
    Gt,
    /// `>=`, `ge`
    Ge,
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `or`
    Or,
    /// `and`
    And,
    /// General comparison (`=`, `<`, ...)
    General(CompareOp),
    /// Value comparison (`eq`, `lt`, ...)
    Value(CompareOp),
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `div`
    Div,
    /// `idiv`
    IDiv,
    /// `mod`
    Mod,
    /// `|`, `union`
    Union,
    /// `intersect`
    Intersect,
    /// `except`
    Except,
    /// `to`
    Range,
    /// `||`
    Concat,
    /// `is`
    Is,
    /// `<<`
    Precedes,
    /// `>>`
    Follows,
}

/// Expression tree
#[derive(Debug, Clone)]
pub enum Expr {
    /// String literal
    Literal(String),
    /// Numeric literal
    Number(f64),
    /// Variable reference
    Variable(String),
    /// `.`
    ContextItem,
    /// Path expression
    Path {
        /// Start of the path
        start: PathStart,
        /// Steps, in order
        steps: Vec<PathStep>,
    },
    /// Primary expression with predicates
    Filter {
        /// Filtered expression
        primary: Box<Expr>,
        /// Predicates
        predicates: Vec<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expr>,
        /// Right operand
        right: Box<Expr>,
    },
    /// Unary minus
    Negate(Box<Expr>),
    /// Function call
    Call {
        /// Resolved function
        function: Function,
        /// Arguments
        args: Vec<Expr>,
    },
    /// Sequence constructor `a, b, c`
    Sequence(Vec<Expr>),
    /// `if (c) then a else b`
    If {
        /// Condition
        condition: Box<Expr>,
        /// Then branch
        then: Box<Expr>,
        /// Else branch
        otherwise: Box<Expr>,
    },
    /// `for $x in ... return ...`
    For {
        /// Range variables
        bindings: Vec<(String, Expr)>,
        /// Return expression
        body: Box<Expr>,
    },
    /// `some/every $x in ... satisfies ...`
    Quantified {
        /// `every` rather than `some`
        every: bool,
        /// Range variables
        bindings: Vec<(String, Expr)>,
        /// Test expression
        condition: Box<Expr>,
    },
    /// `a ! b`: `b` evaluated once per item of `a`
    Map {
        /// Input sequence
        input: Box<Expr>,
        /// Expression applied to each item
        mapping: Box<Expr>,
    },
    /// `e cast as T`, also the form of `xs:T(e)` constructors
    Cast {
        /// Value to cast
        operand: Box<Expr>,
        /// Target type
        target: AtomicType,
        /// The empty sequence is allowed (`T?`)
        optional: bool,
    },
    /// `e castable as T`
    Castable {
        /// Value to test
        operand: Box<Expr>,
        /// Target type
        target: AtomicType,
        /// The empty sequence is allowed (`T?`)
        optional: bool,
    },
    /// `e instance of T`
    InstanceOf {
        /// Value to test
        operand: Box<Expr>,
        /// Expected type
        sequence_type: SequenceType,
    },
    /// `e treat as T`
    Treat {
        /// Value to check
        operand: Box<Expr>,
        /// Expected type
        sequence_type: SequenceType,
    },
}

/// XPath parse error
#[derive(Debug, Clone, PartialEq)]
pub enum XPathParseError {
    /// Unknown axis name
    UnknownAxis(String),
    /// Invalid syntax
    InvalidSyntax(String),
    /// Unexpected end of expression
    UnexpectedEnd,
    /// Unknown function or wrong number of arguments
    UnknownFunction {
        /// Function name as written
        name: String,
        /// Number of arguments
        arity: usize,
    },
    /// Reference to a variable that is not in scope
    UnknownVariable(String),
    /// Namespace prefix without a binding
    UnknownPrefix(String),
    /// Type name that is not a built-in atomic type
    UnknownType(String),
    /// Construct not available in the selected dialect
    NotInDialect {
        /// The construct
        feature: String,
        /// The dialect in use
        dialect: Dialect,
    },
    /// Expression nested deeper than allowed
    TooDeep(usize),
}

impl fmt::Display for XPathParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAxis(axis) => write!(f, "Unknown XPath axis: {}", axis),
            Self::InvalidSyntax(msg) => write!(f, "Invalid XPath syntax: {}", msg),
            Self::UnexpectedEnd => write!(f, "Unexpected end of XPath expression"),
            Self::UnknownFunction { name, arity } => {
                write!(f, "Unknown function: {}#{}", name, arity)
            }
            Self::UnknownVariable(name) => write!(f, "Variable ${} is not in scope", name),
            Self::UnknownPrefix(prefix) => write!(f, "Unknown namespace prefix: {}", prefix),
            Self::UnknownType(name) => write!(f, "Unknown atomic type: {}", name),
            Self::NotInDialect { feature, dialect } => {
                write!(f, "{} is not available in {}", feature, dialect)
            }
            Self::TooDeep(max) => write!(f, "Expression nesting exceeds maximum depth {}", max),
        }
    }
}

impl std::error::Error for XPathParseError {}

/// Parse an expression against a compile context
pub fn parse_expression(text: &str, context: &CompileContext<'_>) -> Result<Expr, XPathParseError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(XPathParseError::InvalidSyntax("empty expression".to_string()));
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        context,
        locals: Vec::new(),
        depth: 0,
    };
    let expr = parser.parse_expr()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(XPathParseError::InvalidSyntax(format!(
            "unexpected '{}' at offset {}",
            extra.token, extra.offset
        )));
    }

    Ok(match context.kind {
        ExpressionKind::Value => expr,
        ExpressionKind::Match => anchor_match(expr),
    })
}

/// Anchor every relative branch of a match pattern at any depth of the document
fn anchor_match(expr: Expr) -> Expr {
    match expr {
        Expr::Binary {
            op: BinaryOp::Union,
            left,
            right,
        } => Expr::Binary {
            op: BinaryOp::Union,
            left: Box::new(anchor_match(*left)),
            right: Box::new(anchor_match(*right)),
        },
        Expr::Path {
            start: PathStart::Context,
            steps,
        } => {
            let mut anchored = vec![PathStep::Axis(Step::descendant_or_self())];
            anchored.extend(steps);
            Expr::Path {
                start: PathStart::Root,
                steps: anchored,
            }
        }
        Expr::ContextItem => Expr::Path {
            start: PathStart::Root,
            steps: vec![PathStep::Axis(Step::descendant_or_self())],
        },
        other => other,
    }
}

struct Parser<'t, 'c> {
    tokens: &'t [Spanned],
    pos: usize,
    context: &'c CompileContext<'c>,
    locals: Vec<String>,
    depth: usize,
}

impl<'t, 'c> Parser<'t, 'c> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn peek_at(&self, ahead: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + ahead).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos).map(|s| &s.token);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), XPathParseError> {
        match self.tokens.get(self.pos) {
            Some(spanned) if spanned.token == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(spanned) => Err(XPathParseError::InvalidSyntax(format!(
                "expected '{}' but found '{}' at offset {}",
                expected, spanned.token, spanned.offset
            ))),
            None => Err(XPathParseError::UnexpectedEnd),
        }
    }

    fn at_operator(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::OperatorName(n)) if n == name)
    }

    fn expect_operator(&mut self, name: &str) -> Result<(), XPathParseError> {
        if self.at_operator(name) {
            self.pos += 1;
            Ok(())
        } else {
            match self.tokens.get(self.pos) {
                Some(spanned) => Err(XPathParseError::InvalidSyntax(format!(
                    "expected '{}' but found '{}' at offset {}",
                    name, spanned.token, spanned.offset
                ))),
                None => Err(XPathParseError::UnexpectedEnd),
            }
        }
    }

    /// `as` and `of` follow operators, so they arrive as plain names
    fn expect_keyword(&mut self, keyword: &str) -> Result<(), XPathParseError> {
        match self.peek() {
            Some(Token::Name(n)) | Some(Token::OperatorName(n)) if n == keyword => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(XPathParseError::InvalidSyntax(format!(
                "expected '{}' but found '{}' at offset {}",
                keyword, self.tokens[self.pos].token, self.tokens[self.pos].offset
            ))),
            None => Err(XPathParseError::UnexpectedEnd),
        }
    }

    fn dialect(&self) -> Dialect {
        self.context.dialect
    }

    fn require(&self, minimum: Dialect, feature: &str) -> Result<(), XPathParseError> {
        if self.dialect() >= minimum {
            Ok(())
        } else {
            Err(XPathParseError::NotInDialect {
                feature: feature.to_string(),
                dialect: self.dialect(),
            })
        }
    }

    fn unexpected(&self) -> XPathParseError {
        match self.tokens.get(self.pos) {
            Some(spanned) => XPathParseError::InvalidSyntax(format!(
                "unexpected '{}' at offset {}",
                spanned.token, spanned.offset
            )),
            None => XPathParseError::UnexpectedEnd,
        }
    }

    // Expr ::= ExprSingle ("," ExprSingle)*
    fn parse_expr(&mut self) -> Result<Expr, XPathParseError> {
        let first = self.parse_expr_single()?;
        if self.peek() != Some(&Token::Comma) || self.dialect() < Dialect::XPath2 {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.peek() == Some(&Token::Comma) {
            self.advance();
            items.push(self.parse_expr_single()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_expr_single(&mut self) -> Result<Expr, XPathParseError> {
        self.depth += 1;
        if self.depth > self.context.max_depth {
            return Err(XPathParseError::TooDeep(self.context.max_depth));
        }
        let result = self.parse_expr_single_inner();
        self.depth -= 1;
        result
    }

    fn parse_expr_single_inner(&mut self) -> Result<Expr, XPathParseError> {
        if self.dialect() >= Dialect::XPath2 {
            match (self.peek(), self.peek_at(1)) {
                (Some(Token::Name(n)), Some(Token::Variable(_))) if n == "for" => {
                    return self.parse_for();
                }
                (Some(Token::Name(n)), Some(Token::Variable(_))) if n == "some" || n == "every" => {
                    let every = n == "every";
                    return self.parse_quantified(every);
                }
                (Some(Token::Name(n)), Some(Token::LParen)) if n == "if" => {
                    return self.parse_if();
                }
                _ => {}
            }
        }
        self.parse_or()
    }

    fn parse_range_bindings(&mut self) -> Result<Vec<(String, Expr)>, XPathParseError> {
        let mut bindings = Vec::new();
        loop {
            let name = match self.advance() {
                Some(Token::Variable(name)) => name.clone(),
                Some(_) => {
                    self.pos -= 1;
                    return Err(self.unexpected());
                }
                None => return Err(XPathParseError::UnexpectedEnd),
            };
            self.expect_operator("in")?;
            let domain = self.parse_expr_single()?;
            self.locals.push(name.clone());
            bindings.push((name, domain));

            if self.peek() == Some(&Token::Comma) {
                self.advance();
            } else {
                return Ok(bindings);
            }
        }
    }

    fn parse_for(&mut self) -> Result<Expr, XPathParseError> {
        self.advance();
        let scope = self.locals.len();
        let bindings = self.parse_range_bindings()?;
        self.expect_operator("return")?;
        let body = self.parse_expr_single();
        self.locals.truncate(scope);
        Ok(Expr::For {
            bindings,
            body: Box::new(body?),
        })
    }

    fn parse_quantified(&mut self, every: bool) -> Result<Expr, XPathParseError> {
        self.advance();
        let scope = self.locals.len();
        let bindings = self.parse_range_bindings()?;
        self.expect_operator("satisfies")?;
        let condition = self.parse_expr_single();
        self.locals.truncate(scope);
        Ok(Expr::Quantified {
            every,
            bindings,
            condition: Box::new(condition?),
        })
    }

    fn parse_if(&mut self) -> Result<Expr, XPathParseError> {
        self.advance();
        self.expect(Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(Token::RParen)?;
        self.expect_operator("then")?;
        let then = self.parse_expr_single()?;
        self.expect_operator("else")?;
        let otherwise = self.parse_expr_single()?;
        Ok(Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_and()?;
        while self.at_operator("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_equality()?;
        while self.at_operator("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::General(CompareOp::Eq),
                Some(Token::NotEq) => BinaryOp::General(CompareOp::Ne),
                Some(Token::OperatorName(n)) if n == "eq" => BinaryOp::Value(CompareOp::Eq),
                Some(Token::OperatorName(n)) if n == "ne" => BinaryOp::Value(CompareOp::Ne),
                _ => return Ok(left),
            };
            if matches!(op, BinaryOp::Value(_)) {
                self.require(Dialect::XPath2, "value comparison")?;
            }
            self.advance();
            let right = self.parse_relational()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::General(CompareOp::Lt),
                Some(Token::LtEq) => BinaryOp::General(CompareOp::Le),
                Some(Token::Gt) => BinaryOp::General(CompareOp::Gt),
                Some(Token::GtEq) => BinaryOp::General(CompareOp::Ge),
                Some(Token::Precedes) => BinaryOp::Precedes,
                Some(Token::Follows) => BinaryOp::Follows,
                Some(Token::OperatorName(n)) => match n.as_str() {
                    "lt" => BinaryOp::Value(CompareOp::Lt),
                    "le" => BinaryOp::Value(CompareOp::Le),
                    "gt" => BinaryOp::Value(CompareOp::Gt),
                    "ge" => BinaryOp::Value(CompareOp::Ge),
                    "is" => BinaryOp::Is,
                    _ => return Ok(left),
                },
                _ => return Ok(left),
            };
            match op {
                BinaryOp::Value(_) => self.require(Dialect::XPath2, "value comparison")?,
                BinaryOp::Is | BinaryOp::Precedes | BinaryOp::Follows => {
                    self.require(Dialect::XPath2, "node comparison")?
                }
                _ => {}
            }
            self.advance();
            let right = self.parse_concat()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_range()?;
        while self.peek() == Some(&Token::Concat) {
            self.require(Dialect::XPath3, "the || operator")?;
            self.advance();
            let right = self.parse_range()?;
            left = Self::binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn parse_range(&mut self) -> Result<Expr, XPathParseError> {
        let left = self.parse_additive()?;
        if self.at_operator("to") {
            self.require(Dialect::XPath2, "range expression")?;
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Self::binary(BinaryOp::Range, left, right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_union()?;
        loop {
            let op = match self.peek() {
                Some(Token::Multiply) => BinaryOp::Mul,
                Some(Token::OperatorName(n)) => match n.as_str() {
                    "div" => BinaryOp::Div,
                    "mod" => BinaryOp::Mod,
                    "idiv" => BinaryOp::IDiv,
                    _ => return Ok(left),
                },
                _ => return Ok(left),
            };
            if op == BinaryOp::IDiv {
                self.require(Dialect::XPath2, "idiv")?;
            }
            self.advance();
            let right = self.parse_union()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_union(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_intersect()?;
        loop {
            match self.peek() {
                Some(Token::Pipe) => {}
                Some(Token::OperatorName(n)) if n == "union" => {
                    self.require(Dialect::XPath2, "union")?;
                }
                _ => return Ok(left),
            }
            self.advance();
            let right = self.parse_intersect()?;
            left = Self::binary(BinaryOp::Union, left, right);
        }
    }

    fn parse_intersect(&mut self) -> Result<Expr, XPathParseError> {
        let mut left = self.parse_instance_of()?;
        loop {
            let op = match self.peek() {
                Some(Token::OperatorName(n)) if n == "intersect" => BinaryOp::Intersect,
                Some(Token::OperatorName(n)) if n == "except" => BinaryOp::Except,
                _ => return Ok(left),
            };
            self.require(Dialect::XPath2, "intersect and except")?;
            self.advance();
            let right = self.parse_instance_of()?;
            left = Self::binary(op, left, right);
        }
    }

    fn parse_instance_of(&mut self) -> Result<Expr, XPathParseError> {
        let operand = self.parse_treat()?;
        if !self.at_operator("instance") {
            return Ok(operand);
        }
        self.require(Dialect::XPath2, "instance of")?;
        self.advance();
        self.expect_keyword("of")?;
        let sequence_type = self.parse_sequence_type()?;
        Ok(Expr::InstanceOf {
            operand: Box::new(operand),
            sequence_type,
        })
    }

    fn parse_treat(&mut self) -> Result<Expr, XPathParseError> {
        let operand = self.parse_castable()?;
        if !self.at_operator("treat") {
            return Ok(operand);
        }
        self.require(Dialect::XPath2, "treat as")?;
        self.advance();
        self.expect_keyword("as")?;
        let sequence_type = self.parse_sequence_type()?;
        Ok(Expr::Treat {
            operand: Box::new(operand),
            sequence_type,
        })
    }

    fn parse_castable(&mut self) -> Result<Expr, XPathParseError> {
        let operand = self.parse_cast()?;
        if !self.at_operator("castable") {
            return Ok(operand);
        }
        self.require(Dialect::XPath2, "castable as")?;
        self.advance();
        self.expect_keyword("as")?;
        let (target, optional) = self.parse_single_type()?;
        Ok(Expr::Castable {
            operand: Box::new(operand),
            target,
            optional,
        })
    }

    fn parse_cast(&mut self) -> Result<Expr, XPathParseError> {
        let operand = self.parse_unary()?;
        if !self.at_operator("cast") {
            return Ok(operand);
        }
        self.require(Dialect::XPath2, "cast as")?;
        self.advance();
        self.expect_keyword("as")?;
        let (target, optional) = self.parse_single_type()?;
        Ok(Expr::Cast {
            operand: Box::new(operand),
            target,
            optional,
        })
    }

    // SingleType ::= AtomicType "?"?
    fn parse_single_type(&mut self) -> Result<(AtomicType, bool), XPathParseError> {
        let target = match self.advance() {
            Some(Token::Name(name)) => self.atomic_type(name)?,
            Some(_) => {
                self.pos -= 1;
                return Err(self.unexpected());
            }
            None => return Err(XPathParseError::UnexpectedEnd),
        };
        if target == AtomicType::AnyAtomic {
            return Err(XPathParseError::InvalidSyntax(
                "cannot cast to the abstract type xs:anyAtomicType".to_string(),
            ));
        }
        let optional = self.peek() == Some(&Token::Question);
        if optional {
            self.advance();
        }
        Ok((target, optional))
    }

    // SequenceType ::= "empty-sequence" "(" ")" | ItemType OccurrenceIndicator?
    fn parse_sequence_type(&mut self) -> Result<SequenceType, XPathParseError> {
        let item_type = match (self.advance(), self.peek()) {
            (Some(Token::Name(name)), Some(Token::LParen)) if name == "empty-sequence" => {
                self.advance();
                self.expect(Token::RParen)?;
                return Ok(SequenceType::Empty);
            }
            (Some(Token::Name(name)), Some(Token::LParen)) if name == "item" => {
                self.advance();
                self.expect(Token::RParen)?;
                ItemType::Item
            }
            (Some(Token::Name(name)), Some(Token::LParen)) if is_kind_test(name) => {
                self.advance();
                ItemType::Node(self.parse_kind_test(name)?)
            }
            (Some(Token::Name(name)), _) => ItemType::Atomic(self.atomic_type(name)?),
            (Some(_), _) => {
                self.pos -= 1;
                return Err(self.unexpected());
            }
            (None, _) => return Err(XPathParseError::UnexpectedEnd),
        };
        let occurrence = match self.peek() {
            Some(Token::Question) => Occurrence::Optional,
            Some(Token::Multiply) => Occurrence::ZeroOrMore,
            Some(Token::Plus) => Occurrence::OneOrMore,
            _ => Occurrence::One,
        };
        if occurrence != Occurrence::One {
            self.advance();
        }
        Ok(SequenceType::Of(item_type, occurrence))
    }

    /// Namespace of a prefix in a type or constructor name; `xs` defaults to XML Schema
    fn type_namespace(&self, prefix: &str) -> Result<String, XPathParseError> {
        match self.context.namespaces.get(prefix) {
            Some(uri) => Ok(uri.to_string()),
            None if prefix == "xs" => Ok(XSD_NAMESPACE.to_string()),
            None => Err(XPathParseError::UnknownPrefix(prefix.to_string())),
        }
    }

    fn atomic_type(&self, name: &str) -> Result<AtomicType, XPathParseError> {
        let unknown = || XPathParseError::UnknownType(name.to_string());
        let (prefix, local) = name.split_once(':').ok_or_else(unknown)?;
        if self.type_namespace(prefix)? != XSD_NAMESPACE {
            return Err(unknown());
        }
        AtomicType::lookup(local).ok_or_else(unknown)
    }

    /// The type a constructor function call builds, if `name` is in the XML Schema namespace
    fn constructor_type(&self, name: &str) -> Result<Option<AtomicType>, XPathParseError> {
        let Some((prefix, local)) = name.split_once(':') else {
            return Ok(None);
        };
        let in_schema_namespace = match self.context.namespaces.get(prefix) {
            Some(uri) => uri == XSD_NAMESPACE,
            None => prefix == "xs",
        };
        if !in_schema_namespace {
            return Ok(None);
        }
        match AtomicType::lookup(local) {
            Some(AtomicType::AnyAtomic) | None => Err(XPathParseError::UnknownType(name.to_string())),
            Some(target) => Ok(Some(target)),
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, XPathParseError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Negate(Box::new(operand)))
            }
            Some(Token::Plus) if self.dialect() >= Dialect::XPath2 => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_simple_map(),
        }
    }

    fn parse_simple_map(&mut self) -> Result<Expr, XPathParseError> {
        let mut input = self.parse_path()?;
        while self.peek() == Some(&Token::Bang) {
            self.require(Dialect::XPath3, "the ! operator")?;
            self.advance();
            let mapping = self.parse_path()?;
            input = Expr::Map {
                input: Box::new(input),
                mapping: Box::new(mapping),
            };
        }
        Ok(input)
    }

    fn parse_path(&mut self) -> Result<Expr, XPathParseError> {
        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                if self.at_step_start() {
                    let steps = self.parse_relative_steps()?;
                    Ok(Expr::Path {
                        start: PathStart::Root,
                        steps,
                    })
                } else {
                    Ok(Expr::Path {
                        start: PathStart::Root,
                        steps: Vec::new(),
                    })
                }
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                let mut steps = vec![PathStep::Axis(Step::descendant_or_self())];
                steps.extend(self.parse_relative_steps()?);
                Ok(Expr::Path {
                    start: PathStart::Root,
                    steps,
                })
            }
            Some(Token::Dot) => {
                self.advance();
                let predicates = self.parse_predicates()?;
                let primary = if predicates.is_empty() {
                    Expr::ContextItem
                } else {
                    Expr::Filter {
                        primary: Box::new(Expr::ContextItem),
                        predicates,
                    }
                };
                self.continue_path(primary)
            }
            _ if self.at_primary_start() => {
                let primary = self.parse_primary()?;
                let predicates = self.parse_predicates()?;
                let filtered = if predicates.is_empty() {
                    primary
                } else {
                    Expr::Filter {
                        primary: Box::new(primary),
                        predicates,
                    }
                };
                self.continue_path(filtered)
            }
            _ => {
                let steps = self.parse_relative_steps()?;
                Ok(Expr::Path {
                    start: PathStart::Context,
                    steps,
                })
            }
        }
    }

    /// Parse `/step...` after a primary expression, if any
    fn continue_path(&mut self, primary: Expr) -> Result<Expr, XPathParseError> {
        let mut steps = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(PathStep::Axis(Step::descendant_or_self()));
                }
                _ => break,
            }
            steps.push(self.parse_step()?);
        }

        if steps.is_empty() {
            return Ok(primary);
        }
        let start = match primary {
            Expr::ContextItem => PathStart::Context,
            other => PathStart::Expr(Box::new(other)),
        };
        Ok(Expr::Path { start, steps })
    }

    fn at_step_start(&self) -> bool {
        match self.peek() {
            Some(Token::Name(_))
            | Some(Token::Wildcard { .. })
            | Some(Token::At)
            | Some(Token::Dot)
            | Some(Token::DotDot) => true,
            Some(Token::LParen) | Some(Token::Variable(_)) | Some(Token::Literal(_)) | Some(Token::Number(_)) => {
                self.dialect() >= Dialect::XPath2
            }
            _ => false,
        }
    }

    /// Whether the next tokens start a primary expression rather than a step
    fn at_primary_start(&self) -> bool {
        match self.peek() {
            Some(Token::Literal(_)) | Some(Token::Number(_)) | Some(Token::Variable(_)) | Some(Token::LParen) => true,
            Some(Token::Name(name)) => {
                self.peek_at(1) == Some(&Token::LParen) && !is_kind_test(name)
            }
            _ => false,
        }
    }

    fn parse_relative_steps(&mut self) -> Result<Vec<PathStep>, XPathParseError> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(PathStep::Axis(Step::descendant_or_self()));
                }
                _ => return Ok(steps),
            }
            steps.push(self.parse_step()?);
        }
    }

    fn parse_step(&mut self) -> Result<PathStep, XPathParseError> {
        let (axis, test) = match self.peek() {
            Some(Token::Dot) => {
                self.advance();
                (XPathAxis::Self_, NodeTest::Node)
            }
            Some(Token::DotDot) => {
                self.advance();
                (XPathAxis::Parent, NodeTest::Node)
            }
            Some(Token::At) => {
                self.advance();
                (XPathAxis::Attribute, self.parse_node_test()?)
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::ColonColon) => {
                let axis = XPathAxis::parse(name)
                    .ok_or_else(|| XPathParseError::UnknownAxis(name.clone()))?;
                if axis == XPathAxis::Namespace {
                    return Err(XPathParseError::InvalidSyntax(
                        "the namespace axis is not supported".to_string(),
                    ));
                }
                self.advance();
                self.advance();
                (axis, self.parse_node_test()?)
            }
            _ if self.at_primary_start() => {
                self.require(Dialect::XPath2, "an expression as a path step")?;
                let expr = self.parse_primary()?;
                let predicates = self.parse_predicates()?;
                return Ok(PathStep::Filter { expr, predicates });
            }
            _ => match self.parse_node_test()? {
                test @ NodeTest::Attribute(_) => (XPathAxis::Attribute, test),
                test => (XPathAxis::Child, test),
            },
        };

        let predicates = self.parse_predicates()?;
        Ok(PathStep::Axis(Step {
            axis,
            test,
            predicates,
        }))
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, XPathParseError> {
        match self.advance() {
            Some(Token::Wildcard { prefix, local }) => match (prefix, local) {
                (Some(prefix), _) => Ok(NodeTest::NamespaceWildcard(self.resolve_prefix(prefix)?)),
                (None, Some(local)) => {
                    self.require(Dialect::XPath2, "the *:name wildcard")?;
                    Ok(NodeTest::LocalWildcard(local.clone()))
                }
                (None, None) => Ok(NodeTest::Wildcard),
            },
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) && is_kind_test(name) => {
                self.advance();
                self.parse_kind_test(name)
            }
            Some(Token::Name(name)) => match name.split_once(':') {
                Some((prefix, local)) => Ok(NodeTest::Name {
                    namespace: Some(self.resolve_prefix(prefix)?),
                    local: local.to_string(),
                }),
                None => Ok(NodeTest::Name {
                    namespace: None,
                    local: name.clone(),
                }),
            },
            Some(_) => {
                self.pos -= 1;
                Err(self.unexpected())
            }
            None => Err(XPathParseError::UnexpectedEnd),
        }
    }

    /// Rest of a kind test after `name(`
    fn parse_kind_test(&mut self, name: &str) -> Result<NodeTest, XPathParseError> {
        let test = match name {
            "node" => NodeTest::Node,
            "text" => NodeTest::Text,
            "comment" => NodeTest::Comment,
            "document-node" => {
                self.require(Dialect::XPath2, "document-node()")?;
                NodeTest::Document
            }
            "element" | "attribute" => {
                self.require(Dialect::XPath2, "element() and attribute() tests")?;
                let node_name = match self.peek() {
                    Some(Token::Wildcard {
                        prefix: None,
                        local: None,
                    }) => {
                        self.advance();
                        None
                    }
                    Some(Token::Name(n)) => {
                        let n = n.clone();
                        self.advance();
                        Some(self.expanded_name(&n)?)
                    }
                    _ => None,
                };
                if name == "element" {
                    NodeTest::Element(node_name)
                } else {
                    NodeTest::Attribute(node_name)
                }
            }
            _ => match self.peek() {
                Some(Token::Literal(target)) | Some(Token::Name(target)) => {
                    let target = target.clone();
                    self.advance();
                    NodeTest::ProcessingInstruction(Some(target))
                }
                _ => NodeTest::ProcessingInstruction(None),
            },
        };
        self.expect(Token::RParen)?;
        Ok(test)
    }

    fn expanded_name(&self, name: &str) -> Result<(Option<String>, String), XPathParseError> {
        match name.split_once(':') {
            Some((prefix, local)) => Ok((Some(self.resolve_prefix(prefix)?), local.to_string())),
            None => Ok((None, name.to_string())),
        }
    }

    fn resolve_prefix(&self, prefix: &str) -> Result<String, XPathParseError> {
        self.context
            .namespaces
            .get(prefix)
            .map(str::to_string)
            .ok_or_else(|| XPathParseError::UnknownPrefix(prefix.to_string()))
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, XPathParseError> {
        let mut predicates = Vec::new();
        while self.peek() == Some(&Token::LBracket) {
            self.advance();
            predicates.push(self.parse_expr_nested()?);
            self.expect(Token::RBracket)?;
        }
        Ok(predicates)
    }

    /// A full expression inside brackets or parentheses, where commas are sequence operators
    fn parse_expr_nested(&mut self) -> Result<Expr, XPathParseError> {
        self.depth += 1;
        if self.depth > self.context.max_depth {
            return Err(XPathParseError::TooDeep(self.context.max_depth));
        }
        let result = self.parse_expr();
        self.depth -= 1;
        result
    }

    fn parse_primary(&mut self) -> Result<Expr, XPathParseError> {
        match self.advance() {
            Some(Token::Literal(s)) => Ok(Expr::Literal(s.clone())),
            Some(Token::Number(n)) => Ok(Expr::Number(*n)),
            Some(Token::Variable(name)) => {
                let visible = self.locals.iter().rev().any(|l| l == name)
                    || self.context.variables.iter().any(|v| v == name);
                if visible {
                    Ok(Expr::Variable(name.clone()))
                } else {
                    Err(XPathParseError::UnknownVariable(name.clone()))
                }
            }
            Some(Token::LParen) => {
                if self.peek() == Some(&Token::RParen) {
                    self.require(Dialect::XPath2, "the empty sequence")?;
                    self.advance();
                    return Ok(Expr::Sequence(Vec::new()));
                }
                let inner = self.parse_expr_nested()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Name(name)) => {
                let name = name.clone();
                self.expect(Token::LParen)?;
                let mut args = Vec::new();
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr_single()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen)?;
                if let Some(target) = self.constructor_type(&name)? {
                    self.require(Dialect::XPath2, "constructor functions")?;
                    let arity = args.len();
                    let mut args = args.into_iter();
                    return match (args.next(), args.next()) {
                        (Some(operand), None) => Ok(Expr::Cast {
                            operand: Box::new(operand),
                            target,
                            optional: true,
                        }),
                        _ => Err(XPathParseError::UnknownFunction { name, arity }),
                    };
                }
                let function = resolve_function(&name, args.len(), self.context)?;
                Ok(Expr::Call { function, args })
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.unexpected())
            }
            None => Err(XPathParseError::UnexpectedEnd),
        }
    }
}

fn is_kind_test(name: &str) -> bool {
    matches!(
        name,
        "node" | "text" | "comment" | "processing-instruction" | "element" | "attribute" | "document-node"
    )
}
