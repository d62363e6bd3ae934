//! Expression evaluation
//!
//! Walks a parsed [`Expr`] against a target document. Node sequences
//! produced by path steps are kept in document order without duplicates;
//! positional predicates on reverse axes count from the context node
//! outwards.

use std::cmp::Ordering;
use std::collections::HashSet;

use thiserror::Error;

use super::functions::{call_builtin, call_custom, Function};
use super::nodes::{sort_document_order, NodeKind, XNode};
use super::parsers::{BinaryOp, CompareOp, Expr, NodeTest, PathStart, PathStep, Step, XPathAxis};
use super::types::{cast, compare_typed};
use super::values::{parse_number, Atomic, Item, Value};
use super::Dialect;

/// Dynamic error raised while evaluating an expression
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// Operand of the wrong type
    #[error("type error: {0}")]
    Type(String),

    /// Variable without a value in the current scope
    #[error("variable ${0} has no value")]
    UnboundVariable(String),

    /// Invalid regular expression
    #[error("invalid regular expression '{pattern}': {reason}")]
    Regex {
        /// Pattern as written
        pattern: String,
        /// Reason reported by the regex engine
        reason: String,
    },

    /// Integer division by zero
    #[error("integer division by zero")]
    DivisionByZero,

    /// A value outside the lexical or value space of a cast's target type
    #[error("cannot cast '{value}' to {target}")]
    Cast {
        /// The value as a string
        value: String,
        /// Target type name
        target: &'static str,
    },

    /// A function rejected its arguments
    #[error("{function}(): {message}")]
    Function {
        /// Function name
        function: String,
        /// Failure description
        message: String,
    },
}

/// Named values visible to an expression
#[derive(Debug, Clone, Default)]
pub struct Variables<'a, 'i> {
    bindings: Vec<(String, Option<Value<'a, 'i>>)>,
}

impl<'a, 'i> Variables<'a, 'i> {
    /// Create an empty scope
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind a variable; it hides earlier bindings of the same name
    pub fn push(&mut self, name: impl Into<String>, value: Value<'a, 'i>) {
        self.bindings.push((name.into(), Some(value)));
    }

    /// Declare a variable whose value could not be computed
    ///
    /// It hides earlier bindings of the same name; references to it fail
    /// with [`EvaluationError::UnboundVariable`].
    pub fn push_failed(&mut self, name: impl Into<String>) {
        self.bindings.push((name.into(), None));
    }

    /// The innermost binding of `name`
    pub fn get(&self, name: &str) -> Option<&Value<'a, 'i>> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_ref())
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Drop bindings pushed after the scope had `len` entries
    pub fn truncate(&mut self, len: usize) {
        self.bindings.truncate(len);
    }
}

/// Context item, position and size
#[derive(Debug, Clone)]
pub struct Focus<'a, 'i> {
    /// Context item
    pub item: Item<'a, 'i>,
    /// Context position, from 1
    pub position: usize,
    /// Context size
    pub size: usize,
}

impl<'a, 'i> Focus<'a, 'i> {
    /// Focus on a single node
    pub fn node_focus(node: XNode<'a, 'i>) -> Self {
        Focus {
            item: Item::Node(node),
            position: 1,
            size: 1,
        }
    }

    /// The context item as a node
    pub fn node(&self) -> Result<XNode<'a, 'i>, EvaluationError> {
        match &self.item {
            Item::Node(node) => Ok(*node),
            Item::Atomic(atomic) => Err(EvaluationError::Type(format!(
                "the context item is a {} value, not a node",
                atomic.type_name()
            ))),
        }
    }
}

/// Tree-walking evaluator
pub(crate) struct Evaluator<'e, 'v, 'a, 'i> {
    variables: &'v Variables<'a, 'i>,
    locals: Vec<(&'e str, Value<'a, 'i>)>,
    dialect: Dialect,
    /// Context item of the whole expression, returned by `current()`
    current: Item<'a, 'i>,
}

impl<'e, 'v, 'a, 'i> Evaluator<'e, 'v, 'a, 'i> {
    pub(crate) fn new(variables: &'v Variables<'a, 'i>, dialect: Dialect, current: Item<'a, 'i>) -> Self {
        Self {
            variables,
            locals: Vec::new(),
            dialect,
            current,
        }
    }

    pub(crate) fn evaluate(
        &mut self,
        expr: &'e Expr,
        focus: &Focus<'a, 'i>,
    ) -> Result<Value<'a, 'i>, EvaluationError> {
        match expr {
            Expr::Literal(s) => Ok(Value::String(s.clone())),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Variable(name) => self.variable(name),
            Expr::ContextItem => Ok(Value::from_items(vec![focus.item.clone()])),
            Expr::Path { start, steps } => self.path(start, steps, focus),
            Expr::Filter { primary, predicates } => {
                let items = self.evaluate(primary, focus)?.into_items();
                let items = self.filter_items(items, predicates)?;
                Ok(Value::from_items(items))
            }
            Expr::Binary { op, left, right } => self.binary(*op, left, right, focus),
            Expr::Negate(operand) => {
                let value = self.evaluate(operand, focus)?;
                match self.numeric_operand(&value)? {
                    Some(n) => Ok(Value::Number(-n)),
                    None => Ok(Value::empty()),
                }
            }
            Expr::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.evaluate(arg, focus)?);
                }
                match function {
                    Function::Builtin(builtin) => call_builtin(*builtin, values, focus, &self.current),
                    Function::Custom(custom) => call_custom(custom, values),
                }
            }
            Expr::Sequence(parts) => {
                let mut items = Vec::new();
                for part in parts {
                    items.extend(self.evaluate(part, focus)?.into_items());
                }
                Ok(Value::from_items(items))
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if self.evaluate(condition, focus)?.to_boolean() {
                    self.evaluate(then, focus)
                } else {
                    self.evaluate(otherwise, focus)
                }
            }
            Expr::For { bindings, body } => {
                let mut out = Vec::new();
                self.for_each(bindings, body, focus, &mut out)?;
                Ok(Value::from_items(out))
            }
            Expr::Quantified {
                every,
                bindings,
                condition,
            } => self
                .quantified(*every, bindings, condition, focus)
                .map(Value::Boolean),
            Expr::Map { input, mapping } => {
                let items = self.evaluate(input, focus)?.into_items();
                let size = items.len();
                let mut out = Vec::new();
                for (position, item) in items.into_iter().enumerate() {
                    let inner = Focus {
                        item,
                        position: position + 1,
                        size,
                    };
                    out.extend(self.evaluate(mapping, &inner)?.into_items());
                }
                Ok(Value::from_items(out))
            }
            Expr::Cast {
                operand,
                target,
                optional,
            } => {
                let value = self.evaluate(operand, focus)?;
                match single_atomic(&value, *optional)? {
                    Some(atomic) => cast(&atomic, *target).map(Value::from_atomic),
                    None => Ok(Value::empty()),
                }
            }
            Expr::Castable {
                operand,
                target,
                optional,
            } => {
                let atoms = self.evaluate(operand, focus)?.atomize();
                Ok(Value::Boolean(match atoms.as_slice() {
                    [] => *optional,
                    [atomic] => cast(atomic, *target).is_ok(),
                    _ => false,
                }))
            }
            Expr::InstanceOf {
                operand,
                sequence_type,
            } => {
                let items = self.evaluate(operand, focus)?.into_items();
                Ok(Value::Boolean(sequence_type.matches(&items)))
            }
            Expr::Treat {
                operand,
                sequence_type,
            } => {
                let value = self.evaluate(operand, focus)?;
                if sequence_type.matches(&value.clone().into_items()) {
                    Ok(value)
                } else {
                    Err(EvaluationError::Type(format!(
                        "the value does not match the required type {}",
                        sequence_type
                    )))
                }
            }
        }
    }

    fn variable(&self, name: &str) -> Result<Value<'a, 'i>, EvaluationError> {
        if let Some((_, value)) = self.locals.iter().rev().find(|(n, _)| *n == name) {
            return Ok(value.clone());
        }
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| EvaluationError::UnboundVariable(name.to_string()))
    }

    fn path(
        &mut self,
        start: &'e PathStart,
        steps: &'e [PathStep],
        focus: &Focus<'a, 'i>,
    ) -> Result<Value<'a, 'i>, EvaluationError> {
        let mut current = match start {
            PathStart::Root => vec![focus.node()?.root()],
            PathStart::Context => vec![focus.node()?],
            PathStart::Expr(expr) => match self.evaluate(expr, focus)? {
                Value::Nodes(nodes) => nodes,
                other => {
                    return Err(EvaluationError::Type(format!(
                        "a path cannot start from a {} value",
                        other.type_name()
                    )))
                }
            },
        };

        for (index, step) in steps.iter().enumerate() {
            match step {
                PathStep::Axis(step) => current = self.axis_step(step, &current)?,
                PathStep::Filter { expr, predicates } => {
                    let size = current.len();
                    let mut items = Vec::new();
                    for (position, node) in current.iter().enumerate() {
                        let inner = Focus {
                            item: Item::Node(*node),
                            position: position + 1,
                            size,
                        };
                        let value = self.evaluate(expr, &inner)?;
                        items.extend(self.filter_items(value.into_items(), predicates)?);
                    }

                    if items.iter().all(|item| matches!(item, Item::Node(_))) {
                        current = items
                            .into_iter()
                            .filter_map(|item| match item {
                                Item::Node(node) => Some(node),
                                Item::Atomic(_) => None,
                            })
                            .collect();
                        sort_document_order(&mut current);
                    } else if index + 1 == steps.len() {
                        return Ok(Value::from_items(items));
                    } else {
                        return Err(EvaluationError::Type(
                            "an intermediate path step produced atomic values".to_string(),
                        ));
                    }
                }
            }
        }

        Ok(Value::Nodes(current))
    }

    fn axis_step(
        &mut self,
        step: &'e Step,
        input: &[XNode<'a, 'i>],
    ) -> Result<Vec<XNode<'a, 'i>>, EvaluationError> {
        let mut out = Vec::new();
        for node in input {
            let candidates: Vec<XNode<'a, 'i>> = axis_nodes(step.axis, *node)
                .into_iter()
                .filter(|candidate| node_test_matches(&step.test, step.axis, candidate))
                .collect();
            out.extend(self.filter_nodes(candidates, &step.predicates)?);
        }
        sort_document_order(&mut out);
        Ok(out)
    }

    fn filter_nodes(
        &mut self,
        mut nodes: Vec<XNode<'a, 'i>>,
        predicates: &'e [Expr],
    ) -> Result<Vec<XNode<'a, 'i>>, EvaluationError> {
        for predicate in predicates {
            let size = nodes.len();
            let mut kept = Vec::with_capacity(size);
            for (position, node) in nodes.into_iter().enumerate() {
                let focus = Focus {
                    item: Item::Node(node),
                    position: position + 1,
                    size,
                };
                if self.predicate_holds(predicate, &focus)? {
                    kept.push(node);
                }
            }
            nodes = kept;
        }
        Ok(nodes)
    }

    fn filter_items(
        &mut self,
        mut items: Vec<Item<'a, 'i>>,
        predicates: &'e [Expr],
    ) -> Result<Vec<Item<'a, 'i>>, EvaluationError> {
        for predicate in predicates {
            let size = items.len();
            let mut kept = Vec::with_capacity(size);
            for (position, item) in items.into_iter().enumerate() {
                let focus = Focus {
                    item,
                    position: position + 1,
                    size,
                };
                if self.predicate_holds(predicate, &focus)? {
                    kept.push(focus.item);
                }
            }
            items = kept;
        }
        Ok(items)
    }

    fn predicate_holds(
        &mut self,
        predicate: &'e Expr,
        focus: &Focus<'a, 'i>,
    ) -> Result<bool, EvaluationError> {
        Ok(match self.evaluate(predicate, focus)? {
            Value::Number(n) => n == focus.position as f64,
            other => other.to_boolean(),
        })
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: &'e Expr,
        right: &'e Expr,
        focus: &Focus<'a, 'i>,
    ) -> Result<Value<'a, 'i>, EvaluationError> {
        match op {
            BinaryOp::Or => {
                if self.evaluate(left, focus)?.to_boolean() {
                    return Ok(Value::Boolean(true));
                }
                return Ok(Value::Boolean(self.evaluate(right, focus)?.to_boolean()));
            }
            BinaryOp::And => {
                if !self.evaluate(left, focus)?.to_boolean() {
                    return Ok(Value::Boolean(false));
                }
                return Ok(Value::Boolean(self.evaluate(right, focus)?.to_boolean()));
            }
            _ => {}
        }

        let left = self.evaluate(left, focus)?;
        let right = self.evaluate(right, focus)?;

        match op {
            BinaryOp::General(cmp) => Ok(Value::Boolean(general_compare(
                cmp,
                &left,
                &right,
                self.dialect,
            ))),
            BinaryOp::Value(cmp) => value_compare(cmp, &left, &right),
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::IDiv
            | BinaryOp::Mod => {
                let (a, b) = match (self.numeric_operand(&left)?, self.numeric_operand(&right)?) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Ok(Value::empty()),
                };
                arithmetic(op, a, b).map(Value::Number)
            }
            BinaryOp::Union | BinaryOp::Intersect | BinaryOp::Except => {
                set_operation(op, left, right).map(Value::Nodes)
            }
            BinaryOp::Range => {
                let bounds = (self.numeric_operand(&left)?, self.numeric_operand(&right)?);
                let (Some(from), Some(to)) = bounds else {
                    return Ok(Value::empty());
                };
                if from.fract() != 0.0 || to.fract() != 0.0 {
                    return Err(EvaluationError::Type(
                        "range bounds must be integers".to_string(),
                    ));
                }
                let (from, to) = (from as i64, to as i64);
                Ok(Value::from_items(
                    (from..=to)
                        .map(|n| Item::Atomic(Atomic::Number(n as f64)))
                        .collect(),
                ))
            }
            BinaryOp::Concat => Ok(Value::String(format!(
                "{}{}",
                left.to_xpath_string(),
                right.to_xpath_string()
            ))),
            BinaryOp::Is | BinaryOp::Precedes | BinaryOp::Follows => node_compare(op, left, right),
            BinaryOp::Or | BinaryOp::And => Ok(Value::Boolean(false)),
        }
    }

    /// Numeric operand of arithmetic; `None` for the empty sequence
    ///
    /// XPath 1.0 converts anything with `number()`. Later dialects atomize,
    /// cast untyped values and reject strings, booleans and sequences of
    /// more than one item.
    fn numeric_operand(&self, value: &Value<'a, 'i>) -> Result<Option<f64>, EvaluationError> {
        if self.dialect == Dialect::XPath1 {
            return Ok(Some(value.to_number()));
        }
        match value.atomize().as_slice() {
            [] => Ok(None),
            [Atomic::Number(n)] => Ok(Some(*n)),
            [Atomic::Untyped(s)] => Ok(Some(parse_number(s))),
            [other] => Err(EvaluationError::Type(format!(
                "arithmetic operand is {}",
                other.type_name()
            ))),
            _ => Err(EvaluationError::Type(
                "arithmetic operand is a sequence of more than one item".to_string(),
            )),
        }
    }

    fn for_each(
        &mut self,
        bindings: &'e [(String, Expr)],
        body: &'e Expr,
        focus: &Focus<'a, 'i>,
        out: &mut Vec<Item<'a, 'i>>,
    ) -> Result<(), EvaluationError> {
        let Some(((name, domain), rest)) = bindings.split_first() else {
            out.extend(self.evaluate(body, focus)?.into_items());
            return Ok(());
        };
        for item in self.evaluate(domain, focus)?.into_items() {
            self.locals.push((name.as_str(), Value::from_items(vec![item])));
            let result = self.for_each(rest, body, focus, out);
            self.locals.pop();
            result?;
        }
        Ok(())
    }

    fn quantified(
        &mut self,
        every: bool,
        bindings: &'e [(String, Expr)],
        condition: &'e Expr,
        focus: &Focus<'a, 'i>,
    ) -> Result<bool, EvaluationError> {
        let Some(((name, domain), rest)) = bindings.split_first() else {
            return Ok(self.evaluate(condition, focus)?.to_boolean());
        };
        for item in self.evaluate(domain, focus)?.into_items() {
            self.locals.push((name.as_str(), Value::from_items(vec![item])));
            let result = self.quantified(every, rest, condition, focus);
            self.locals.pop();
            if result? != every {
                return Ok(!every);
            }
        }
        Ok(every)
    }
}

/// Nodes on `axis` from `node`, in axis order
fn axis_nodes<'a, 'i>(axis: XPathAxis, node: XNode<'a, 'i>) -> Vec<XNode<'a, 'i>> {
    let tree = node.as_tree();
    match axis {
        XPathAxis::Child => tree
            .map(|n| n.children().map(XNode::Tree).collect())
            .unwrap_or_default(),
        XPathAxis::Descendant => tree
            .map(|n| n.descendants().skip(1).map(XNode::Tree).collect())
            .unwrap_or_default(),
        XPathAxis::DescendantOrSelf => match tree {
            Some(n) => n.descendants().map(XNode::Tree).collect(),
            None => vec![node],
        },
        XPathAxis::Self_ => vec![node],
        XPathAxis::Parent => node.parent().into_iter().collect(),
        XPathAxis::Ancestor | XPathAxis::AncestorOrSelf => {
            let mut out = Vec::new();
            if axis == XPathAxis::AncestorOrSelf {
                out.push(node);
            }
            let mut current = node.parent();
            while let Some(parent) = current {
                out.push(parent);
                current = parent.parent();
            }
            out
        }
        XPathAxis::FollowingSibling => tree
            .map(|n| n.next_siblings().skip(1).map(XNode::Tree).collect())
            .unwrap_or_default(),
        XPathAxis::PrecedingSibling => tree
            .map(|n| n.prev_siblings().skip(1).map(XNode::Tree).collect())
            .unwrap_or_default(),
        XPathAxis::Following => {
            let (start, mut out) = match node {
                XNode::Tree(n) => (n, Vec::new()),
                XNode::Attribute { owner, .. } => (
                    owner,
                    owner.descendants().skip(1).map(XNode::Tree).collect(),
                ),
            };
            for ancestor in start.ancestors() {
                for sibling in ancestor.next_siblings().skip(1) {
                    out.extend(sibling.descendants().map(XNode::Tree));
                }
            }
            out
        }
        XPathAxis::Preceding => {
            let start = match node {
                XNode::Tree(n) => n,
                XNode::Attribute { owner, .. } => owner,
            };
            let ancestors: HashSet<_> = start.ancestors().map(|n| n.id()).collect();
            let mut out: Vec<XNode<'a, 'i>> = start
                .document()
                .root()
                .descendants()
                .take_while(|n| *n != start)
                .filter(|n| !ancestors.contains(&n.id()))
                .map(XNode::Tree)
                .collect();
            out.reverse();
            out
        }
        XPathAxis::Attribute => node.attributes(),
        XPathAxis::Namespace => Vec::new(),
    }
}

/// Whether `node` passes `test` on `axis`; kind tests ignore the axis
pub(crate) fn node_test_matches(test: &NodeTest, axis: XPathAxis, node: &XNode<'_, '_>) -> bool {
    let principal = if axis == XPathAxis::Attribute {
        NodeKind::Attribute
    } else {
        NodeKind::Element
    };
    let kind = node.kind();
    match test {
        NodeTest::Node => true,
        NodeTest::Text => kind == NodeKind::Text,
        NodeTest::Comment => kind == NodeKind::Comment,
        NodeTest::ProcessingInstruction(target) => {
            kind == NodeKind::ProcessingInstruction
                && target.as_deref().map_or(true, |t| node.local_name() == t)
        }
        NodeTest::Wildcard => kind == principal,
        NodeTest::NamespaceWildcard(uri) => kind == principal && node.namespace_uri() == uri,
        NodeTest::LocalWildcard(local) => kind == principal && node.local_name() == local,
        NodeTest::Name { namespace, local } => {
            kind == principal
                && node.expanded_name()
                    == Some((namespace.as_deref(), local.as_str()))
        }
        NodeTest::Element(name) => kind == NodeKind::Element && name_matches(name, node),
        NodeTest::Attribute(name) => kind == NodeKind::Attribute && name_matches(name, node),
        NodeTest::Document => kind == NodeKind::Root,
    }
}

fn name_matches(name: &Option<(Option<String>, String)>, node: &XNode<'_, '_>) -> bool {
    match name {
        Some((namespace, local)) => {
            node.expanded_name() == Some((namespace.as_deref(), local.as_str()))
        }
        None => true,
    }
}

fn compare_numbers(op: CompareOp, a: f64, b: f64) -> bool {
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Lt => a < b,
        CompareOp::Le => a <= b,
        CompareOp::Gt => a > b,
        CompareOp::Ge => a >= b,
    }
}

fn compare_strings(op: CompareOp, a: &str, b: &str) -> bool {
    compare_ordering(op, a.cmp(b))
}

fn compare_ordering(op: CompareOp, ordering: Ordering) -> bool {
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// `=`, `<` and friends: true if any pair of atomized items compares true
fn general_compare(op: CompareOp, left: &Value<'_, '_>, right: &Value<'_, '_>, dialect: Dialect) -> bool {
    if matches!(left, Value::Boolean(_)) || matches!(right, Value::Boolean(_)) {
        let (a, b) = (left.to_boolean(), right.to_boolean());
        return compare_numbers(op, f64::from(u8::from(a)), f64::from(u8::from(b)));
    }

    let right_atoms = right.atomize();
    left.atomize().iter().any(|a| {
        right_atoms
            .iter()
            .any(|b| compare_atomics(op, a, b, dialect))
    })
}

fn compare_atomics(op: CompareOp, a: &Atomic, b: &Atomic, dialect: Dialect) -> bool {
    if matches!(a, Atomic::Typed(..)) || matches!(b, Atomic::Typed(..)) {
        return compare_typed(a, b).map_or(false, |ordering| compare_ordering(op, ordering));
    }
    match (a, b) {
        (Atomic::Number(_), _) | (_, Atomic::Number(_)) | (Atomic::Boolean(_), _) | (_, Atomic::Boolean(_)) => {
            compare_numbers(op, a.to_number(), b.to_number())
        }
        _ => match op {
            CompareOp::Eq | CompareOp::Ne => {
                compare_strings(op, &a.to_xpath_string(), &b.to_xpath_string())
            }
            _ if dialect == Dialect::XPath1 => compare_numbers(op, a.to_number(), b.to_number()),
            _ => compare_strings(op, &a.to_xpath_string(), &b.to_xpath_string()),
        },
    }
}

/// `eq`, `lt` and friends on single items
fn value_compare<'a, 'i>(
    op: CompareOp,
    left: &Value<'a, 'i>,
    right: &Value<'a, 'i>,
) -> Result<Value<'a, 'i>, EvaluationError> {
    let (left, right) = (left.atomize(), right.atomize());
    let (a, b) = match (left.as_slice(), right.as_slice()) {
        ([], _) | (_, []) => return Ok(Value::empty()),
        ([a], [b]) => (a, b),
        _ => {
            return Err(EvaluationError::Type(
                "value comparison operand is a sequence of more than one item".to_string(),
            ))
        }
    };

    let result = match (a, b) {
        (Atomic::Number(x), Atomic::Number(y)) => compare_numbers(op, *x, *y),
        (Atomic::Boolean(x), Atomic::Boolean(y)) => {
            compare_numbers(op, f64::from(u8::from(*x)), f64::from(u8::from(*y)))
        }
        (
            Atomic::String(x) | Atomic::Untyped(x),
            Atomic::String(y) | Atomic::Untyped(y),
        ) => compare_strings(op, x, y),
        _ => match compare_typed(a, b) {
            Some(ordering) => compare_ordering(op, ordering),
            None => {
                return Err(EvaluationError::Type(format!(
                    "cannot compare {} with {}",
                    a.type_name(),
                    b.type_name()
                )))
            }
        },
    };
    Ok(Value::Boolean(result))
}

/// `is`, `<<` and `>>` on single nodes
fn node_compare<'a, 'i>(
    op: BinaryOp,
    left: Value<'a, 'i>,
    right: Value<'a, 'i>,
) -> Result<Value<'a, 'i>, EvaluationError> {
    fn single<'a, 'i>(value: Value<'a, 'i>) -> Result<Option<XNode<'a, 'i>>, EvaluationError> {
        match value.into_items().as_slice() {
            [] => Ok(None),
            [Item::Node(node)] => Ok(Some(*node)),
            _ => Err(EvaluationError::Type(
                "node comparison operand must be a single node".to_string(),
            )),
        }
    }
    let (Some(a), Some(b)) = (single(left)?, single(right)?) else {
        return Ok(Value::empty());
    };
    Ok(Value::Boolean(match op {
        BinaryOp::Is => a == b,
        BinaryOp::Precedes => a.order_key() < b.order_key(),
        _ => a.order_key() > b.order_key(),
    }))
}

/// Atomized operand of a cast: one value, or nothing when `optional`
fn single_atomic(value: &Value<'_, '_>, optional: bool) -> Result<Option<Atomic>, EvaluationError> {
    let mut atoms = value.atomize();
    match atoms.len() {
        0 if optional => Ok(None),
        0 => Err(EvaluationError::Type(
            "cannot cast the empty sequence to a type without '?'".to_string(),
        )),
        1 => Ok(atoms.pop()),
        _ => Err(EvaluationError::Type(
            "cannot cast a sequence of more than one item".to_string(),
        )),
    }
}

fn arithmetic(op: BinaryOp, a: f64, b: f64) -> Result<f64, EvaluationError> {
    Ok(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::IDiv => {
            if b == 0.0 {
                return Err(EvaluationError::DivisionByZero);
            }
            let quotient = (a / b).trunc();
            if !quotient.is_finite() {
                return Err(EvaluationError::Type(
                    "integer division of a non-finite number".to_string(),
                ));
            }
            quotient
        }
        _ => f64::NAN,
    })
}

fn set_operation<'a, 'i>(
    op: BinaryOp,
    left: Value<'a, 'i>,
    right: Value<'a, 'i>,
) -> Result<Vec<XNode<'a, 'i>>, EvaluationError> {
    let (Value::Nodes(mut left), Value::Nodes(right)) = (left, right) else {
        return Err(EvaluationError::Type(
            "set operators apply to node sequences only".to_string(),
        ));
    };
    match op {
        BinaryOp::Union => left.extend(right),
        BinaryOp::Intersect => {
            let keep: HashSet<_> = right.into_iter().collect();
            left.retain(|n| keep.contains(n));
        }
        _ => {
            let drop: HashSet<_> = right.into_iter().collect();
            left.retain(|n| !drop.contains(n));
        }
    }
    sort_document_order(&mut left);
    Ok(left)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespaces::NamespaceTable;
    use crate::xpath::{
        CompileContext, EvaluationContext, ExpressionEngine, ExpressionKind, FunctionRegistry,
        XPathEngine,
    };

    const CARGO: &str = r#"<c:cargo xmlns:c="urn:cargo" xml:lang="en-GB">
  <c:item id="a" weight="10">crate</c:item>
  <c:item id="b" weight="25">barrel<!-- leaking --></c:item>
  <c:note/>
  <c:item id="c" weight="7">sack</c:item>
</c:cargo>"#;

    fn eval_in<'a, 'i>(
        doc: &'a roxmltree::Document<'i>,
        text: &str,
        dialect: Dialect,
        variables: &Variables<'a, 'i>,
    ) -> Result<Value<'a, 'i>, EvaluationError> {
        let mut namespaces = NamespaceTable::new();
        namespaces.bind("c", "urn:cargo");
        let functions = FunctionRegistry::new();
        let names: Vec<String> = vec!["limit".to_string()];
        let context = CompileContext::new(&namespaces, &functions, dialect)
            .with_variables(&names)
            .with_kind(ExpressionKind::Value);
        let compiled = XPathEngine::new().compile(text, &context).unwrap();
        let node = XNode::root_of(doc);
        compiled.evaluate(&EvaluationContext::new(node, variables))
    }

    fn eval<'a, 'i>(doc: &'a roxmltree::Document<'i>, text: &str, dialect: Dialect) -> Value<'a, 'i> {
        let mut variables = Variables::new();
        variables.push("limit", Value::Number(20.0));
        eval_in(doc, text, dialect, &variables).unwrap()
    }

    fn string(doc: &roxmltree::Document<'_>, text: &str) -> String {
        eval(doc, text, Dialect::XPath2).to_xpath_string()
    }

    #[test]
    fn test_paths_and_predicates() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(eval(&doc, "count(//c:item)", Dialect::XPath1), Value::Number(3.0));
        assert_eq!(string(&doc, "//c:item[2]/@id"), "b");
        assert_eq!(string(&doc, "//c:item[last()]/@id"), "c");
        assert_eq!(string(&doc, "(//c:item)[position() = 2]"), "barrel");
        assert_eq!(
            eval(&doc, "count(//c:item[@weight > $limit])", Dialect::XPath1),
            Value::Number(1.0)
        );
        assert_eq!(string(&doc, "/c:cargo/*[3]/@id"), "");
        assert_eq!(string(&doc, "name(/c:cargo/*[3])"), "c:note");
    }

    #[test]
    fn test_reverse_axis_positions() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(string(&doc, "//c:item[@id='c']/preceding-sibling::c:item[1]/@id"), "b");
        assert_eq!(string(&doc, "//c:item[@id='c']/preceding::c:item[2]/@id"), "a");
        assert_eq!(string(&doc, "//c:item[@id='a']/following::c:item[1]/@id"), "b");
        assert_eq!(
            eval(&doc, "count(//comment()/ancestor::*)", Dialect::XPath1),
            Value::Number(2.0)
        );
        assert_eq!(string(&doc, "local-name(//@weight[. = '7']/..)"), "item");
    }

    #[test]
    fn test_xpath1_comparisons() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();
        let truth = |text: &str| eval(&doc, text, Dialect::XPath1).to_boolean();

        assert!(truth("//c:item/@weight = 25"));
        assert!(truth("//c:item/@weight = '7'"));
        assert!(truth("//c:item/@weight < '8'"));
        assert!(!truth("//c:missing = ''"));
        assert!(truth("//c:missing != 'x' or true()"));
        assert!(truth("//c:item = true()"));
        assert!(truth("'10' < '9'") == false);
    }

    #[test]
    fn test_xpath2_comparisons_and_errors() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(eval(&doc, "'10' < '9'", Dialect::XPath2), Value::Boolean(true));
        assert_eq!(eval(&doc, "3 eq 3", Dialect::XPath2), Value::Boolean(true));
        assert_eq!(eval(&doc, "() eq 3", Dialect::XPath2), Value::empty());

        let variables = Variables::new();
        assert!(matches!(
            eval_in(&doc, "//c:item/@id eq 'a'", Dialect::XPath2, &variables),
            Err(EvaluationError::Type(_))
        ));
        assert!(matches!(
            eval_in(&doc, "'a' eq 1", Dialect::XPath2, &variables),
            Err(EvaluationError::Type(_))
        ));
        assert!(matches!(
            eval_in(&doc, "'a' + 1", Dialect::XPath2, &variables),
            Err(EvaluationError::Type(_))
        ));
        assert_eq!(
            eval_in(&doc, "5 idiv 0", Dialect::XPath2, &variables),
            Err(EvaluationError::DivisionByZero)
        );
        assert!(matches!(
            eval_in(&doc, "$limit", Dialect::XPath2, &variables),
            Err(EvaluationError::UnboundVariable(name)) if name == "limit"
        ));
    }

    #[test]
    fn test_failed_binding_hides_outer_value() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();
        let mut variables = Variables::new();
        variables.push("limit", Value::Number(5.0));
        variables.push_failed("limit");

        assert!(matches!(
            eval_in(&doc, "$limit + 1", Dialect::XPath2, &variables),
            Err(EvaluationError::UnboundVariable(name)) if name == "limit"
        ));

        variables.truncate(1);
        assert_eq!(
            eval_in(&doc, "$limit", Dialect::XPath2, &variables),
            Ok(Value::Number(5.0))
        );
    }

    #[test]
    fn test_casts_and_types() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();
        let truth = |text: &str| eval(&doc, text, Dialect::XPath2).to_boolean();

        assert_eq!(eval(&doc, "'5' cast as xs:integer", Dialect::XPath2), Value::Number(5.0));
        assert_eq!(string(&doc, "xs:decimal(' 2.50 ')"), "2.5");
        assert!(truth("xs:date('2024-01-01') lt xs:date('2024-02-01')"));
        assert!(truth("xs:date('2024-01-01+01:00') lt xs:date('2024-01-01Z')"));
        assert!(truth("xs:dateTime('2024-01-01T12:00:00Z') = xs:dateTime('2024-01-01T13:00:00+01:00')"));

        assert!(truth("every $w in //c:item/@weight satisfies $w castable as xs:integer"));
        assert!(!truth("'ten' castable as xs:integer"));
        assert!(truth("() castable as xs:integer?"));
        assert!(!truth("() castable as xs:integer"));

        assert!(truth("5 instance of xs:integer"));
        assert!(!truth("5.5 instance of xs:integer"));
        assert!(truth("'5' instance of xs:string"));
        assert!(truth("xs:date('2024-01-01') instance of xs:date"));
        assert!(truth("//c:item instance of element(c:item)+"));
        assert!(!truth("//c:item instance of element()?"));
        assert!(truth("() instance of empty-sequence()"));
        assert!(truth("current-date() instance of xs:date"));

        let variables = Variables::new();
        assert_eq!(
            eval_in(&doc, "'ten' cast as xs:integer", Dialect::XPath2, &variables),
            Err(EvaluationError::Cast {
                value: "ten".to_string(),
                target: "xs:integer",
            })
        );
        assert!(matches!(
            eval_in(&doc, "xs:date('2024-02-30')", Dialect::XPath2, &variables),
            Err(EvaluationError::Cast { .. })
        ));
        assert_eq!(string(&doc, "string(//c:item[1] treat as element(c:item))"), "crate");
        assert!(matches!(
            eval_in(&doc, "//c:item treat as element()", Dialect::XPath2, &variables),
            Err(EvaluationError::Type(_))
        ));
    }

    #[test]
    fn test_node_comparisons_and_map() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();
        let truth = |text: &str| eval(&doc, text, Dialect::XPath2).to_boolean();

        assert!(truth("//c:item[1] is //c:item[@id = 'a']"));
        assert!(!truth("//c:item[1] is //c:item[2]"));
        assert!(truth("//c:item[1] << //c:item[2]"));
        assert!(truth("//c:item[3] >> //c:note"));
        assert_eq!(eval(&doc, "() is //c:item[1]", Dialect::XPath2), Value::empty());

        assert_eq!(
            eval(&doc, "string-join(//c:item ! string(@id), ',')", Dialect::XPath3).to_xpath_string(),
            "a,b,c"
        );
        assert_eq!(
            eval(&doc, "sum(//c:item ! (@weight * 2))", Dialect::XPath3),
            Value::Number(84.0)
        );
    }

    #[test]
    fn test_current_in_predicates() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(
            eval(&doc, "string(//c:item[@id = current()/c:cargo/c:item[2]/@id])", Dialect::XPath1)
                .to_xpath_string(),
            "barrel"
        );
        assert_eq!(
            eval(&doc, "count(//c:item[. is current()])", Dialect::XPath2),
            Value::Number(0.0)
        );
    }

    #[test]
    fn test_sequence_functions() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(eval(&doc, "sum(index-of((10, 20, 10), 10))", Dialect::XPath2), Value::Number(4.0));
        assert_eq!(eval(&doc, "index-of(//c:item/@weight, '25')", Dialect::XPath2), Value::Number(2.0));
        assert_eq!(eval(&doc, "count(index-of(//c:item/@weight, 7))", Dialect::XPath2), Value::Number(1.0));
        assert_eq!(string(&doc, "string-join(subsequence(//c:item/@id, 2), '')"), "bc");
        assert_eq!(string(&doc, "string-join(subsequence(//c:item/@id, 1, 2), '')"), "ab");
        assert_eq!(string(&doc, "string-join(insert-before(('a', 'c'), 2, 'b'), '')"), "abc");
        assert_eq!(string(&doc, "string-join(remove(('a', 'b', 'c'), 2), '')"), "ac");
        assert_eq!(string(&doc, "codepoints-to-string(reverse(string-to-codepoints('abc')))"), "cba");
        assert_eq!(eval(&doc, "count(zero-or-one(//c:note))", Dialect::XPath2), Value::Number(1.0));
        assert_eq!(
            eval(&doc, "string(head(//c:item/@id))", Dialect::XPath3),
            Value::String("a".to_string())
        );
        assert_eq!(
            eval(&doc, "count(tail(//c:item))", Dialect::XPath3),
            Value::Number(2.0)
        );
        assert_eq!(
            eval(&doc, "has-children(//c:note)", Dialect::XPath3),
            Value::Boolean(false)
        );

        let variables = Variables::new();
        assert!(matches!(
            eval_in(&doc, "exactly-one(//c:item)", Dialect::XPath2, &variables),
            Err(EvaluationError::Function { .. })
        ));
        assert!(matches!(
            eval_in(&doc, "one-or-more(())", Dialect::XPath2, &variables),
            Err(EvaluationError::Function { .. })
        ));
    }

    #[test]
    fn test_string_and_number_formatting() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(eval(&doc, "compare('abc', 'abd')", Dialect::XPath2), Value::Number(-1.0));
        assert_eq!(eval(&doc, "compare('b', 'a')", Dialect::XPath2), Value::Number(1.0));
        assert_eq!(eval(&doc, "empty(compare((), 'a'))", Dialect::XPath2), Value::Boolean(true));
        assert_eq!(
            eval(&doc, "format-number(1234.5, '#,##0.00')", Dialect::XPath1),
            Value::String("1,234.50".to_string())
        );
        assert_eq!(string(&doc, "format-number(sum(//c:item/@weight) div 100, '0%')"), "42%");
        assert_eq!(eval(&doc, "round-half-to-even(2.5)", Dialect::XPath2), Value::Number(2.0));
        assert_eq!(string(&doc, "encode-for-uri('crate 1')"), "crate%201");

        let variables = Variables::new();
        assert!(matches!(
            eval_in(&doc, "format-number(1, 'none')", Dialect::XPath1, &variables),
            Err(EvaluationError::Function { .. })
        ));
    }

    #[test]
    fn test_date_components() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(eval(&doc, "year-from-date(xs:date('2024-03-05'))", Dialect::XPath2), Value::Number(2024.0));
        assert_eq!(eval(&doc, "month-from-dateTime('2024-03-05T10:20:30')", Dialect::XPath2), Value::Number(3.0));
        assert_eq!(eval(&doc, "hours-from-time(xs:time('10:20:30'))", Dialect::XPath2), Value::Number(10.0));
        assert_eq!(eval(&doc, "day-from-date(())", Dialect::XPath2), Value::empty());

        let variables = Variables::new();
        assert!(matches!(
            eval_in(&doc, "year-from-date('March')", Dialect::XPath2, &variables),
            Err(EvaluationError::Cast { .. })
        ));
    }

    #[test]
    fn test_arithmetic() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(eval(&doc, "sum(//@weight) div 2", Dialect::XPath1), Value::Number(21.0));
        assert_eq!(eval(&doc, "7 mod 3", Dialect::XPath1), Value::Number(1.0));
        assert_eq!(eval(&doc, "-(1 + 2)", Dialect::XPath1), Value::Number(-3.0));
        assert!(eval(&doc, "'x' + 1", Dialect::XPath1).to_number().is_nan());
        assert_eq!(eval(&doc, "1 div 0", Dialect::XPath1), Value::Number(f64::INFINITY));
        assert_eq!(eval(&doc, "() + 1", Dialect::XPath2), Value::empty());
        assert_eq!(eval(&doc, "//c:item[1]/@weight * 2", Dialect::XPath2), Value::Number(20.0));
    }

    #[test]
    fn test_sequences_and_flow() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(string(&doc, "string-join(for $i in 1 to 3 return $i * 2, ',')"), "2,4,6");
        assert_eq!(
            eval(&doc, "every $w in //@weight satisfies $w > 5", Dialect::XPath2),
            Value::Boolean(true)
        );
        assert_eq!(
            eval(&doc, "some $w in //@weight satisfies $w > $limit", Dialect::XPath2),
            Value::Boolean(true)
        );
        assert_eq!(string(&doc, "if (count(//c:item) > 2) then 'many' else 'few'"), "many");
        assert_eq!(eval(&doc, "count((1, 2, 3)[. > 1])", Dialect::XPath2), Value::Number(2.0));
        assert_eq!(
            eval(&doc, "'a' || 1 || 'b'", Dialect::XPath3),
            Value::String("a1b".to_string())
        );
        assert_eq!(
            string(&doc, "string-join(//c:item/@id/upper-case(.), '')"),
            "ABC"
        );
    }

    #[test]
    fn test_set_operations() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(
            eval(&doc, "count(//c:item | //c:item[1] | //c:note)", Dialect::XPath1),
            Value::Number(4.0)
        );
        assert_eq!(
            eval(&doc, "count(//c:item intersect //*[@weight > 8])", Dialect::XPath2),
            Value::Number(2.0)
        );
        assert_eq!(
            string(&doc, "(//c:item except //c:item[@weight > 8])/@id"),
            "c"
        );

        let variables = Variables::new();
        assert!(matches!(
            eval_in(&doc, "(1, 2) union //c:item", Dialect::XPath2, &variables),
            Err(EvaluationError::Type(_))
        ));
    }

    #[test]
    fn test_string_functions() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();

        assert_eq!(string(&doc, "concat('a', 1, true())"), "a1true");
        assert_eq!(string(&doc, "substring-before('10kg', 'kg')"), "10");
        assert_eq!(string(&doc, "substring-after('10kg', '1')"), "0kg");
        assert_eq!(string(&doc, "normalize-space(//c:item[2])"), "barrel");
        assert_eq!(string(&doc, "replace('a1b22', '(\\d+)', '[$1]')"), "a[1]b[22]");
        assert_eq!(string(&doc, "string-join(tokenize('a, b,c', ',\\s*'), '|')"), "a|b|c");
        assert_eq!(eval(&doc, "matches('Crate', '^c', 'i')", Dialect::XPath2), Value::Boolean(true));
        assert_eq!(eval(&doc, "lang('en')", Dialect::XPath1), Value::Boolean(false));
        assert_eq!(
            eval(&doc, "boolean(/c:cargo/c:item[lang('en')])", Dialect::XPath1),
            Value::Boolean(true)
        );
        assert_eq!(
            eval(&doc, "count(distinct-values((1, 2, 1, '1')))", Dialect::XPath2),
            Value::Number(3.0)
        );
        assert_eq!(eval(&doc, "max(//@weight)", Dialect::XPath2), Value::Number(25.0));
        assert_eq!(eval(&doc, "avg((2, 4))", Dialect::XPath2), Value::Number(3.0));
        assert_eq!(
            eval(&doc, "path(//c:item[2]/@id)", Dialect::XPath3).to_xpath_string(),
            "/Q{urn:cargo}cargo[1]/Q{urn:cargo}item[2]/@id"
        );
    }

    #[test]
    fn test_regex_errors() {
        let doc = roxmltree::Document::parse(CARGO).unwrap();
        let variables = Variables::new();

        assert!(matches!(
            eval_in(&doc, "matches('a', '(')", Dialect::XPath2, &variables),
            Err(EvaluationError::Regex { .. })
        ));
        assert!(matches!(
            eval_in(&doc, "replace('abc', 'x*', '-')", Dialect::XPath2, &variables),
            Err(EvaluationError::Function { .. })
        ));
    }
}
