//! Clause fragments accumulated by the query builder.

use taudb_core::{SqlExpr, Value};

/// The recognized comparison operator vocabulary. Matching is case-folded;
/// emission keeps the caller's spelling.
pub const COMPARISON_OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "<=>", "like", "like binary", "not like", "ilike",
    "&", "|", "^", "<<", ">>", "&~", "is", "is not", "rlike", "not rlike", "regexp",
    "not regexp", "~", "~*", "!~", "!~*", "similar to", "not similar to", "not ilike",
];

pub fn is_comparison_operator(token: &str) -> bool {
    let folded = token.trim().to_lowercase();
    COMPARISON_OPERATORS.contains(&folded.as_str())
}

/// Right-hand side of a predicate: one value or a list (for IN).
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    One(Value),
    Many(Vec<Value>),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::One(v)
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::One(v.into())
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::One(v.into())
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::One(v.into())
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::One(v.into())
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::One(v.into())
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Operand::One(v.into())
    }
}

impl From<SqlExpr> for Operand {
    fn from(v: SqlExpr) -> Self {
        Operand::One(v.into())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(vs: Vec<T>) -> Self {
        Operand::Many(vs.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Operand {
    fn from(vs: &[T]) -> Self {
        Operand::Many(vs.iter().cloned().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(v: Option<T>) -> Self {
        Operand::One(v.map_or(Value::Null, Into::into))
    }
}

/// Boolean connective linking a WHERE node to the one before it. The
/// first node in any list is normalized to `Root`: it introduces the
/// clause rather than continuing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    Root,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum WherePart {
    Leaf {
        field: String,
        op: String,
        operand: Operand,
    },
    /// A parenthesized group of nodes (nested builder).
    Group(Vec<WhereNode>),
}

#[derive(Debug, Clone)]
pub struct WhereNode {
    pub connective: Connective,
    pub part: WherePart,
}

/// Collector a group closure fills in. Its node list is independent of the
/// parent's and is only ever rendered as a parenthesized fragment.
#[derive(Debug, Clone, Default)]
pub struct Group {
    pub(crate) nodes: Vec<WhereNode>,
}

impl Group {
    fn push(&mut self, connective: Connective, part: WherePart) -> &mut Self {
        let connective = if self.nodes.is_empty() {
            Connective::Root
        } else {
            connective
        };
        self.nodes.push(WhereNode { connective, part });
        self
    }

    pub fn where_(&mut self, field: &str, operand: impl Into<Operand>) -> &mut Self {
        let (op, operand) = infer_operator(operand.into());
        self.push(
            Connective::And,
            WherePart::Leaf {
                field: field.to_string(),
                op,
                operand,
            },
        )
    }

    pub fn where_op(&mut self, field: &str, op: &str, operand: impl Into<Operand>) -> &mut Self {
        self.push(
            Connective::And,
            WherePart::Leaf {
                field: field.to_string(),
                op: op.trim().to_string(),
                operand: operand.into(),
            },
        )
    }

    pub fn or_where(&mut self, field: &str, operand: impl Into<Operand>) -> &mut Self {
        let (op, operand) = infer_operator(operand.into());
        self.push(
            Connective::Or,
            WherePart::Leaf {
                field: field.to_string(),
                op,
                operand,
            },
        )
    }

    pub fn or_where_op(&mut self, field: &str, op: &str, operand: impl Into<Operand>) -> &mut Self {
        self.push(
            Connective::Or,
            WherePart::Leaf {
                field: field.to_string(),
                op: op.trim().to_string(),
                operand: operand.into(),
            },
        )
    }
}

/// The two-argument predicate form: infer the operator from the value.
/// `Null` compares with `IS`, a list with `IN`, anything else with `=`.
/// A bare string that spells a recognized operator is taken as an operator
/// with no value, matching the historical argument-shifting contract.
pub fn infer_operator(operand: Operand) -> (String, Operand) {
    match operand {
        Operand::One(Value::Text(s)) if is_comparison_operator(&s) => {
            (s, Operand::One(Value::Null))
        }
        Operand::One(Value::Null) => ("IS".to_string(), Operand::One(Value::Null)),
        Operand::Many(vs) => ("IN".to_string(), Operand::Many(vs)),
        other => ("=".to_string(), other),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

/// One ON condition; `or` selects the connective for conditions after the
/// first (the first always follows the `ON` keyword).
#[derive(Debug, Clone)]
pub struct JoinOn {
    pub left: String,
    pub op: String,
    pub right: String,
    pub or: bool,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub on: Vec<JoinOn>,
}

/// A selected column.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub alias: Option<String>,
    pub aggregate: Option<String>,
    pub raw: bool,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub desc: bool,
}
