//! Defines the AST for SQL expressions.

use crate::query::ast::select::Select;
use model::core::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column or table identifier, e.g., `main` or `main.id`.
    Identifier(Ident),

    /// A literal value; always rendered as a bind parameter.
    Value(Value),

    /// A binary operation, e.g., `column = ?` or `a AND b`.
    BinaryOp(Box<BinaryOp>),

    /// A function call, e.g., `COALESCE(a, b)`.
    FunctionCall(FunctionCall),

    /// An aliased expression, e.g. `main.id AS "main.id"`
    Alias { expr: Box<Expr>, alias: String },

    /// `CAST(expr AS type)`; the type name is trusted text.
    Cast { expr: Box<Expr>, data_type: String },

    /// `expr [NOT] IN (a, b, ...)`
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },

    /// `expr IS [NOT] NULL`
    IsNull { expr: Box<Expr>, negated: bool },

    /// A parenthesised scalar subquery, e.g. `(SELECT d.value FROM ... LIMIT 1)`.
    Subquery(Box<Select>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub qualifier: Option<String>, // e.g., the 'main' in 'main.id'
    pub name: String,              // e.g., the 'id' in 'main.id'
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryOp {
    pub left: Expr,
    pub op: BinaryOperator,
    pub right: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub wildcard: bool, // represents the '*' in 'COUNT(*)'
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Comparison
    Eq,    // =
    NotEq, // <>
    Lt,    // <
    LtEq,  // <=
    Gt,    // >
    GtEq,  // >=
    Like,
    NotLike,

    // Bitwise
    BitAnd, // &

    // Logical
    And,
    Or,
}

impl Expr {
    pub fn binary(left: Expr, op: BinaryOperator, right: Expr) -> Expr {
        Expr::BinaryOp(Box::new(BinaryOp { left, op, right }))
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::binary(left, BinaryOperator::Eq, right)
    }

    pub fn function(name: &str, args: Vec<Expr>) -> Expr {
        Expr::FunctionCall(FunctionCall {
            name: name.to_string(),
            args,
            wildcard: false,
        })
    }

    /// Folds the expressions with `AND`, left to right.
    /// Returns `None` for an empty list.
    pub fn and_all(exprs: Vec<Expr>) -> Option<Expr> {
        Self::fold(exprs, BinaryOperator::And)
    }

    /// Folds the expressions with `OR`, left to right.
    pub fn or_all(exprs: Vec<Expr>) -> Option<Expr> {
        Self::fold(exprs, BinaryOperator::Or)
    }

    fn fold(exprs: Vec<Expr>, op: BinaryOperator) -> Option<Expr> {
        exprs
            .into_iter()
            .reduce(|acc, next| Expr::binary(acc, op, next))
    }
}
