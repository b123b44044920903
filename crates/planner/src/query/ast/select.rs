//! Defines the Abstract Syntax Tree (AST) for a SELECT query.

use crate::query::ast::{
    common::{JoinKind, OrderDir, TableRef},
    expr::Expr,
};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Select {
    /// The list of columns or expressions to be returned.
    pub columns: Vec<Expr>,

    /// The primary table for the query.
    /// e.g., `FROM wiser_item AS main`
    pub from: Option<FromClause>,

    /// JOIN clauses, in the order they were added.
    pub joins: Vec<JoinClause>,

    /// The WHERE clause condition.
    pub where_clause: Option<Expr>,

    pub group_by: Vec<Expr>,

    pub order_by: Vec<OrderByExpr>,

    pub limit: Option<Expr>,

    pub offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FromClause {
    pub table: TableRef,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: TableFactor,
    pub alias: Option<String>,
    /// The join condition, e.g., `ON link.item_id = main.id`.
    pub on: Expr,
}

/// What a join reads from: a table or a derived table.
#[derive(Debug, Clone, PartialEq)]
pub enum TableFactor {
    Table(TableRef),
    Derived(Box<Select>),
}

impl From<TableRef> for TableFactor {
    fn from(table: TableRef) -> Self {
        TableFactor::Table(table)
    }
}

impl From<Select> for TableFactor {
    fn from(select: Select) -> Self {
        TableFactor::Derived(Box::new(select))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByExpr {
    pub expr: Expr,
    pub direction: Option<OrderDir>,
}

impl Select {
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }
}
