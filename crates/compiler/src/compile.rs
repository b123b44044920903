//! Turns a resolved selector into one parameterised `SELECT`.
//!
//! The connection tree is walked pre-order. Each hop joins
//! `wiser_itemlink` and `wiser_item`; each distinct detail field joins
//! `wiser_itemdetail` once. The result columns are labelled
//! `<item alias>.<output name>` and described by [`ColumnBinding`]s so the
//! response shaper can rebuild the tree from flat rows.
//!
//! Scopes of the main connection go to `WHERE`. Scopes of a hop go to the
//! `ON` of the hop's item join, reading detail fields through correlated
//! lookups, so a LEFT hop whose items fail its scopes is null-extended
//! instead of removing the parent row. Everything below a LEFT hop is LEFT
//! joined as well. Paging selects a page of main item ids in a derived
//! table first, so children never count towards the limit.

use crate::{
    alias::{AliasAllocator, ROOT_ALIAS},
    error::CompileError,
    validate::{DEFAULT_MAX_DEPTH, validate},
};
use model::{
    core::value::Value,
    selector::{
        Paging, Selector, SortDirection,
        connection::{Connection, LinkDirection},
        environment::Environment,
        field::{Field, ItemColumn},
        scope::{Logic, Operator, Scope, ScopeCondition},
    },
};
use planner::{
    ident, ident_as,
    query::{
        ast::{
            common::{JoinKind, OrderDir},
            expr::{BinaryOperator, Expr},
            select::{JoinClause, Select},
        },
        builder::select::SelectBuilder,
        dialect::Dialect,
        renderer::render_with,
    },
    table_ref, value,
};
use serde::Serialize;
use tracing::debug;

const ITEM_TABLE: &str = "wiser_item";
const DETAIL_TABLE: &str = "wiser_itemdetail";
const LINK_TABLE: &str = "wiser_itemlink";
const NUMERIC_TYPE: &str = "DECIMAL(65,10)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CompileOptions {
    /// Keeps parents visible when no child matches: every hop is a LEFT JOIN.
    pub for_filter_items: bool,

    /// Environments an item must be published to. Ignored for insecure
    /// selectors.
    pub environment: Option<Environment>,
}

/// Maps a result column to the node and key it is emitted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnBinding {
    pub column: String,
    pub node: usize,
    pub name: String,
}

/// One connection of the compiled tree, in pre-order. `nodes[0]` is the
/// main connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionNode {
    pub alias: String,
    pub output_name: String,
    pub parent: Option<usize>,
    pub id_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub columns: Vec<ColumnBinding>,
    pub nodes: Vec<ConnectionNode>,
    pub join_count: usize,
}

impl CompiledQuery {
    pub fn bindings_for(&self, node: usize) -> impl Iterator<Item = &ColumnBinding> {
        self.columns.iter().filter(move |b| b.node == node)
    }

    pub fn children_of(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.parent == Some(node))
            .map(|(i, _)| i)
    }
}

pub struct SelectorCompiler<'a> {
    dialect: &'a dyn Dialect,
    max_depth: usize,
}

impl<'a> SelectorCompiler<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn compile(
        &self,
        selector: &Selector,
        options: &CompileOptions,
    ) -> Result<CompiledQuery, CompileError> {
        validate(selector, self.max_depth)?;

        let environment = options.environment.filter(|_| !selector.insecure);
        let mut parts = QueryParts::new(selector.language_code.as_deref(), options, environment);

        parts
            .conditions
            .push(entity_condition(ROOT_ALIAS, &selector.main.entity));
        if let Some(environment) = environment {
            parts
                .conditions
                .push(environment_condition(ROOT_ALIAS, environment));
        }
        parts.visit(&selector.main, ROOT_ALIAS, None, false)?;

        let mut order = Vec::with_capacity(selector.sort.len());
        for sort in &selector.sort {
            let expr = parts.read_expr(ROOT_ALIAS, &sort.field);
            let direction = match sort.direction {
                SortDirection::Asc => OrderDir::Asc,
                SortDirection::Desc => OrderDir::Desc,
            };
            order.push((expr, direction));
        }

        let page_alias = parts.aliases.page();
        let QueryParts {
            columns,
            joins,
            conditions,
            bindings,
            nodes,
            ..
        } = parts;

        let mut builder = SelectBuilder::new()
            .select(columns)
            .from(table_ref!(ITEM_TABLE), Some(ROOT_ALIAS));
        if let Some((limit, offset)) = selector.paging.and_then(page_bounds) {
            let page = page_select(&joins, &conditions, &order, limit, offset);
            builder = builder.join(
                JoinKind::Inner,
                page,
                Some(page_alias.as_str()),
                Expr::eq(ident!(&page_alias, "id"), ident!(ROOT_ALIAS, "id")),
            );
        }
        builder = builder.joins(joins);
        for condition in conditions {
            builder = builder.and_where(condition);
        }
        for (expr, direction) in order {
            builder = builder.order_by(expr, Some(direction));
        }
        builder = builder.order_by(ident!(ROOT_ALIAS, "id"), Some(OrderDir::Asc));

        let select = builder.build();
        let join_count = select.join_count();
        let (sql, params) = render_with(&select, self.dialect);

        debug!(
            "Compiled selector for `{}` into {} with {} join(s): {}",
            selector.main.entity,
            self.dialect.name(),
            join_count,
            sql
        );
        debug!("Bound parameters: {:?}", params);

        Ok(CompiledQuery {
            sql,
            params,
            columns: bindings,
            nodes,
            join_count,
        })
    }
}

/// Where a compiled scope ends up.
#[derive(Debug, Clone, Copy)]
enum Placement {
    /// The `WHERE` clause; detail fields read their joins.
    Where,
    /// A hop's item join; detail fields read correlated lookups.
    JoinOn,
}

/// Everything collected while walking the tree, before it is handed to the
/// select builder.
struct QueryParts<'s> {
    aliases: AliasAllocator,
    columns: Vec<Expr>,
    joins: Vec<JoinClause>,
    conditions: Vec<Expr>,
    bindings: Vec<ColumnBinding>,
    nodes: Vec<ConnectionNode>,
    language: Option<&'s str>,
    for_filter_items: bool,
    environment: Option<Environment>,
}

impl<'s> QueryParts<'s> {
    fn new(
        language: Option<&'s str>,
        options: &CompileOptions,
        environment: Option<Environment>,
    ) -> Self {
        QueryParts {
            aliases: AliasAllocator::new(),
            columns: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            bindings: Vec::new(),
            nodes: Vec::new(),
            language,
            for_filter_items: options.for_filter_items,
            environment,
        }
    }

    /// Adds the columns of `connection` and hops to its children. `nullable`
    /// is set when `alias` sits below a LEFT hop.
    fn visit(
        &mut self,
        connection: &Connection,
        alias: &str,
        parent: Option<usize>,
        nullable: bool,
    ) -> Result<(), CompileError> {
        let node = self.nodes.len();
        let id_column = format!("{alias}.id");
        self.columns.push(ident_as!(alias, "id", id_column));
        self.nodes.push(ConnectionNode {
            alias: alias.to_string(),
            output_name: connection.output_name().to_string(),
            parent,
            id_column,
        });

        for field in &connection.fields {
            if is_plain_id(field) {
                continue;
            }
            let column = format!("{alias}.{}", field.output_name());
            let expr = self.read_expr(alias, field);
            self.columns.push(Expr::Alias {
                expr: Box::new(expr),
                alias: column.clone(),
            });
            self.bindings.push(ColumnBinding {
                column,
                node,
                name: field.output_name().to_string(),
            });
        }

        // Hop scopes are already part of the hop's join.
        if parent.is_none()
            && let Some(scopes) = self.scopes(alias, &connection.scopes, Placement::Where)?
        {
            self.conditions.push(scopes);
        }

        for child in &connection.connections {
            self.hop(alias, node, child, nullable)?;
        }
        Ok(())
    }

    fn hop(
        &mut self,
        parent_alias: &str,
        parent: usize,
        child: &Connection,
        parent_nullable: bool,
    ) -> Result<(), CompileError> {
        let aliases = self.aliases.hop(child);
        // An INNER join below a null-extended row would drop that row again.
        let nullable = child.optional || self.for_filter_items || parent_nullable;
        let kind = if nullable {
            JoinKind::Left
        } else {
            JoinKind::Inner
        };
        let (towards_parent, towards_child) = match child.direction {
            LinkDirection::Down => ("destination_item_id", "item_id"),
            LinkDirection::Up => ("item_id", "destination_item_id"),
        };

        let mut link_on = vec![Expr::eq(
            ident!(&aliases.link, towards_parent),
            ident!(parent_alias, "id"),
        )];
        if let Some(link_type) = child.link_type {
            link_on.push(Expr::eq(
                ident!(&aliases.link, "type"),
                value!(Value::Int(i64::from(link_type))),
            ));
        }
        self.join(kind, LINK_TABLE, &aliases.link, link_on);

        let mut item_on = vec![
            Expr::eq(ident!(&aliases.item, "id"), ident!(&aliases.link, towards_child)),
            entity_condition(&aliases.item, &child.entity),
        ];
        if let Some(environment) = self.environment {
            item_on.push(environment_condition(&aliases.item, environment));
        }
        item_on.extend(self.scopes(&aliases.item, &child.scopes, Placement::JoinOn)?);
        self.join(kind, ITEM_TABLE, &aliases.item, item_on);

        self.visit(child, &aliases.item, Some(parent), nullable)
    }

    fn join(&mut self, kind: JoinKind, table: &str, alias: &str, on: Vec<Expr>) {
        let on = on
            .into_iter()
            .reduce(|acc, next| Expr::binary(acc, BinaryOperator::And, next))
            .unwrap_or_else(|| Expr::eq(value!(Value::Int(1)), value!(Value::Int(1))));
        self.joins.push(JoinClause {
            kind,
            table: table_ref!(table).into(),
            alias: Some(alias.to_string()),
            on,
        });
    }

    /// Alias of the detail join for `field` on `item_alias`, joining it the
    /// first time it is asked for.
    fn detail_alias(&mut self, item_alias: &str, field: &Field) -> String {
        let language = field.effective_language(self.language);
        let detail = self.aliases.detail(item_alias, &field.key, language);
        if detail.is_new {
            let on = detail_match(&detail.alias, item_alias, &field.key, language);
            self.join(JoinKind::Left, DETAIL_TABLE, &detail.alias, on);
        }
        detail.alias
    }

    /// `(SELECT value FROM wiser_itemdetail ... LIMIT 1)` for `field` on
    /// `item_alias`. Usable where the detail joins are not in scope yet.
    fn detail_lookup(&mut self, item_alias: &str, field: &Field) -> Expr {
        let language = field.effective_language(self.language);
        let alias = self.aliases.lookup(item_alias, &field.key, language);
        let mut builder = SelectBuilder::new()
            .select(vec![ident!(&alias, "value")])
            .from(table_ref!(DETAIL_TABLE), Some(alias.as_str()));
        for condition in detail_match(&alias, item_alias, &field.key, language) {
            builder = builder.and_where(condition);
        }
        Expr::Subquery(Box::new(builder.limit(value!(Value::Uint(1))).build()))
    }

    /// The expression a field is selected and sorted by.
    fn read_expr(&mut self, item_alias: &str, field: &Field) -> Expr {
        if let Some(column) = field.item_column() {
            return ident!(item_alias, column.column_name());
        }
        let detail = self.detail_alias(item_alias, field);
        Expr::function(
            "COALESCE",
            vec![
                Expr::function(
                    "NULLIF",
                    vec![ident!(&detail, "long_value"), value!(Value::from(""))],
                ),
                ident!(&detail, "value"),
            ],
        )
    }

    /// The expression a field is filtered on.
    fn filter_expr(&mut self, item_alias: &str, field: &Field, placement: Placement) -> Expr {
        if let Some(column) = field.item_column() {
            return ident!(item_alias, column.column_name());
        }
        match placement {
            Placement::Where => {
                let detail = self.detail_alias(item_alias, field);
                ident!(&detail, "value")
            }
            Placement::JoinOn => self.detail_lookup(item_alias, field),
        }
    }

    fn scopes(
        &mut self,
        alias: &str,
        scopes: &[Scope],
        placement: Placement,
    ) -> Result<Option<Expr>, CompileError> {
        let mut compiled = Vec::with_capacity(scopes.len());
        for scope in scopes {
            let mut conditions = Vec::with_capacity(scope.conditions.len());
            for condition in &scope.conditions {
                conditions.push(self.condition(alias, condition, placement)?);
            }
            let combined = match scope.logic {
                Logic::And => Expr::and_all(conditions),
                Logic::Or => Expr::or_all(conditions),
            };
            compiled.extend(combined);
        }
        Ok(Expr::and_all(compiled))
    }

    fn condition(
        &mut self,
        alias: &str,
        condition: &ScopeCondition,
        placement: Placement,
    ) -> Result<Expr, CompileError> {
        let column = self.filter_expr(alias, &condition.field, placement);
        let values = scalar_values(condition)?;

        let expr = match condition.operator {
            Operator::Equals => match_any(column, values),
            Operator::In => match_any(column, split_lists(values)),
            Operator::NotEquals => match_none(column, values),
            Operator::NotIn => match_none(column, split_lists(values)),
            Operator::Contains | Operator::StartsWith | Operator::EndsWith => {
                let patterns = values
                    .iter()
                    .map(|v| {
                        Expr::binary(
                            column.clone(),
                            BinaryOperator::Like,
                            value!(like_pattern(condition.operator, v)),
                        )
                    })
                    .collect();
                Expr::or_all(patterns).ok_or_else(|| no_values(condition))?
            }
            Operator::NotContains => {
                let patterns = values
                    .iter()
                    .map(|v| {
                        Expr::binary(
                            column.clone(),
                            BinaryOperator::NotLike,
                            value!(like_pattern(Operator::Contains, v)),
                        )
                    })
                    .collect();
                let none_match = Expr::and_all(patterns).ok_or_else(|| no_values(condition))?;
                Expr::binary(is_null(column), BinaryOperator::Or, none_match)
            }
            Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual => {
                let op = match condition.operator {
                    Operator::LessThan => BinaryOperator::Lt,
                    Operator::LessThanOrEqual => BinaryOperator::LtEq,
                    Operator::GreaterThan => BinaryOperator::Gt,
                    _ => BinaryOperator::GtEq,
                };
                let operand = values
                    .into_iter()
                    .next()
                    .ok_or_else(|| no_values(condition))?;
                let is_item_column = condition.field.item_column().is_some();
                match operand.as_numeric() {
                    Some(number) if !is_item_column => Expr::binary(
                        Expr::Cast {
                            expr: Box::new(column),
                            data_type: NUMERIC_TYPE.to_string(),
                        },
                        op,
                        value!(number),
                    ),
                    _ => Expr::binary(column, op, value!(operand)),
                }
            }
            Operator::IsEmpty => Expr::binary(
                is_null(column.clone()),
                BinaryOperator::Or,
                Expr::eq(column, value!(Value::from(""))),
            ),
            Operator::IsNotEmpty => Expr::binary(
                Expr::IsNull {
                    expr: Box::new(column.clone()),
                    negated: true,
                },
                BinaryOperator::And,
                Expr::binary(column, BinaryOperator::NotEq, value!(Value::from(""))),
            ),
        };
        Ok(expr)
    }
}

/// `(limit, offset)` of the page subquery, or `None` when nothing is paged.
fn page_bounds(paging: Paging) -> Option<(u64, u64)> {
    match (paging.limit, paging.offset) {
        (Some(limit), offset) => Some((limit, offset)),
        // MySQL has no OFFSET without LIMIT.
        (None, offset) if offset > 0 => Some((u64::MAX, offset)),
        (None, _) => None,
    }
}

/// One page of main item ids, filtered and ordered like the outer query.
/// Sort expressions of child rows collapse per main item with `MIN`/`MAX`.
fn page_select(
    joins: &[JoinClause],
    conditions: &[Expr],
    order: &[(Expr, OrderDir)],
    limit: u64,
    offset: u64,
) -> Select {
    let mut builder = SelectBuilder::new()
        .select(vec![ident_as!(ROOT_ALIAS, "id", "id")])
        .from(table_ref!(ITEM_TABLE), Some(ROOT_ALIAS))
        .joins(joins.iter().cloned());
    for condition in conditions {
        builder = builder.and_where(condition.clone());
    }
    builder = builder.group_by(ident!(ROOT_ALIAS, "id"));
    for (expr, direction) in order {
        let aggregate = match direction {
            OrderDir::Asc => "MIN",
            OrderDir::Desc => "MAX",
        };
        builder = builder.order_by(
            Expr::function(aggregate, vec![expr.clone()]),
            Some(*direction),
        );
    }
    builder = builder
        .order_by(ident!(ROOT_ALIAS, "id"), Some(OrderDir::Asc))
        .limit(value!(Value::Uint(limit)));
    if offset > 0 {
        builder = builder.offset(value!(Value::Uint(offset)));
    }
    builder.build()
}

fn detail_match(alias: &str, item_alias: &str, key: &str, language: Option<&str>) -> Vec<Expr> {
    let mut on = vec![
        Expr::eq(ident!(alias, "item_id"), ident!(item_alias, "id")),
        Expr::eq(ident!(alias, "key"), value!(Value::from(key))),
    ];
    if let Some(language) = language {
        on.push(Expr::eq(
            ident!(alias, "language_code"),
            value!(Value::from(language)),
        ));
    }
    on
}

fn is_plain_id(field: &Field) -> bool {
    field.item_column() == Some(ItemColumn::Id) && field.output_name().eq_ignore_ascii_case("id")
}

fn entity_condition(alias: &str, entity: &str) -> Expr {
    Expr::eq(ident!(alias, "entity_type"), value!(Value::from(entity)))
}

fn environment_condition(alias: &str, environment: Environment) -> Expr {
    Expr::binary(
        Expr::binary(
            ident!(alias, "published_environment"),
            BinaryOperator::BitAnd,
            value!(Value::Int(i64::from(environment.bits()))),
        ),
        BinaryOperator::Gt,
        value!(Value::Int(0)),
    )
}

fn is_null(expr: Expr) -> Expr {
    Expr::IsNull {
        expr: Box::new(expr),
        negated: false,
    }
}

fn match_any(column: Expr, mut values: Vec<Value>) -> Expr {
    if values.len() == 1 {
        let value = values.remove(0);
        return Expr::eq(column, value!(value));
    }
    Expr::InList {
        expr: Box::new(column),
        list: values.into_iter().map(|v| value!(v)).collect(),
        negated: false,
    }
}

/// A missing value (NULL) differs from every value.
fn match_none(column: Expr, mut values: Vec<Value>) -> Expr {
    let differs = if values.len() == 1 {
        let value = values.remove(0);
        Expr::binary(column.clone(), BinaryOperator::NotEq, value!(value))
    } else {
        Expr::InList {
            expr: Box::new(column.clone()),
            list: values.into_iter().map(|v| value!(v)).collect(),
            negated: true,
        }
    };
    Expr::binary(is_null(column), BinaryOperator::Or, differs)
}

fn scalar_values(condition: &ScopeCondition) -> Result<Vec<Value>, CompileError> {
    condition
        .values
        .iter()
        .map(|json| match Value::from_json_scalar(json) {
            Some(Value::Null) | None => Err(CompileError::validation(
                format!("condition on `{}`", condition.field.key),
                "condition values must be non-null scalars",
            )),
            Some(value) => Ok(value),
        })
        .collect()
}

/// Expands comma separated strings into one value per item.
fn split_lists(values: Vec<Value>) -> Vec<Value> {
    values
        .into_iter()
        .flat_map(|value| match value {
            Value::String(list) => list
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(Value::from)
                .collect::<Vec<_>>(),
            other => vec![other],
        })
        .collect()
}

fn like_pattern(operator: Operator, value: &Value) -> Value {
    let raw = value.as_string().unwrap_or_default();
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = match operator {
        Operator::StartsWith => format!("{escaped}%"),
        Operator::EndsWith => format!("%{escaped}"),
        _ => format!("%{escaped}%"),
    };
    Value::String(pattern)
}

fn no_values(condition: &ScopeCondition) -> CompileError {
    CompileError::validation(
        format!("condition on `{}`", condition.field.key),
        format!("operator `{}` needs at least one value", condition.operator),
    )
}
