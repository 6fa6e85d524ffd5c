// SPDX-License-Identifier: Apache-2.0

//! Restricted query parser.
//!
//! Runs the query through sqlparser and converts the AST into a
//! [`ParsedQuery`]. Only a small SELECT subset is accepted: one FROM table,
//! inner equi-joins on `table.column = table.column`, an AND-only WHERE
//! clause, an optional ORDER BY and an integer LIMIT. Anything else is
//! rejected with [`FederationError::UnsupportedQuery`] instead of being
//! partially extracted.

use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;

use sqlparser::ast::{
    BinaryOperator, Distinct, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    GroupByExpr, Ident, JoinConstraint, JoinOperator, LimitClause, ObjectName, ObjectNamePart,
    OrderBy, OrderByKind, Select, SelectItem, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use fedquery_core::{FederationError, FederationResult};

/// A logical table referenced in FROM or JOIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Logical name, lower-cased
    pub name: String,
    /// Name used to qualify columns in SQL text (alias if given, else the
    /// table name as written)
    pub binding: String,
    pub alias: Option<String>,
}

/// `left_table.left_col = right_table.right_col` from a JOIN ... ON clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCondition {
    /// Table introduced by the JOIN keyword
    pub joined_table: String,
    pub left_table: String,
    pub left_col: String,
    pub right_table: String,
    pub right_col: String,
    /// The ON expression as written
    pub sql: String,
}

impl JoinCondition {
    pub fn involves(&self, table: &str) -> bool {
        self.left_table == table || self.right_table == table
    }

    /// Given one side's table, returns `(this_col, other_table, other_col)`.
    pub fn from_side(&self, table: &str) -> Option<(&str, &str, &str)> {
        if self.left_table == table {
            Some((&self.left_col, &self.right_table, &self.right_col))
        } else if self.right_table == table {
            Some((&self.right_col, &self.left_table, &self.left_col))
        } else {
            None
        }
    }
}

/// A column reference; `table` is the logical table resolved from the
/// qualifier, `None` when the column was written unqualified.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

/// One AND-separated condition of the WHERE clause.
#[derive(Debug, Clone)]
pub struct Predicate {
    /// Condition text as written
    pub sql: String,
    /// Every column the condition references
    pub columns: Vec<ColumnRef>,
    /// Set when the condition has the form `column = literal`
    pub equality: Option<ColumnRef>,
    expr: Expr,
}

impl Predicate {
    /// The condition with every column qualified by `remote_table`, ready to
    /// be sent to a single container.
    pub fn pushdown_sql(&self, remote_table: &str) -> String {
        let mut expr = self.expr.clone();
        let result = walk_expr(&mut expr, &mut |node: &mut Expr| -> Result<(), Infallible> {
            match node {
                Expr::Identifier(ident) => {
                    *node = Expr::CompoundIdentifier(vec![Ident::new(remote_table), ident.clone()]);
                }
                Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
                    parts[0] = Ident::new(remote_table);
                }
                _ => {}
            }
            Ok(())
        });
        match result {
            Ok(()) => expr.to_string(),
            Err(never) => match never {},
        }
    }
}

/// Structural parts of a supported SELECT.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub original: String,
    /// `DISTINCT` / `DISTINCT ON (...)` as written
    pub distinct: Option<String>,
    pub select_list: Vec<String>,
    /// Tables in encounter order; the first is the FROM table
    pub tables: Vec<TableRef>,
    pub joins: Vec<JoinCondition>,
    pub where_predicates: Vec<Predicate>,
    /// Complete `ORDER BY ...` clause
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl ParsedQuery {
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableRef> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn is_single_table(&self) -> bool {
        self.tables.len() == 1
    }

    /// WHERE body (without the keyword), or `None` when there is no WHERE.
    pub fn where_sql(&self) -> Option<String> {
        if self.where_predicates.is_empty() {
            return None;
        }
        Some(
            self.where_predicates
                .iter()
                .map(|p| p.sql.as_str())
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }
}

/// Parses a query into its structural parts.
pub fn parse_query(sql: &str) -> FederationResult<ParsedQuery> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql.trim())
        .map_err(|e| FederationError::unsupported(format!("Failed to parse query: {e}")))?;

    if statements.len() != 1 {
        return Err(FederationError::unsupported(
            "Queries must be a single statement",
        ));
    }

    let Statement::Query(query) = statements.remove(0) else {
        return Err(FederationError::unsupported("Only SELECT statements are supported"));
    };
    let mut query = *query;

    if query.with.is_some() {
        return Err(FederationError::unsupported("WITH clauses are not supported"));
    }
    if query.fetch.is_some() {
        return Err(FederationError::unsupported("FETCH clauses are not supported"));
    }
    if !query.locks.is_empty()
        || query.for_clause.is_some()
        || query.settings.is_some()
        || query.format_clause.is_some()
        || !query.pipe_operators.is_empty()
    {
        return Err(FederationError::unsupported(format!(
            "Unsupported query clause in '{}'",
            sql.trim()
        )));
    }

    let limit = match &query.limit_clause {
        None => None,
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            if offset.is_some() {
                return Err(FederationError::unsupported("OFFSET is not supported"));
            }
            limit.as_ref().map(parse_limit).transpose()?
        }
        Some(_) => {
            return Err(FederationError::unsupported(
                "Only LIMIT <n> is supported",
            ))
        }
    };

    if let Some(order_by) = query.order_by.as_mut() {
        check_order_by(order_by)?;
    }
    let order_by = query.order_by.as_ref().map(ToString::to_string);

    let select = match *query.body {
        SetExpr::Select(select) => *select,
        SetExpr::SetOperation { .. } => {
            return Err(FederationError::unsupported(
                "Set operations (UNION, INTERSECT, EXCEPT) are not supported",
            ))
        }
        SetExpr::Query(_) => {
            return Err(FederationError::unsupported(
                "Parenthesized queries are not supported",
            ))
        }
        _ => return Err(FederationError::unsupported("Only SELECT queries are supported")),
    };

    let mut parsed = parse_select(select)?;
    parsed.original = sql.to_string();
    parsed.order_by = order_by;
    parsed.limit = limit;
    Ok(parsed)
}

fn parse_limit(expr: &Expr) -> FederationResult<u64> {
    let text = expr.to_string();
    text.trim().parse::<u64>().map_err(|_| {
        FederationError::unsupported(format!(
            "LIMIT must be a non-negative integer, got '{text}'"
        ))
    })
}

fn parse_select(mut select: Select) -> FederationResult<ParsedQuery> {
    if select.having.is_some() {
        return Err(FederationError::unsupported("HAVING is not supported"));
    }
    match &select.group_by {
        GroupByExpr::Expressions(exprs, _) if exprs.is_empty() => {}
        _ => return Err(FederationError::unsupported("GROUP BY is not supported")),
    }
    if select.top.is_some()
        || select.into.is_some()
        || select.exclude.is_some()
        || select.prewhere.is_some()
        || select.qualify.is_some()
        || select.connect_by.is_some()
        || select.value_table_mode.is_some()
        || !select.lateral_views.is_empty()
        || !select.cluster_by.is_empty()
        || !select.distribute_by.is_empty()
        || !select.sort_by.is_empty()
        || !select.named_window.is_empty()
    {
        return Err(FederationError::unsupported(
            "Only SELECT ... FROM ... [JOIN ... ON ...] [WHERE ...] is supported",
        ));
    }

    if select.from.len() != 1 {
        return Err(FederationError::unsupported(
            "Exactly one FROM table is required; use JOIN ... ON for additional tables",
        ));
    }
    let from = select.from.remove(0);

    // Tables first, so ON and WHERE qualifiers can be resolved through aliases.
    let mut tables = vec![table_ref(&from.relation)?];
    let mut pending_joins = Vec::with_capacity(from.joins.len());
    for join in from.joins {
        let joined = table_ref(&join.relation)?;
        let constraint = match join.join_operator {
            JoinOperator::Join(constraint) | JoinOperator::Inner(constraint) => constraint,
            _ => {
                return Err(FederationError::unsupported(
                    "Only inner joins (JOIN / INNER JOIN) are supported",
                ))
            }
        };
        let on = match constraint {
            JoinConstraint::On(expr) => expr,
            _ => {
                return Err(FederationError::unsupported(
                    "Joins must use ON <table>.<column> = <table>.<column>",
                ))
            }
        };
        pending_joins.push((joined.name.clone(), on));
        tables.push(joined);
    }

    let mut seen = BTreeSet::new();
    for table in &tables {
        if !seen.insert(table.name.as_str()) {
            return Err(FederationError::unsupported(format!(
                "Table '{}' is referenced more than once; self-joins are not supported",
                table.name
            )));
        }
    }

    let bindings: HashMap<String, String> = tables
        .iter()
        .map(|t| (binding_key(t), t.name.clone()))
        .collect();

    let joins = pending_joins
        .into_iter()
        .map(|(joined, on)| join_condition(joined, on, &bindings))
        .collect::<FederationResult<Vec<_>>>()?;

    for item in &mut select.projection {
        if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
            walk_expr(expr, &mut reject_unsupported)?;
        }
    }
    if let Some(Distinct::On(exprs)) = &mut select.distinct {
        for expr in exprs {
            walk_expr(expr, &mut reject_unsupported)?;
        }
    }
    let select_list = select.projection.iter().map(ToString::to_string).collect();
    let distinct = select.distinct.as_ref().map(ToString::to_string);

    let mut where_predicates = Vec::new();
    if let Some(selection) = select.selection.take() {
        let mut conjuncts = Vec::new();
        split_conjuncts(selection, &mut conjuncts);
        for expr in conjuncts {
            where_predicates.push(predicate(expr, &bindings)?);
        }
    }

    Ok(ParsedQuery {
        original: String::new(),
        distinct,
        select_list,
        tables,
        joins,
        where_predicates,
        order_by: None,
        limit: None,
    })
}

/// Extracts the string value from an `ObjectNamePart`.
fn part_value(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(ident) => ident.value.clone(),
        _ => String::new(),
    }
}

fn table_ref(factor: &TableFactor) -> FederationResult<TableRef> {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let written = single_part_name(name)?;
            let alias = alias.as_ref().map(|a| a.name.to_string());
            let binding = alias.clone().unwrap_or_else(|| written.to_string());
            Ok(TableRef {
                name: written.value.to_lowercase(),
                binding,
                alias,
            })
        }
        TableFactor::Derived { .. } => Err(FederationError::unsupported(
            "Subqueries in FROM are not supported",
        )),
        TableFactor::NestedJoin { .. } => Err(FederationError::unsupported(
            "Parenthesized joins are not supported",
        )),
        _ => Err(FederationError::unsupported(
            "Only plain table names are supported in FROM and JOIN",
        )),
    }
}

fn single_part_name(name: &ObjectName) -> FederationResult<&Ident> {
    match name.0.as_slice() {
        [ObjectNamePart::Identifier(ident)] => Ok(ident),
        parts => Err(FederationError::unsupported(format!(
            "Table references must be a single logical name, got '{}'",
            parts.iter().map(part_value).collect::<Vec<_>>().join(".")
        ))),
    }
}

fn binding_key(table: &TableRef) -> String {
    table
        .alias
        .as_deref()
        .map(str::to_string)
        .unwrap_or_else(|| table.name.clone())
        .trim_matches('"')
        .to_lowercase()
}

fn resolve_qualifier(
    qualifier: &Ident,
    bindings: &HashMap<String, String>,
) -> FederationResult<String> {
    bindings
        .get(&qualifier.value.to_lowercase())
        .cloned()
        .ok_or_else(|| {
            FederationError::unsupported(format!(
                "Unknown table or alias '{}'",
                qualifier.value
            ))
        })
}

fn join_condition(
    joined_table: String,
    on: Expr,
    bindings: &HashMap<String, String>,
) -> FederationResult<JoinCondition> {
    let sql = on.to_string();
    let invalid = || {
        FederationError::unsupported(format!(
            "Join condition '{sql}' must have the form <table>.<column> = <table>.<column>"
        ))
    };

    let Expr::BinaryOp {
        left,
        op: BinaryOperator::Eq,
        right,
    } = &on
    else {
        return Err(invalid());
    };

    let (Expr::CompoundIdentifier(l), Expr::CompoundIdentifier(r)) = (left.as_ref(), right.as_ref())
    else {
        return Err(invalid());
    };
    if l.len() != 2 || r.len() != 2 {
        return Err(invalid());
    }

    let left_table = resolve_qualifier(&l[0], bindings)?;
    let right_table = resolve_qualifier(&r[0], bindings)?;
    if left_table == right_table {
        return Err(FederationError::unsupported(format!(
            "Join condition '{sql}' must compare two different tables"
        )));
    }

    Ok(JoinCondition {
        joined_table,
        left_table,
        left_col: l[1].value.clone(),
        right_table,
        right_col: r[1].value.clone(),
        sql,
    })
}

fn split_conjuncts(expr: Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            split_conjuncts(*left, out);
            split_conjuncts(*right, out);
        }
        other => out.push(other),
    }
}

fn predicate(mut expr: Expr, bindings: &HashMap<String, String>) -> FederationResult<Predicate> {
    walk_expr(&mut expr, &mut reject_unsupported)?;

    let mut columns = Vec::new();
    walk_expr(&mut expr, &mut |node: &mut Expr| -> FederationResult<()> {
        if let Some(column) = column_ref(node, bindings)? {
            columns.push(column);
        }
        Ok(())
    })?;

    let equality = match &expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (column, Expr::Value(_)) | (Expr::Value(_), column) => column_ref(column, bindings)?,
            _ => None,
        },
        _ => None,
    };

    Ok(Predicate {
        sql: expr.to_string(),
        columns,
        equality,
        expr,
    })
}

fn column_ref(
    expr: &Expr,
    bindings: &HashMap<String, String>,
) -> FederationResult<Option<ColumnRef>> {
    match expr {
        Expr::Identifier(ident) => Ok(Some(ColumnRef {
            table: None,
            column: ident.value.clone(),
        })),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => Ok(Some(ColumnRef {
            table: Some(resolve_qualifier(&parts[0], bindings)?),
            column: parts[1].value.clone(),
        })),
        _ => Ok(None),
    }
}

/// Accepts only the expression shapes this crate knows how to attribute and
/// re-render. Runs before any other walk over the same expression, so
/// [`walk_expr`] never has to descend into anything else.
fn reject_unsupported(expr: &mut Expr) -> FederationResult<()> {
    match expr {
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => Err(
            FederationError::unsupported("Subqueries are not supported"),
        ),
        Expr::AnyOp { right, .. } | Expr::AllOp { right, .. }
            if matches!(right.as_ref(), Expr::Subquery(_)) =>
        {
            Err(FederationError::unsupported("Subqueries are not supported"))
        }
        Expr::AnyOp { .. } | Expr::AllOp { .. } => Err(FederationError::unsupported(
            "ANY / ALL comparisons are not supported",
        )),
        Expr::Nested(_) | Expr::Tuple(_) => Err(FederationError::unsupported(
            "Parenthesized expressions are not supported",
        )),
        Expr::BinaryOp {
            op: BinaryOperator::Or,
            ..
        } => Err(FederationError::unsupported("OR conditions are not supported")),
        Expr::CompoundIdentifier(parts) if parts.len() > 2 => {
            Err(FederationError::unsupported(format!(
                "Column references must be <table>.<column>, got '{}'",
                parts
                    .iter()
                    .map(|p| p.value.as_str())
                    .collect::<Vec<_>>()
                    .join(".")
            )))
        }
        Expr::Function(func) => check_function(func),
        Expr::Identifier(_)
        | Expr::CompoundIdentifier(_)
        | Expr::Value(_)
        | Expr::TypedString(_)
        | Expr::BinaryOp { .. }
        | Expr::UnaryOp { .. }
        | Expr::Cast { .. }
        | Expr::IsNull(_)
        | Expr::IsNotNull(_)
        | Expr::IsTrue(_)
        | Expr::IsFalse(_)
        | Expr::IsDistinctFrom(..)
        | Expr::IsNotDistinctFrom(..)
        | Expr::Between { .. }
        | Expr::InList { .. }
        | Expr::Like { .. }
        | Expr::ILike { .. }
        | Expr::Case { .. }
        | Expr::Extract { .. }
        | Expr::Substring { .. } => Ok(()),
        other => Err(FederationError::unsupported(format!(
            "Unsupported expression '{other}'"
        ))),
    }
}

/// Plain calls only: positional arguments, no FILTER, OVER or WITHIN GROUP.
fn check_function(func: &Function) -> FederationResult<()> {
    let unsupported = || {
        FederationError::unsupported(format!("Unsupported function call '{func}'"))
    };

    if !matches!(func.parameters, FunctionArguments::None)
        || func.filter.is_some()
        || func.over.is_some()
        || !func.within_group.is_empty()
    {
        return Err(unsupported());
    }

    match &func.args {
        FunctionArguments::None => Ok(()),
        FunctionArguments::Subquery(_) => {
            Err(FederationError::unsupported("Subqueries are not supported"))
        }
        FunctionArguments::List(list) => {
            let positional = list
                .args
                .iter()
                .all(|arg| matches!(arg, FunctionArg::Unnamed(_)));
            if positional && list.clauses.is_empty() {
                Ok(())
            } else {
                Err(unsupported())
            }
        }
    }
}

/// Validates every expression of the ORDER BY clause.
fn check_order_by(order_by: &mut OrderBy) -> FederationResult<()> {
    if order_by.interpolate.is_some() {
        return Err(FederationError::unsupported("INTERPOLATE is not supported"));
    }
    if let OrderByKind::Expressions(exprs) = &mut order_by.kind {
        for item in exprs {
            if item.with_fill.is_some() {
                return Err(FederationError::unsupported("WITH FILL is not supported"));
            }
            walk_expr(&mut item.expr, &mut reject_unsupported)?;
        }
    }
    Ok(())
}

// --- AST Walking ---

/// Visits `expr` and every sub-expression, parents before children.
///
/// Only descends into shapes accepted by [`reject_unsupported`].
fn walk_expr<E>(
    expr: &mut Expr,
    visit: &mut dyn FnMut(&mut Expr) -> Result<(), E>,
) -> Result<(), E> {
    visit(expr)?;
    match expr {
        Expr::BinaryOp { left, right, .. }
        | Expr::IsDistinctFrom(left, right)
        | Expr::IsNotDistinctFrom(left, right) => {
            walk_expr(left, visit)?;
            walk_expr(right, visit)?;
        }
        Expr::UnaryOp { expr: inner, .. }
        | Expr::Nested(inner)
        | Expr::Cast { expr: inner, .. }
        | Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::Extract { expr: inner, .. } => {
            walk_expr(inner, visit)?;
        }
        Expr::Substring {
            expr: inner,
            substring_from,
            substring_for,
            ..
        } => {
            walk_expr(inner, visit)?;
            if let Some(from) = substring_from {
                walk_expr(from, visit)?;
            }
            if let Some(len) = substring_for {
                walk_expr(len, visit)?;
            }
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(ref mut arg_list) = func.args {
                for arg in &mut arg_list.args {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) = arg {
                        walk_expr(e, visit)?;
                    }
                }
            }
        }
        Expr::Between {
            expr: inner,
            low,
            high,
            ..
        } => {
            walk_expr(inner, visit)?;
            walk_expr(low, visit)?;
            walk_expr(high, visit)?;
        }
        Expr::InList {
            expr: inner, list, ..
        } => {
            walk_expr(inner, visit)?;
            for item in list {
                walk_expr(item, visit)?;
            }
        }
        Expr::Like {
            expr: inner,
            pattern,
            ..
        }
        | Expr::ILike {
            expr: inner,
            pattern,
            ..
        } => {
            walk_expr(inner, visit)?;
            walk_expr(pattern, visit)?;
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                walk_expr(op, visit)?;
            }
            for case_when in conditions {
                walk_expr(&mut case_when.condition, visit)?;
                walk_expr(&mut case_when.result, visit)?;
            }
            if let Some(else_r) = else_result {
                walk_expr(else_r, visit)?;
            }
        }
        _ => {}
    }
    Ok(())
}
