//! SQL Safety Validator
//!
//! Turns raw oracle output into an accepted single statement or a rejection
//! with a specific reason. The validator is pure text/schema analysis: it
//! never touches the database.
//!
//! Steps, in order:
//! 1. extract exactly one statement (stripping prose and markdown fences);
//! 2. allow only read queries (SELECT, including WITH ... SELECT);
//! 3. resolve every table/column reference against the schema model;
//! 4. inject the default LIMIT when the statement carries none.

use crate::error::RejectReason;
use crate::schema::Schema;
use regex::Regex;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, GroupByExpr, Join, JoinConstraint, JoinOperator, Query,
    Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Value,
};
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A refused statement: the reason, plus the canonical text of whatever
/// statement was parsed so the audit trail keeps the candidate even when
/// it is rejected. `candidate` is `None` when no single statement could be
/// extracted at all.
#[derive(Debug)]
pub struct Rejection {
    pub reason: RejectReason,
    pub candidate: Option<String>,
}

impl Rejection {
    fn new(reason: RejectReason) -> Self {
        Self {
            reason,
            candidate: None,
        }
    }

    fn with_candidate(reason: RejectReason, candidate: String) -> Self {
        Self {
            reason,
            candidate: Some(candidate),
        }
    }
}

pub struct SqlValidator {
    schema: Arc<Schema>,
    default_limit: u64,
}

impl SqlValidator {
    pub fn new(schema: Arc<Schema>, default_limit: u64) -> Self {
        Self {
            schema,
            default_limit,
        }
    }

    /// Validate raw oracle output, returning the accepted (and possibly
    /// limit-augmented) statement text.
    pub fn validate(&self, raw_output: &str) -> std::result::Result<String, Rejection> {
        let statement = extract_statement(raw_output)?;

        let mut query = match statement {
            Statement::Query(query) => query,
            other => {
                return Err(Rejection::with_candidate(
                    RejectReason::DisallowedStatementType(leading_verb(&other)),
                    other.to_string(),
                ))
            }
        };

        let candidate = query.to_string();
        if let Err(reason) = self.check_identifiers(&query) {
            return Err(Rejection::with_candidate(reason, candidate));
        }

        inject_limit(&mut query, self.default_limit);
        let sql = query.to_string();
        debug!("accepted statement: {}", sql);
        Ok(sql)
    }

    fn check_identifiers(&self, query: &Query) -> std::result::Result<(), RejectReason> {
        let mut refs = IdentifierRefs::default();
        refs.collect_query(query);

        // Every table reference must be a schema table or a name defined by
        // the statement itself (CTE or derived-table alias).
        for (name, resolved) in &refs.tables {
            if let Resolved::Table(table) = resolved {
                if self.schema.table(table).is_none() {
                    return Err(RejectReason::UnknownIdentifier(name.clone()));
                }
            }
        }

        for column in &refs.columns {
            match column {
                ColumnRef::Qualified(qualifier, column) => {
                    match refs.tables.get(qualifier) {
                        None => {
                            return Err(RejectReason::UnknownIdentifier(qualifier.clone()))
                        }
                        // Columns of CTEs and derived tables are defined by
                        // the statement; nothing to resolve.
                        Some(Resolved::Local) => {}
                        Some(Resolved::Table(table)) => {
                            if column != "*" && !self.table_has_column(table, column) {
                                return Err(RejectReason::UnknownIdentifier(format!(
                                    "{}.{}",
                                    qualifier, column
                                )));
                            }
                        }
                    }
                }
                ColumnRef::Bare(column) => {
                    if refs.output_aliases.contains(column) {
                        continue;
                    }
                    let any_local = refs.tables.values().any(|r| matches!(r, Resolved::Local));
                    let known = refs.tables.values().any(|r| {
                        matches!(r, Resolved::Table(t) if self.table_has_column(t, column))
                    });
                    if refs.tables.is_empty() || any_local || known {
                        continue;
                    }
                    return Err(RejectReason::UnknownIdentifier(column.clone()));
                }
            }
        }

        Ok(())
    }

    fn table_has_column(&self, table: &str, column: &str) -> bool {
        self.schema
            .table(table)
            .map(|t| t.column(column).is_some())
            .unwrap_or(false)
    }
}

static SQL_VERB: OnceLock<Option<Regex>> = OnceLock::new();

fn sql_verb() -> Option<&'static Regex> {
    SQL_VERB
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(SELECT|WITH|INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|REPLACE|TRUNCATE|PRAGMA|ATTACH|VACUUM)\b",
            )
            .ok()
        })
        .as_ref()
}

/// Pull exactly one parseable statement out of oracle output.
fn extract_statement(raw: &str) -> std::result::Result<Statement, Rejection> {
    let cleaned = strip_fences(raw);
    if cleaned.is_empty() {
        return Err(Rejection::new(RejectReason::NoStatementFound));
    }

    if let Some(statements) = parse_sql(&cleaned) {
        return single_statement(statements);
    }

    // The oracle wrapped the statement in prose. Scan forward to the first
    // SQL verb and retry from there, then cut at the first terminator.
    if let Some(m) = sql_verb().and_then(|re| re.find(&cleaned)) {
        let tail = &cleaned[m.start()..];
        if let Some(statements) = parse_sql(tail) {
            return single_statement(statements);
        }
        if let Some(semi) = tail.find(';') {
            if let Some(statements) = parse_sql(&tail[..=semi]) {
                return single_statement(statements);
            }
        }
    }

    Err(Rejection::new(RejectReason::NoStatementFound))
}

fn parse_sql(sql: &str) -> Option<Vec<Statement>> {
    Parser::parse_sql(&SQLiteDialect {}, sql)
        .ok()
        .filter(|statements| !statements.is_empty())
}

fn single_statement(mut statements: Vec<Statement>) -> std::result::Result<Statement, Rejection> {
    if statements.len() > 1 {
        return Err(Rejection::new(RejectReason::MultipleStatements));
    }
    Ok(statements.remove(0))
}

/// Strip markdown code fences the oracle may have added despite the rules.
fn strip_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0);
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

fn leading_verb(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or("UNKNOWN")
        .to_uppercase()
}

/// Add the default LIMIT to the outer query when none is present.
/// Idempotent: an already-limited query is left untouched.
fn inject_limit(query: &mut Query, default_limit: u64) {
    if query.limit.is_none() && query.fetch.is_none() {
        query.limit = Some(Expr::Value(Value::Number(default_limit.to_string(), false)));
    }
}

/// How a table qualifier resolves: a real schema table, or a name local to
/// the statement (CTE or derived-table alias).
enum Resolved {
    Table(String),
    Local,
}

enum ColumnRef {
    Bare(String),
    Qualified(String, String),
}

#[derive(Default)]
struct IdentifierRefs {
    tables: HashMap<String, Resolved>,
    ctes: HashSet<String>,
    output_aliases: HashSet<String>,
    columns: Vec<ColumnRef>,
}

impl IdentifierRefs {
    fn collect_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(lower(&cte.alias.name.value));
                self.collect_query(&cte.query);
            }
        }
        self.collect_set_expr(&query.body);
        for order_by in &query.order_by {
            self.collect_expr(&order_by.expr);
        }
        if let Some(limit) = &query.limit {
            self.collect_expr(limit);
        }
    }

    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.collect_select(select),
            SetExpr::Query(query) => self.collect_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            SetExpr::Values(values) => {
                for row in &values.rows {
                    for expr in row {
                        self.collect_expr(expr);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_select(&mut self, select: &Select) {
        for table in &select.from {
            self.collect_table_with_joins(table);
        }
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => self.collect_expr(expr),
                SelectItem::ExprWithAlias { expr, alias } => {
                    self.output_aliases.insert(lower(&alias.value));
                    self.collect_expr(expr);
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    if let Some(qualifier) = name.0.last() {
                        self.columns
                            .push(ColumnRef::Qualified(lower(&qualifier.value), "*".to_string()));
                    }
                }
                SelectItem::Wildcard(_) => {}
            }
        }
        if let Some(selection) = &select.selection {
            self.collect_expr(selection);
        }
        match &select.group_by {
            GroupByExpr::Expressions(exprs) => {
                for expr in exprs {
                    self.collect_expr(expr);
                }
            }
            GroupByExpr::All => {}
        }
        if let Some(having) = &select.having {
            self.collect_expr(having);
        }
    }

    fn collect_table_with_joins(&mut self, table: &TableWithJoins) {
        self.collect_table_factor(&table.relation);
        for join in &table.joins {
            self.collect_join(join);
        }
    }

    fn collect_join(&mut self, join: &Join) {
        self.collect_table_factor(&join.relation);
        let constraint = match &join.join_operator {
            JoinOperator::Inner(c)
            | JoinOperator::LeftOuter(c)
            | JoinOperator::RightOuter(c)
            | JoinOperator::FullOuter(c) => c,
            _ => return,
        };
        match constraint {
            JoinConstraint::On(expr) => self.collect_expr(expr),
            JoinConstraint::Using(idents) => {
                for ident in idents {
                    self.columns.push(ColumnRef::Bare(lower(&ident.value)));
                }
            }
            _ => {}
        }
    }

    fn collect_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table = name
                    .0
                    .last()
                    .map(|ident| lower(&ident.value))
                    .unwrap_or_default();
                let resolve = |t: &str| {
                    if self.ctes.contains(t) {
                        Resolved::Local
                    } else {
                        Resolved::Table(t.to_string())
                    }
                };
                if let Some(alias) = alias {
                    self.tables.insert(lower(&alias.name.value), resolve(&table));
                }
                let resolved = resolve(&table);
                self.tables.insert(table, resolved);
            }
            TableFactor::Derived { subquery, alias, .. } => {
                self.collect_query(subquery);
                if let Some(alias) = alias {
                    self.tables.insert(lower(&alias.name.value), Resolved::Local);
                }
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.collect_table_with_joins(table_with_joins);
            }
            _ => {}
        }
    }

    fn collect_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Identifier(ident) => {
                self.columns.push(ColumnRef::Bare(lower(&ident.value)));
            }
            Expr::CompoundIdentifier(idents) => {
                if idents.len() >= 2 {
                    let qualifier = lower(&idents[idents.len() - 2].value);
                    let column = lower(&idents[idents.len() - 1].value);
                    self.columns.push(ColumnRef::Qualified(qualifier, column));
                } else if let Some(ident) = idents.first() {
                    self.columns.push(ColumnRef::Bare(lower(&ident.value)));
                }
            }
            Expr::BinaryOp { left, right, .. } => {
                self.collect_expr(left);
                self.collect_expr(right);
            }
            Expr::UnaryOp { expr, .. } | Expr::Nested(expr) => self.collect_expr(expr),
            Expr::Cast { expr, .. } => self.collect_expr(expr),
            Expr::IsNull(expr) | Expr::IsNotNull(expr) => self.collect_expr(expr),
            Expr::InList { expr, list, .. } => {
                self.collect_expr(expr);
                for item in list {
                    self.collect_expr(item);
                }
            }
            Expr::InSubquery { expr, subquery, .. } => {
                self.collect_expr(expr);
                self.collect_query(subquery);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                self.collect_expr(expr);
                self.collect_expr(low);
                self.collect_expr(high);
            }
            Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
                self.collect_expr(expr);
                self.collect_expr(pattern);
            }
            Expr::Function(function) => {
                for arg in &function.args {
                    let arg_expr = match arg {
                        FunctionArg::Named { arg, .. } => arg,
                        FunctionArg::Unnamed(arg) => arg,
                    };
                    if let FunctionArgExpr::Expr(expr) = arg_expr {
                        self.collect_expr(expr);
                    }
                }
            }
            Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(operand) = operand {
                    self.collect_expr(operand);
                }
                for expr in conditions.iter().chain(results.iter()) {
                    self.collect_expr(expr);
                }
                if let Some(expr) = else_result {
                    self.collect_expr(expr);
                }
            }
            Expr::Exists { subquery, .. } => self.collect_query(subquery),
            Expr::Subquery(subquery) => self.collect_query(subquery),
            Expr::Tuple(exprs) => {
                for expr in exprs {
                    self.collect_expr(expr);
                }
            }
            _ => {}
        }
    }
}

fn lower(value: &str) -> String {
    value.to_lowercase()
}
