use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde_json::{Number, Value};
use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, ObjectName, Query, SelectItem, SetExpr,
    Statement, TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::Parser;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::context::CancelRx;
use crate::engine::base::{QueryEngine, QueryOutput, already_canceled};
use crate::error::{AdapterError, AdapterResult, ErrorKind};
use crate::types::Row;
use crate::{adapter_error, bail};

/// A job submitted to a [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: String,
    pub sql: String,
    pub location: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Vec<Row>>,
    submissions: Vec<Submission>,
    failures: VecDeque<AdapterError>,
}

/// In-memory engine for tests and local development.
///
/// [`MemoryEngine`] keeps tables as lists of rows and evaluates the GoogleSQL subset produced by
/// the SQL builder: `select` with `where`, `order by`, `limit`, `offset` and `count`, multi-row
/// `insert ... values`, `update` and `delete`. Every submission is recorded so tests can assert
/// on the exact SQL that would have been sent to BigQuery. Reading a table that does not exist
/// returns no rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryEngine {
    /// Creates an engine without tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends rows to `table`, creating it when missing.
    pub async fn insert_rows(&self, table: &str, rows: Vec<Row>) {
        let mut inner = self.inner.lock().await;
        inner.tables.entry(table.to_owned()).or_default().extend(rows);
    }

    /// Returns a copy of the rows currently stored in `table`.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).cloned().unwrap_or_default()
    }

    /// Returns every submission received so far, in order.
    pub async fn submissions(&self) -> Vec<Submission> {
        let inner = self.inner.lock().await;
        inner.submissions.clone()
    }

    pub async fn clear_submissions(&self) {
        let mut inner = self.inner.lock().await;
        inner.submissions.clear();
    }

    /// Makes the next submission fail with `error` without touching any table.
    pub async fn fail_next(&self, error: AdapterError) {
        let mut inner = self.inner.lock().await;
        inner.failures.push_back(error);
    }
}

impl QueryEngine for MemoryEngine {
    fn name() -> &'static str {
        "memory"
    }

    async fn execute(
        &self,
        sql: &str,
        location: Option<&str>,
        cancel: Option<CancelRx>,
    ) -> AdapterResult<QueryOutput> {
        if already_canceled(&cancel) {
            bail!(
                ErrorKind::EngineCanceled,
                "Job canceled",
                "the call was canceled before the job was submitted"
            );
        }

        let mut inner = self.inner.lock().await;

        let job_id = Uuid::new_v4().to_string();
        inner.submissions.push(Submission {
            job_id: job_id.clone(),
            sql: sql.to_owned(),
            location: location.map(str::to_owned),
        });

        if let Some(error) = inner.failures.pop_front() {
            return Err(error.with_job_id(job_id));
        }

        let statements =
            Parser::parse_sql(&BigQueryDialect {}, &standard_literals(sql)).map_err(|err| {
                adapter_error!(
                    ErrorKind::EngineSubmissionRejected,
                    "Invalid SQL submitted",
                    err.to_string()
                )
            })?;

        let mut rows = Vec::new();
        for statement in &statements {
            rows = inner.run(statement)?;
        }

        debug!(%job_id, statements = statements.len(), rows = rows.len(), "memory job finished");

        Ok(QueryOutput {
            job_id: Some(job_id),
            rows,
        })
    }
}

impl Inner {
    fn run(&mut self, statement: &Statement) -> AdapterResult<Vec<Row>> {
        match statement {
            Statement::Query(query) => self.select(query),
            Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => {
                let SetExpr::Values(values) = source.body.as_ref() else {
                    bail!(
                        ErrorKind::EngineExecutionFailed,
                        "Unsupported statement",
                        "insert only supports a values list"
                    );
                };

                let empty = Row::new();
                let mut inserted = Vec::with_capacity(values.rows.len());
                for exprs in &values.rows {
                    let mut row = Row::new();
                    for (column, expr) in columns.iter().zip(exprs) {
                        row.insert(column.value.clone(), eval(expr, &empty)?);
                    }
                    inserted.push(row);
                }

                self.tables
                    .entry(table_key(table_name))
                    .or_default()
                    .extend(inserted);

                Ok(Vec::new())
            }
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let key = relation_key(table)?;
                let rows = self.tables.entry(key).or_default();

                for row in rows.iter_mut() {
                    if !matches(row, selection.as_ref())? {
                        continue;
                    }

                    let mut changes = Vec::with_capacity(assignments.len());
                    for assignment in assignments {
                        let Some(column) = assignment.id.last() else {
                            continue;
                        };
                        changes.push((column.value.clone(), eval(&assignment.value, row)?));
                    }
                    for (column, value) in changes {
                        row.insert(column, value);
                    }
                }

                Ok(Vec::new())
            }
            Statement::Delete {
                from, selection, ..
            } => {
                let [from] = from.as_slice() else {
                    bail!(
                        ErrorKind::EngineExecutionFailed,
                        "Unsupported statement",
                        "delete must target exactly one table"
                    );
                };
                let key = relation_key(from)?;

                let rows = self.tables.entry(key).or_default();
                let mut kept = Vec::with_capacity(rows.len());
                for row in rows.drain(..) {
                    if !matches(&row, selection.as_ref())? {
                        kept.push(row);
                    }
                }
                *rows = kept;

                Ok(Vec::new())
            }
            other => bail!(
                ErrorKind::EngineExecutionFailed,
                "Unsupported statement",
                format!("the memory engine cannot run `{other}`")
            ),
        }
    }

    fn select(&self, query: &Query) -> AdapterResult<Vec<Row>> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            bail!(
                ErrorKind::EngineExecutionFailed,
                "Unsupported statement",
                "only plain selects are supported"
            );
        };
        let [from] = select.from.as_slice() else {
            bail!(
                ErrorKind::EngineExecutionFailed,
                "Unsupported statement",
                "select must read exactly one table"
            );
        };

        let stored = self
            .tables
            .get(&relation_key(from)?)
            .cloned()
            .unwrap_or_default();

        let mut rows = Vec::with_capacity(stored.len());
        for row in stored {
            if matches(&row, select.selection.as_ref())? {
                rows.push(row);
            }
        }

        if !query.order_by.is_empty() {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let keys = query
                    .order_by
                    .iter()
                    .map(|order| eval(&order.expr, &row))
                    .collect::<AdapterResult<Vec<_>>>()?;
                keyed.push((keys, row));
            }

            keyed.sort_by(|(left, _), (right, _)| {
                for ((order, left), right) in query.order_by.iter().zip(left).zip(right) {
                    let ordering = compare(left, right);
                    let ordering = if order.asc.unwrap_or(true) {
                        ordering
                    } else {
                        ordering.reverse()
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });

            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        if let Some(offset) = &query.offset {
            let offset = as_count(&eval(&offset.value, &Row::new())?)?;
            rows = rows.into_iter().skip(offset).collect();
        }

        if let Some(limit) = &query.limit {
            let limit = as_count(&eval(limit, &Row::new())?)?;
            rows.truncate(limit);
        }

        project(&select.projection, rows)
    }
}

/// Rewrites GoogleSQL backslash escapes into the doubled quote form the parser reads.
fn standard_literals(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '`' => {
                out.push(ch);
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => match chars.next() {
                            Some(escaped) if escaped == ch => {
                                out.push(ch);
                                out.push(ch);
                            }
                            Some('n') if ch == '\'' => out.push('\n'),
                            Some('r') if ch == '\'' => out.push('\r'),
                            Some('t') if ch == '\'' => out.push('\t'),
                            Some(escaped) => out.push(escaped),
                            None => out.push(inner),
                        },
                        _ if inner == ch => {
                            out.push(ch);
                            break;
                        }
                        _ => out.push(inner),
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                out.push(ch);
                for comment in chars.by_ref() {
                    out.push(comment);
                    if comment == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(ch);
                let mut previous = ' ';
                for comment in chars.by_ref() {
                    out.push(comment);
                    if previous == '*' && comment == '/' {
                        break;
                    }
                    previous = comment;
                }
            }
            _ => out.push(ch),
        }
    }

    out
}

fn project(projection: &[SelectItem], rows: Vec<Row>) -> AdapterResult<Vec<Row>> {
    match projection {
        [SelectItem::Wildcard(_)] => Ok(rows),
        [SelectItem::ExprWithAlias { expr, alias }] => {
            Ok(vec![aggregate(expr, alias.value.clone(), &rows)?])
        }
        [SelectItem::UnnamedExpr(expr)] => Ok(vec![aggregate(expr, "f0_".to_owned(), &rows)?]),
        _ => bail!(
            ErrorKind::EngineExecutionFailed,
            "Unsupported statement",
            "only `*` and a single `count` projection are supported"
        ),
    }
}

fn aggregate(expr: &Expr, name: String, rows: &[Row]) -> AdapterResult<Row> {
    let Expr::Function(function) = expr else {
        bail!(
            ErrorKind::EngineExecutionFailed,
            "Unsupported statement",
            format!("unsupported projection `{expr}`")
        );
    };

    if !function.name.to_string().eq_ignore_ascii_case("count") {
        bail!(
            ErrorKind::EngineExecutionFailed,
            "Unsupported statement",
            format!("unsupported function `{}`", function.name)
        );
    }

    let mut count = 0u64;
    for row in rows {
        let counted = match function.args.as_slice() {
            [FunctionArg::Unnamed(FunctionArgExpr::Expr(arg))] => !eval(arg, row)?.is_null(),
            _ => true,
        };
        if counted {
            count += 1;
        }
    }

    let mut result = Row::new();
    result.insert(name, Value::from(count));

    Ok(result)
}

fn table_key(name: &ObjectName) -> String {
    name.0
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}

fn relation_key(table: &TableWithJoins) -> AdapterResult<String> {
    match &table.relation {
        TableFactor::Table { name, .. } => Ok(table_key(name)),
        other => bail!(
            ErrorKind::EngineExecutionFailed,
            "Unsupported statement",
            format!("unsupported table reference `{other}`")
        ),
    }
}

fn matches(row: &Row, selection: Option<&Expr>) -> AdapterResult<bool> {
    match selection {
        Some(expr) => Ok(eval(expr, row)? == Value::Bool(true)),
        None => Ok(true),
    }
}

fn eval(expr: &Expr, row: &Row) -> AdapterResult<Value> {
    let value = match expr {
        Expr::Identifier(ident) => row.get(&ident.value).cloned().unwrap_or(Value::Null),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .and_then(|ident| row.get(&ident.value))
            .cloned()
            .unwrap_or(Value::Null),
        Expr::Value(value) => literal(value)?,
        Expr::Nested(inner) => eval(inner, row)?,
        Expr::UnaryOp { op, expr } => {
            let operand = eval(expr, row)?;
            match op {
                UnaryOperator::Minus => match operand.as_i64() {
                    Some(int) => Value::from(-int),
                    None => operand.as_f64().map(|float| Value::from(-float)).unwrap_or(Value::Null),
                },
                UnaryOperator::Not => match operand {
                    Value::Bool(flag) => Value::Bool(!flag),
                    _ => Value::Null,
                },
                _ => operand,
            }
        }
        Expr::IsNull(inner) => Value::Bool(eval(inner, row)?.is_null()),
        Expr::IsNotNull(inner) => Value::Bool(!eval(inner, row)?.is_null()),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let needle = eval(expr, row)?;
            if needle.is_null() {
                Value::Null
            } else {
                let mut found = false;
                for candidate in list {
                    if compare_eq(&needle, &eval(candidate, row)?) {
                        found = true;
                        break;
                    }
                }
                Value::Bool(found != *negated)
            }
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => match (eval(expr, row)?, eval(pattern, row)?) {
            (Value::String(text), Value::String(pattern)) => {
                Value::Bool(like(&text, &pattern) != *negated)
            }
            _ => Value::Null,
        },
        Expr::BinaryOp { left, op, right } => {
            let left = eval(left, row)?;
            let right = eval(right, row)?;
            binary(&left, op, &right)
        }
        Expr::Array(array) => Value::Array(
            array
                .elem
                .iter()
                .map(|item| eval(item, row))
                .collect::<AdapterResult<Vec<_>>>()?,
        ),
        other => bail!(
            ErrorKind::EngineExecutionFailed,
            "Unsupported expression",
            format!("the memory engine cannot evaluate `{other}`")
        ),
    };

    Ok(value)
}

fn binary(left: &Value, op: &BinaryOperator, right: &Value) -> Value {
    match op {
        BinaryOperator::And => match (left, right) {
            (Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
            (Value::Bool(true), Value::Bool(true)) => Value::Bool(true),
            _ => Value::Null,
        },
        BinaryOperator::Or => match (left, right) {
            (Value::Bool(true), _) | (_, Value::Bool(true)) => Value::Bool(true),
            (Value::Bool(false), Value::Bool(false)) => Value::Bool(false),
            _ => Value::Null,
        },
        _ if left.is_null() || right.is_null() => Value::Null,
        BinaryOperator::Eq => Value::Bool(compare_eq(left, right)),
        BinaryOperator::NotEq => Value::Bool(!compare_eq(left, right)),
        BinaryOperator::Lt => Value::Bool(compare(left, right) == Ordering::Less),
        BinaryOperator::LtEq => Value::Bool(compare(left, right) != Ordering::Greater),
        BinaryOperator::Gt => Value::Bool(compare(left, right) == Ordering::Greater),
        BinaryOperator::GtEq => Value::Bool(compare(left, right) != Ordering::Less),
        _ => Value::Null,
    }
}

fn literal(value: &SqlValue) -> AdapterResult<Value> {
    let value = match value {
        SqlValue::Number(number, _) => match number.parse::<i64>() {
            Ok(int) => Value::from(int),
            Err(_) => number
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        },
        SqlValue::SingleQuotedString(text) | SqlValue::DoubleQuotedString(text) => {
            Value::String(text.clone())
        }
        SqlValue::Boolean(flag) => Value::Bool(*flag),
        SqlValue::Null => Value::Null,
        other => bail!(
            ErrorKind::EngineExecutionFailed,
            "Unsupported expression",
            format!("unsupported literal `{other}`")
        ),
    };

    Ok(value)
}

fn as_count(value: &Value) -> AdapterResult<usize> {
    match value.as_u64() {
        Some(count) => Ok(usize::try_from(count).unwrap_or(usize::MAX)),
        None => bail!(
            ErrorKind::EngineExecutionFailed,
            "Invalid row count",
            format!("`{value}` is not a valid limit or offset")
        ),
    }
}

fn compare_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => compare(left, right) == Ordering::Equal,
        _ => left == right,
    }
}

/// Orders values the way BigQuery sorts them ascending, nulls first.
fn compare(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(left), Value::Number(right)) => match (left.as_i64(), right.as_i64()) {
            (Some(left), Some(right)) => left.cmp(&right),
            _ => left
                .as_f64()
                .partial_cmp(&right.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(left), Value::String(right)) => left.cmp(right),
        (Value::Bool(left), Value::Bool(right)) => left.cmp(right),
        _ => Ordering::Equal,
    }
}

/// Matches `text` against a `like` pattern where `%` is any run and `_` any single character.
fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|ch| *ch == '%')
}
