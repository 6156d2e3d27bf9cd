//! GoogleSQL generation for the adapter operations.

use serde_json::{Map, Value};

use crate::bail;
use crate::error::{AdapterResult, ErrorKind};
use crate::filter::{FilterDescriptor, SortDirection};
use crate::sql::quote::{TableRef, literal, quote_column, quote_string};
use crate::sql::sequencer::SqlBatch;
use crate::types::{COUNT_COLUMN, Entity};

/// LIMIT emitted when only an OFFSET is requested, BigQuery rejects OFFSET without LIMIT.
const UNBOUNDED_LIMIT: i64 = i64::MAX;

/// Builds the `select` for a find, or the count query when `count_only` is set.
pub fn select(
    table: &TableRef,
    descriptor: &FilterDescriptor,
    primary_key: &str,
) -> AdapterResult<String> {
    if descriptor.count_only {
        return count(table, descriptor, primary_key);
    }

    let mut sql = format!("select * from {table} where {}", where_sql(descriptor)?);

    if !descriptor.sort.is_empty() {
        let order_by = descriptor
            .sort
            .iter()
            .map(|key| -> AdapterResult<String> {
                let direction = match key.direction {
                    SortDirection::Asc => "asc",
                    SortDirection::Desc => "desc",
                };
                Ok(format!("{} {direction}", quote_column(&key.column)?))
            })
            .collect::<AdapterResult<Vec<_>>>()?;
        sql.push_str(&format!(" order by {}", order_by.join(", ")));
    }

    match (descriptor.limit, descriptor.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" limit {limit} offset {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" limit {limit}")),
        (None, Some(offset)) => sql.push_str(&format!(" limit {UNBOUNDED_LIMIT} offset {offset}")),
        (None, None) => {}
    }

    Ok(sql)
}

/// Builds a count over the primary key. Sort, limit and offset are ignored.
pub fn count(
    table: &TableRef,
    descriptor: &FilterDescriptor,
    primary_key: &str,
) -> AdapterResult<String> {
    Ok(format!(
        "select count({}) as {} from {table} where {}",
        quote_column(primary_key)?,
        quote_column(COUNT_COLUMN)?,
        where_sql(descriptor)?
    ))
}

/// Builds the condition of a filter, `true` when it constrains nothing.
///
/// Equalities are joined with `and`. A search adds an `or` group of `like` matches, which is
/// combined with the equalities as `(equalities) and (search)`.
pub fn where_sql(descriptor: &FilterDescriptor) -> AdapterResult<String> {
    let equalities = equality_sql(&descriptor.where_clause)?;

    let search = match descriptor.search() {
        Some((term, fields)) => {
            let pattern = quote_string(&format!("%{term}%"));
            let matches = fields
                .iter()
                .map(|field| -> AdapterResult<String> {
                    Ok(format!("{} like {pattern}", quote_column(field)?))
                })
                .collect::<AdapterResult<Vec<_>>>()?;
            Some(matches.join(" or "))
        }
        None => None,
    };

    Ok(match (equalities, search) {
        (Some(equalities), Some(search)) => format!("({equalities}) and ({search})"),
        (Some(equalities), None) => equalities,
        (None, Some(search)) => search,
        (None, None) => "true".to_owned(),
    })
}

/// Renders column constraints joined with `and`, `None` for an empty map.
///
/// `null` becomes `is null`, an array becomes `in (...)` and an empty array matches nothing.
pub fn equality_sql(constraints: &Map<String, Value>) -> AdapterResult<Option<String>> {
    if constraints.is_empty() {
        return Ok(None);
    }

    let clauses = constraints
        .iter()
        .map(|(column, value)| -> AdapterResult<String> {
            let column = quote_column(column)?;
            match value {
                Value::Null => Ok(format!("{column} is null")),
                Value::Array(values) if values.is_empty() => Ok("false".to_owned()),
                Value::Array(values) => {
                    let values = values.iter().map(literal).collect::<AdapterResult<Vec<_>>>()?;
                    Ok(format!("{column} in ({})", values.join(", ")))
                }
                value => Ok(format!("{column} = {}", literal(value)?)),
            }
        })
        .collect::<AdapterResult<Vec<_>>>()?;

    Ok(Some(clauses.join(" and ")))
}

/// Builds an insert of `entities` followed by a read of the inserted primary keys.
///
/// Columns are the union of the entity keys in first seen order, missing values are `null`.
/// Every entity must carry a primary key value.
pub fn insert(
    table: &TableRef,
    primary_key: &str,
    entities: &[Entity],
) -> AdapterResult<SqlBatch> {
    if entities.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "Nothing to insert",
            "at least one entity is required"
        );
    }

    let mut columns: Vec<&str> = Vec::new();
    let mut keys = Vec::with_capacity(entities.len());
    for (index, entity) in entities.iter().enumerate() {
        match entity.get(primary_key) {
            Some(key) if !key.is_null() => keys.push(key.clone()),
            _ => bail!(
                ErrorKind::InvalidData,
                "Entity is missing its primary key",
                format!("entity at position {index} has no `{primary_key}` value")
            ),
        }

        for column in entity.keys() {
            if !columns.contains(&column.as_str()) {
                columns.push(column.as_str());
            }
        }
    }

    let column_list = columns
        .iter()
        .map(|column| quote_column(column))
        .collect::<AdapterResult<Vec<_>>>()?;

    let rows = entities
        .iter()
        .map(|entity| -> AdapterResult<String> {
            let values = columns
                .iter()
                .map(|column| literal(entity.get(*column).unwrap_or(&Value::Null)))
                .collect::<AdapterResult<Vec<_>>>()?;
            Ok(format!("({})", values.join(", ")))
        })
        .collect::<AdapterResult<Vec<_>>>()?;

    let insert = format!(
        "insert into {table} ({}) values {}",
        column_list.join(", "),
        rows.join(", ")
    );

    let key_constraint = if keys.len() == 1 {
        keys.remove(0)
    } else {
        Value::Array(keys)
    };
    let read_back = read_where(table, primary_key, key_constraint)?;

    Ok(SqlBatch::new(insert).then(read_back))
}

/// Builds an update of the rows matching `constraints` followed by a read with the same condition.
pub fn update(
    table: &TableRef,
    constraints: &Map<String, Value>,
    changes: &Entity,
) -> AdapterResult<SqlBatch> {
    if changes.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "Nothing to update",
            "the update payload has no columns"
        );
    }

    let assignments = changes
        .iter()
        .map(|(column, value)| -> AdapterResult<String> {
            Ok(format!("{} = {}", quote_column(column)?, literal(value)?))
        })
        .collect::<AdapterResult<Vec<_>>>()?;
    let condition = equality_sql(constraints)?.unwrap_or_else(|| "true".to_owned());

    Ok(SqlBatch::new(format!(
        "update {table} set {} where {condition}",
        assignments.join(", ")
    ))
    .then(format!("select * from {table} where {condition}")))
}

/// Builds the read of the rows matching `constraints`, used as the pre-image of a delete.
pub fn select_where(table: &TableRef, constraints: &Map<String, Value>) -> AdapterResult<String> {
    let condition = equality_sql(constraints)?.unwrap_or_else(|| "true".to_owned());

    Ok(format!("select * from {table} where {condition}"))
}

/// Builds a delete of the rows matching `constraints`.
pub fn delete(table: &TableRef, constraints: &Map<String, Value>) -> AdapterResult<String> {
    let condition = equality_sql(constraints)?.unwrap_or_else(|| "true".to_owned());

    Ok(format!("delete from {table} where {condition}"))
}

fn read_where(table: &TableRef, column: &str, value: Value) -> AdapterResult<String> {
    let mut constraints = Map::new();
    constraints.insert(column.to_owned(), value);

    select_where(table, &constraints)
}
