use std::fmt;

use serde_json::Value;

use crate::bail;
use crate::error::{AdapterResult, ErrorKind};

/// Sanitizes a BigQuery identifier for safe backtick quoting.
///
/// Rejects empty identifiers and identifiers containing control characters. Backticks and
/// backslashes are escaped with a backslash following GoogleSQL lexical rules.
pub fn sanitize_identifier(identifier: &str, context: &str) -> AdapterResult<String> {
    if identifier.is_empty() {
        bail!(
            ErrorKind::InvalidTableName,
            "Invalid BigQuery identifier",
            format!("{context} cannot be empty")
        );
    }

    if identifier.chars().any(char::is_control) {
        bail!(
            ErrorKind::InvalidTableName,
            "Invalid BigQuery identifier",
            format!("{context} contains control characters")
        );
    }

    let mut escaped = String::with_capacity(identifier.len());
    for ch in identifier.chars() {
        match ch {
            '`' => escaped.push_str("\\`"),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }

    Ok(escaped)
}

/// Quotes a column name.
pub fn quote_column(column: &str) -> AdapterResult<String> {
    let column = sanitize_identifier(column, "column name")?;

    Ok(format!("`{column}`"))
}

/// A fully-qualified table path quoted as a single identifier, e.g. `` `project.dataset.table` ``.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef(String);

impl TableRef {
    pub fn new(table_name: &str) -> AdapterResult<TableRef> {
        let table_name = sanitize_identifier(table_name, "table name")?;

        Ok(TableRef(format!("`{table_name}`")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders a string as a single quoted GoogleSQL literal.
pub fn quote_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(ch),
        }
    }
    quoted.push('\'');

    quoted
}

/// Renders a JSON value as a GoogleSQL literal.
///
/// Arrays become array literals. Objects have no literal form and are rejected.
pub fn literal(value: &Value) -> AdapterResult<String> {
    match value {
        Value::Null => Ok("null".to_owned()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Number(number) => Ok(number.to_string()),
        Value::String(text) => Ok(quote_string(text)),
        Value::Array(items) => {
            let items = items.iter().map(literal).collect::<AdapterResult<Vec<_>>>()?;

            Ok(format!("[{}]", items.join(", ")))
        }
        Value::Object(_) => bail!(
            ErrorKind::InvalidData,
            "Unsupported value in SQL",
            "nested objects cannot be written as SQL literals"
        ),
    }
}
