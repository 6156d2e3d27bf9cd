//! Normalization of loosely typed filters.
//!
//! Callers pass a [`RawFilter`], usually deserialized from a request payload. [`normalize`]
//! turns it into a [`FilterDescriptor`] the SQL builder can consume without further checks:
//! the generic `id` key is renamed to the primary key column, denylisted columns are dropped
//! from the query, the search fields and the sort, the three accepted sort shapes collapse into
//! one ordered list and unusable limits or offsets are ignored.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::types::GENERIC_ID_KEY;

/// Sort input as accepted from callers.
///
/// All three shapes describing the same ordering normalize to the same [`SortKey`] list:
/// `"name -age"`, `["name", "-age"]` and `{"name": 1, "age": -1}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SortInput {
    /// Space or comma separated columns, `-` prefix for descending.
    Text(String),
    /// Ordered list of column tokens, `-` prefix for descending.
    List(Vec<String>),
    /// Ordered mapping of column to a signed number, positive for ascending.
    Map(Map<String, Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub column: String,
    pub direction: SortDirection,
}

/// Filter as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFilter {
    /// Column equality constraints.
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default)]
    pub sort: Option<SortInput>,
    /// Free text matched with `like` against `search_fields`.
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub search_fields: Vec<String>,
    /// Kept untyped so that unusable values are ignored instead of failing deserialization.
    #[serde(default)]
    pub limit: Option<Value>,
    #[serde(default)]
    pub offset: Option<Value>,
}

impl RawFilter {
    /// Creates a filter with only equality constraints.
    pub fn with_query(query: Map<String, Value>) -> Self {
        Self {
            query,
            ..Self::default()
        }
    }
}

/// Normalized, validated filter consumed by the SQL builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterDescriptor {
    pub where_clause: Map<String, Value>,
    pub sort: Vec<SortKey>,
    pub search_term: Option<String>,
    pub search_fields: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub count_only: bool,
}

impl FilterDescriptor {
    /// Returns `true` when the filter constrains nothing.
    pub fn is_unconstrained(&self) -> bool {
        self.where_clause.is_empty() && self.search().is_none()
    }

    /// Returns the search term and fields when a search applies.
    pub fn search(&self) -> Option<(&str, &[String])> {
        match self.search_term.as_deref() {
            Some(term) if !term.is_empty() && !self.search_fields.is_empty() => {
                Some((term, self.search_fields.as_slice()))
            }
            _ => None,
        }
    }
}

/// Normalizes a raw filter for a table whose primary key column is `primary_key`.
pub fn normalize(raw: RawFilter, primary_key: &str, denylist: &[String]) -> FilterDescriptor {
    FilterDescriptor {
        where_clause: normalize_where(raw.query, primary_key, denylist),
        sort: raw
            .sort
            .map(normalize_sort)
            .unwrap_or_default()
            .into_iter()
            .filter(|key| !is_denied(&key.column, denylist))
            .collect(),
        search_term: raw.search.filter(|term| !term.is_empty()),
        search_fields: raw
            .search_fields
            .into_iter()
            .filter(|field| !is_denied(field, denylist))
            .collect(),
        limit: raw.limit.as_ref().and_then(parse_integer).filter(|l| *l > 0).map(|l| l as u64),
        offset: raw.offset.as_ref().and_then(parse_integer).filter(|o| *o > 0).map(|o| o as u64),
        count_only: false,
    }
}

/// Renames `id` to `primary_key` and drops denylisted keys, keeping key order.
///
/// When both `id` and `primary_key` are present, the value of `id` wins.
pub fn normalize_where(
    query: Map<String, Value>,
    primary_key: &str,
    denylist: &[String],
) -> Map<String, Value> {
    let has_generic_id = query.contains_key(GENERIC_ID_KEY);
    let mut normalized = Map::with_capacity(query.len());

    for (key, value) in query {
        let key = if key == GENERIC_ID_KEY {
            primary_key.to_owned()
        } else if key == primary_key && has_generic_id {
            continue;
        } else {
            key
        };

        if is_denied(&key, denylist) {
            continue;
        }

        normalized.insert(key, value);
    }

    normalized
}

fn is_denied(column: &str, denylist: &[String]) -> bool {
    denylist.iter().any(|denied| denied == column)
}

/// Collapses any [`SortInput`] shape into an ordered list of sort keys.
pub fn normalize_sort(sort: SortInput) -> Vec<SortKey> {
    match sort {
        SortInput::Text(text) => text
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter_map(parse_sort_token)
            .collect(),
        SortInput::List(tokens) => tokens
            .iter()
            .flat_map(|token| token.split(|c: char| c == ',' || c.is_whitespace()))
            .filter_map(parse_sort_token)
            .collect(),
        SortInput::Map(entries) => entries
            .into_iter()
            .filter_map(|(column, order)| {
                let order = order.as_f64().or_else(|| order.as_str()?.trim().parse().ok())?;
                let direction = if order > 0.0 {
                    SortDirection::Asc
                } else {
                    SortDirection::Desc
                };

                Some(SortKey { column, direction })
            })
            .collect(),
    }
}

fn parse_sort_token(token: &str) -> Option<SortKey> {
    let token = token.trim();
    let (column, direction) = match token.strip_prefix('-') {
        Some(column) => (column, SortDirection::Desc),
        None => (token.strip_prefix('+').unwrap_or(token), SortDirection::Asc),
    };

    if column.is_empty() {
        return None;
    }

    Some(SortKey {
        column: column.to_owned(),
        direction,
    })
}

/// Reads an integer from a JSON number or a numeric string.
fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}
