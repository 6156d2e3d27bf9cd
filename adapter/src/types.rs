//! Row and entity representations shared by every layer.

use serde_json::{Map, Value};

/// One result row, keyed by column name in result order.
pub type Row = Map<String, Value>;

/// An entity payload written by insert or used as an update `SET` list.
pub type Entity = Map<String, Value>;

/// Name under which `count` results are read back.
pub const COUNT_COLUMN: &str = "count";

/// Generic identifier key renamed to the configured primary key column.
pub const GENERIC_ID_KEY: &str = "id";
