//! Job execution engines.
//!
//! The adapter talks to the warehouse only through the [`QueryEngine`] trait. [`bigquery`]
//! submits real BigQuery jobs, [`memory`] evaluates the generated SQL against in-memory tables.

mod base;
pub mod bigquery;
pub mod memory;

pub use base::{QueryEngine, QueryOutput};
