//! SQL generation.
//!
//! [`builder`] turns normalized filters and entity payloads into GoogleSQL text using one
//! quoting convention from [`quote`]: identifiers and table paths in backticks, strings in single
//! quotes. Statements that must run together are collected in a [`SqlBatch`].

pub mod builder;
pub mod quote;
mod sequencer;

pub use quote::TableRef;
pub use sequencer::SqlBatch;
