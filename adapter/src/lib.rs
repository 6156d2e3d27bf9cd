//! Multi-tenant BigQuery database adapter.
//!
//! [`adapter::BigQueryAdapter`] exposes a small CRUD surface (find, count, insert, update,
//! remove) over tenant specific BigQuery tables. Every call carries a [`context::CallContext`]
//! naming the tenant; a [`router::TenantRouter`] turns it into a table and an execution region,
//! loosely typed filters are normalized by [`filter`], SQL is produced by [`sql`] and executed as
//! BigQuery jobs by a [`engine::QueryEngine`].

pub mod adapter;
pub mod context;
pub mod engine;
pub mod error;
pub mod filter;
mod macros;
pub mod router;
pub mod sql;
pub mod types;
