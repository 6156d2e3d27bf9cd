//! Tracing setup shared by the adapter binaries and tests.

pub mod tracing;
