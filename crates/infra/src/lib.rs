//! Storage adapters for the HRIS auth core.
//!
//! - [`InMemoryAuthStore`]: process-local tables, used by tests and local tooling.
//! - [`PostgresAuthStore`]: sqlx/Postgres persistence with schema bootstrap.

pub mod memory_store;
pub mod postgres;

pub use memory_store::InMemoryAuthStore;
pub use postgres::PostgresAuthStore;

#[cfg(test)]
mod integration_tests;
