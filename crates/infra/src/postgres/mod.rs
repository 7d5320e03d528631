//! Postgres-backed implementation of the `hris-auth` storage traits.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate email, role code/name, permission name/triple |
//! | Database (foreign key violation) | `23503` | `Conflict` | Referenced row deleted concurrently |
//! | Database (other) | Any other | `Unavailable` | Other database errors |
//! | Decode / ColumnDecode / ColumnNotFound | N/A | `Corrupt` | Row cannot be mapped back into the model |
//! | PoolTimedOut / PoolClosed / Io / other | N/A | `Unavailable` | Connectivity |
//!
//! ## Concurrency
//!
//! Role and principal updates carry `WHERE version = $n`; a miss is reported as
//! `Conflict`. Refresh rotation runs `DELETE ... RETURNING` and the replacement
//! `INSERT` in one transaction, so only one caller can consume a token and a
//! failed insert leaves the old token in place.

mod permissions;
mod roles;
mod schema;
mod sessions;
mod users;

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, instrument};

use hris_auth::StoreError;
use hris_core::ExpectedVersion;

#[derive(Debug, Clone)]
pub struct PostgresAuthStore {
    pool: Arc<PgPool>,
}

impl PostgresAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in schema::STATEMENTS {
            sqlx::query(*statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        info!(statements = schema::STATEMENTS.len(), "schema migrated");
        Ok(())
    }
}

/// `None` = no version predicate.
fn expected_version(expected: ExpectedVersion) -> Option<i64> {
    match expected {
        ExpectedVersion::Any => None,
        ExpectedVersion::Exact(v) => Some(v as i64),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("23503") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::RowNotFound => {
            StoreError::Corrupt(format!("failed to map row in {}: {}", operation, err))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn corrupt(what: &str, err: impl core::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("invalid {what}: {err}"))
}
