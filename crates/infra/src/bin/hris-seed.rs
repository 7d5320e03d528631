//! Bootstrap a Postgres database: create the schema, then seed the default
//! permission catalogue, the ADMIN and EMPLOYEE roles and the first administrator.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use hris_auth::{AdminSeed, Argon2PasswordHasher, AuthConfig, AuthStores, Seeder};
use hris_infra::PostgresAuthStore;

const DEFAULT_ADMIN_EMAIL: &str = "admin@hris.com";
const DEFAULT_ADMIN_PASSWORD: &str = "Admin@123";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hris_observability::init();

    let config = AuthConfig::from_env().context("invalid auth configuration")?;
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;

    let email = std::env::var("HRIS_ADMIN_EMAIL").unwrap_or_else(|_| DEFAULT_ADMIN_EMAIL.to_string());
    let password = std::env::var("HRIS_ADMIN_PASSWORD").unwrap_or_else(|_| {
        tracing::warn!("HRIS_ADMIN_PASSWORD not set; using insecure dev default");
        DEFAULT_ADMIN_PASSWORD.to_string()
    });

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(config.storage_timeout)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PostgresAuthStore::new(pool));
    store.migrate().await.context("schema migration failed")?;

    let report = Seeder::new(AuthStores::from_shared(store), Arc::new(Argon2PasswordHasher::default()))
        .with_storage_timeout(config.storage_timeout)
        .run(&AdminSeed {
            email,
            display_name: "System Administrator".to_string(),
            password,
        })
        .await
        .context("seeding failed")?;

    tracing::info!(
        permissions = report.permissions_created,
        roles = report.roles_created,
        admin_created = report.admin_created.is_some(),
        "bootstrap finished"
    );
    Ok(())
}
