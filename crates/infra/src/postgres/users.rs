use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::{FromRow, Postgres, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use hris_auth::{CredentialStore, RoleCode, StoreError, StoreResult, User, UserStatus};
use hris_core::{ExpectedVersion, UserId};

use super::{corrupt, expected_version, map_sqlx_error, PostgresAuthStore};

const USER_COLUMNS: &str =
    "id, email, display_name, password_hash, status, version, created_at, updated_at";

struct UserRow {
    id: Uuid,
    email: String,
    display_name: String,
    password_hash: String,
    status: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name")?,
            password_hash: row.try_get("password_hash")?,
            status: row.try_get("status")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl UserRow {
    fn into_user(self, roles: BTreeSet<RoleCode>) -> StoreResult<User> {
        let status: UserStatus = self.status.parse().map_err(|e| corrupt("user status", e))?;
        let mut user = User::new(self.email, self.display_name, self.password_hash).with_role_set(roles);
        user.id = UserId::from_uuid(self.id);
        user.status = status;
        user.version = self.version as u64;
        user.created_at = self.created_at;
        user.updated_at = self.updated_at;
        Ok(user)
    }
}

impl PostgresAuthStore {
    /// Fetch user rows plus their role codes in two round-trips.
    async fn hydrate_users(&self, operation: &str, rows: Vec<PgRow>) -> StoreResult<Vec<User>> {
        let rows = rows
            .iter()
            .map(UserRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error(operation, e))?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let assignments = sqlx::query(
            r#"
            SELECT ur.user_id, r.code
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let mut roles: HashMap<Uuid, BTreeSet<RoleCode>> = HashMap::new();
        for row in assignments {
            let user_id: Uuid = row.try_get("user_id").map_err(|e| map_sqlx_error(operation, e))?;
            let code: String = row.try_get("code").map_err(|e| map_sqlx_error(operation, e))?;
            roles.entry(user_id).or_default().insert(RoleCode::new(code));
        }

        rows.into_iter()
            .map(|row| {
                let codes = roles.remove(&row.id).unwrap_or_default();
                row.into_user(codes)
            })
            .collect()
    }

    async fn find_one_user(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> StoreResult<Option<User>> {
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        match row {
            Some(row) => Ok(self.hydrate_users(operation, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

async fn replace_user_roles(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    user_id: Uuid,
    roles: &BTreeSet<RoleCode>,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    let codes: Vec<String> = roles.iter().map(|c| c.to_string()).collect();
    sqlx::query(
        r#"
        INSERT INTO user_roles (user_id, role_id)
        SELECT $1, id FROM roles WHERE code = ANY($2)
        "#,
    )
    .bind(user_id)
    .bind(&codes)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl CredentialStore for PostgresAuthStore {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.find_one_user("find_user", sqlx::query(&sql).bind(id.as_uuid()))
            .await
    }

    #[instrument(skip(self, email), err)]
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        self.find_one_user("find_user_by_email", sqlx::query(&sql).bind(email))
            .await
    }

    #[instrument(skip(self, user), fields(user_id = %user.id), err)]
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO users (id, email, display_name, password_hash, status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(user.version as i64)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_user", e))?;

        replace_user_roles(&mut tx, *user.id.as_uuid(), user.roles())
            .await
            .map_err(|e| map_sqlx_error("insert_user_roles", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, user), fields(user_id = %user.id, expected = ?expected), err)]
    async fn update_user(&self, user: &User, expected: ExpectedVersion) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET email = $2, display_name = $3, password_hash = $4, status = $5,
                updated_at = $6, version = version + 1
            WHERE id = $1 AND ($7::BIGINT IS NULL OR version = $7)
            RETURNING version
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .bind(user.status.as_str())
        .bind(user.updated_at)
        .bind(expected_version(expected))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_user", e))?;

        let Some(version) = version else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "optimistic concurrency check failed for user {}: expected {expected:?}",
                user.id
            )));
        };

        replace_user_roles(&mut tx, *user.id.as_uuid(), user.roles())
            .await
            .map_err(|e| map_sqlx_error("update_user_roles", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(version as u64)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn count_users(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_users", e))?;
        Ok(count as u64)
    }

    #[instrument(skip(self), fields(role_code = %code, count = tracing::field::Empty), err)]
    async fn users_with_role(&self, code: &RoleCode) -> StoreResult<Vec<User>> {
        let sql = format!(
            r#"
            SELECT {cols}
            FROM users u
            WHERE EXISTS (
                SELECT 1 FROM user_roles ur JOIN roles r ON r.id = ur.role_id
                WHERE ur.user_id = u.id AND r.code = $1
            )
            "#,
            cols = USER_COLUMNS
                .split(", ")
                .map(|c| format!("u.{c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let rows = sqlx::query(&sql)
            .bind(code.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("users_with_role", e))?;
        let users = self.hydrate_users("users_with_role", rows).await?;
        Span::current().record("count", users.len());
        Ok(users)
    }
}
