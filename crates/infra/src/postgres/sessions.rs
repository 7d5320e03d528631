use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::{instrument, Span};

use hris_auth::{RefreshSession, RefreshSessionStore, StoreResult};
use hris_core::{SessionId, UserId};

use super::{map_sqlx_error, PostgresAuthStore};

fn session_from_row(operation: &str, row: &PgRow) -> StoreResult<RefreshSession> {
    let decode = |e| map_sqlx_error(operation, e);
    Ok(RefreshSession {
        id: SessionId::from_uuid(row.try_get("id").map_err(decode)?),
        token: row.try_get("token").map_err(decode)?,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        expires_at: row.try_get("expires_at").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

#[async_trait]
impl RefreshSessionStore for PostgresAuthStore {
    #[instrument(skip(self, session), fields(session_id = %session.id, user_id = %session.user_id), err)]
    async fn insert_session(&self, session: &RefreshSession) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (id, token, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(session.id.as_uuid())
        .bind(&session.token)
        .bind(session.user_id.as_uuid())
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_session", e))?;
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn find_session(&self, token: &str) -> StoreResult<Option<RefreshSession>> {
        let row = sqlx::query(
            "SELECT id, token, user_id, expires_at, created_at FROM refresh_sessions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_session", e))?;
        row.map(|row| session_from_row("find_session", &row))
            .transpose()
    }

    /// Single statement, so two concurrent callers can never both get the row.
    #[instrument(skip_all, err)]
    async fn take_session(&self, token: &str) -> StoreResult<Option<RefreshSession>> {
        let row = sqlx::query(
            r#"
            DELETE FROM refresh_sessions
            WHERE token = $1
            RETURNING id, token, user_id, expires_at, created_at
            "#,
        )
        .bind(token)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("take_session", e))?;
        row.map(|row| session_from_row("take_session", &row))
            .transpose()
    }

    /// Delete and insert share one transaction; dropping it before commit rolls
    /// the delete back.
    #[instrument(
        skip_all,
        fields(user_id = %replacement.user_id, new_session = %replacement.id),
        err
    )]
    async fn rotate_session(
        &self,
        old_token: &str,
        replacement: &RefreshSession,
    ) -> StoreResult<Option<RefreshSession>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let row = sqlx::query(
            r#"
            DELETE FROM refresh_sessions
            WHERE token = $1 AND user_id = $2 AND expires_at > $3
            RETURNING id, token, user_id, expires_at, created_at
            "#,
        )
        .bind(old_token)
        .bind(replacement.user_id.as_uuid())
        .bind(replacement.created_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rotate_session", e))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let old = session_from_row("rotate_session", &row)?;

        sqlx::query(
            r#"
            INSERT INTO refresh_sessions (id, token, user_id, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(replacement.id.as_uuid())
        .bind(&replacement.token)
        .bind(replacement.user_id.as_uuid())
        .bind(replacement.expires_at)
        .bind(replacement.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rotate_session", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Some(old))
    }

    #[instrument(skip(self), fields(user_id = %user, deleted = tracing::field::Empty), err)]
    async fn delete_sessions_for(&self, user: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE user_id = $1")
            .bind(user.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_sessions_for", e))?;
        Span::current().record("deleted", result.rows_affected());
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(deleted = tracing::field::Empty), err)]
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_expired", e))?;
        Span::current().record("deleted", result.rows_affected());
        Ok(result.rows_affected())
    }
}
