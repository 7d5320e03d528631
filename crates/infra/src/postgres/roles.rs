use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, Postgres, Row};
use tracing::instrument;
use uuid::Uuid;

use hris_auth::{PermissionName, Role, RoleCode, RoleGraph, RoleType, StoreError, StoreResult};
use hris_core::{ExpectedVersion, RoleId};

use super::{corrupt, expected_version, map_sqlx_error, PostgresAuthStore};

const ROLE_SELECT: &str = r#"
    SELECT r.id, r.code, r.name, r.description, r.role_type, r.is_system, r.is_default,
           r.active, r.priority, p.code AS parent_code, r.version, r.created_at, r.updated_at
    FROM roles r
    LEFT JOIN roles p ON p.id = r.parent_role_id
"#;

struct RoleRow {
    id: Uuid,
    code: String,
    name: String,
    description: Option<String>,
    role_type: String,
    is_system: bool,
    is_default: bool,
    active: bool,
    priority: i32,
    parent_code: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            role_type: row.try_get("role_type")?,
            is_system: row.try_get("is_system")?,
            is_default: row.try_get("is_default")?,
            active: row.try_get("active")?,
            priority: row.try_get("priority")?,
            parent_code: row.try_get("parent_code")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl RoleRow {
    fn into_role(self, permissions: BTreeSet<PermissionName>) -> StoreResult<Role> {
        let role_type: RoleType = self.role_type.parse().map_err(|e| corrupt("role type", e))?;
        let mut role = Role::new(RoleCode::new(self.code), self.name, role_type)
            .with_parent(self.parent_code.map(RoleCode::new))
            .with_priority(self.priority)
            .with_permissions(permissions);
        role.id = RoleId::from_uuid(self.id);
        role.description = self.description;
        role.is_system = self.is_system;
        role.is_default = self.is_default;
        role.active = self.active;
        role.version = self.version as u64;
        role.created_at = self.created_at;
        role.updated_at = self.updated_at;
        Ok(role)
    }
}

impl PostgresAuthStore {
    async fn fetch_roles(
        &self,
        operation: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> StoreResult<Vec<Role>> {
        let rows = query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        let rows = rows
            .iter()
            .map(RoleRow::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error(operation, e))?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let grants = sqlx::query(
            r#"
            SELECT rp.role_id, p.name
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            "#,
        )
        .bind(&ids)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        let mut permissions: HashMap<Uuid, BTreeSet<PermissionName>> = HashMap::new();
        for row in grants {
            let role_id: Uuid = row.try_get("role_id").map_err(|e| map_sqlx_error(operation, e))?;
            let name: String = row.try_get("name").map_err(|e| map_sqlx_error(operation, e))?;
            permissions
                .entry(role_id)
                .or_default()
                .insert(PermissionName::new(name));
        }

        rows.into_iter()
            .map(|row| {
                let names = permissions.remove(&row.id).unwrap_or_default();
                row.into_role(names)
            })
            .collect()
    }
}

async fn replace_role_permissions(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    role_id: Uuid,
    names: &BTreeSet<PermissionName>,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut **tx)
        .await?;
    let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, id FROM permissions WHERE name = ANY($2)
        "#,
    )
    .bind(role_id)
    .bind(&names)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl RoleGraph for PostgresAuthStore {
    #[instrument(skip(self), fields(role_code = %code), err)]
    async fn find_role(&self, code: &RoleCode) -> StoreResult<Option<Role>> {
        let sql = format!("{ROLE_SELECT} WHERE r.code = $1");
        Ok(self
            .fetch_roles("find_role", sqlx::query(&sql).bind(code.as_str()))
            .await?
            .pop())
    }

    #[instrument(skip(self, codes), fields(count = codes.len()), err)]
    async fn find_roles(&self, codes: &[RoleCode]) -> StoreResult<Vec<Role>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        let sql = format!("{ROLE_SELECT} WHERE r.code = ANY($1) ORDER BY r.code");
        self.fetch_roles("find_roles", sqlx::query(&sql).bind(&codes))
            .await
    }

    #[instrument(skip(self), err)]
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        let sql = format!("{ROLE_SELECT} WHERE r.name = $1");
        Ok(self
            .fetch_roles("find_role_by_name", sqlx::query(&sql).bind(name))
            .await?
            .pop())
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let sql = format!("{ROLE_SELECT} ORDER BY r.priority, r.code");
        self.fetch_roles("list_roles", sqlx::query(&sql)).await
    }

    #[instrument(skip(self, role), fields(role_code = %role.code), err)]
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO roles (
                id, code, name, description, role_type, is_system, is_default, active,
                priority, parent_role_id, version, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9,
                (SELECT id FROM roles WHERE code = $10), $11, $12, $13
            )
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.code.as_str())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.role_type.as_str())
        .bind(role.is_system)
        .bind(role.is_default)
        .bind(role.active)
        .bind(role.priority)
        .bind(role.parent().map(|p| p.to_string()))
        .bind(role.version as i64)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;

        replace_role_permissions(&mut tx, *role.id.as_uuid(), role.permissions())
            .await
            .map_err(|e| map_sqlx_error("insert_role_permissions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    #[instrument(skip(self, role), fields(role_code = %role.code, expected = ?expected), err)]
    async fn update_role(&self, role: &Role, expected: ExpectedVersion) -> StoreResult<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, role_type = $4, is_default = $5, active = $6,
                priority = $7, parent_role_id = (SELECT id FROM roles WHERE code = $8),
                updated_at = $9, version = version + 1
            WHERE code = $1 AND ($10::BIGINT IS NULL OR version = $10)
            RETURNING id, version
            "#,
        )
        .bind(role.code.as_str())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.role_type.as_str())
        .bind(role.is_default)
        .bind(role.active)
        .bind(role.priority)
        .bind(role.parent().map(|p| p.to_string()))
        .bind(role.updated_at)
        .bind(expected_version(expected))
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        let Some(row) = updated else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "optimistic concurrency check failed for role '{}': expected {expected:?}",
                role.code
            )));
        };
        let role_id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("update_role", e))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| map_sqlx_error("update_role", e))?;

        replace_role_permissions(&mut tx, role_id, role.permissions())
            .await
            .map_err(|e| map_sqlx_error("update_role_permissions", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(version as u64)
    }

    #[instrument(skip(self), fields(role_code = %code), err)]
    async fn delete_role(&self, code: &RoleCode) -> StoreResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Detached children and unassigned principals get a version bump.
        sqlx::query(
            r#"
            UPDATE roles
            SET parent_role_id = NULL, version = version + 1
            WHERE parent_role_id = (SELECT id FROM roles WHERE code = $1)
            "#,
        )
        .bind(code.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("detach_child_roles", e))?;

        sqlx::query(
            r#"
            UPDATE users
            SET version = version + 1
            WHERE id IN (
                SELECT ur.user_id
                FROM user_roles ur
                JOIN roles r ON r.id = ur.role_id
                WHERE r.code = $1
            )
            "#,
        )
        .bind(code.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("unassign_role", e))?;

        let result = sqlx::query("DELETE FROM roles WHERE code = $1")
            .bind(code.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(role_code = %code), err)]
    async fn count_assignments(&self, code: &RoleCode) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE r.code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_assignments", e))?;
        Ok(count as u64)
    }
}
