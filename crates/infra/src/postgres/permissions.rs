use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use tracing::instrument;
use uuid::Uuid;

use hris_auth::{
    ActionType, Permission, PermissionCatalog, PermissionName, ResourceType, Scope, StoreResult,
};
use hris_core::PermissionId;

use super::{corrupt, map_sqlx_error, PostgresAuthStore};

const PERMISSION_COLUMNS: &str = "id, name, resource, action, scope, description, category, \
                                  sensitive, active, created_at, updated_at";

struct PermissionRow {
    id: Uuid,
    name: String,
    resource: String,
    action: String,
    scope: Option<String>,
    description: Option<String>,
    category: Option<String>,
    sensitive: bool,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for PermissionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PermissionRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            resource: row.try_get("resource")?,
            action: row.try_get("action")?,
            scope: row.try_get("scope")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            sensitive: row.try_get("sensitive")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl PermissionRow {
    fn into_permission(self) -> StoreResult<Permission> {
        let resource: ResourceType = self.resource.parse().map_err(|e| corrupt("resource", e))?;
        let action: ActionType = self.action.parse().map_err(|e| corrupt("action", e))?;
        let scope = self
            .scope
            .as_deref()
            .map(Scope::parse)
            .transpose()
            .map_err(|e| corrupt("scope", e))?;
        Ok(Permission {
            id: PermissionId::from_uuid(self.id),
            name: PermissionName::new(self.name),
            resource,
            action,
            scope,
            description: self.description,
            category: self.category,
            sensitive: self.sensitive,
            active: self.active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_permissions(operation: &str, rows: Vec<PgRow>) -> StoreResult<Vec<Permission>> {
    rows.iter()
        .map(|row| {
            PermissionRow::from_row(row)
                .map_err(|e| map_sqlx_error(operation, e))?
                .into_permission()
        })
        .collect()
}

#[async_trait]
impl PermissionCatalog for PostgresAuthStore {
    #[instrument(skip(self), fields(permission = %name), err)]
    async fn find_permission(&self, name: &PermissionName) -> StoreResult<Option<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = $1");
        let rows = sqlx::query(&sql)
            .bind(name.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_permission", e))?;
        Ok(into_permissions("find_permission", rows)?.pop())
    }

    #[instrument(skip(self, names), fields(count = names.len()), err)]
    async fn find_permissions(&self, names: &[PermissionName]) -> StoreResult<Vec<Permission>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE name = ANY($1) ORDER BY name"
        );
        let rows = sqlx::query(&sql)
            .bind(&names)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_permissions", e))?;
        into_permissions("find_permissions", rows)
    }

    #[instrument(skip(self), fields(resource = %resource, action = %action, scope = %scope), err)]
    async fn find_by_triple(
        &self,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> StoreResult<Option<Permission>> {
        let sql = format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions \
             WHERE resource = $1 AND action = $2 AND effective_scope = $3"
        );
        let rows = sqlx::query(&sql)
            .bind(resource.as_str())
            .bind(action.as_str())
            .bind(scope.as_str())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_triple", e))?;
        Ok(into_permissions("find_by_triple", rows)?.pop())
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY name");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;
        into_permissions("list_permissions", rows)
    }

    #[instrument(skip(self, permission), fields(permission = %permission.name), err)]
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO permissions (
                id, name, resource, action, scope, effective_scope, description, category,
                sensitive, active, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(permission.id.as_uuid())
        .bind(permission.name.as_str())
        .bind(permission.resource.as_str())
        .bind(permission.action.as_str())
        .bind(permission.scope.as_ref().map(|s| s.to_string()))
        .bind(permission.effective_scope().to_string())
        .bind(&permission.description)
        .bind(&permission.category)
        .bind(permission.sensitive)
        .bind(permission.active)
        .bind(permission.created_at)
        .bind(permission.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self, permission), fields(permission = %permission.name), err)]
    async fn update_permission(&self, permission: &Permission) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE permissions
            SET description = $2, category = $3, sensitive = $4, active = $5, updated_at = $6
            WHERE name = $1
            "#,
        )
        .bind(permission.name.as_str())
        .bind(&permission.description)
        .bind(&permission.category)
        .bind(permission.sensitive)
        .bind(permission.active)
        .bind(permission.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_permission", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn count_permissions(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permissions")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_permissions", e))?;
        Ok(count as u64)
    }
}
