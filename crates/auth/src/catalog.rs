//! Permission catalogue administration.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument};

use crate::authorize::DEFAULT_STORAGE_TIMEOUT;
use crate::error::{AuthError, AuthResult};
use crate::permissions::{ActionType, Permission, PermissionName, ResourceType, Scope};
use crate::store::{bounded, PermissionCatalog};

/// Input for [`PermissionAdmin::create`].
#[derive(Debug, Clone)]
pub struct NewPermission {
    pub resource: ResourceType,
    pub action: ActionType,
    /// `None` registers the scope-less form (effective scope `ALL`).
    pub scope: Option<Scope>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub sensitive: bool,
}

impl NewPermission {
    pub fn new(resource: ResourceType, action: ActionType, scope: Option<Scope>) -> Self {
        Self {
            resource,
            action,
            scope,
            description: None,
            category: None,
            sensitive: false,
        }
    }
}

/// Partial update of the mutable fields. The triple itself never changes.
#[derive(Debug, Clone, Default)]
pub struct PermissionUpdate {
    pub description: Option<String>,
    pub category: Option<String>,
    pub sensitive: Option<bool>,
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct PermissionAdmin {
    catalog: Arc<dyn PermissionCatalog>,
    timeout: Duration,
}

impl PermissionAdmin {
    pub fn new(catalog: Arc<dyn PermissionCatalog>) -> Self {
        Self {
            catalog,
            timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a new (resource, action, scope) triple.
    #[instrument(skip(self, input), fields(resource = %input.resource, action = %input.action), err)]
    pub async fn create(&self, input: NewPermission) -> AuthResult<Permission> {
        let mut permission = match input.scope {
            Some(scope) => Permission::scoped(input.resource, input.action, scope),
            None => Permission::of(input.resource, input.action),
        };
        if let Some(description) = input.description {
            permission.description = Some(description);
        }
        permission.category = input.category;
        permission.sensitive = input.sensitive;

        let (resource, action, scope) = permission.triple();
        if let Some(existing) = bounded(
            self.timeout,
            "find_by_triple",
            self.catalog.find_by_triple(resource, action, &scope),
        )
        .await?
        {
            return Err(AuthError::DuplicatePermission(existing.name.to_string()));
        }

        match bounded(
            self.timeout,
            "insert_permission",
            self.catalog.insert_permission(&permission),
        )
        .await
        {
            Ok(()) => {}
            // Lost a race with a concurrent registration of the same triple.
            Err(AuthError::Conflict(_)) => {
                return Err(AuthError::DuplicatePermission(permission.name.to_string()));
            }
            Err(other) => return Err(other),
        }
        info!(permission = %permission.name, "permission created");
        Ok(permission)
    }

    #[instrument(skip(self, update), err)]
    pub async fn update_details(
        &self,
        name: &PermissionName,
        update: PermissionUpdate,
    ) -> AuthResult<Permission> {
        let mut permission = self.get_by_name(name).await?;
        if let Some(description) = update.description {
            permission.description = Some(description);
        }
        if let Some(category) = update.category {
            permission.category = Some(category);
        }
        if let Some(sensitive) = update.sensitive {
            permission.sensitive = sensitive;
        }
        if let Some(active) = update.active {
            permission.active = active;
        }
        permission.updated_at = Utc::now();

        let updated = bounded(
            self.timeout,
            "update_permission",
            self.catalog.update_permission(&permission),
        )
        .await?;
        if !updated {
            return Err(AuthError::not_found("permission", name));
        }
        Ok(permission)
    }

    pub async fn activate(&self, name: &PermissionName) -> AuthResult<Permission> {
        self.update_details(name, PermissionUpdate { active: Some(true), ..Default::default() })
            .await
    }

    /// Inactive permissions stay assigned to roles but stop counting.
    pub async fn deactivate(&self, name: &PermissionName) -> AuthResult<Permission> {
        self.update_details(name, PermissionUpdate { active: Some(false), ..Default::default() })
            .await
    }

    pub async fn get_by_name(&self, name: &PermissionName) -> AuthResult<Permission> {
        bounded(self.timeout, "find_permission", self.catalog.find_permission(name))
            .await?
            .ok_or_else(|| AuthError::not_found("permission", name))
    }

    pub async fn list_all(&self) -> AuthResult<Vec<Permission>> {
        let mut all = bounded(self.timeout, "list_permissions", self.catalog.list_permissions()).await?;
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    pub async fn list_by_resource(&self, resource: ResourceType) -> AuthResult<Vec<Permission>> {
        self.filtered(|p| p.resource == resource).await
    }

    pub async fn list_by_action(&self, action: ActionType) -> AuthResult<Vec<Permission>> {
        self.filtered(|p| p.action == action).await
    }

    pub async fn list_by_category(&self, category: &str) -> AuthResult<Vec<Permission>> {
        self.filtered(|p| {
            p.category
                .as_deref()
                .is_some_and(|c| c.eq_ignore_ascii_case(category))
        })
        .await
    }

    pub async fn list_active(&self) -> AuthResult<Vec<Permission>> {
        self.filtered(|p| p.active).await
    }

    /// Case-insensitive match on name, description or category.
    pub async fn search(&self, keyword: &str) -> AuthResult<Vec<Permission>> {
        let needle = keyword.trim().to_lowercase();
        self.filtered(|p| {
            p.name.as_str().contains(&needle)
                || p.description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
                || p.category
                    .as_deref()
                    .is_some_and(|c| c.to_lowercase().contains(&needle))
        })
        .await
    }

    async fn filtered<F>(&self, keep: F) -> AuthResult<Vec<Permission>>
    where
        F: Fn(&Permission) -> bool,
    {
        Ok(self.list_all().await?.into_iter().filter(|p| keep(p)).collect())
    }
}
