//! Role administration on [`AuthorizationEngine`].
//!
//! Every mutation loads the current role, rejects system roles before anything
//! else, validates, then saves with `ExpectedVersion::Exact` so concurrent
//! writers to the same role serialise (the loser sees `Conflict`).

use std::collections::BTreeSet;

use tracing::{info, instrument};

use hris_core::ExpectedVersion;

use crate::authorize::AuthorizationEngine;
use crate::error::{AuthError, AuthResult};
use crate::permissions::PermissionName;
use crate::roles::{Role, RoleCode, RoleType, DEFAULT_PRIORITY};
use crate::store::bounded;

/// Input for [`AuthorizationEngine::create_role`].
#[derive(Debug, Clone)]
pub struct NewRole {
    pub code: RoleCode,
    pub name: String,
    pub description: Option<String>,
    pub role_type: RoleType,
    pub parent: Option<RoleCode>,
    pub permissions: Vec<PermissionName>,
    pub priority: Option<i32>,
    pub is_default: bool,
}

impl NewRole {
    pub fn new(code: RoleCode, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            description: None,
            role_type: RoleType::Business,
            parent: None,
            permissions: Vec::new(),
            priority: None,
            is_default: false,
        }
    }
}

impl AuthorizationEngine {
    #[instrument(skip(self, input), fields(role_code = %input.code), err)]
    pub async fn create_role(&self, input: NewRole) -> AuthResult<Role> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AuthError::validation("role name cannot be empty"));
        }
        if input.role_type == RoleType::System {
            return Err(AuthError::validation("system roles can only be seeded"));
        }
        if bounded(self.timeout, "find_role", self.roles.find_role(&input.code))
            .await?
            .is_some()
        {
            return Err(AuthError::conflict(format!("role code '{}' already exists", input.code)));
        }
        if bounded(self.timeout, "find_role_by_name", self.roles.find_role_by_name(&name))
            .await?
            .is_some()
        {
            return Err(AuthError::conflict(format!("role name '{name}' already exists")));
        }
        if let Some(parent) = &input.parent {
            self.load_role(parent).await?;
        }
        let permissions = self.existing_permissions(input.permissions).await?;

        let mut role = Role::new(input.code, name, input.role_type)
            .with_parent(input.parent)
            .with_priority(input.priority.unwrap_or(DEFAULT_PRIORITY))
            .with_permissions(permissions);
        role.description = input.description;
        role.is_default = input.is_default;

        bounded(self.timeout, "insert_role", self.roles.insert_role(&role)).await?;
        info!(permissions = role.permissions().len(), "role created");
        Ok(role)
    }

    /// Replace the role's permission set.
    #[instrument(skip(self, names), fields(role_code = %code), err)]
    pub async fn set_permissions(
        &self,
        code: &RoleCode,
        names: Vec<PermissionName>,
    ) -> AuthResult<Role> {
        let mut role = self.load_mutable(code).await?;
        let names = self.existing_permissions(names).await?;
        role.replace_permissions(names);
        self.save_role(role).await
    }

    #[instrument(skip(self), fields(role_code = %code, permission = %name), err)]
    pub async fn add_permission(&self, code: &RoleCode, name: PermissionName) -> AuthResult<Role> {
        let mut role = self.load_mutable(code).await?;
        self.existing_permissions(vec![name.clone()]).await?;
        if !role.grant(name) {
            return Ok(role);
        }
        self.save_role(role).await
    }

    #[instrument(skip(self), fields(role_code = %code, permission = %name), err)]
    pub async fn remove_permission(
        &self,
        code: &RoleCode,
        name: &PermissionName,
    ) -> AuthResult<Role> {
        let mut role = self.load_mutable(code).await?;
        if !role.revoke(name) {
            return Ok(role);
        }
        self.save_role(role).await
    }

    /// Set or clear the parent link, refusing links that would close a cycle.
    #[instrument(skip(self), fields(role_code = %code), err)]
    pub async fn assign_parent(
        &self,
        code: &RoleCode,
        parent: Option<RoleCode>,
    ) -> AuthResult<Role> {
        let mut role = self.load_mutable(code).await?;
        if let Some(parent) = &parent {
            self.ensure_acyclic(code, parent).await?;
        }
        if role.parent() == parent.as_ref() {
            return Ok(role);
        }
        role.set_parent(parent);
        self.save_role(role).await
    }

    /// Change the display name (and optionally description). Codes never change.
    #[instrument(skip(self, name, description), fields(role_code = %code), err)]
    pub async fn rename(
        &self,
        code: &RoleCode,
        name: &str,
        description: Option<String>,
    ) -> AuthResult<Role> {
        let mut role = self.load_mutable(code).await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AuthError::validation("role name cannot be empty"));
        }
        if name != role.name {
            if let Some(other) =
                bounded(self.timeout, "find_role_by_name", self.roles.find_role_by_name(name)).await?
            {
                if other.code != role.code {
                    return Err(AuthError::conflict(format!("role name '{name}' already exists")));
                }
            }
        }
        role.name = name.to_string();
        if description.is_some() {
            role.description = description;
        }
        self.save_role(role).await
    }

    pub async fn activate_role(&self, code: &RoleCode) -> AuthResult<Role> {
        self.set_active(code, true).await
    }

    pub async fn deactivate_role(&self, code: &RoleCode) -> AuthResult<Role> {
        self.set_active(code, false).await
    }

    /// Delete a role that no principal is assigned to. Children lose their parent.
    #[instrument(skip(self), fields(role_code = %code), err)]
    pub async fn delete_role(&self, code: &RoleCode) -> AuthResult<()> {
        let role = self.load_mutable(code).await?;
        let assigned = bounded(
            self.timeout,
            "count_assignments",
            self.roles.count_assignments(&role.code),
        )
        .await?;
        if assigned > 0 {
            return Err(AuthError::conflict(format!(
                "role '{code}' is still assigned to {assigned} principal(s)"
            )));
        }
        bounded(self.timeout, "delete_role", self.roles.delete_role(&role.code)).await?;
        info!("role deleted");
        Ok(())
    }

    pub async fn get_role(&self, code: &RoleCode) -> AuthResult<Role> {
        self.load_role(code).await
    }

    pub async fn list_roles(&self) -> AuthResult<Vec<Role>> {
        bounded(self.timeout, "list_roles", self.roles.list_roles()).await
    }

    pub async fn list_active_roles(&self) -> AuthResult<Vec<Role>> {
        Ok(self.list_roles().await?.into_iter().filter(|r| r.active).collect())
    }

    /// Active roles handed to new principals that name none.
    pub async fn list_default_roles(&self) -> AuthResult<Vec<Role>> {
        Ok(self
            .list_roles()
            .await?
            .into_iter()
            .filter(|r| r.active && r.is_default)
            .collect())
    }

    /// Case-insensitive match on code, name or description.
    pub async fn search_roles(&self, keyword: &str) -> AuthResult<Vec<Role>> {
        let needle = keyword.trim().to_lowercase();
        Ok(self
            .list_roles()
            .await?
            .into_iter()
            .filter(|r| {
                r.code.as_str().to_lowercase().contains(&needle)
                    || r.name.to_lowercase().contains(&needle)
                    || r
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// Parent chain of `code`, nearest first.
    pub async fn ancestors(&self, code: &RoleCode) -> AuthResult<Vec<Role>> {
        let start = self.load_role(code).await?;
        let mut seen = BTreeSet::from([start.code.clone()]);
        let mut chain = Vec::new();
        let mut cursor = start.parent().cloned();
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                break;
            }
            let role = self.load_role(&current).await?;
            cursor = role.parent().cloned();
            chain.push(role);
        }
        Ok(chain)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn set_active(&self, code: &RoleCode, active: bool) -> AuthResult<Role> {
        let mut role = self.load_mutable(code).await?;
        if role.active == active {
            return Ok(role);
        }
        role.active = active;
        let role = self.save_role(role).await?;
        info!(role_code = %code, active, "role activation changed");
        Ok(role)
    }

    async fn load_mutable(&self, code: &RoleCode) -> AuthResult<Role> {
        let role = self.load_role(code).await?;
        role.ensure_mutable()?;
        Ok(role)
    }

    async fn save_role(&self, mut role: Role) -> AuthResult<Role> {
        let expected = ExpectedVersion::Exact(role.version);
        role.touch();
        role.version = bounded(
            self.timeout,
            "update_role",
            self.roles.update_role(&role, expected),
        )
        .await?;
        Ok(role)
    }

    /// Walk up from `parent`; reaching `code` means the new link would close a loop.
    async fn ensure_acyclic(&self, code: &RoleCode, parent: &RoleCode) -> AuthResult<()> {
        if parent == code {
            return Err(AuthError::CircularHierarchy(format!(
                "role '{code}' cannot be its own parent"
            )));
        }
        let mut seen = BTreeSet::new();
        let mut cursor = Some(parent.clone());
        while let Some(current) = cursor {
            if current == *code {
                return Err(AuthError::CircularHierarchy(format!(
                    "role '{code}' is already an ancestor of '{parent}'"
                )));
            }
            if !seen.insert(current.clone()) {
                break;
            }
            cursor = self.load_role(&current).await?.parent().cloned();
        }
        Ok(())
    }

    /// Resolve names against the catalogue; the first unknown name is `NotFound`.
    async fn existing_permissions(
        &self,
        names: Vec<PermissionName>,
    ) -> AuthResult<BTreeSet<PermissionName>> {
        let wanted: BTreeSet<PermissionName> = names.into_iter().collect();
        if wanted.is_empty() {
            return Ok(wanted);
        }
        let lookup: Vec<PermissionName> = wanted.iter().cloned().collect();
        let found: BTreeSet<PermissionName> = bounded(
            self.timeout,
            "find_permissions",
            self.catalog.find_permissions(&lookup),
        )
        .await?
        .into_iter()
        .map(|p| p.name)
        .collect();

        if let Some(missing) = wanted.difference(&found).next() {
            return Err(AuthError::not_found("permission", missing));
        }
        Ok(wanted)
    }
}
