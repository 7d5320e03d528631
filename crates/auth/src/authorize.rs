use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, instrument};

use hris_core::UserId;

use crate::error::{AuthError, AuthResult};
use crate::permissions::{ActionType, PermissionName, ResourceType, Scope};
use crate::principal::User;
use crate::roles::{Role, RoleCode};
use crate::store::{bounded, PermissionCatalog, RoleGraph};

pub(crate) const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Scope-matching rule shared by live checks and token snapshots.
///
/// Satisfied by the exact `resource:action:scope` name or by the scope-less
/// `resource:action` name. An explicit `:all` grant matches literally only.
pub fn permits(
    held: &BTreeSet<PermissionName>,
    resource: ResourceType,
    action: ActionType,
    scope: &Scope,
) -> bool {
    held.contains(&PermissionName::derive(resource, action, Some(scope)))
        || held.contains(&PermissionName::derive(resource, action, None))
}

/// Effective access of a principal at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveAccess {
    pub role_codes: BTreeSet<RoleCode>,
    pub permission_names: BTreeSet<PermissionName>,
}

impl EffectiveAccess {
    pub fn has_role(&self, code: &RoleCode) -> bool {
        self.role_codes.contains(code)
    }

    pub fn has_permission(&self, name: &PermissionName) -> bool {
        self.permission_names.contains(name)
    }

    pub fn permits(&self, resource: ResourceType, action: ActionType, scope: &Scope) -> bool {
        permits(&self.permission_names, resource, action, scope)
    }
}

/// Resolves roles and permissions from live state and answers policy questions.
///
/// Only active roles count, and only active permissions they grant. A parent
/// link does not pass permissions down to children.
#[derive(Clone)]
pub struct AuthorizationEngine {
    pub(crate) roles: Arc<dyn RoleGraph>,
    pub(crate) catalog: Arc<dyn PermissionCatalog>,
    pub(crate) timeout: Duration,
}

impl AuthorizationEngine {
    pub fn new(roles: Arc<dyn RoleGraph>, catalog: Arc<dyn PermissionCatalog>) -> Self {
        Self {
            roles,
            catalog,
            timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve roles and permissions for `principal`.
    #[instrument(skip(self, principal), fields(principal_id = %principal.id), err)]
    pub async fn resolve(&self, principal: &User) -> AuthResult<EffectiveAccess> {
        let roles = self.active_roles(principal).await?;

        let granted: BTreeSet<PermissionName> = roles
            .iter()
            .flat_map(|r| r.permissions().iter().cloned())
            .collect();
        let names: Vec<PermissionName> = granted.into_iter().collect();
        let definitions = bounded(
            self.timeout,
            "find_permissions",
            self.catalog.find_permissions(&names),
        )
        .await?;

        let access = EffectiveAccess {
            role_codes: roles.into_iter().map(|r| r.code).collect(),
            permission_names: definitions
                .into_iter()
                .filter(|p| p.active)
                .map(|p| p.name)
                .collect(),
        };
        debug!(
            roles = access.role_codes.len(),
            permissions = access.permission_names.len(),
            "resolved effective access"
        );
        Ok(access)
    }

    pub async fn effective_role_codes(&self, principal: &User) -> AuthResult<BTreeSet<RoleCode>> {
        Ok(self
            .active_roles(principal)
            .await?
            .into_iter()
            .map(|r| r.code)
            .collect())
    }

    pub async fn effective_permission_names(
        &self,
        principal: &User,
    ) -> AuthResult<BTreeSet<PermissionName>> {
        Ok(self.resolve(principal).await?.permission_names)
    }

    pub async fn has_role(&self, principal: &User, code: &RoleCode) -> AuthResult<bool> {
        Ok(self.effective_role_codes(principal).await?.contains(code))
    }

    pub async fn has_permission(&self, principal: &User, name: &PermissionName) -> AuthResult<bool> {
        Ok(self.effective_permission_names(principal).await?.contains(name))
    }

    /// Decide whether `principal` may perform `action` on `resource` within `scope`.
    pub async fn authorize(
        &self,
        principal: &User,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> AuthResult<bool> {
        let access = self.resolve(principal).await?;
        let granted = access.permits(resource, action, scope);
        debug!(
            principal_id = %principal.id,
            resource = resource.as_str(),
            action = action.as_str(),
            scope = scope.as_str(),
            granted,
            "authorization decision"
        );
        Ok(granted)
    }

    /// Like [`Self::authorize`] but denial is an error.
    pub async fn require(
        &self,
        principal: &User,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> AuthResult<()> {
        if self.authorize(principal, resource, action, scope).await? {
            Ok(())
        } else {
            Err(AuthError::Forbidden(
                PermissionName::derive(resource, action, Some(scope)).to_string(),
            ))
        }
    }

    pub(crate) async fn load_role(&self, code: &RoleCode) -> AuthResult<Role> {
        bounded(self.timeout, "find_role", self.roles.find_role(code))
            .await?
            .ok_or_else(|| AuthError::not_found("role", code))
    }

    async fn active_roles(&self, principal: &User) -> AuthResult<Vec<Role>> {
        let codes: Vec<RoleCode> = principal.roles().iter().cloned().collect();
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let roles = bounded(self.timeout, "find_roles", self.roles.find_roles(&codes)).await?;
        Ok(roles.into_iter().filter(|r| r.active).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub principal_id: UserId,
    /// Exact name that was checked (`resource:action:scope`).
    pub required_permission: String,
    pub granted: bool,
    /// Human-readable reason for the decision.
    pub reason: String,
    /// Active roles that carry a matching grant.
    pub granting_roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    pub denial_reason: Option<DenialReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DenialReason {
    pub kind: DenialKind,
    pub message: String,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// No assigned role grants a matching permission.
    MissingPermission,
    /// A matching grant exists but its role or permission is inactive.
    InactiveGrant,
}

impl AuthorizationEngine {
    /// Explain why a check on `principal` is (or would be) allowed or denied.
    pub async fn explain(
        &self,
        principal: &User,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> AuthResult<AuthorizationExplanation> {
        let exact = PermissionName::derive(resource, action, Some(scope));
        let scope_less = PermissionName::derive(resource, action, None);
        let matches = |name: &PermissionName| *name == exact || *name == scope_less;

        let codes: Vec<RoleCode> = principal.roles().iter().cloned().collect();
        let assigned = if codes.is_empty() {
            Vec::new()
        } else {
            bounded(self.timeout, "find_roles", self.roles.find_roles(&codes)).await?
        };
        let access = self.resolve(principal).await?;
        let granted = access.permits(resource, action, scope);

        let granting_roles: Vec<String> = assigned
            .iter()
            .filter(|r| r.active && r.permissions().iter().any(|p| matches(p)))
            .map(|r| r.code.to_string())
            .collect();
        let effective_permissions: Vec<String> =
            access.permission_names.iter().map(|p| p.to_string()).collect();

        if granted {
            let via = access
                .permission_names
                .iter()
                .find(|p| matches(p))
                .map(|p| p.to_string())
                .unwrap_or_else(|| exact.to_string());
            return Ok(AuthorizationExplanation {
                principal_id: principal.id,
                required_permission: exact.to_string(),
                granted: true,
                reason: format!("Principal holds '{via}' via roles {granting_roles:?}"),
                granting_roles,
                effective_permissions,
                denial_reason: None,
            });
        }

        let dormant: Vec<String> = assigned
            .iter()
            .filter(|r| r.permissions().iter().any(|p| matches(p)))
            .map(|r| r.code.to_string())
            .collect();

        let denial = if dormant.is_empty() {
            DenialReason {
                kind: DenialKind::MissingPermission,
                message: format!("Missing required permission: '{exact}'"),
                suggestions: vec![
                    format!("Assign a role that grants '{exact}' or '{scope_less}'"),
                    format!("Add '{exact}' to one of the principal's roles"),
                ],
            }
        } else {
            DenialReason {
                kind: DenialKind::InactiveGrant,
                message: format!(
                    "Roles {dormant:?} carry a matching grant but the role or permission is inactive"
                ),
                suggestions: vec![
                    "Re-activate the role or the permission".to_string(),
                ],
            }
        };

        Ok(AuthorizationExplanation {
            principal_id: principal.id,
            required_permission: exact.to_string(),
            granted: false,
            reason: format!(
                "Principal does not have permission '{exact}'. Current permissions: {effective_permissions:?}"
            ),
            granting_roles,
            effective_permissions,
            denial_reason: Some(denial),
        })
    }
}
