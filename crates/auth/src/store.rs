//! Storage contracts.
//!
//! Each trait is a seam owned by the component that consumes it; adapters live
//! in `hris-infra` (in-memory and Postgres). All lookups are keyed by stable
//! identifiers: role code, permission name, principal id or email.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use hris_core::{ExpectedVersion, UserId};

use crate::error::{AuthError, AuthResult, StoreResult};
use crate::permissions::{ActionType, Permission, PermissionName, ResourceType, Scope};
use crate::principal::User;
use crate::refresh::RefreshSession;
use crate::roles::{Role, RoleCode};

/// Principal records, looked up by id or normalised email.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Fails with `Conflict` if the id or email already exists.
    async fn insert_user(&self, user: &User) -> StoreResult<()>;

    /// Persist `user` if the stored version matches `expected`. Returns the new version.
    async fn update_user(&self, user: &User, expected: ExpectedVersion) -> StoreResult<u64>;

    /// Remove the principal together with its role assignments and refresh sessions.
    async fn delete_user(&self, id: UserId) -> StoreResult<bool>;

    async fn count_users(&self) -> StoreResult<u64>;

    /// Principals directly assigned `code`.
    async fn users_with_role(&self, code: &RoleCode) -> StoreResult<Vec<User>>;
}

/// Roles and their parent links.
#[async_trait]
pub trait RoleGraph: Send + Sync {
    async fn find_role(&self, code: &RoleCode) -> StoreResult<Option<Role>>;

    /// Roles for the given codes; unknown codes are skipped.
    async fn find_roles(&self, codes: &[RoleCode]) -> StoreResult<Vec<Role>>;

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>>;

    async fn list_roles(&self) -> StoreResult<Vec<Role>>;

    /// Fails with `Conflict` if the code or name is taken.
    async fn insert_role(&self, role: &Role) -> StoreResult<()>;

    /// Persist `role` if the stored version matches `expected`. Returns the new version.
    async fn update_role(&self, role: &Role, expected: ExpectedVersion) -> StoreResult<u64>;

    /// Remove the role, detaching it from children and principals. Every
    /// detached child and principal has its version bumped.
    async fn delete_role(&self, code: &RoleCode) -> StoreResult<bool>;

    /// Number of principals directly assigned `code`.
    async fn count_assignments(&self, code: &RoleCode) -> StoreResult<u64>;
}

/// Permission definitions.
#[async_trait]
pub trait PermissionCatalog: Send + Sync {
    async fn find_permission(&self, name: &PermissionName) -> StoreResult<Option<Permission>>;

    /// Definitions for the given names; unknown names are skipped.
    async fn find_permissions(&self, names: &[PermissionName]) -> StoreResult<Vec<Permission>>;

    /// Lookup by (resource, action, effective scope).
    async fn find_by_triple(
        &self,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> StoreResult<Option<Permission>>;

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>>;

    /// Fails with `Conflict` if the name or triple is taken.
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;

    /// Update descriptive fields and flags. Returns `false` if the name is unknown.
    async fn update_permission(&self, permission: &Permission) -> StoreResult<bool>;

    async fn count_permissions(&self) -> StoreResult<u64>;
}

/// Refresh sessions keyed by their opaque token.
#[async_trait]
pub trait RefreshSessionStore: Send + Sync {
    async fn insert_session(&self, session: &RefreshSession) -> StoreResult<()>;

    async fn find_session(&self, token: &str) -> StoreResult<Option<RefreshSession>>;

    /// Conditional delete: returns the removed row, or `None` if another caller won.
    async fn take_session(&self, token: &str) -> StoreResult<Option<RefreshSession>>;

    /// Swap the session behind `old_token` for `replacement` in one unit.
    ///
    /// The old row is removed only while it belongs to `replacement.user_id` and
    /// is unexpired at `replacement.created_at`; `replacement` is stored only if
    /// that removal happened. Returns the removed row, or `None` if another caller
    /// won. On error nothing has changed and `old_token` is still usable.
    async fn rotate_session(
        &self,
        old_token: &str,
        replacement: &RefreshSession,
    ) -> StoreResult<Option<RefreshSession>>;

    async fn delete_sessions_for(&self, user: UserId) -> StoreResult<u64>;

    /// Remove sessions with `expires_at <= now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

/// Handles to every store, typically backed by one adapter.
#[derive(Clone)]
pub struct AuthStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub roles: Arc<dyn RoleGraph>,
    pub permissions: Arc<dyn PermissionCatalog>,
    pub sessions: Arc<dyn RefreshSessionStore>,
}

impl AuthStores {
    /// Use one adapter for all four contracts.
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore + RoleGraph + PermissionCatalog + RefreshSessionStore + 'static,
    {
        Self {
            credentials: store.clone(),
            roles: store.clone(),
            permissions: store.clone(),
            sessions: store,
        }
    }
}

/// Run a storage call under `deadline`.
///
/// Elapsed deadlines surface as [`AuthError::StorageUnavailable`]; dropping the
/// returned future cancels the call.
pub(crate) async fn bounded<T, F>(deadline: Duration, operation: &'static str, fut: F) -> AuthResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result.map_err(AuthError::from),
        Err(_) => {
            tracing::warn!(operation, timeout_ms = deadline.as_millis() as u64, "storage call timed out");
            Err(AuthError::StorageUnavailable(format!("{operation} timed out")))
        }
    }
}
