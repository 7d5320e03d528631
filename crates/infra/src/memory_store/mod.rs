//! In-memory implementation of every `hris-auth` storage trait.
//!
//! Intended for tests/dev. One lock guards all tables so cascades (role or
//! principal deletion) are atomic.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use hris_auth::{
    ActionType, CredentialStore, Permission, PermissionCatalog, PermissionName, RefreshSession,
    RefreshSessionStore, ResourceType, Role, RoleCode, RoleGraph, Scope, StoreError, StoreResult,
    User,
};
use hris_core::{ExpectedVersion, UserId};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    roles: BTreeMap<RoleCode, Role>,
    permissions: BTreeMap<PermissionName, Permission>,
    sessions: HashMap<String, RefreshSession>,
}

#[derive(Debug, Default)]
pub struct InMemoryAuthStore {
    tables: RwLock<Tables>,
    offline: AtomicBool,
    failing_session_inserts: AtomicU64,
    latency_ms: AtomicU64,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` session writes fail with `StoreError::Unavailable`
    /// after any preceding delete in the same call has run.
    pub fn fail_session_inserts(&self, count: u64) {
        self.failing_session_inserts.store(count, Ordering::SeqCst);
    }

    /// Delay applied before every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of stored refresh sessions.
    pub fn session_count(&self) -> usize {
        self.tables.read().map(|t| t.sessions.len()).unwrap_or(0)
    }

    async fn gate(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

impl Tables {
    fn store_session(&mut self, session: &RefreshSession, failing: &AtomicU64) -> StoreResult<()> {
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Unavailable("session write failed".to_string()));
        }
        if !self.users.contains_key(&session.user_id) {
            return Err(StoreError::Conflict(format!(
                "user {} does not exist",
                session.user_id
            )));
        }
        if self.sessions.contains_key(&session.token) {
            return Err(StoreError::Conflict("refresh token collision".to_string()));
        }
        self.sessions.insert(session.token.clone(), session.clone());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Principals
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl CredentialStore for InMemoryAuthStore {
    async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.gate().await?;
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.gate().await?;
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        self.gate().await?;
        let mut tables = self.write()?;
        if tables.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
        }
        if tables.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict(format!("email '{}' already exists", user.email)));
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User, expected: ExpectedVersion) -> StoreResult<u64> {
        self.gate().await?;
        let mut tables = self.write()?;
        let current = tables
            .users
            .get(&user.id)
            .map(|u| u.version)
            .ok_or_else(|| StoreError::Conflict(format!("user {} no longer exists", user.id)))?;
        expected
            .check(current)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(StoreError::Conflict(format!("email '{}' already exists", user.email)));
        }
        let mut stored = user.clone();
        stored.version = current + 1;
        tables.users.insert(user.id, stored);
        Ok(current + 1)
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
        self.gate().await?;
        let mut tables = self.write()?;
        let removed = tables.users.remove(&id).is_some();
        tables.sessions.retain(|_, s| s.user_id != id);
        Ok(removed)
    }

    async fn count_users(&self) -> StoreResult<u64> {
        self.gate().await?;
        Ok(self.read()?.users.len() as u64)
    }

    async fn users_with_role(&self, code: &RoleCode) -> StoreResult<Vec<User>> {
        self.gate().await?;
        Ok(self
            .read()?
            .users
            .values()
            .filter(|u| u.roles().contains(code))
            .cloned()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RoleGraph for InMemoryAuthStore {
    async fn find_role(&self, code: &RoleCode) -> StoreResult<Option<Role>> {
        self.gate().await?;
        Ok(self.read()?.roles.get(code).cloned())
    }

    async fn find_roles(&self, codes: &[RoleCode]) -> StoreResult<Vec<Role>> {
        self.gate().await?;
        let tables = self.read()?;
        Ok(codes
            .iter()
            .filter_map(|c| tables.roles.get(c).cloned())
            .collect())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Option<Role>> {
        self.gate().await?;
        Ok(self
            .read()?
            .roles
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        self.gate().await?;
        Ok(self.read()?.roles.values().cloned().collect())
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        self.gate().await?;
        let mut tables = self.write()?;
        if tables.roles.contains_key(&role.code) {
            return Err(StoreError::Conflict(format!("role code '{}' already exists", role.code)));
        }
        if tables.roles.values().any(|r| r.name == role.name) {
            return Err(StoreError::Conflict(format!("role name '{}' already exists", role.name)));
        }
        tables.roles.insert(role.code.clone(), role.clone());
        Ok(())
    }

    async fn update_role(&self, role: &Role, expected: ExpectedVersion) -> StoreResult<u64> {
        self.gate().await?;
        let mut tables = self.write()?;
        let current = tables
            .roles
            .get(&role.code)
            .map(|r| r.version)
            .ok_or_else(|| StoreError::Conflict(format!("role '{}' no longer exists", role.code)))?;
        expected
            .check(current)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        if tables
            .roles
            .values()
            .any(|r| r.code != role.code && r.name == role.name)
        {
            return Err(StoreError::Conflict(format!("role name '{}' already exists", role.name)));
        }
        let mut stored = role.clone();
        stored.version = current + 1;
        tables.roles.insert(role.code.clone(), stored);
        Ok(current + 1)
    }

    async fn delete_role(&self, code: &RoleCode) -> StoreResult<bool> {
        self.gate().await?;
        let mut tables = self.write()?;
        if tables.roles.remove(code).is_none() {
            return Ok(false);
        }
        for child in tables.roles.values_mut() {
            if child.parent() == Some(code) {
                *child = child.clone().with_parent(None);
                child.version += 1;
            }
        }
        for user in tables.users.values_mut() {
            if user.roles().contains(code) {
                let remaining = user.roles().iter().filter(|c| *c != code).cloned().collect();
                *user = user.clone().with_role_set(remaining);
                user.version += 1;
            }
        }
        Ok(true)
    }

    async fn count_assignments(&self, code: &RoleCode) -> StoreResult<u64> {
        self.gate().await?;
        Ok(self
            .read()?
            .users
            .values()
            .filter(|u| u.roles().contains(code))
            .count() as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PermissionCatalog for InMemoryAuthStore {
    async fn find_permission(&self, name: &PermissionName) -> StoreResult<Option<Permission>> {
        self.gate().await?;
        Ok(self.read()?.permissions.get(name).cloned())
    }

    async fn find_permissions(&self, names: &[PermissionName]) -> StoreResult<Vec<Permission>> {
        self.gate().await?;
        let tables = self.read()?;
        Ok(names
            .iter()
            .filter_map(|n| tables.permissions.get(n).cloned())
            .collect())
    }

    async fn find_by_triple(
        &self,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> StoreResult<Option<Permission>> {
        self.gate().await?;
        Ok(self
            .read()?
            .permissions
            .values()
            .find(|p| p.resource == resource && p.action == action && p.effective_scope() == *scope)
            .cloned())
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        self.gate().await?;
        Ok(self.read()?.permissions.values().cloned().collect())
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        self.gate().await?;
        let mut tables = self.write()?;
        if tables.permissions.contains_key(&permission.name) {
            return Err(StoreError::Conflict(format!(
                "permission '{}' already exists",
                permission.name
            )));
        }
        let triple = permission.triple();
        if tables.permissions.values().any(|p| p.triple() == triple) {
            return Err(StoreError::Conflict(format!(
                "permission triple for '{}' already exists",
                permission.name
            )));
        }
        tables
            .permissions
            .insert(permission.name.clone(), permission.clone());
        Ok(())
    }

    async fn update_permission(&self, permission: &Permission) -> StoreResult<bool> {
        self.gate().await?;
        let mut tables = self.write()?;
        match tables.permissions.get_mut(&permission.name) {
            Some(stored) => {
                stored.description = permission.description.clone();
                stored.category = permission.category.clone();
                stored.sensitive = permission.sensitive;
                stored.active = permission.active;
                stored.updated_at = permission.updated_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_permissions(&self) -> StoreResult<u64> {
        self.gate().await?;
        Ok(self.read()?.permissions.len() as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Refresh sessions
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl RefreshSessionStore for InMemoryAuthStore {
    async fn insert_session(&self, session: &RefreshSession) -> StoreResult<()> {
        self.gate().await?;
        self.write()?
            .store_session(session, &self.failing_session_inserts)
    }

    async fn find_session(&self, token: &str) -> StoreResult<Option<RefreshSession>> {
        self.gate().await?;
        Ok(self.read()?.sessions.get(token).cloned())
    }

    async fn take_session(&self, token: &str) -> StoreResult<Option<RefreshSession>> {
        self.gate().await?;
        Ok(self.write()?.sessions.remove(token))
    }

    async fn rotate_session(
        &self,
        old_token: &str,
        replacement: &RefreshSession,
    ) -> StoreResult<Option<RefreshSession>> {
        self.gate().await?;
        let mut tables = self.write()?;
        let live = tables.sessions.get(old_token).is_some_and(|s| {
            s.user_id == replacement.user_id && !s.is_expired_at(replacement.created_at)
        });
        if !live {
            return Ok(None);
        }
        let Some(old) = tables.sessions.remove(old_token) else {
            return Ok(None);
        };
        if let Err(e) = tables.store_session(replacement, &self.failing_session_inserts) {
            tables.sessions.insert(old.token.clone(), old);
            return Err(e);
        }
        Ok(Some(old))
    }

    async fn delete_sessions_for(&self, user: UserId) -> StoreResult<u64> {
        self.gate().await?;
        let mut tables = self.write()?;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| s.user_id != user);
        Ok((before - tables.sessions.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.gate().await?;
        let mut tables = self.write()?;
        let before = tables.sessions.len();
        tables.sessions.retain(|_, s| !s.is_expired_at(now));
        Ok((before - tables.sessions.len()) as u64)
    }
}
