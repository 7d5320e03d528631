//! Principal administration: registration, role assignment, status and
//! password changes, deletion.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use hris_core::{ExpectedVersion, UserId};

use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::password::{validate_password, PasswordHasher};
use crate::principal::{normalize_email, User, UserStatus};
use crate::refresh::RefreshSessionManager;
use crate::roles::RoleCode;
use crate::store::{bounded, AuthStores, CredentialStore, RoleGraph};

/// Input for [`AccountAdmin::register`].
#[derive(Clone)]
pub struct NewAccount {
    pub email: String,
    pub display_name: String,
    pub password: String,
    /// Empty means "every active default role".
    pub role_codes: Vec<RoleCode>,
}

impl core::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NewAccount")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("password", &"<redacted>")
            .field("role_codes", &self.role_codes)
            .finish()
    }
}

#[derive(Clone)]
pub struct AccountAdmin {
    credentials: Arc<dyn CredentialStore>,
    roles: Arc<dyn RoleGraph>,
    sessions: RefreshSessionManager,
    hasher: Arc<dyn PasswordHasher>,
    timeout: Duration,
}

impl AccountAdmin {
    pub fn new(config: &AuthConfig, stores: &AuthStores, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            credentials: stores.credentials.clone(),
            roles: stores.roles.clone(),
            sessions: RefreshSessionManager::new(stores.sessions.clone(), config.refresh_token_ttl)
                .with_storage_timeout(config.storage_timeout),
            hasher,
            timeout: config.storage_timeout,
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email), err)]
    pub async fn register(&self, input: NewAccount) -> AuthResult<User> {
        let email = normalize_email(&input.email)?;
        let display_name = input.display_name.trim().to_string();
        if display_name.is_empty() {
            return Err(AuthError::validation("display name cannot be empty"));
        }
        validate_password(&input.password)?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(AuthError::conflict(format!("email '{email}' is already registered")));
        }

        let roles = if input.role_codes.is_empty() {
            self.default_role_codes().await?
        } else {
            self.existing_roles(input.role_codes).await?
        };

        let hash = self.hash_password(input.password).await?;
        let user = User::new(email, display_name, hash).with_roles(roles);
        bounded(self.timeout, "insert_user", self.credentials.insert_user(&user)).await?;
        info!(user_id = %user.id, roles = user.roles().len(), "principal registered");
        Ok(user)
    }

    pub async fn get(&self, id: UserId) -> AuthResult<User> {
        bounded(self.timeout, "find_user", self.credentials.find_user(id))
            .await?
            .ok_or_else(|| AuthError::not_found("user", id))
    }

    pub async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        let email = normalize_email(email)?;
        bounded(
            self.timeout,
            "find_user_by_email",
            self.credentials.find_user_by_email(&email),
        )
        .await
    }

    /// Replace the principal's role set. Every code must exist.
    #[instrument(skip(self, codes), err)]
    pub async fn assign_roles(&self, id: UserId, codes: Vec<RoleCode>) -> AuthResult<User> {
        let user = self.get(id).await?;
        let roles = self.existing_roles(codes).await?;
        if !roles.contains(&RoleCode::ADMIN) && self.is_last_admin(&user).await? {
            return Err(AuthError::conflict("cannot remove ADMIN from the last administrator"));
        }
        let user = self.save(user.with_role_set(roles)).await?;
        info!(roles = user.roles().len(), "principal roles replaced");
        Ok(user)
    }

    /// Move the principal to `status`. Leaving `Active` revokes its refresh sessions.
    #[instrument(skip(self), err)]
    pub async fn set_status(&self, id: UserId, status: UserStatus) -> AuthResult<User> {
        let mut user = self.get(id).await?;
        if user.status == status {
            return Ok(user);
        }
        if !status.is_authenticatable() && self.is_last_admin(&user).await? {
            return Err(AuthError::conflict("cannot disable the last administrator"));
        }
        user.status = status;
        let user = self.save(user).await?;
        if !status.is_authenticatable() {
            self.sessions.revoke_all(user.id).await?;
        }
        info!(%status, "principal status changed");
        Ok(user)
    }

    /// Set a new password and sign the principal out everywhere.
    #[instrument(skip(self, new_password), err)]
    pub async fn change_password(&self, id: UserId, new_password: &str) -> AuthResult<()> {
        validate_password(new_password)?;
        let mut user = self.get(id).await?;
        user.password_hash = self.hash_password(new_password.to_string()).await?;
        let user = self.save(user).await?;
        self.sessions.revoke_all(user.id).await?;
        info!("password changed");
        Ok(())
    }

    /// Revoke every refresh session, then delete the principal.
    #[instrument(skip(self), err)]
    pub async fn delete_user(&self, id: UserId) -> AuthResult<()> {
        let user = self.get(id).await?;
        if self.is_last_admin(&user).await? {
            return Err(AuthError::conflict("cannot delete the last administrator"));
        }
        self.sessions.revoke_all(user.id).await?;
        bounded(self.timeout, "delete_user", self.credentials.delete_user(user.id)).await?;
        info!("principal deleted");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    async fn save(&self, mut user: User) -> AuthResult<User> {
        let expected = ExpectedVersion::Exact(user.version);
        user.touch();
        user.version = bounded(
            self.timeout,
            "update_user",
            self.credentials.update_user(&user, expected),
        )
        .await?;
        Ok(user)
    }

    /// True if `user` is the only active principal holding `ADMIN`.
    async fn is_last_admin(&self, user: &User) -> AuthResult<bool> {
        if !user.roles().contains(&RoleCode::ADMIN) {
            return Ok(false);
        }
        let holders = bounded(
            self.timeout,
            "users_with_role",
            self.credentials.users_with_role(&RoleCode::ADMIN),
        )
        .await?;
        Ok(!holders
            .iter()
            .any(|other| other.id != user.id && other.is_authenticatable()))
    }

    async fn default_role_codes(&self) -> AuthResult<BTreeSet<RoleCode>> {
        let roles = bounded(self.timeout, "list_roles", self.roles.list_roles()).await?;
        Ok(roles
            .into_iter()
            .filter(|r| r.active && r.is_default)
            .map(|r| r.code)
            .collect())
    }

    async fn existing_roles(&self, codes: Vec<RoleCode>) -> AuthResult<BTreeSet<RoleCode>> {
        let wanted: BTreeSet<RoleCode> = codes.into_iter().collect();
        if wanted.is_empty() {
            return Ok(wanted);
        }
        let lookup: Vec<RoleCode> = wanted.iter().cloned().collect();
        let found: BTreeSet<RoleCode> = bounded(self.timeout, "find_roles", self.roles.find_roles(&lookup))
            .await?
            .into_iter()
            .map(|r| r.code)
            .collect();
        if let Some(missing) = wanted.difference(&found).next() {
            return Err(AuthError::not_found("role", missing));
        }
        Ok(wanted)
    }

    async fn hash_password(&self, plain: String) -> AuthResult<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))?
    }
}
