//! Login, refresh and logout orchestration.
//!
//! Transport-agnostic: accepts and returns token strings only. Where a request
//! layer puts the refresh token (cookie or body) is its own concern.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use hris_core::UserId;

use crate::authorize::AuthorizationEngine;
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::password::{decoy_hash, PasswordHasher};
use crate::permissions::{ActionType, PermissionName, ResourceType, Scope};
use crate::principal::{normalize_email, AuthenticatedIdentity, PrincipalProfile, User};
use crate::refresh::{RefreshSession, RefreshSessionManager};
use crate::store::{bounded, AuthStores, CredentialStore};
use crate::token::{IssuedToken, TokenIssuer};

pub const TOKEN_TYPE: &str = "Bearer";

/// Credentials handed back after login or refresh.
#[derive(Clone, Serialize)]
pub struct SessionResult {
    pub access_token: String,
    pub token_type: &'static str,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub principal: PrincipalProfile,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl core::fmt::Debug for SessionResult {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionResult")
            .field("access_token", &"<redacted>")
            .field("access_expires_at", &self.access_expires_at)
            .field("refresh_token", &"<redacted>")
            .field("refresh_expires_at", &self.refresh_expires_at)
            .field("principal", &self.principal)
            .field("roles", &self.roles)
            .field("permissions", &self.permissions)
            .finish()
    }
}

#[derive(Clone)]
pub struct SessionFacade {
    credentials: Arc<dyn CredentialStore>,
    hasher: Arc<dyn PasswordHasher>,
    decoy_hash: Arc<str>,
    engine: AuthorizationEngine,
    tokens: TokenIssuer,
    sessions: RefreshSessionManager,
    timeout: Duration,
}

impl SessionFacade {
    pub fn new(config: &AuthConfig, stores: &AuthStores, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            credentials: stores.credentials.clone(),
            decoy_hash: decoy_hash(hasher.as_ref()).into(),
            hasher,
            engine: AuthorizationEngine::new(stores.roles.clone(), stores.permissions.clone())
                .with_storage_timeout(config.storage_timeout),
            tokens: TokenIssuer::from_config(config),
            sessions: RefreshSessionManager::new(stores.sessions.clone(), config.refresh_token_ttl)
                .with_storage_timeout(config.storage_timeout),
            timeout: config.storage_timeout,
        }
    }

    pub fn engine(&self) -> &AuthorizationEngine {
        &self.engine
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn sessions(&self) -> &RefreshSessionManager {
        &self.sessions
    }

    /// Authenticate with email and password.
    ///
    /// Unknown email and wrong password are indistinguishable, in outcome and in
    /// hashing cost. Status is only revealed once the password has been verified.
    #[instrument(skip_all)]
    pub async fn login(&self, identifier: &str, password: &str) -> AuthResult<SessionResult> {
        let Ok(email) = normalize_email(identifier) else {
            warn!("login rejected: malformed identifier");
            return Err(AuthError::InvalidCredentials);
        };
        let user = bounded(
            self.timeout,
            "find_user_by_email",
            self.credentials.find_user_by_email(&email),
        )
        .await?;

        let Some(user) = user else {
            self.verify_password(password, &self.decoy_hash).await?;
            warn!("login rejected: bad credentials");
            return Err(AuthError::InvalidCredentials);
        };
        if !self.verify_password(password, &user.password_hash).await? {
            warn!(user_id = %user.id, "login rejected: bad credentials");
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_authenticatable() {
            warn!(user_id = %user.id, status = %user.status, "login rejected: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        let access = self.engine.resolve(&user).await?;
        let issued = self.tokens.issue(&user, &access)?;
        let session = self.sessions.create(user.id).await?;
        info!(user_id = %user.id, "login succeeded");
        Ok(assemble(&user, issued, session))
    }

    /// Rotate the refresh token and mint an access token from live state.
    ///
    /// The owner is loaded and the access token issued before the rotation is
    /// committed, so any failure up to that point leaves `refresh_token` usable.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<SessionResult> {
        let current = self.sessions.require_valid(refresh_token).await?;

        let owner = bounded(
            self.timeout,
            "find_user",
            self.credentials.find_user(current.user_id),
        )
        .await?;
        let Some(user) = owner else {
            self.sessions.revoke(&current.token).await?;
            warn!(user_id = %current.user_id, "refresh rejected: owner no longer exists");
            return Err(AuthError::InvalidRefreshToken);
        };
        if !user.is_authenticatable() {
            self.sessions.revoke(&current.token).await?;
            warn!(user_id = %user.id, status = %user.status, "refresh rejected: account disabled");
            return Err(AuthError::AccountDisabled);
        }

        let access = self.engine.resolve(&user).await?;
        let issued = self.tokens.issue(&user, &access)?;
        let session = self.sessions.commit_rotation(&current).await?;
        Ok(assemble(&user, issued, session))
    }

    /// Revoke `refresh_token` if it exists. Repeated calls are no-ops.
    pub async fn logout(&self, refresh_token: &str) -> AuthResult<()> {
        self.sessions.revoke(refresh_token).await
    }

    /// Verify an access token and build the per-request identity.
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<AuthenticatedIdentity> {
        self.tokens.verify(access_token)?.to_identity()
    }

    /// Live check for mutating paths: roles and permissions are re-read from
    /// storage instead of trusting the token snapshot.
    pub async fn authorize(
        &self,
        identity: &AuthenticatedIdentity,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> AuthResult<bool> {
        let user = self.live_principal(identity.principal_id).await?;
        self.engine.authorize(&user, resource, action, scope).await
    }

    /// [`Self::authorize`], with denial reported as [`AuthError::Forbidden`].
    pub async fn require(
        &self,
        identity: &AuthenticatedIdentity,
        resource: ResourceType,
        action: ActionType,
        scope: &Scope,
    ) -> AuthResult<()> {
        if self.authorize(identity, resource, action, scope).await? {
            Ok(())
        } else {
            warn!(
                principal_id = %identity.principal_id,
                resource = resource.as_str(),
                action = action.as_str(),
                scope = scope.as_str(),
                "authorization denied"
            );
            Err(AuthError::Forbidden(
                PermissionName::derive(resource, action, Some(scope)).to_string(),
            ))
        }
    }

    async fn live_principal(&self, id: UserId) -> AuthResult<User> {
        let user = bounded(self.timeout, "find_user", self.credentials.find_user(id))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_authenticatable() {
            return Err(AuthError::AccountDisabled);
        }
        Ok(user)
    }

    async fn verify_password(&self, plain: &str, hash: &str) -> AuthResult<bool> {
        let hasher = self.hasher.clone();
        let plain = plain.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&plain, &hash))
            .await
            .map_err(|e| AuthError::Internal(format!("password verification task failed: {e}")))
    }
}

fn assemble(user: &User, issued: IssuedToken, session: RefreshSession) -> SessionResult {
    SessionResult {
        access_token: issued.token,
        token_type: TOKEN_TYPE,
        access_expires_at: issued.expires_at,
        refresh_token: session.token,
        refresh_expires_at: session.expires_at,
        principal: PrincipalProfile::from(user),
        roles: issued.claims.roles,
        permissions: issued.claims.permissions,
    }
}
