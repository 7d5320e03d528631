//! Principals (user accounts) and the identity derived from a verified token.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hris_core::{DomainError, UserId};

use crate::authorize::permits;
use crate::permissions::{ActionType, PermissionName, ResourceType, Scope};
use crate::roles::RoleCode;

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Suspended,
    /// Too many failed attempts.
    Locked,
    /// Awaiting verification.
    Pending,
    Resigned,
}

impl UserStatus {
    pub const ALL: &'static [UserStatus] = &[
        UserStatus::Active,
        UserStatus::Inactive,
        UserStatus::Suspended,
        UserStatus::Locked,
        UserStatus::Pending,
        UserStatus::Resigned,
    ];

    /// Only `Active` principals may log in or refresh.
    pub fn is_authenticatable(&self) -> bool {
        matches!(self, UserStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "ACTIVE",
            UserStatus::Inactive => "INACTIVE",
            UserStatus::Suspended => "SUSPENDED",
            UserStatus::Locked => "LOCKED",
            UserStatus::Pending => "PENDING",
            UserStatus::Resigned => "RESIGNED",
        }
    }
}

impl core::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        UserStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| DomainError::validation(format!("unknown user status '{s}'")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// User
// ─────────────────────────────────────────────────────────────────────────────

/// Normalise an email for storage and lookup (trimmed, lower-case).
pub fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(DomainError::validation("email cannot be empty"));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(email)
        }
        _ => Err(DomainError::validation(format!("invalid email format: '{raw}'"))),
    }
}

/// Principal aggregate.
///
/// # Invariants
/// - `email` is normalised and unique across principals.
/// - `password_hash` is never serialised nor printed.
#[derive(Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub password_hash: String,
    pub status: UserStatus,
    roles: BTreeSet<RoleCode>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl core::fmt::Debug for User {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("password_hash", &"<redacted>")
            .field("status", &self.status)
            .field("roles", &self.roles)
            .field("version", &self.version)
            .finish()
    }
}

impl User {
    /// New active principal. `email` must already be normalised.
    pub fn new(
        email: impl Into<String>,
        display_name: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            email: email.into(),
            display_name: display_name.into(),
            password_hash: password_hash.into(),
            status: UserStatus::Active,
            roles: BTreeSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = RoleCode>) -> Self {
        self.roles.extend(roles);
        self
    }

    /// Replace the role set while hydrating or cascading in storage.
    pub fn with_role_set(mut self, roles: BTreeSet<RoleCode>) -> Self {
        self.roles = roles;
        self
    }

    /// Directly assigned role codes.
    pub fn roles(&self) -> &BTreeSet<RoleCode> {
        &self.roles
    }

    pub fn is_authenticatable(&self) -> bool {
        self.status.is_authenticatable()
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Display-safe projection of a principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalProfile {
    pub id: UserId,
    pub email: String,
    pub display_name: String,
    pub status: UserStatus,
    pub roles: Vec<String>,
}

impl From<&User> for PrincipalProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            display_name: user.display_name.clone(),
            status: user.status,
            roles: user.roles.iter().map(|r| r.to_string()).collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authenticated identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity reconstructed from a verified access token.
///
/// Role and permission sets are the snapshot taken at issuance. They are good
/// enough for read paths; mutations should re-check against live state with
/// [`crate::SessionFacade::authorize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    pub principal_id: UserId,
    pub email: String,
    pub display_name: String,
    pub roles: BTreeSet<RoleCode>,
    pub permissions: BTreeSet<PermissionName>,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthenticatedIdentity {
    pub fn has_role(&self, code: &RoleCode) -> bool {
        self.roles.contains(code)
    }

    pub fn has_permission(&self, name: &PermissionName) -> bool {
        self.permissions.contains(name)
    }

    /// Check against the token snapshot only.
    pub fn permits(&self, resource: ResourceType, action: ActionType, scope: &Scope) -> bool {
        permits(&self.permissions, resource, action, scope)
    }
}
