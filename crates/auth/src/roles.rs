use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hris_core::{DomainError, RoleId};

use crate::error::{AuthError, AuthResult};
use crate::permissions::PermissionName;

/// Stable role code (`ADMIN`, `HR_MANAGER`, ...).
///
/// Codes never change after creation; the display name does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleCode(Cow<'static, str>);

impl RoleCode {
    pub const ADMIN: RoleCode = RoleCode(Cow::Borrowed("ADMIN"));
    pub const EMPLOYEE: RoleCode = RoleCode(Cow::Borrowed("EMPLOYEE"));

    pub fn new(code: impl Into<Cow<'static, str>>) -> Self {
        Self(code.into())
    }

    /// Validate and normalise user-supplied input (upper-case, `[A-Z0-9_]`, max 20).
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let code = raw.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("role code cannot be empty"));
        }
        if code.len() > 20 {
            return Err(DomainError::validation("role code is longer than 20 characters"));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::validation(format!("invalid role code '{code}'")));
        }
        Ok(Self(Cow::Owned(code)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RoleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleType {
    /// Created by seeding; immutable.
    System,
    #[default]
    Business,
    Custom,
    Functional,
}

impl RoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleType::System => "SYSTEM",
            RoleType::Business => "BUSINESS",
            RoleType::Custom => "CUSTOM",
            RoleType::Functional => "FUNCTIONAL",
        }
    }
}

impl core::str::FromStr for RoleType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SYSTEM" => Ok(RoleType::System),
            "BUSINESS" => Ok(RoleType::Business),
            "CUSTOM" => Ok(RoleType::Custom),
            "FUNCTIONAL" => Ok(RoleType::Functional),
            other => Err(DomainError::validation(format!("unknown role type '{other}'"))),
        }
    }
}

/// Default priority for roles created through administration.
pub const DEFAULT_PRIORITY: i32 = 10;

/// Role aggregate.
///
/// # Invariants
/// - `code` is unique and immutable.
/// - System roles reject every mutation (checked before anything else).
/// - Following `parent` never returns to the starting role.
///
/// The permission set and parent link are only reachable read-only; changes go
/// through [`crate::AuthorizationEngine`], which enforces the invariants above.
///
/// ```compile_fail
/// use hris_auth::{Role, RoleCode, RoleType};
///
/// let mut role = Role::new(RoleCode::new("LEAD"), "Lead", RoleType::Custom);
/// role.parent = Some(RoleCode::new("LEAD"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub code: RoleCode,
    pub name: String,
    pub description: Option<String>,
    pub role_type: RoleType,
    pub is_system: bool,
    /// Assigned to newly registered principals that name no roles.
    pub is_default: bool,
    pub active: bool,
    /// Lower value = higher privilege. Informational only.
    pub priority: i32,
    parent: Option<RoleCode>,
    permissions: BTreeSet<PermissionName>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub fn new(code: RoleCode, name: impl Into<String>, role_type: RoleType) -> Self {
        let now = Utc::now();
        Self {
            id: RoleId::new(),
            code,
            name: name.into(),
            description: None,
            role_type,
            is_system: role_type == RoleType::System,
            is_default: false,
            active: true,
            priority: DEFAULT_PRIORITY,
            parent: None,
            permissions: BTreeSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Protected role created by seeding.
    pub fn system(code: RoleCode, name: impl Into<String>) -> Self {
        let mut role = Self::new(code, name, RoleType::System);
        role.priority = 1;
        role
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parent(mut self, parent: Option<RoleCode>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Populate permissions while constructing or hydrating a role.
    pub fn with_permissions(mut self, names: impl IntoIterator<Item = PermissionName>) -> Self {
        self.permissions.extend(names);
        self
    }

    pub fn parent(&self) -> Option<&RoleCode> {
        self.parent.as_ref()
    }

    pub fn permissions(&self) -> &BTreeSet<PermissionName> {
        &self.permissions
    }

    pub fn grants(&self, name: &PermissionName) -> bool {
        self.permissions.contains(name)
    }

    pub fn ensure_mutable(&self) -> AuthResult<()> {
        if self.is_system {
            return Err(AuthError::ProtectedRole(self.code.to_string()));
        }
        Ok(())
    }

    pub(crate) fn set_parent(&mut self, parent: Option<RoleCode>) {
        self.parent = parent;
    }

    pub(crate) fn replace_permissions(&mut self, names: BTreeSet<PermissionName>) {
        self.permissions = names;
    }

    pub(crate) fn grant(&mut self, name: PermissionName) -> bool {
        self.permissions.insert(name)
    }

    pub(crate) fn revoke(&mut self, name: &PermissionName) -> bool {
        self.permissions.remove(name)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
