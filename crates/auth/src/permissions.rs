//! Permission catalogue model: resource/action/scope triples and their names.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hris_core::{DomainError, PermissionId};

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl core::str::FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let upper = s.trim().to_ascii_uppercase();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == upper)
                    .ok_or_else(|| {
                        DomainError::validation(format!("unknown {}: '{}'", stringify!($name), s))
                    })
            }
        }
    };
}

string_enum! {
    /// Kind of HR resource a permission applies to.
    pub enum ResourceType {
        User => "USER",
        Employee => "EMPLOYEE",
        Department => "DEPARTMENT",
        Salary => "SALARY",
        LeaveRequest => "LEAVE_REQUEST",
        Attendance => "ATTENDANCE",
        Payroll => "PAYROLL",
        Recruitment => "RECRUITMENT",
        Training => "TRAINING",
        Benefit => "BENEFIT",
        Document => "DOCUMENT",
        Role => "ROLE",
        Permission => "PERMISSION",
        AuditLog => "AUDIT_LOG",
        SystemConfig => "SYSTEM_CONFIG",
    }
}

string_enum! {
    /// Operation performed on a resource.
    pub enum ActionType {
        Create => "CREATE",
        Read => "READ",
        Update => "UPDATE",
        Delete => "DELETE",
        Activate => "ACTIVATE",
        Deactivate => "DEACTIVATE",
        ResetPassword => "RESET_PASSWORD",
        Process => "PROCESS",
        Approve => "APPROVE",
        Reject => "REJECT",
        Cancel => "CANCEL",
        Verify => "VERIFY",
        Export => "EXPORT",
        Import => "IMPORT",
        Download => "DOWNLOAD",
        Upload => "UPLOAD",
        View => "VIEW",
        Schedule => "SCHEDULE",
        Review => "REVIEW",
        ClockIn => "CLOCK_IN",
        ClockOut => "CLOCK_OUT",
        Overtime => "OVERTIME",
        GenerateReport => "GENERATE_REPORT",
        Promote => "PROMOTE",
        Transfer => "TRANSFER",
        Terminate => "TERMINATE",
        Assign => "ASSIGN",
        Delegate => "DELEGATE",
        Revoke => "REVOKE",
        Reset => "RESET",
    }
}

/// Qualifier narrowing a permission (`SELF`, `TEAM`, `DEPARTMENT`, `ALL`, ...).
///
/// Stored upper-case. `ALL` is the only sentinel; no other pattern matching exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(Cow<'static, str>);

impl Scope {
    pub const ALL: Scope = Scope(Cow::Borrowed("ALL"));
    pub const SELF: Scope = Scope(Cow::Borrowed("SELF"));
    pub const TEAM: Scope = Scope(Cow::Borrowed("TEAM"));
    pub const DEPARTMENT: Scope = Scope(Cow::Borrowed("DEPARTMENT"));

    /// Parse a scope, normalising to upper-case.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("scope cannot be empty"));
        }
        if trimmed.len() > 20 {
            return Err(DomainError::validation("scope is longer than 20 characters"));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DomainError::validation(format!("invalid scope '{trimmed}'")));
        }
        Ok(Self(Cow::Owned(trimmed.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.as_str() == "ALL"
    }
}

impl core::fmt::Display for Scope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission name, e.g. `"employee:read:self"` or `"user:delete"`.
///
/// Names are the stable key used by roles and token snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionName(Cow<'static, str>);

impl PermissionName {
    /// Wrap a name (normalised to trimmed lower-case).
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        if name.chars().any(|c| c.is_ascii_uppercase()) || name.trim().len() != name.len() {
            Self(Cow::Owned(name.trim().to_ascii_lowercase()))
        } else {
            Self(name)
        }
    }

    /// `lower(resource):lower(action)[:lower(scope)]`.
    ///
    /// `None` yields the scope-less form, whose effective scope is `ALL`.
    pub fn derive(resource: ResourceType, action: ActionType, scope: Option<&Scope>) -> Self {
        let mut name = format!(
            "{}:{}",
            resource.as_str().to_ascii_lowercase(),
            action.as_str().to_ascii_lowercase()
        );
        if let Some(scope) = scope {
            name.push(':');
            name.push_str(&scope.as_str().to_ascii_lowercase());
        }
        Self(Cow::Owned(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PermissionName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A permission definition in the catalogue.
///
/// The (resource, action, effective scope) triple is immutable once created; only
/// the descriptive fields and flags change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub name: PermissionName,
    pub resource: ResourceType,
    pub action: ActionType,
    /// `None` = registered without explicit scope.
    pub scope: Option<Scope>,
    pub description: Option<String>,
    /// UI grouping (HR, PAYROLL, ...).
    pub category: Option<String>,
    /// Informational; may gate extra approval in business logic.
    pub sensitive: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Scope-less permission (`resource:action`), effective scope `ALL`.
    pub fn of(resource: ResourceType, action: ActionType) -> Self {
        Self::build(resource, action, None)
    }

    /// Explicitly scoped permission (`resource:action:scope`).
    pub fn scoped(resource: ResourceType, action: ActionType, scope: Scope) -> Self {
        Self::build(resource, action, Some(scope))
    }

    fn build(resource: ResourceType, action: ActionType, scope: Option<Scope>) -> Self {
        let now = Utc::now();
        let description = match &scope {
            Some(s) => format!("{action} {resource} ({s})"),
            None => format!("{action} {resource}"),
        };
        Self {
            id: PermissionId::new(),
            name: PermissionName::derive(resource, action, scope.as_ref()),
            resource,
            action,
            scope,
            description: Some(description),
            category: None,
            sensitive: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Scope used for triple uniqueness.
    pub fn effective_scope(&self) -> Scope {
        self.scope.clone().unwrap_or(Scope::ALL)
    }

    pub fn triple(&self) -> (ResourceType, ActionType, Scope) {
        (self.resource, self.action, self.effective_scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn scope_less_name_omits_suffix() {
        let p = Permission::of(ResourceType::User, ActionType::Delete);
        assert_eq!(p.name.as_str(), "user:delete");
        assert!(p.effective_scope().is_all());
    }

    #[test]
    fn explicit_all_keeps_suffix() {
        let p = Permission::scoped(ResourceType::User, ActionType::Delete, Scope::ALL);
        assert_eq!(p.name.as_str(), "user:delete:all");
        assert_eq!(p.triple(), Permission::of(ResourceType::User, ActionType::Delete).triple());
    }

    #[test]
    fn multi_word_variants_lowercase_with_underscores() {
        let name = PermissionName::derive(
            ResourceType::LeaveRequest,
            ActionType::Create,
            Some(&Scope::ALL),
        );
        assert_eq!(name.as_str(), "leave_request:create:all");
    }

    #[test]
    fn scope_parse_normalises_and_rejects_separators() {
        assert_eq!(Scope::parse(" team ").unwrap(), Scope::TEAM);
        assert!(Scope::parse("").is_err());
        assert!(Scope::parse("a:b").is_err());
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("leave_request".parse::<ResourceType>().unwrap(), ResourceType::LeaveRequest);
        assert_eq!("Clock_In".parse::<ActionType>().unwrap(), ActionType::ClockIn);
        assert!("launch".parse::<ActionType>().is_err());
    }

    #[test]
    fn permission_name_new_normalises_case() {
        assert_eq!(PermissionName::new("User:Delete:ALL").as_str(), "user:delete:all");
    }

    fn scope_strategy() -> impl Strategy<Value = Option<Scope>> {
        prop_oneof![
            Just(None),
            Just(Some(Scope::ALL)),
            Just(Some(Scope::SELF)),
            Just(Some(Scope::TEAM)),
            Just(Some(Scope::DEPARTMENT)),
        ]
    }

    proptest! {
        /// Name derivation is deterministic and distinct registrations never share a name.
        #[test]
        fn names_are_deterministic_and_unique(
            entries in prop::collection::vec(
                (0..ResourceType::ALL.len(), 0..ActionType::ALL.len(), scope_strategy()),
                1..40,
            )
        ) {
            let mut by_name: std::collections::HashMap<String, (ResourceType, ActionType, Option<Scope>)> =
                std::collections::HashMap::new();

            for (r, a, scope) in entries {
                let resource = ResourceType::ALL[r];
                let action = ActionType::ALL[a];
                let first = PermissionName::derive(resource, action, scope.as_ref());
                let second = PermissionName::derive(resource, action, scope.as_ref());
                prop_assert_eq!(&first, &second);

                let key = (resource, action, scope.clone());
                if let Some(existing) = by_name.insert(first.as_str().to_string(), key.clone()) {
                    prop_assert_eq!(existing, key);
                }
            }

            let distinct: HashSet<_> = by_name.values().cloned().collect();
            prop_assert_eq!(distinct.len(), by_name.len());
        }
    }
}
