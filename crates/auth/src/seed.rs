//! Idempotent bootstrap data: permission catalogue, `ADMIN`/`EMPLOYEE` roles
//! and an initial administrator. Each step runs only while its table is empty.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use hris_core::UserId;

use crate::authorize::DEFAULT_STORAGE_TIMEOUT;
use crate::error::{AuthError, AuthResult};
use crate::password::{validate_password, PasswordHasher};
use crate::permissions::{ActionType, Permission, PermissionName, ResourceType, Scope};
use crate::principal::{normalize_email, User};
use crate::roles::{Role, RoleCode, RoleType};
use crate::store::{bounded, AuthStores};

/// Account created when no principal exists yet.
#[derive(Clone)]
pub struct AdminSeed {
    pub email: String,
    pub display_name: String,
    pub password: String,
}

impl core::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("email", &self.email)
            .field("display_name", &self.display_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub admin_created: Option<UserId>,
}

fn category(resource: ResourceType) -> &'static str {
    match resource {
        ResourceType::Employee => "HR",
        ResourceType::Salary => "PAYROLL",
        ResourceType::LeaveRequest => "LEAVE",
        _ => "ADMINISTRATION",
    }
}

/// The default catalogue. Every entry carries an explicit scope.
pub fn default_permissions() -> Vec<Permission> {
    use crate::permissions::ActionType as A;
    use crate::permissions::ResourceType as R;

    let entries: [(ResourceType, ActionType, Scope); 26] = [
        (R::User, A::Create, Scope::ALL),
        (R::User, A::Read, Scope::ALL),
        (R::User, A::Update, Scope::ALL),
        (R::User, A::Delete, Scope::ALL),
        (R::Employee, A::Create, Scope::ALL),
        (R::Employee, A::Read, Scope::ALL),
        (R::Employee, A::Update, Scope::ALL),
        (R::Employee, A::Delete, Scope::ALL),
        (R::Employee, A::Read, Scope::SELF),
        (R::Employee, A::Read, Scope::TEAM),
        (R::Employee, A::Read, Scope::DEPARTMENT),
        (R::Salary, A::Read, Scope::ALL),
        (R::Salary, A::Update, Scope::ALL),
        (R::Salary, A::Read, Scope::SELF),
        (R::LeaveRequest, A::Create, Scope::ALL),
        (R::LeaveRequest, A::Read, Scope::ALL),
        (R::LeaveRequest, A::Approve, Scope::ALL),
        (R::LeaveRequest, A::Reject, Scope::ALL),
        (R::Role, A::Create, Scope::ALL),
        (R::Role, A::Read, Scope::ALL),
        (R::Role, A::Update, Scope::ALL),
        (R::Role, A::Delete, Scope::ALL),
        (R::Permission, A::Read, Scope::ALL),
        (R::Permission, A::Assign, Scope::ALL),
        (R::Permission, A::Create, Scope::ALL),
        (R::Permission, A::Update, Scope::ALL),
    ];

    entries
        .into_iter()
        .map(|(resource, action, scope)| {
            let permission = Permission::scoped(resource, action, scope)
                .with_category(category(resource));
            if resource == R::Salary {
                permission.sensitive()
            } else {
                permission
            }
        })
        .collect()
}

/// Permissions of the default `EMPLOYEE` role.
pub fn employee_permissions() -> Vec<PermissionName> {
    vec![
        PermissionName::new("employee:read:self"),
        PermissionName::new("salary:read:self"),
        PermissionName::new("leave_request:create:all"),
        PermissionName::new("leave_request:read:all"),
    ]
}

pub struct Seeder {
    stores: AuthStores,
    hasher: Arc<dyn PasswordHasher>,
    timeout: Duration,
}

impl Seeder {
    pub fn new(stores: AuthStores, hasher: Arc<dyn PasswordHasher>) -> Self {
        Self {
            stores,
            hasher,
            timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self, admin: &AdminSeed) -> AuthResult<SeedReport> {
        info!("starting data seeding");
        let mut report = SeedReport::default();

        let permission_count = bounded(
            self.timeout,
            "count_permissions",
            self.stores.permissions.count_permissions(),
        )
        .await?;
        if permission_count == 0 {
            for permission in default_permissions() {
                bounded(
                    self.timeout,
                    "insert_permission",
                    self.stores.permissions.insert_permission(&permission),
                )
                .await?;
                report.permissions_created += 1;
            }
            info!(count = report.permissions_created, "permissions seeded");
        } else {
            info!(count = permission_count, "permissions already present");
        }

        let roles = bounded(self.timeout, "list_roles", self.stores.roles.list_roles()).await?;
        if roles.is_empty() {
            let catalogue = bounded(
                self.timeout,
                "list_permissions",
                self.stores.permissions.list_permissions(),
            )
            .await?;

            let admin_role = Role::system(RoleCode::ADMIN, "Administrator")
                .with_description("System Administrator - Full Access")
                .with_permissions(catalogue.into_iter().map(|p| p.name));
            let employee_role = Role::new(RoleCode::EMPLOYEE, "Employee", RoleType::Business)
                .with_description("Regular Employee")
                .with_permissions(employee_permissions())
                .as_default();

            for role in [admin_role, employee_role] {
                bounded(self.timeout, "insert_role", self.stores.roles.insert_role(&role)).await?;
                report.roles_created += 1;
            }
            info!(count = report.roles_created, "roles seeded");
        } else {
            info!(count = roles.len(), "roles already present");
        }

        let user_count =
            bounded(self.timeout, "count_users", self.stores.credentials.count_users()).await?;
        if user_count == 0 {
            let user = self.admin_user(admin).await?;
            bounded(
                self.timeout,
                "insert_user",
                self.stores.credentials.insert_user(&user),
            )
            .await?;
            info!(user_id = %user.id, email = %user.email, "administrator account seeded");
            report.admin_created = Some(user.id);
        } else {
            info!(count = user_count, "principals already present");
        }

        info!("data seeding completed");
        Ok(report)
    }

    async fn admin_user(&self, admin: &AdminSeed) -> AuthResult<User> {
        let email = normalize_email(&admin.email)?;
        validate_password(&admin.password)?;
        let hasher = self.hasher.clone();
        let password = admin.password.clone();
        let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::Internal(format!("password hashing task failed: {e}")))??;
        Ok(User::new(email, admin.display_name.clone(), hash).with_roles([RoleCode::ADMIN]))
    }
}
