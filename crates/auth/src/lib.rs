//! `hris-auth`: authentication and role-based authorization core.
//!
//! Decoupled from HTTP and from any concrete storage engine; adapters
//! implement the traits in [`store`].

pub mod accounts;
pub mod authorize;
pub mod catalog;
pub mod claims;
pub mod config;
pub mod error;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod refresh;
pub mod role_admin;
pub mod roles;
pub mod seed;
pub mod session;
pub mod store;
pub mod token;

pub use accounts::{AccountAdmin, NewAccount};
pub use authorize::{
    permits, AuthorizationEngine, AuthorizationExplanation, DenialKind, DenialReason,
    EffectiveAccess,
};
pub use catalog::{NewPermission, PermissionAdmin, PermissionUpdate};
pub use claims::{validate_claims, AccessClaims, TokenValidationError};
pub use config::AuthConfig;
pub use error::{AuthError, AuthResult, ConfigError, StoreError, StoreResult};
pub use password::{Argon2PasswordHasher, PasswordHasher};
pub use permissions::{ActionType, Permission, PermissionName, ResourceType, Scope};
pub use principal::{AuthenticatedIdentity, PrincipalProfile, User, UserStatus};
pub use refresh::{RefreshSession, RefreshSessionManager, SessionLookup};
pub use role_admin::NewRole;
pub use roles::{Role, RoleCode, RoleType};
pub use seed::{AdminSeed, SeedReport, Seeder};
pub use session::{SessionFacade, SessionResult};
pub use store::{AuthStores, CredentialStore, PermissionCatalog, RefreshSessionStore, RoleGraph};
pub use token::{IssuedToken, TokenIssuer};
