//! `hris-core`: identifiers, domain errors and version checks shared by the
//! auth core and its storage adapters.
//!
//! Pure domain primitives; no infrastructure concerns.

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{PermissionId, RoleId, SessionId, UserId};
pub use version::ExpectedVersion;
