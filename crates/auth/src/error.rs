use thiserror::Error;

use hris_core::DomainError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Failure taxonomy for authentication and authorization.
///
/// Credential failures are deliberately coarse: an unknown email and a wrong
/// password both surface as [`AuthError::InvalidCredentials`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("invalid access token")]
    InvalidToken,

    #[error("invalid refresh token")]
    InvalidRefreshToken,

    #[error("refresh token has expired")]
    ExpiredRefreshToken,

    #[error("circular role hierarchy: {0}")]
    CircularHierarchy(String),

    #[error("role '{0}' is a system role and cannot be modified")]
    ProtectedRole(String),

    #[error("permission already exists: {0}")]
    DuplicatePermission(String),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Only storage outages are safe to retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Caller could not prove who they are (maps to 401 at a transport edge).
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials
                | Self::AccountDisabled
                | Self::InvalidToken
                | Self::InvalidRefreshToken
                | Self::ExpiredRefreshToken
        )
    }

    /// Caller is known but not allowed (maps to 403 at a transport edge).
    pub fn is_authorization_failure(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::ProtectedRole(_))
    }
}

impl From<DomainError> for AuthError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::Conflict(msg) => Self::Conflict(msg),
        }
    }
}

/// Error surfaced by storage adapters.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable, timed out or otherwise failing transiently.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Uniqueness or optimistic-concurrency violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be mapped back into the model.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StorageUnavailable(msg),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Corrupt(msg) => Self::Internal(msg),
        }
    }
}

/// Invalid or missing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("signing secret must be at least {min} bytes (got {actual})")]
    WeakSecret { min: usize, actual: usize },
}
