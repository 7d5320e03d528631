use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hris_core::UserId;

use crate::error::{AuthError, AuthResult};
use crate::permissions::PermissionName;
use crate::principal::AuthenticatedIdentity;
use crate::roles::RoleCode;

/// Access token payload.
///
/// A cache of identity and effective access at issuance time, not a source of
/// truth. Timestamps are seconds since the Unix epoch as in RFC 7519.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Principal id.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Unique token id.
    pub jti: String,
}

impl AccessClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.iat, 0).single()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }

    pub fn role_codes(&self) -> BTreeSet<RoleCode> {
        self.roles.iter().map(|r| RoleCode::new(r.clone())).collect()
    }

    pub fn permission_names(&self) -> BTreeSet<PermissionName> {
        self.permissions
            .iter()
            .map(|p| PermissionName::new(p.clone()))
            .collect()
    }

    /// Build the per-request identity. Malformed subjects are `InvalidToken`.
    pub fn to_identity(&self) -> AuthResult<AuthenticatedIdentity> {
        let principal_id: UserId = self.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        let expires_at = self.expires_at().ok_or(AuthError::InvalidToken)?;
        Ok(AuthenticatedIdentity {
            principal_id,
            email: self.email.clone(),
            display_name: self.name.clone(),
            roles: self.role_codes(),
            permissions: self.permission_names(),
            token_id: self.jti.clone(),
            expires_at,
        })
    }
}

/// Why claims were rejected. Only ever logged; callers see [`AuthError::InvalidToken`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate the time window of `claims` against `now`.
///
/// Signature and issuer checks happen in [`crate::TokenIssuer::verify`].
pub fn validate_claims(claims: &AccessClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
