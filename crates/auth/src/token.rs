//! Access token minting and verification (HS256).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;
use uuid::Uuid;

use crate::authorize::EffectiveAccess;
use crate::claims::{validate_claims, AccessClaims};
use crate::config::AuthConfig;
use crate::error::{AuthError, AuthResult};
use crate::principal::User;

/// A freshly minted access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub claims: AccessClaims,
}

/// Signs and verifies access tokens.
///
/// Keys are derived once and shared read-only across all verifications.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
    issuer: String,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret)),
            decoding: Arc::new(DecodingKey::from_secret(secret)),
            issuer: issuer.into(),
            ttl,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            config.signing_secret.as_bytes(),
            config.issuer.clone(),
            config.access_token_ttl,
        )
    }

    /// Bounds how stale an embedded snapshot can get.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn issue(&self, principal: &User, access: &EffectiveAccess) -> AuthResult<IssuedToken> {
        self.issue_at(principal, access, Utc::now())
    }

    /// Snapshot `access` into a signed token valid from `now` for the configured TTL.
    pub fn issue_at(
        &self,
        principal: &User,
        access: &EffectiveAccess,
        now: DateTime<Utc>,
    ) -> AuthResult<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = AccessClaims {
            sub: principal.id.to_string(),
            email: principal.email.clone(),
            name: principal.display_name.clone(),
            roles: access.role_codes.iter().map(|r| r.to_string()).collect(),
            permissions: access.permission_names.iter().map(|p| p.to_string()).collect(),
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::now_v7().to_string(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(format!("failed to sign access token: {e}")))?;
        Ok(IssuedToken {
            token,
            expires_at,
            claims,
        })
    }

    pub fn verify(&self, token: &str) -> AuthResult<AccessClaims> {
        self.verify_at(token, Utc::now())
    }

    /// Check signature, issuer, structure and time window.
    ///
    /// Every failure is reported as [`AuthError::InvalidToken`]; the reason is
    /// only logged at debug level.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[self.issuer.as_str()]);

        let data = decode::<AccessClaims>(token, &self.decoding, &validation).map_err(|e| {
            debug!(reason = %e, "access token rejected");
            AuthError::InvalidToken
        })?;

        validate_claims(&data.claims, now).map_err(|e| {
            debug!(reason = %e, "access token rejected");
            AuthError::InvalidToken
        })?;

        Ok(data.claims)
    }
}
