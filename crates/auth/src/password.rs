//! Password hashing (Argon2id, PHC string format).

use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{AuthError, AuthResult};

/// Minimum accepted password length in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

/// One-way hash and verify. Both calls are CPU-bound; async callers should
/// run them on a blocking pool.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plain: &str) -> AuthResult<String>;

    /// `false` on mismatch or on an unparsable hash.
    fn verify(&self, plain: &str, hash: &str) -> bool;
}

#[derive(Clone)]
pub struct Argon2PasswordHasher {
    argon2: Argon2<'static>,
}

impl Default for Argon2PasswordHasher {
    fn default() -> Self {
        Self {
            argon2: Argon2::default(),
        }
    }
}

impl Argon2PasswordHasher {
    /// Custom cost parameters (memory in KiB, iterations, lanes).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> AuthResult<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| AuthError::Internal(format!("invalid argon2 parameters: {e}")))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, plain: &str) -> AuthResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(plain.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AuthError::Internal(format!("password hashing failed: {e}")))
    }

    fn verify(&self, plain: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(plain.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash is not valid PHC");
                false
            }
        }
    }
}

/// A PHC hash produced with `hasher`'s own parameters, for verifying against
/// when no principal matched. The secret is never handed out.
pub fn decoy_hash(hasher: &dyn PasswordHasher) -> String {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    match hasher.hash(&URL_SAFE_NO_PAD.encode(secret)) {
        Ok(hash) => hash,
        Err(e) => {
            tracing::warn!(error = %e, "decoy password hash unavailable");
            String::new()
        }
    }
}

pub fn validate_password(plain: &str) -> AuthResult<()> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if plain.trim().is_empty() {
        return Err(AuthError::validation("password cannot be blank"));
    }
    Ok(())
}
