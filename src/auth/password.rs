//! Secret hashing and verification
//!
//! New secrets are always hashed with Argon2id. Accounts imported from the
//! previous system keep their salted SHA-256 digest until the owner changes
//! the secret; verification dispatches on the recorded [`HashScheme`].

use crate::{config::SecurityConfig, error::AppError, models::account::HashScheme};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Password hasher with configurable Argon2 cost
pub struct PasswordHasher {
    argon2: Argon2<'static>,
    /// Hash checked against when the account does not exist, so an unknown
    /// email costs the same as a wrong secret
    dummy_hash: OnceCell<String>,
}

impl PasswordHasher {
    /// Create hasher from the security section of the config
    pub fn from_config(config: &SecurityConfig) -> Result<Self, AppError> {
        let params = Params::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
            None,
        )
        .map_err(|e| AppError::Config(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
            dummy_hash: OnceCell::new(),
        })
    }

    /// Hash a secret with the current scheme
    pub fn hash_and_store(&self, secret: &str) -> Result<(String, HashScheme), AppError> {
        let salt = SaltString::generate(&mut OsRng);

        let hash = self
            .argon2
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| {
                tracing::error!("Failed to hash secret: {:?}", e);
                AppError::Internal(format!("Failed to hash secret: {}", e))
            })?
            .to_string();

        Ok((hash, HashScheme::Argon2id))
    }

    /// Verify a candidate secret against a stored hash.
    ///
    /// A stored hash that cannot be parsed verifies as `false`.
    pub fn verify(&self, candidate: &str, stored_hash: &str, scheme: HashScheme) -> bool {
        match scheme {
            HashScheme::Argon2id => self.verify_argon2(candidate, stored_hash),
            HashScheme::LegacySha256 => verify_legacy_sha256(candidate, stored_hash),
        }
    }

    /// Burn one Argon2 verification for a login against an unknown email
    pub fn verify_dummy(&self, candidate: &str) {
        let dummy = self.dummy_hash.get_or_try_init(|| {
            self.hash_and_store("dummy-secret-for-timing").map(|(hash, _)| hash)
        });
        if let Ok(hash) = dummy {
            let _ = self.verify_argon2(candidate, hash);
        }
    }

    fn verify_argon2(&self, candidate: &str, stored_hash: &str) -> bool {
        let parsed = match PasswordHash::new(stored_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored argon2 hash is malformed: {:?}", e);
                return false;
            }
        };

        // Params come from the stored PHC string, not from self
        match self.argon2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => true,
            Err(password_hash::Error::Password) => false,
            Err(e) => {
                tracing::warn!("Argon2 verification error: {:?}", e);
                false
            }
        }
    }

    /// Validate a new secret against the policy
    pub fn validate_policy(secret: &str, policy: &SecurityConfig) -> Result<(), AppError> {
        if secret.chars().count() < policy.password_min_length {
            return Err(AppError::BadRequest(format!(
                "Secret must be at least {} characters",
                policy.password_min_length
            )));
        }

        if policy.password_require_uppercase && !secret.chars().any(|c| c.is_uppercase()) {
            return Err(AppError::BadRequest(
                "Secret must contain at least one uppercase letter".to_string(),
            ));
        }

        if policy.password_require_digit && !secret.chars().any(|c| c.is_ascii_digit()) {
            return Err(AppError::BadRequest(
                "Secret must contain at least one digit".to_string(),
            ));
        }

        if policy.password_require_special && !secret.chars().any(|c| !c.is_alphanumeric()) {
            return Err(AppError::BadRequest(
                "Secret must contain at least one special character".to_string(),
            ));
        }

        Ok(())
    }
}

/// Legacy stored form: `<salt_hex>$<hex(sha256(salt || secret))>`
pub fn legacy_sha256_digest(salt: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    format!("{}${}", hex::encode(salt), hex::encode(hasher.finalize()))
}

fn verify_legacy_sha256(candidate: &str, stored_hash: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored_hash.split_once('$') else {
        tracing::warn!("Stored legacy hash is malformed");
        return false;
    };

    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        tracing::warn!("Stored legacy hash is not hex encoded");
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(candidate.as_bytes());
    let actual = hasher.finalize();

    actual.as_slice().ct_eq(expected.as_slice()).into()
}
