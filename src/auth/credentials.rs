//! Salted PIN hashing and constant-time verification.
//!
//! PINs are stored as Argon2id PHC strings; salt and algorithm version travel
//! inside the string, so a reset replaces the credential wholesale. Unknown
//! or inactive identities burn the same hashing cost against a throwaway
//! hash, keeping timing and the caller-facing outcome indistinguishable from
//! a wrong PIN.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, SaltString},
    Argon2, PasswordHasher, PasswordVerifier,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::identity::Directory;
use super::store::StoreError;

/// Internal verification result. The public error surface collapses
/// `Mismatch` and `UnknownIdentity` into one outcome; only the audit trail
/// keeps the distinction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum VerifyOutcome {
    Match,
    Mismatch,
    UnknownIdentity,
}

pub struct CredentialStore {
    directory: Arc<dyn Directory>,
    dummy_hash: String,
}

impl CredentialStore {
    /// # Errors
    /// Returns an error when the throwaway hash cannot be computed.
    pub fn new(directory: Arc<dyn Directory>) -> anyhow::Result<Self> {
        // Hashed once up front so unknown identities pay full verification
        // cost on every attempt.
        let dummy_hash = hash_pin(&SecretString::from("0000".to_string()))?;
        Ok(Self {
            directory,
            dummy_hash,
        })
    }

    pub(crate) async fn verify(
        &self,
        identity_id: Uuid,
        candidate: &SecretString,
    ) -> Result<VerifyOutcome, StoreError> {
        let identity = self.directory.identity(identity_id).await?;
        let stored = match identity {
            Some(identity) if identity.active => self.directory.credential_hash(identity_id).await?,
            _ => None,
        };
        match stored {
            Some(phc) => {
                if verify_pin(&phc, candidate) {
                    Ok(VerifyOutcome::Match)
                } else {
                    Ok(VerifyOutcome::Mismatch)
                }
            }
            None => {
                let _ = verify_pin(&self.dummy_hash, candidate);
                Ok(VerifyOutcome::UnknownIdentity)
            }
        }
    }

    /// Replace an identity's PIN. Session revocation is the caller's job.
    pub async fn set_credential(
        &self,
        identity_id: Uuid,
        new_pin: &SecretString,
    ) -> Result<(), StoreError> {
        let phc = hash_pin(new_pin).map_err(|err| {
            error!("Failed to hash PIN: {err}");
            StoreError::Unavailable
        })?;
        self.directory.set_credential_hash(identity_id, &phc).await
    }
}

/// Hash a PIN with a fresh salt into a PHC string.
///
/// # Errors
/// Returns an error when hashing fails.
pub fn hash_pin(pin: &SecretString) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pin.expose_secret().as_bytes(), &salt)
        .map_err(|err| anyhow::anyhow!("failed to hash PIN: {err}"))?;
    Ok(hash.to_string())
}

fn verify_pin(phc: &str, candidate: &SecretString) -> bool {
    // The verifier compares digests in constant time; a malformed stored
    // hash verifies as a plain mismatch.
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(candidate.expose_secret().as_bytes(), &parsed)
            .is_ok()
    })
}
