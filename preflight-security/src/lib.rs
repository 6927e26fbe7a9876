//! Password hashing, bearer tokens, and node-to-node shared secrets.
//!
//! Ported from the source's `security` package (`security.SecurityInfo`,
//! `security.Token`, `security.PermissionFlags`), which never wired up its
//! commented-out `bcrypt` call; this crate actually implements the memory-hard
//! KDF the source only sketched, using Argon2id.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng as PhcOsRng};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use preflight_errors::{ErrorKind, PreflightError};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Bits of entropy in a minted token id.
pub const ID_BITS: u32 = 64;
/// Bits of entropy in a minted token secret.
pub const SECRET_BITS: u32 = 64;

fn random_hex(bits: u32) -> Result<String, PreflightError> {
    let mut bytes = vec![0u8; (bits / 8) as usize];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| PreflightError::simple(ErrorKind::Internal, format!("security: failed to read from secure RNG: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Independent permission bits a token may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionFlags {
    pub checklist_read: bool,
    pub checklist_write: bool,
    pub checklist_invoke: bool,
    pub general_read: bool,
    pub general_write: bool,
}

impl PermissionFlags {
    /// True if every bit set in `required` is also set here.
    pub fn satisfies(&self, required: &PermissionFlags) -> bool {
        (!required.checklist_read || self.checklist_read)
            && (!required.checklist_write || self.checklist_write)
            && (!required.checklist_invoke || self.checklist_invoke)
            && (!required.general_read || self.general_read)
            && (!required.general_write || self.general_write)
    }
}

/// A capability-bearing token minted for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    /// Never rediscoverable after mint; omitted from subsequent listings.
    #[serde(skip_serializing)]
    pub secret: String,
    pub permissions: PermissionFlags,
    pub expiry: DateTime<Utc>,
    pub description: String,
}

/// Password hash plus the tokens and per-backend secrets minted for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Security {
    #[serde(skip_serializing)]
    password_hash: String,
    pub tokens: Vec<Token>,
    pub external_secrets: HashMap<String, String>,
}

impl Security {
    /// Hash `password` with Argon2id under a fresh random salt. Rejects the
    /// empty password as a caller error (400), matching spec.md §4.2.
    pub fn new(password: &str) -> Result<Self, PreflightError> {
        if password.is_empty() {
            return Err(PreflightError::simple(
                ErrorKind::Validation,
                "security.new: password must not be empty",
            ));
        }
        let hash = hash_password(password)?;
        Ok(Self {
            password_hash: hash,
            tokens: Vec::new(),
            external_secrets: HashMap::new(),
        })
    }

    pub fn validate_password(&self, password: &str) -> Result<(), PreflightError> {
        let parsed = PasswordHash::new(&self.password_hash)
            .map_err(|e| PreflightError::simple(ErrorKind::Internal, format!("security: stored hash is malformed: {e}")))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| PreflightError::simple(ErrorKind::Unauthorized, "invalid password"))
    }

    /// Replace the password hash. Existing tokens are **not** revoked — see
    /// `DESIGN.md` for why this matches the source rather than caller
    /// expectation.
    pub fn set_password(&mut self, new_password: &str) -> Result<(), PreflightError> {
        if new_password.is_empty() {
            return Err(PreflightError::simple(
                ErrorKind::Validation,
                "security.set_password: password must not be empty",
            ));
        }
        self.password_hash = hash_password(new_password)?;
        Ok(())
    }

    /// Mint a new token. The returned `Token.secret` is the only time this
    /// value is ever surfaced in the clear.
    pub fn add_token(
        &mut self,
        permissions: PermissionFlags,
        expiry_hours: i64,
        description: impl Into<String>,
    ) -> Result<Token, PreflightError> {
        let token = Token {
            id: random_hex(ID_BITS)?,
            secret: random_hex(SECRET_BITS)?,
            permissions,
            expiry: Utc::now() + Duration::hours(expiry_hours),
            description: description.into(),
        };
        self.tokens.push(token.clone());
        Ok(token)
    }

    /// Linear scan over this user's tokens, matching `secret` in constant
    /// time with respect to the number of tokens (spec.md §8).
    pub fn validate_token(&self, secret: &str, required: PermissionFlags) -> Result<&Token, PreflightError> {
        let presented = secret.as_bytes();
        let mut matched: Option<&Token> = None;
        for token in &self.tokens {
            if token.secret.as_bytes().len() == presented.len()
                && bool::from(token.secret.as_bytes().ct_eq(presented))
            {
                matched = Some(token);
            }
        }
        let token = matched.ok_or_else(|| PreflightError::simple(ErrorKind::Unauthorized, "invalid token"))?;
        if token.expiry <= Utc::now() {
            return Err(PreflightError::simple(ErrorKind::Unauthorized, "token expired"));
        }
        if !token.permissions.satisfies(&required) {
            return Err(PreflightError::simple(ErrorKind::Unauthorized, "insufficient permissions"));
        }
        Ok(token)
    }

    pub fn delete_token(&mut self, id: &str) -> Result<Token, PreflightError> {
        let pos = self
            .tokens
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| PreflightError::simple(ErrorKind::NotFound, format!("token {id} not found")))?;
        // Order is not stable across deletes (swap-remove), matching the
        // source's own non-stable delete; callers must not rely on ordering.
        Ok(self.tokens.swap_remove(pos))
    }
}

fn hash_password(password: &str) -> Result<String, PreflightError> {
    let salt = SaltString::generate(&mut PhcOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PreflightError::simple(ErrorKind::Internal, format!("security: failed to hash password: {e}")))
}

/// Mint a shared secret authenticating a peer node process.
pub fn generate_node_secret() -> Result<String, PreflightError> {
    random_hex(SECRET_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_permissions() -> PermissionFlags {
        PermissionFlags {
            checklist_read: true,
            checklist_write: true,
            checklist_invoke: true,
            general_read: true,
            general_write: true,
        }
    }

    #[test]
    fn empty_password_is_rejected() {
        let err = Security::new("").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn round_trips_password() {
        let sec = Security::new("hunter2").unwrap();
        assert!(sec.validate_password("hunter2").is_ok());
        assert_eq!(sec.validate_password("wrong").unwrap_err().kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn set_password_does_not_revoke_tokens() {
        let mut sec = Security::new("hunter2").unwrap();
        let token = sec.add_token(full_permissions(), 1, "cli").unwrap();
        sec.set_password("newpass").unwrap();
        assert!(sec.validate_token(&token.secret, PermissionFlags::default()).is_ok());
    }

    #[test]
    fn add_token_then_validate_succeeds() {
        let mut sec = Security::new("hunter2").unwrap();
        let token = sec.add_token(full_permissions(), 1, "cli").unwrap();
        let found = sec.validate_token(&token.secret, full_permissions()).unwrap();
        assert_eq!(found.id, token.id);
    }

    #[test]
    fn add_token_then_delete_then_validate_fails() {
        let mut sec = Security::new("hunter2").unwrap();
        let token = sec.add_token(full_permissions(), 1, "cli").unwrap();
        sec.delete_token(&token.id).unwrap();
        let err = sec.validate_token(&token.secret, PermissionFlags::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut sec = Security::new("hunter2").unwrap();
        let token = sec.add_token(full_permissions(), 0, "cli").unwrap();
        // expiry_hours=0 means expiry == mint time; by the time we validate,
        // `Utc::now()` has advanced past it.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let err = sec.validate_token(&token.secret, PermissionFlags::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn insufficient_permissions_rejected() {
        let mut sec = Security::new("hunter2").unwrap();
        let token = sec
            .add_token(PermissionFlags { checklist_read: true, ..Default::default() }, 1, "readonly")
            .unwrap();
        let err = sec.validate_token(&token.secret, full_permissions()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn delete_missing_token_is_not_found() {
        let mut sec = Security::new("hunter2").unwrap();
        let err = sec.delete_token("deadbeef").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn node_secrets_are_unique_and_correct_length() {
        let a = generate_node_secret().unwrap();
        let b = generate_node_secret().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), (SECRET_BITS / 4) as usize);
    }

    #[test]
    fn secret_is_skipped_on_serialization() {
        let mut sec = Security::new("hunter2").unwrap();
        sec.add_token(full_permissions(), 1, "cli").unwrap();
        let json = serde_json::to_string(&sec).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("password_hash"));
    }
}
