//! Registration and login
//!
//! Passwords are stored as hex(SHA-256(plaintext)). The digest is compared
//! constant-time on login. SHA-256 without a salt or KDF is deliberately kept
//! for wire compatibility with existing rows; swapping in a memory-hard hash
//! changes no endpoint contract.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{User, UserBalance};
use crate::storage::{Storage, StorageError};

use super::token::{TokenError, Tokenizer};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login already used")]
    LoginTaken,

    #[error("unknown login or wrong password")]
    BadCredentials,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

pub struct AuthService {
    storage: Arc<dyn Storage>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl AuthService {
    pub fn new(storage: Arc<dyn Storage>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self { storage, tokenizer }
    }

    /// Create the user plus a zero balance in one storage transaction and
    /// mint a token for the fresh account.
    pub async fn register(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let user = User {
            id: Uuid::new_v4(),
            login: login.to_string(),
            pwdhash: hash_password(password),
        };
        let balance = UserBalance {
            id: Uuid::new_v4(),
            user_id: user.id,
            current: rust_decimal::Decimal::ZERO,
            withdrawn: rust_decimal::Decimal::ZERO,
        };

        match self.storage.create_user(&user, &balance).await {
            Ok(()) => {}
            Err(StorageError::Duplicate) => return Err(AuthError::LoginTaken),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(login, user_id = %user.id, "user registered");
        Ok(self.tokenizer.issue(user.id)?)
    }

    /// Verify credentials and mint a token.
    pub async fn login(&self, login: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .storage
            .user_by_login(login)
            .await?
            .ok_or(AuthError::BadCredentials)?;

        if !digest_eq(&hash_password(password), &user.pwdhash) {
            return Err(AuthError::BadCredentials);
        }

        tracing::debug!(login, user_id = %user.id, "user logged in");
        Ok(self.tokenizer.issue(user.id)?)
    }
}

fn hash_password(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}

/// Constant-time equality over the two hex digests. Length leaks are fine
/// here since every digest is 64 characters.
fn digest_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_digest_is_hex_sha256() {
        // SHA-256("p") — fixed vector
        assert_eq!(
            hash_password("p"),
            "148de9c5a7a44d19e56cd9ae1a554bf67847afb0c58f6e12fa29ac7ddfca9940"
        );
        assert_eq!(hash_password("p").len(), 64);
    }

    #[test]
    fn digest_eq_matches_equal_and_rejects_unequal() {
        let a = hash_password("secret");
        let b = hash_password("secret");
        let c = hash_password("Secret");
        assert!(digest_eq(&a, &b));
        assert!(!digest_eq(&a, &c));
        assert!(!digest_eq(&a, "short"));
    }
}
