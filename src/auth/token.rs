//! Token issuing and verification
//!
//! HS256 JWTs with an expiration claim. Verification pins the algorithm, so
//! tokens signed with anything else (including `none`) are rejected before
//! the signature is checked.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("token subject is not a user id: {0}")]
    BadSubject(#[from] uuid::Error),
}

/// Capability pair the HTTP surface depends on; any backend satisfying
/// issue/verify is acceptable.
pub trait Tokenizer: Send + Sync {
    fn issue(&self, user_id: Uuid) -> Result<String, TokenError>;
    fn verify(&self, token: &str) -> Result<Uuid, TokenError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
    iat: usize,
}

pub struct JwtTokenizer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl JwtTokenizer {
    pub fn new(secret: &str, lifetime_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime: Duration::hours(lifetime_hours),
        }
    }
}

impl Tokenizer for JwtTokenizer {
    fn issue(&self, user_id: Uuid) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (now + self.lifetime).timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(Uuid::parse_str(&data.claims.sub)?)
    }
}
