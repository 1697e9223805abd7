//! Session token generation and the bearer token codec.
//!
//! The session token is the store key of a session record. The bearer token is
//! what clients hold: either the session token itself ([`TokenCodec::Opaque`]) or
//! an HS256 JWT that carries it in the `sid` claim ([`TokenCodec::Signed`]).

use anyhow::{Context, Result};
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::{RngCore, rngs::OsRng};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{error::AuthError, session::Session};

const SESSION_TOKEN_BYTES: usize = 32;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Generate a URL-safe session token from 32 random bytes.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate session token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn is_session_token(token: &str) -> bool {
    base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .is_ok_and(|bytes| bytes.len() == SESSION_TOKEN_BYTES)
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    sid: String,
    iat: i64,
    exp: i64,
}

#[derive(Clone)]
pub struct SignedTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    max_age: Duration,
}

#[derive(Clone)]
pub enum TokenCodec {
    Opaque,
    Signed(SignedTokens),
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opaque => f.write_str("Opaque"),
            Self::Signed(signed) => f
                .debug_struct("Signed")
                .field("max_age", &signed.max_age)
                .finish_non_exhaustive(),
        }
    }
}

impl TokenCodec {
    #[must_use]
    pub fn signed(secret: &SecretString) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self::Signed(SignedTokens {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            max_age: DEFAULT_MAX_AGE,
        })
    }

    /// Limit how long a signed token is accepted, independent of the session TTL.
    /// Has no effect on opaque tokens.
    #[must_use]
    pub fn with_max_age(self, max_age: Duration) -> Self {
        match self {
            Self::Opaque => Self::Opaque,
            Self::Signed(signed) => Self::Signed(SignedTokens { max_age, ..signed }),
        }
    }

    /// Turn a session into the bearer token handed to the client.
    ///
    /// # Errors
    /// Returns an error if a signed token cannot be produced.
    pub fn encode(&self, session: &Session) -> Result<String> {
        match self {
            Self::Opaque => Ok(session.token.clone()),
            Self::Signed(signed) => {
                let iat = Utc::now().timestamp();
                let max_age = i64::try_from(signed.max_age.as_secs()).unwrap_or(i64::MAX);
                let claims = Claims {
                    sub: session.user_id.clone(),
                    sid: session.token.clone(),
                    iat,
                    exp: iat.saturating_add(max_age),
                };
                jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &signed.encoding)
                    .context("failed to sign bearer token")
            }
        }
    }

    /// Recover the session token from a bearer token.
    ///
    /// # Errors
    /// Returns `AuthError::InvalidToken` for anything malformed, forged or past `exp`.
    pub fn decode(&self, bearer: &str) -> Result<String, AuthError> {
        match self {
            Self::Opaque => {
                if is_session_token(bearer) {
                    Ok(bearer.to_string())
                } else {
                    Err(AuthError::InvalidToken)
                }
            }
            Self::Signed(signed) => {
                let mut validation = Validation::new(Algorithm::HS256);
                validation.leeway = 0;
                validation.set_required_spec_claims(&["exp", "sub"]);
                let data = jsonwebtoken::decode::<Claims>(bearer, &signed.decoding, &validation)
                    .map_err(|err| {
                        debug!("Rejected bearer token: {err}");
                        AuthError::InvalidToken
                    })?;
                if is_session_token(&data.claims.sid) {
                    Ok(data.claims.sid)
                } else {
                    Err(AuthError::InvalidToken)
                }
            }
        }
    }
}
