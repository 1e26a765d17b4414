//! Access token verification.

use super::{
    errors::{AuthError, AuthResult},
    models::{AccessTokenClaims, Identity, Role},
};
use crate::users::UserId;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

/// Shortest accepted HS256 secret
pub const MIN_SECRET_LEN: usize = 32;

/// Verifies (and, for tooling, issues) HS256 access tokens
#[derive(Clone)]
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> AuthResult<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret(MIN_SECRET_LEN));
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    /// Decode and check signature and expiry
    pub fn verify(&self, token: &str) -> AuthResult<Identity> {
        let token_data = decode::<AccessTokenClaims>(token, &self.decoding, &Validation::default())?;
        let claims = token_data.claims;

        let role = match claims.role.as_str() {
            "user" => Role::User,
            "admin" => Role::Admin,
            other => return Err(AuthError::UnknownRole(other.to_string())),
        };
        Ok(Identity {
            user_id: claims.sub,
            role,
        })
    }

    /// Verify the value of an `Authorization` header
    pub fn verify_bearer(&self, header: &str) -> AuthResult<Identity> {
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        self.verify(token)
    }

    /// Mint a token valid for `ttl`
    pub fn issue(&self, user_id: UserId, role: Role, ttl: Duration) -> AuthResult<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user_id,
            role: match role {
                Role::User => "user".to_string(),
                Role::Admin => "admin".to_string(),
            },
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}
