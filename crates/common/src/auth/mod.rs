//! Browser client identification
//!
//! Provides:
//! - Signed client tokens carried in a cookie
//! - Cookie and bearer header parsing
//!
//! A client token names a browser, not a user; the user behind it is
//! whatever that client's resolver holds.

use crate::errors::{AppError, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims of a client token
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientClaims {
    /// Client ID
    pub sub: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,
}

/// Issues and validates client tokens
pub struct ClientTokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_secs: i64,
}

impl ClientTokenManager {
    pub fn new(secret: &str, expiration_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_secs: expiration_secs as i64,
        }
    }

    pub fn expiration_secs(&self) -> i64 {
        self.expiration_secs
    }

    /// Sign a token for `client_id`
    pub fn issue(&self, client_id: Uuid) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiration_secs);

        let claims = ClientClaims {
            sub: client_id.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| AppError::Internal {
            message: format!("Failed to sign client token: {}", e),
        })
    }

    /// Client ID carried by a valid token
    pub fn validate(&self, token: &str) -> Result<Uuid> {
        let claims = decode::<ClientClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::ExpiredSession,
                _ => AppError::InvalidClientToken,
            })?;

        Uuid::parse_str(&claims.sub).map_err(|_| AppError::InvalidClientToken)
    }
}

/// Value of cookie `name` in a `Cookie` header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

/// Token from an `Authorization: Bearer` header
pub fn extract_bearer(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ").filter(|token| !token.is_empty())
}

/// `Set-Cookie` value carrying a client token
pub fn client_cookie(name: &str, token: &str, max_age_secs: i64) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}", name, token, max_age_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        let manager = ClientTokenManager::new("test_secret", 3600);
        let client_id = Uuid::new_v4();

        let token = manager.issue(client_id).unwrap();
        assert_eq!(manager.validate(&token).unwrap(), client_id);
    }

    #[test]
    fn test_foreign_token_rejected() {
        let ours = ClientTokenManager::new("test_secret", 3600);
        let theirs = ClientTokenManager::new("other_secret", 3600);

        let token = theirs.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(ours.validate(&token), Err(AppError::InvalidClientToken)));
        assert!(matches!(ours.validate("garbage"), Err(AppError::InvalidClientToken)));
    }

    #[test]
    fn test_cookie_value() {
        let header = "theme=dark; campus_client=abc.def.ghi; other=1";
        assert_eq!(cookie_value(header, "campus_client"), Some("abc.def.ghi"));
        assert_eq!(cookie_value(header, "missing"), None);
        assert_eq!(cookie_value("", "campus_client"), None);
    }

    #[test]
    fn test_extract_bearer() {
        assert_eq!(extract_bearer("Bearer tok_123"), Some("tok_123"));
        assert_eq!(extract_bearer("Bearer "), None);
        assert_eq!(extract_bearer("Basic abc"), None);
    }

    #[test]
    fn test_client_cookie_attributes() {
        let cookie = client_cookie("campus_client", "tok", 60);
        assert!(cookie.starts_with("campus_client=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=60"));
    }
}
