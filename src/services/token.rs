//! Access tokens
//!
//! HS256 JSON Web Tokens signed with the configured secret. Only the
//! `HS256` algorithm is accepted on verification.

use crate::config::AuthConfig;
use crate::models::User;
use chrono::{Duration, Utc};
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub email: String,
    pub role: String,
    /// Issued at (unix seconds)
    pub iat: i64,
    /// Expires at (unix seconds)
    pub exp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Unsupported token algorithm")]
    UnsupportedAlgorithm,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,
}

/// Issues and verifies access tokens
#[derive(Clone)]
pub struct TokenService {
    key: HmacSha256,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration) -> anyhow::Result<Self> {
        let key = <HmacSha256 as Mac>::new_from_slice(secret.as_ref())
            .map_err(|e| anyhow::anyhow!("Invalid token secret: {}", e))?;
        Ok(Self { key, ttl })
    }

    pub fn from_config(config: &AuthConfig) -> anyhow::Result<Self> {
        Self::new(&config.jwt_secret, Duration::hours(config.token_ttl_hours))
    }

    /// Issue a token for a user
    pub fn issue(&self, user: &User) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            role: user.role.to_string(),
            iat: now,
            exp: now + self.ttl.num_seconds(),
        };
        self.sign(&claims)
    }

    /// Sign arbitrary claims
    pub fn sign(&self, claims: &Claims) -> String {
        let header = Header {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        };
        // Serializing these plain structs cannot fail
        let header = serde_json::to_vec(&header).unwrap_or_default();
        let payload = serde_json::to_vec(claims).unwrap_or_default();

        let signing_input = format!(
            "{}.{}",
            BASE64URL_NOPAD.encode(&header),
            BASE64URL_NOPAD.encode(&payload)
        );
        let signature = BASE64URL_NOPAD.encode(&self.mac(signing_input.as_bytes()));

        format!("{}.{}", signing_input, signature)
    }

    /// Verify signature, algorithm and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let (header_b64, payload_b64, signature_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(TokenError::Malformed),
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(TokenError::UnsupportedAlgorithm);
        }

        let signature = BASE64URL_NOPAD
            .decode(signature_b64.as_bytes())
            .map_err(|_| TokenError::Malformed)?;

        let mut mac = self.key.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.key.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = BASE64URL_NOPAD
        .decode(segment.as_bytes())
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use proptest::prelude::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::hours(1)).unwrap()
    }

    fn user() -> User {
        let mut user = User::new("Asha".into(), "asha@example.com".into(), "h".into(), UserRole::Admin);
        user.id = 7;
        user
    }

    #[test]
    fn test_issue_and_verify() {
        let token = service().issue(&user());
        assert_eq!(token.split('.').count(), 3);

        let claims = service().verify(&token).expect("Token should verify");
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.email, "asha@example.com");
        assert_eq!(claims.role, "ADMIN");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = service().issue(&user());
        let other = TokenService::new("another-secret", Duration::hours(1)).unwrap();
        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_expired_token_rejected() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: 1,
            email: "a@example.com".into(),
            role: "USER".into(),
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = service().sign(&claims);
        assert_eq!(service().verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let token = service().issue(&user());
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = Claims {
            sub: 1,
            email: "x@example.com".into(),
            role: "ADMIN".into(),
            iat: 0,
            exp: i64::MAX,
        };
        let forged = BASE64URL_NOPAD.encode(&serde_json::to_vec(&forged_claims).unwrap());
        let tampered = format!("{}.{}.{}", parts[0], forged, parts[2]);
        assert_eq!(service().verify(&tampered), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_none_algorithm_rejected() {
        let header = BASE64URL_NOPAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let token = service().issue(&user());
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.", header, parts[1]);
        assert_eq!(service().verify(&forged), Err(TokenError::UnsupportedAlgorithm));
    }

    #[test]
    fn test_malformed_tokens() {
        assert_eq!(service().verify("abc"), Err(TokenError::Malformed));
        assert_eq!(service().verify("a.b.c.d"), Err(TokenError::Malformed));
        assert_eq!(service().verify("!!.??.**"), Err(TokenError::Malformed));
    }

    proptest! {
        #[test]
        fn sign_verify_roundtrip(sub in 1i64..1_000_000, email in "[a-z]{1,12}@[a-z]{1,8}\\.com") {
            let now = Utc::now().timestamp();
            let claims = Claims {
                sub,
                email,
                role: "USER".into(),
                iat: now,
                exp: now + 60,
            };
            let token = service().sign(&claims);
            prop_assert_eq!(service().verify(&token), Ok(claims));
        }
    }
}
