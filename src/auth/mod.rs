//! Session token verification.
//!
//! The catalog/user service issues short-lived signed bearer tokens of the
//! form `base64url(claims-json) "." base64url(hmac-sha256-tag)`. The quiz
//! server only verifies: signature over the payload bytes, expiry, and the
//! identity claims it needs. Issuance lives in the catalog service; the
//! signer here exists for tests and local tooling.

pub mod error;

pub use error::AuthError;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::protocol::UserId;

type HmacSha256 = Hmac<Sha256>;

/// Identity claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaims {
    /// Subject: the user id.
    pub sub: UserId,
    pub email: String,
    /// Display name as known to the user service. Rooms may override it
    /// with the name given on `join`.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    /// Unix-epoch expiry in seconds.
    pub exp: i64,
}

/// Verifies session tokens against the shared signing secret.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify signature and expiry, returning the embedded claims.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// Verification against an explicit clock, for deterministic tests.
    pub fn verify_at(&self, token: &str, now_secs: i64) -> Result<SessionClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let (payload_b64, tag_b64) = token
            .split_once('.')
            .ok_or(AuthError::MalformedToken)?;
        if payload_b64.is_empty() || tag_b64.is_empty() {
            return Err(AuthError::MalformedToken);
        }

        let expected_tag = BASE64URL
            .decode(tag_b64)
            .map_err(|_| AuthError::MalformedToken)?;
        let actual_tag = self.sign_bytes(payload_b64.as_bytes())?;
        if actual_tag.ct_eq(expected_tag.as_slice()).unwrap_u8() != 1 {
            return Err(AuthError::BadSignature);
        }

        let payload = BASE64URL
            .decode(payload_b64)
            .map_err(|_| AuthError::BadPayload)?;
        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| AuthError::BadPayload)?;

        if claims.exp <= now_secs {
            return Err(AuthError::Expired {
                expired_at: claims.exp,
            });
        }
        Ok(claims)
    }

    /// Sign claims into a token. The catalog service is the production
    /// issuer; this exists for tests and local tooling.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String, AuthError> {
        let payload = serde_json::to_vec(claims).unwrap_or_default();
        let payload_b64 = BASE64URL.encode(payload);
        let tag = self.sign_bytes(payload_b64.as_bytes())?;
        Ok(format!("{payload_b64}.{}", BASE64URL.encode(tag)))
    }

    fn sign_bytes(&self, payload: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| AuthError::InvalidSecret)?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(b"test-signing-secret".to_vec())
    }

    fn claims(exp: i64) -> SessionClaims {
        SessionClaims {
            sub: Uuid::new_v4(),
            email: "ada@example.com".into(),
            name: "Ada".into(),
            picture: None,
            exp,
        }
    }

    #[test]
    fn sign_verify_round_trip() {
        let verifier = verifier();
        let claims = claims(2_000_000_000);
        let token = verifier.sign(&claims).unwrap();
        let verified = verifier.verify_at(&token, 1_000_000_000).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = verifier();
        let token = verifier.sign(&claims(1_000)).unwrap();
        assert_eq!(
            verifier.verify_at(&token, 1_000),
            Err(AuthError::Expired { expired_at: 1_000 })
        );
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let verifier = verifier();
        let token = verifier.sign(&claims(2_000_000_000)).unwrap();
        let (payload, tag) = token.split_once('.').unwrap();
        let mut forged = payload.to_string();
        forged.push('A');
        let forged = format!("{forged}.{tag}");
        assert_eq!(
            verifier.verify_at(&forged, 0),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn wrong_secret_fails_signature() {
        let token = verifier().sign(&claims(2_000_000_000)).unwrap();
        let other = TokenVerifier::new(b"another-secret".to_vec());
        assert_eq!(other.verify_at(&token, 0), Err(AuthError::BadSignature));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let verifier = verifier();
        assert_eq!(verifier.verify_at("", 0), Err(AuthError::MissingToken));
        assert_eq!(
            verifier.verify_at("no-dot-here", 0),
            Err(AuthError::MalformedToken)
        );
        assert_eq!(
            verifier.verify_at(".sig", 0),
            Err(AuthError::MalformedToken)
        );
        assert_eq!(
            verifier.verify_at("payload.", 0),
            Err(AuthError::MalformedToken)
        );
    }
}
