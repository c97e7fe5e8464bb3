use thiserror::Error;

/// Why a session token failed verification.
///
/// All variants lead to the same client-visible outcome (close 1008 with no
/// application error frame); the distinction exists for server-side logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("signing secret was rejected by the mac")]
    InvalidSecret,
    #[error("token is missing")]
    MissingToken,
    #[error("token is not in payload.signature form")]
    MalformedToken,
    #[error("token payload is not valid base64url JSON")]
    BadPayload,
    #[error("token signature does not verify")]
    BadSignature,
    #[error("token expired at {expired_at}")]
    Expired { expired_at: i64 },
}
