//! Protocol failure taxonomy.
//!
//! Every failed request ends in exactly one of these. The reason is for
//! logs only: the peer always sees the same bare ERROR (or nothing).

use parley_core::crypto::CryptoError;
use parley_core::envelope::EnvelopeError;
use parley_core::wire::Context;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("cookie is not a pending handshake")]
    UnknownCookie,

    #[error("{trigger} is not valid in state {state:?}")]
    StateMismatch {
        state: SessionState,
        trigger: Context,
    },

    #[error("payload claims user {claimed:?}, session belongs to {actual:?}")]
    IdentityMismatch { claimed: String, actual: String },

    #[error("credentials rejected: {0}")]
    Credential(#[from] CredentialError),

    #[error("cookie is not an authenticated session")]
    Unauthorized,

    #[error("request signature does not verify")]
    BadSignature,

    #[error("timestamp {0} is outside the accepted window")]
    StaleTimestamp(u64),

    #[error("challenge answered after {0}s")]
    ChallengeExpired(u64),

    #[error("challenge answer does not match the server nonce")]
    ChallengeFailed,

    #[error("too many pending handshakes")]
    Capacity,
}

impl ProtocolError {
    /// Stable reason code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Crypto(_) => "crypto",
            ProtocolError::Envelope(_) => "envelope",
            ProtocolError::UnknownCookie => "unknown_cookie",
            ProtocolError::StateMismatch { .. } => "state_mismatch",
            ProtocolError::IdentityMismatch { .. } => "identity_mismatch",
            ProtocolError::Credential(_) => "credential",
            ProtocolError::Unauthorized => "unauthorized",
            ProtocolError::BadSignature => "bad_signature",
            ProtocolError::StaleTimestamp(_) => "stale_timestamp",
            ProtocolError::ChallengeExpired(_) => "challenge_expired",
            ProtocolError::ChallengeFailed => "challenge_failed",
            ProtocolError::Capacity => "capacity",
        }
    }
}
