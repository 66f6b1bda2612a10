//! Server side of the login handshake.
//!
//! ```text
//!   INIT      ──▶  mint cookie, record AwaitingSubmit      ──▶ COOKIE
//!   SUBMIT    ──▶  check password, negotiate key + nonce   ──▶ CHALLENGE
//!   RESPONSE  ──▶  compare nonce, promote to user table    ──▶ ACCEPTED
//! ```
//!
//! Every phase takes the record out of the pending table first. A handler
//! that fails simply returns the error: the record it holds is dropped with
//! it, which is how a failed attempt is discarded.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_core::config::LimitsConfig;
use parley_core::crypto::{
    asymmetric_decrypt, asymmetric_encrypt, current_timestamp, ct_eq, parse_public_key_der,
    random_bytes, random_iv, random_key, sign, symmetric_decrypt, symmetric_encrypt, Keypair,
};
use parley_core::freshness::validate_client_ts;
use parley_core::wire::{
    AcceptedBody, Body, Challenge, ChallengeBody, Context, Cookie, Credentials, Reply, Request,
    NONCE_LEN,
};
use parley_core::EnvelopeError;

use crate::credentials::{verify_password, CredentialStore};
use crate::error::ProtocolError;
use crate::guard;
use crate::session::{Negotiated, PendingTable, SessionRecord, SessionState, UserTable};

/// Lifetime and capacity bounds for pending handshakes.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub pending_ttl: Duration,
    pub challenge_ttl: Duration,
    pub max_pending: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(c: &LimitsConfig) -> Self {
        Self {
            pending_ttl: Duration::from_secs(c.pending_ttl_secs),
            challenge_ttl: Duration::from_secs(c.challenge_ttl_secs),
            max_pending: c.max_pending,
        }
    }
}

/// Owns the server key and both session tables. Cheap to clone.
#[derive(Clone)]
pub struct LoginServer {
    keypair: Arc<Keypair>,
    credentials: Arc<dyn CredentialStore>,
    pending: PendingTable,
    users: UserTable,
    limits: Limits,
}

impl LoginServer {
    pub fn new(
        keypair: Arc<Keypair>,
        credentials: Arc<dyn CredentialStore>,
        limits: Limits,
    ) -> Self {
        Self {
            keypair,
            credentials,
            pending: PendingTable::new(),
            users: UserTable::new(),
            limits,
        }
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn users(&self) -> &UserTable {
        &self.users
    }

    /// Route one decoded request to its handler.
    pub fn handle(&self, from: SocketAddr, request: Request) -> Result<Reply, ProtocolError> {
        match request {
            Request::LoginInit => self.login_init(from),
            Request::LoginSubmit {
                cookie,
                public_key,
                payload,
            } => self.login_submit(&cookie, &public_key, &payload),
            Request::LoginResponse { cookie, payload } => self.login_response(&cookie, &payload),
            Request::List { cookie, sealed } => guard::list(&self.users, &cookie, &sealed),
            Request::Logout { cookie, sealed } => guard::logout(&self.users, &cookie, &sealed),
        }
    }

    /// Evict abandoned handshakes. Called periodically by the listener.
    pub fn sweep_expired(&self) -> usize {
        let evicted = self.pending.sweep(self.limits.pending_ttl);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.pending.len(), "swept pending handshakes");
        }
        evicted
    }

    // ── INIT ──────────────────────────────────────────────────────────────────

    fn login_init(&self, from: SocketAddr) -> Result<Reply, ProtocolError> {
        if self.pending.len() >= self.limits.max_pending {
            self.sweep_expired();
            if self.pending.len() >= self.limits.max_pending {
                return Err(ProtocolError::Capacity);
            }
        }

        let cookie = loop {
            let cookie = Cookie::generate();
            if self.admit(&cookie, from) {
                break cookie;
            }
        };

        tracing::debug!(%from, cookie = %cookie, "handshake started");
        Ok(Reply::Cookie { cookie })
    }

    /// Open a pending record under `cookie` unless either table already
    /// knows it.
    fn admit(&self, cookie: &Cookie, from: SocketAddr) -> bool {
        !self.users.contains(cookie)
            && self.pending.insert_new(SessionRecord::new(cookie.clone(), from))
    }

    // ── SUBMIT ────────────────────────────────────────────────────────────────

    fn login_submit(
        &self,
        cookie: &Cookie,
        public_key: &[u8],
        payload: &[u8],
    ) -> Result<Reply, ProtocolError> {
        let record = self.pending.take(cookie).ok_or(ProtocolError::UnknownCookie)?;
        record.expect_state(SessionState::AwaitingSubmit, Context::Submit)?;
        let peer = record.address();

        let private = self.keypair.private();
        let peer_public_key = parse_public_key_der(&asymmetric_decrypt(private, public_key)?)?;
        let credentials = Credentials::decode(&asymmetric_decrypt(private, payload)?)?;

        if !validate_client_ts(credentials.timestamp) {
            return Err(ProtocolError::StaleTimestamp(credentials.timestamp));
        }
        if credentials.nonce_user.len() != NONCE_LEN {
            return Err(EnvelopeError::BadLength {
                field: "nonce_user".into(),
                expected: NONCE_LEN,
                actual: credentials.nonce_user.len(),
            }
            .into());
        }
        verify_password(
            self.credentials.as_ref(),
            &credentials.username,
            &credentials.password_hash,
        )?;

        let session_key = random_key();
        let iv = random_iv();
        let server_nonce = random_bytes(NONCE_LEN);
        let nonce_time = current_timestamp();

        let body = ChallengeBody {
            nonce_server: server_nonce.clone(),
            nonce_user: credentials.nonce_user.clone(),
            cookie: cookie.clone(),
            timestamp: nonce_time,
        };
        let encrypted = symmetric_encrypt(&session_key, &iv, &body.encode());
        let wrapped_key = asymmetric_encrypt(&peer_public_key, &session_key[..])?;
        let signature = sign(
            private,
            &Challenge::signed_bytes(&wrapped_key, &iv, &encrypted),
        );

        let username = credentials.username;
        let record = record.submit(Negotiated {
            username: username.clone(),
            password_verified: true,
            client_nonce: credentials.nonce_user,
            server_nonce,
            peer_public_key,
            session_key,
            iv,
            nonce_time,
        })?;
        self.pending.put_back(record);

        tracing::debug!(cookie = %cookie, %username, %peer, "credentials accepted, challenge issued");
        Ok(Reply::Challenge(Challenge {
            cookie: cookie.clone(),
            session_key: wrapped_key,
            iv,
            payload: encrypted,
            signature,
        }))
    }

    // ── RESPONSE ──────────────────────────────────────────────────────────────

    fn login_response(&self, cookie: &Cookie, payload: &[u8]) -> Result<Reply, ProtocolError> {
        let record = self.pending.take(cookie).ok_or(ProtocolError::UnknownCookie)?;
        record.expect_state(SessionState::AwaitingResponse, Context::Response)?;
        let negotiated = record.negotiated().ok_or(ProtocolError::StateMismatch {
            state: record.state(),
            trigger: Context::Response,
        })?;

        let elapsed = current_timestamp().saturating_sub(negotiated.nonce_time);
        if elapsed > self.limits.challenge_ttl.as_secs() {
            return Err(ProtocolError::ChallengeExpired(elapsed));
        }

        let answer = symmetric_decrypt(&negotiated.session_key, &negotiated.iv, payload)?;
        if !ct_eq(&answer, &negotiated.server_nonce) {
            return Err(ProtocolError::ChallengeFailed);
        }

        let accepted = AcceptedBody {
            username: negotiated.username.clone(),
            nonce_user: negotiated.client_nonce.clone(),
        };
        let encrypted = symmetric_encrypt(&negotiated.session_key, &negotiated.iv, &accepted.encode());

        let session = record.authenticate()?;
        tracing::info!(
            cookie = %cookie,
            username = %session.username(),
            peer = %session.address,
            "user authenticated"
        );
        self.users.promote(session);

        Ok(Reply::Accepted {
            cookie: cookie.clone(),
            payload: encrypted,
        })
    }
}
