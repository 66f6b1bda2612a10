//! Session records and the two tables that hold them.
//!
//! A record lives in the [`PendingTable`] while its handshake is in flight
//! and moves into the [`UserTable`] once the client has answered the
//! challenge. The two tables never hold the same cookie.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rsa::RsaPublicKey;

use parley_core::crypto::{Iv, SessionKey};
use parley_core::wire::{Context, Cookie};

use crate::error::ProtocolError;

/// Handshake progress. Ordered: a record only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    AwaitingSubmit,
    AwaitingResponse,
    Authenticated,
}

/// Everything fixed during SUBMIT. Present iff state ≥ AwaitingResponse.
#[derive(Clone)]
pub struct Negotiated {
    pub username: String,
    pub password_verified: bool,
    pub client_nonce: Vec<u8>,
    pub server_nonce: Vec<u8>,
    pub peer_public_key: RsaPublicKey,
    pub session_key: SessionKey,
    pub iv: Iv,
    /// Unix seconds at which `server_nonce` was issued.
    pub nonce_time: u64,
}

impl fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiated")
            .field("username", &self.username)
            .field("password_verified", &self.password_verified)
            .field("nonce_time", &self.nonce_time)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Stage {
    AwaitingSubmit,
    AwaitingResponse(Box<Negotiated>),
}

/// One login attempt, keyed by its cookie.
#[derive(Debug)]
pub struct SessionRecord {
    cookie: Cookie,
    address: SocketAddr,
    created_at: Instant,
    stage: Stage,
}

impl SessionRecord {
    pub fn new(cookie: Cookie, address: SocketAddr) -> Self {
        Self {
            cookie,
            address,
            created_at: Instant::now(),
            stage: Stage::AwaitingSubmit,
        }
    }

    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn state(&self) -> SessionState {
        match self.stage {
            Stage::AwaitingSubmit => SessionState::AwaitingSubmit,
            Stage::AwaitingResponse(_) => SessionState::AwaitingResponse,
        }
    }

    pub fn negotiated(&self) -> Option<&Negotiated> {
        match &self.stage {
            Stage::AwaitingSubmit => None,
            Stage::AwaitingResponse(n) => Some(n),
        }
    }

    /// Require the record to be in `state` before handling `trigger`.
    pub fn expect_state(&self, state: SessionState, trigger: Context) -> Result<(), ProtocolError> {
        if self.state() == state {
            Ok(())
        } else {
            Err(ProtocolError::StateMismatch {
                state: self.state(),
                trigger,
            })
        }
    }

    /// AwaitingSubmit → AwaitingResponse.
    pub fn submit(self, negotiated: Negotiated) -> Result<Self, ProtocolError> {
        self.expect_state(SessionState::AwaitingSubmit, Context::Submit)?;
        Ok(Self {
            stage: Stage::AwaitingResponse(Box::new(negotiated)),
            ..self
        })
    }

    /// AwaitingResponse → Authenticated. Consumes the pending record.
    pub fn authenticate(self) -> Result<AuthenticatedSession, ProtocolError> {
        let state = self.state();
        match self.stage {
            Stage::AwaitingResponse(n) if n.password_verified => Ok(AuthenticatedSession {
                cookie: self.cookie,
                address: self.address,
                negotiated: *n,
            }),
            _ => Err(ProtocolError::StateMismatch {
                state,
                trigger: Context::Response,
            }),
        }
    }
}

/// A record that completed the handshake. Cloned out of the table for each
/// request so no map guard is held while crypto runs.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub cookie: Cookie,
    pub address: SocketAddr,
    pub negotiated: Negotiated,
}

impl AuthenticatedSession {
    pub fn state(&self) -> SessionState {
        SessionState::Authenticated
    }

    pub fn username(&self) -> &str {
        &self.negotiated.username
    }
}

// ── Pending table ─────────────────────────────────────────────────────────────

/// Handshakes in flight. Shared across tasks.
///
/// A handler removes the record with [`take`](Self::take) before working on
/// it, so two datagrams bearing the same cookie can never advance the same
/// record. Whatever the handler does not [`put_back`](Self::put_back) is
/// discarded.
#[derive(Debug, Clone, Default)]
pub struct PendingTable {
    records: Arc<DashMap<Cookie, SessionRecord>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record. False if the cookie is already present.
    pub fn insert_new(&self, record: SessionRecord) -> bool {
        match self.records.entry(record.cookie.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn take(&self, cookie: &Cookie) -> Option<SessionRecord> {
        self.records.remove(cookie).map(|(_, r)| r)
    }

    pub fn put_back(&self, record: SessionRecord) {
        self.records.insert(record.cookie.clone(), record);
    }

    /// Evict records older than `ttl`. Returns how many were removed.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut evicted = 0;
        self.records.retain(|_, r| {
            let keep = r.age() < ttl;
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }

    pub fn state_of(&self, cookie: &Cookie) -> Option<SessionState> {
        self.records.get(cookie).map(|r| r.state())
    }

    pub fn contains(&self, cookie: &Cookie) -> bool {
        self.records.contains_key(cookie)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ── Authenticated table ───────────────────────────────────────────────────────

/// Logged-in sessions, keyed by cookie.
#[derive(Debug, Clone, Default)]
pub struct UserTable {
    sessions: Arc<DashMap<Cookie, AuthenticatedSession>>,
}

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn promote(&self, session: AuthenticatedSession) {
        self.sessions.insert(session.cookie.clone(), session);
    }

    pub fn get(&self, cookie: &Cookie) -> Option<AuthenticatedSession> {
        self.sessions.get(cookie).map(|s| s.value().clone())
    }

    pub fn remove(&self, cookie: &Cookie) -> Option<AuthenticatedSession> {
        self.sessions.remove(cookie).map(|(_, s)| s)
    }

    /// Distinct logged-in usernames, sorted.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .sessions
            .iter()
            .map(|e| e.value().username().to_owned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn contains(&self, cookie: &Cookie) -> bool {
        self.sessions.contains_key(cookie)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parley_core::crypto::{random_bytes, random_iv, random_key, Keypair};
    use std::sync::OnceLock;

    pub(crate) fn peer_key() -> &'static Keypair {
        static KP: OnceLock<Keypair> = OnceLock::new();
        KP.get_or_init(|| Keypair::generate_with_bits(1024).unwrap())
    }

    pub(crate) fn negotiated(username: &str) -> Negotiated {
        Negotiated {
            username: username.to_owned(),
            password_verified: true,
            client_nonce: random_bytes(16),
            server_nonce: random_bytes(16),
            peer_public_key: peer_key().public.clone(),
            session_key: random_key(),
            iv: random_iv(),
            nonce_time: 0,
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn record_moves_forward_only() {
        let rec = SessionRecord::new(Cookie::generate(), addr());
        assert_eq!(rec.state(), SessionState::AwaitingSubmit);
        assert!(rec.negotiated().is_none());

        let rec = rec.submit(negotiated("alice")).unwrap();
        assert_eq!(rec.state(), SessionState::AwaitingResponse);
        assert_eq!(rec.negotiated().unwrap().username, "alice");

        // A second SUBMIT is out of order.
        let err = rec.submit(negotiated("mallory")).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::StateMismatch {
                state: SessionState::AwaitingResponse,
                trigger: Context::Submit
            }
        ));
    }

    #[test]
    fn cannot_authenticate_before_submit() {
        let rec = SessionRecord::new(Cookie::generate(), addr());
        assert!(matches!(
            rec.authenticate(),
            Err(ProtocolError::StateMismatch {
                state: SessionState::AwaitingSubmit,
                ..
            })
        ));
    }

    #[test]
    fn unverified_password_never_authenticates() {
        let mut n = negotiated("alice");
        n.password_verified = false;
        let rec = SessionRecord::new(Cookie::generate(), addr()).submit(n).unwrap();
        assert!(rec.authenticate().is_err());
    }

    #[test]
    fn states_are_ordered() {
        assert!(SessionState::AwaitingSubmit < SessionState::AwaitingResponse);
        assert!(SessionState::AwaitingResponse < SessionState::Authenticated);
    }

    #[test]
    fn debug_hides_key_material() {
        let n = negotiated("alice");
        let s = format!("{n:?}");
        assert!(s.contains("alice"));
        assert!(!s.contains("session_key"));
        assert!(!s.contains("server_nonce"));
    }

    #[test]
    fn pending_take_removes_and_put_back_restores() {
        let table = PendingTable::new();
        let cookie = Cookie::generate();
        assert!(table.insert_new(SessionRecord::new(cookie.clone(), addr())));
        assert!(!table.insert_new(SessionRecord::new(cookie.clone(), addr())));

        let rec = table.take(&cookie).unwrap();
        assert!(!table.contains(&cookie));
        assert!(table.take(&cookie).is_none());

        table.put_back(rec);
        assert_eq!(table.state_of(&cookie), Some(SessionState::AwaitingSubmit));
    }

    #[test]
    fn sweep_evicts_only_old_records() {
        let table = PendingTable::new();
        for _ in 0..3 {
            table.insert_new(SessionRecord::new(Cookie::generate(), addr()));
        }
        assert_eq!(table.sweep(Duration::from_secs(3600)), 0);
        assert_eq!(table.len(), 3);
        assert_eq!(table.sweep(Duration::ZERO), 3);
        assert!(table.is_empty());
    }

    #[test]
    fn user_table_lists_distinct_names() {
        let users = UserTable::new();
        for name in ["bob", "alice", "bob"] {
            let rec = SessionRecord::new(Cookie::generate(), addr())
                .submit(negotiated(name))
                .unwrap();
            users.promote(rec.authenticate().unwrap());
        }
        assert_eq!(users.len(), 3);
        assert_eq!(users.usernames(), vec!["alice", "bob"]);
    }

    #[test]
    fn user_table_remove() {
        let users = UserTable::new();
        let cookie = Cookie::generate();
        let rec = SessionRecord::new(cookie.clone(), addr())
            .submit(negotiated("alice"))
            .unwrap();
        users.promote(rec.authenticate().unwrap());

        let s = users.get(&cookie).unwrap();
        assert_eq!(s.state(), SessionState::Authenticated);
        assert_eq!(s.username(), "alice");

        assert!(users.remove(&cookie).is_some());
        assert!(!users.contains(&cookie));
        assert!(users.remove(&cookie).is_none());
    }
}
