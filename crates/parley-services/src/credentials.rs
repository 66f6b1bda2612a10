//! Credential store — username → password verifier.
//!
//! A verifier is `hex(SHA-256(salt || password_hash))`, where
//! `password_hash` is what the client submits: `hex(SHA-256(password))`.
//! The store itself is an external collaborator; `MemoryCredentials` is the
//! implementation the daemon builds from its config file.

use std::collections::HashMap;

use parley_core::config::UserEntry;
use parley_core::crypto::{ct_eq, sha256_hex};
use thiserror::Error;

/// Salt and hash for one registered user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verifier {
    pub salt: String,
    pub hash: String,
}

/// Lookup interface for persistent credentials.
pub trait CredentialStore: Send + Sync {
    fn lookup(&self, username: &str) -> Option<Verifier>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("no such user")]
    NotFound,
    #[error("password verifier mismatch")]
    Mismatch,
}

/// Client-side transform of a plaintext password.
pub fn password_hash(password: &str) -> String {
    sha256_hex(&[password.as_bytes()])
}

/// Server-side verifier for a salt and a submitted password hash.
pub fn make_verifier(salt: &str, password_hash: &str) -> String {
    sha256_hex(&[salt.as_bytes(), password_hash.as_bytes()])
}

/// Stand-in verifier for a missing user, so that both failures cost one
/// hash and one compare. A miss is `NotFound` whatever the compare says.
const UNKNOWN_USER_SALT: &str = "parley/unknown-user";
const UNKNOWN_USER_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Check a submitted password hash against the store.
pub fn verify_password(
    store: &dyn CredentialStore,
    username: &str,
    submitted_hash: &str,
) -> Result<(), CredentialError> {
    let found = store.lookup(username);
    let (salt, hash) = match &found {
        Some(v) => (v.salt.as_str(), v.hash.as_str()),
        None => (UNKNOWN_USER_SALT, UNKNOWN_USER_HASH),
    };
    let computed = make_verifier(salt, submitted_hash);
    let matches = ct_eq(computed.as_bytes(), hash.as_bytes());
    match (found, matches) {
        (None, _) => Err(CredentialError::NotFound),
        (Some(_), true) => Ok(()),
        (Some(_), false) => Err(CredentialError::Mismatch),
    }
}

/// In-memory store, loaded once at startup.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    users: HashMap<String, Verifier>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[UserEntry]) -> Self {
        let mut store = Self::new();
        for e in entries {
            store.users.insert(
                e.username.clone(),
                Verifier {
                    salt: e.salt.clone(),
                    hash: e.verifier.to_ascii_lowercase(),
                },
            );
        }
        store
    }

    /// Register a user from a plaintext password. Used by tests and tooling.
    pub fn insert_password(&mut self, username: &str, salt: &str, password: &str) {
        self.users.insert(
            username.to_owned(),
            Verifier {
                salt: salt.to_owned(),
                hash: make_verifier(salt, &password_hash(password)),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl CredentialStore for MemoryCredentials {
    fn lookup(&self, username: &str) -> Option<Verifier> {
        self.users.get(username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryCredentials {
        let mut s = MemoryCredentials::new();
        s.insert_password("alice", "s4lt", "wonderland");
        s
    }

    #[test]
    fn correct_password_verifies() {
        assert_eq!(
            verify_password(&store(), "alice", &password_hash("wonderland")),
            Ok(())
        );
    }

    #[test]
    fn wrong_password_and_unknown_user_fail() {
        assert_eq!(
            verify_password(&store(), "alice", &password_hash("looking-glass")),
            Err(CredentialError::Mismatch)
        );
        assert_eq!(
            verify_password(&store(), "bob", &password_hash("wonderland")),
            Err(CredentialError::NotFound)
        );
    }

    /// Counts lookups and always misses.
    struct Empty(std::sync::atomic::AtomicUsize);

    impl CredentialStore for Empty {
        fn lookup(&self, _: &str) -> Option<Verifier> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            None
        }
    }

    #[test]
    fn unknown_user_never_matches_stand_in_verifier() {
        let store = Empty(Default::default());
        let hashed = password_hash("wonderland");
        for submitted in ["", UNKNOWN_USER_HASH, hashed.as_str()] {
            assert_eq!(
                verify_password(&store, "nobody", submitted),
                Err(CredentialError::NotFound)
            );
        }
        assert_eq!(store.0.load(std::sync::atomic::Ordering::Relaxed), 3);
        assert_eq!(make_verifier(UNKNOWN_USER_SALT, "").len(), UNKNOWN_USER_HASH.len());
    }

    #[test]
    fn raw_password_is_not_accepted_as_hash() {
        assert!(verify_password(&store(), "alice", "wonderland").is_err());
    }

    #[test]
    fn config_entries_load() {
        let entry = UserEntry {
            username: "carol".into(),
            salt: "x".into(),
            verifier: make_verifier("x", &password_hash("pw")).to_ascii_uppercase(),
        };
        let s = MemoryCredentials::from_entries(&[entry]);
        assert_eq!(s.len(), 1);
        assert!(verify_password(&s, "carol", &password_hash("pw")).is_ok());
    }
}
