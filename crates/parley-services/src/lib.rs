//! parley-services — the login state machine and everything it keeps:
//! session records, the pending and authenticated tables, the credential
//! store and the authorization guard. Also the sans-io client that speaks
//! the other side of the same protocol.

pub mod client;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod handshake;
pub mod session;

pub use client::{ClientError, ClientSession, LoginClient};
pub use credentials::{
    make_verifier, password_hash, verify_password, CredentialError, CredentialStore,
    MemoryCredentials, Verifier,
};
pub use error::ProtocolError;
pub use guard::{authorize, AuthorizedRequest};
pub use handshake::{Limits, LoginServer};
pub use session::{
    AuthenticatedSession, Negotiated, PendingTable, SessionRecord, SessionState, UserTable,
};
