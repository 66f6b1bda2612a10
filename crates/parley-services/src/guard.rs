//! Authorization guard for requests made after login.
//!
//! Each LIST or LOGOUT names its session by cookie and carries a sealed
//! body: AES under the session key, signed by the client key declared at
//! SUBMIT. A request that fails any check is rejected, but the session it
//! named stays logged in. Only a verified LOGOUT ends a session.

use parley_core::crypto::{symmetric_decrypt, symmetric_encrypt, verify};
use parley_core::freshness::validate_client_ts;
use parley_core::wire::{Body, Cookie, ListBody, LogoutAckBody, Reply, RequestBody, Sealed};

use crate::error::ProtocolError;
use crate::session::{AuthenticatedSession, UserTable};

/// A request that passed every check, with the session it belongs to.
#[derive(Debug)]
pub struct AuthorizedRequest {
    pub session: AuthenticatedSession,
    pub body: RequestBody,
}

impl AuthorizedRequest {
    /// Encrypt a reply body under the session key.
    pub fn seal_reply(&self, body: &impl Body) -> Vec<u8> {
        let n = &self.session.negotiated;
        symmetric_encrypt(&n.session_key, &n.iv, &body.encode())
    }
}

pub fn authorize(
    users: &UserTable,
    cookie: &Cookie,
    sealed: &Sealed,
) -> Result<AuthorizedRequest, ProtocolError> {
    let session = users.get(cookie).ok_or(ProtocolError::Unauthorized)?;
    let n = &session.negotiated;

    if !verify(&n.peer_public_key, &sealed.signature, &sealed.ciphertext) {
        return Err(ProtocolError::BadSignature);
    }
    let body = RequestBody::decode(&symmetric_decrypt(&n.session_key, &n.iv, &sealed.ciphertext)?)?;

    if body.username != n.username {
        return Err(ProtocolError::IdentityMismatch {
            claimed: body.username,
            actual: n.username.clone(),
        });
    }
    if !validate_client_ts(body.timestamp) {
        return Err(ProtocolError::StaleTimestamp(body.timestamp));
    }

    Ok(AuthorizedRequest { session, body })
}

pub fn list(users: &UserTable, cookie: &Cookie, sealed: &Sealed) -> Result<Reply, ProtocolError> {
    let request = authorize(users, cookie, sealed)?;
    let reply = ListBody {
        list: users.usernames(),
        nonce_user: request.body.nonce_user.clone(),
    };
    tracing::debug!(
        cookie = %cookie,
        username = %request.session.username(),
        online = reply.list.len(),
        "served LIST"
    );
    Ok(Reply::List {
        payload: request.seal_reply(&reply),
    })
}

pub fn logout(users: &UserTable, cookie: &Cookie, sealed: &Sealed) -> Result<Reply, ProtocolError> {
    let request = authorize(users, cookie, sealed)?;
    users.remove(cookie);
    tracing::info!(
        cookie = %cookie,
        username = %request.session.username(),
        "user logged out"
    );
    // The ack is still sealed under the key that was just forgotten.
    Ok(Reply::LogoutAck {
        payload: request.seal_reply(&LogoutAckBody {
            nonce_user: request.body.nonce_user.clone(),
        }),
    })
}
