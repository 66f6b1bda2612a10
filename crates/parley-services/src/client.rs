//! Client side of the protocol, without I/O.
//!
//! `LoginClient` turns each server reply into the next request. Once the
//! server accepts, it becomes a `ClientSession` that seals LIST and LOGOUT
//! requests and opens their replies. The caller owns the socket, the
//! timeouts and any retries.

use std::fmt;
use std::sync::Arc;

use rsa::RsaPublicKey;
use thiserror::Error;
use zeroize::Zeroizing;

use parley_core::crypto::{
    asymmetric_decrypt, asymmetric_encrypt, current_timestamp, ct_eq, random_bytes, sign,
    symmetric_decrypt, symmetric_encrypt, verify, CryptoError, Iv, Keypair, SessionKey,
    SESSION_KEY_LEN,
};
use parley_core::freshness::validate_server_ts;
use parley_core::wire::{
    AcceptedBody, Body, Challenge, ChallengeBody, Cookie, Credentials, ListBody, LogoutAckBody,
    Reply, Request, RequestBody, Sealed, NONCE_LEN,
};
use parley_core::EnvelopeError;

use crate::credentials::password_hash;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),

    #[error("envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("server rejected the request")]
    Rejected,

    #[error("unexpected {0} reply")]
    UnexpectedReply(&'static str),

    #[error("server signature does not verify")]
    BadSignature,

    #[error("reply names a different cookie")]
    CookieMismatch,

    #[error("reply does not echo our nonce")]
    NonceMismatch,

    #[error("server accepted a different user: {0:?}")]
    IdentityMismatch(String),

    #[error("session key has {0} bytes")]
    KeyLength(usize),

    #[error("server timestamp {0} is outside the accepted window")]
    StaleTimestamp(u64),

    #[error("{0} arrived before a request was sent")]
    OutOfOrder(&'static str),
}

fn unexpected(reply: &Reply) -> ClientError {
    match reply {
        Reply::Error => ClientError::Rejected,
        other => ClientError::UnexpectedReply(other.label()),
    }
}

// ── Login ─────────────────────────────────────────────────────────────────────

pub struct LoginClient {
    server_public: RsaPublicKey,
    keypair: Arc<Keypair>,
    username: String,
    password_hash: Zeroizing<String>,
    nonce_user: Vec<u8>,
    cookie: Option<Cookie>,
    negotiated: Option<(SessionKey, Iv)>,
}

impl fmt::Debug for LoginClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginClient")
            .field("username", &self.username)
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

impl LoginClient {
    pub fn new(
        server_public: RsaPublicKey,
        keypair: Arc<Keypair>,
        username: &str,
        password: &str,
    ) -> Self {
        Self {
            server_public,
            keypair,
            username: username.to_owned(),
            password_hash: Zeroizing::new(password_hash(password)),
            nonce_user: random_bytes(NONCE_LEN),
            cookie: None,
            negotiated: None,
        }
    }

    pub fn cookie(&self) -> Option<&Cookie> {
        self.cookie.as_ref()
    }

    pub fn init(&self) -> Request {
        Request::LoginInit
    }

    /// COOKIE → SUBMIT. Public key and credentials are both encrypted to
    /// the server.
    pub fn on_cookie(&mut self, reply: &Reply) -> Result<Request, ClientError> {
        let Reply::Cookie { cookie } = reply else {
            return Err(unexpected(reply));
        };

        let credentials = Credentials {
            username: self.username.clone(),
            password_hash: self.password_hash.to_string(),
            nonce_user: self.nonce_user.clone(),
            timestamp: current_timestamp(),
        };
        let plaintext = Zeroizing::new(credentials.encode());

        let request = Request::LoginSubmit {
            cookie: cookie.clone(),
            public_key: asymmetric_encrypt(&self.server_public, &self.keypair.public_der()?)?,
            payload: asymmetric_encrypt(&self.server_public, &plaintext)?,
        };
        self.cookie = Some(cookie.clone());
        Ok(request)
    }

    /// CHALLENGE → RESPONSE. Checks the server's signature before touching
    /// anything else, then proves we can unwrap the session key by sending
    /// the server nonce back under it.
    pub fn on_challenge(&mut self, reply: &Reply) -> Result<Request, ClientError> {
        let Reply::Challenge(challenge) = reply else {
            return Err(unexpected(reply));
        };
        let cookie = self.cookie.clone().ok_or(ClientError::OutOfOrder("CHALLENGE"))?;

        let signed = Challenge::signed_bytes(&challenge.session_key, &challenge.iv, &challenge.payload);
        if !verify(&self.server_public, &challenge.signature, &signed) {
            return Err(ClientError::BadSignature);
        }
        if challenge.cookie != cookie {
            return Err(ClientError::CookieMismatch);
        }

        let raw = Zeroizing::new(asymmetric_decrypt(self.keypair.private(), &challenge.session_key)?);
        let key: [u8; SESSION_KEY_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ClientError::KeyLength(raw.len()))?;
        let key = Zeroizing::new(key);

        let body = ChallengeBody::decode(&symmetric_decrypt(&key, &challenge.iv, &challenge.payload)?)?;
        if !ct_eq(&body.nonce_user, &self.nonce_user) {
            return Err(ClientError::NonceMismatch);
        }
        if body.cookie != cookie {
            return Err(ClientError::CookieMismatch);
        }
        if !validate_server_ts(body.timestamp) {
            return Err(ClientError::StaleTimestamp(body.timestamp));
        }

        let payload = symmetric_encrypt(&key, &challenge.iv, &body.nonce_server);
        self.negotiated = Some((key, challenge.iv));
        Ok(Request::LoginResponse { cookie, payload })
    }

    /// ACCEPTED → an authenticated session.
    pub fn on_accepted(self, reply: &Reply) -> Result<ClientSession, ClientError> {
        let Reply::Accepted { cookie, payload } = reply else {
            return Err(unexpected(reply));
        };
        let ours = self.cookie.ok_or(ClientError::OutOfOrder("ACCEPTED"))?;
        let (session_key, iv) = self.negotiated.ok_or(ClientError::OutOfOrder("ACCEPTED"))?;
        if *cookie != ours {
            return Err(ClientError::CookieMismatch);
        }

        let body = AcceptedBody::decode(&symmetric_decrypt(&session_key, &iv, payload)?)?;
        if !ct_eq(&body.nonce_user, &self.nonce_user) {
            return Err(ClientError::NonceMismatch);
        }
        if body.username != self.username {
            return Err(ClientError::IdentityMismatch(body.username));
        }

        Ok(ClientSession {
            cookie: ours,
            username: self.username,
            session_key,
            iv,
            keypair: self.keypair,
            pending_nonce: None,
        })
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A logged-in client.
pub struct ClientSession {
    cookie: Cookie,
    username: String,
    session_key: SessionKey,
    iv: Iv,
    keypair: Arc<Keypair>,
    pending_nonce: Option<Vec<u8>>,
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("cookie", &self.cookie)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ClientSession {
    pub fn cookie(&self) -> &Cookie {
        &self.cookie
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn seal(&mut self) -> Sealed {
        let nonce_user = random_bytes(NONCE_LEN);
        let body = RequestBody {
            username: self.username.clone(),
            nonce_user: nonce_user.clone(),
            timestamp: current_timestamp(),
        };
        let ciphertext = symmetric_encrypt(&self.session_key, &self.iv, &body.encode());
        let signature = sign(self.keypair.private(), &ciphertext);
        self.pending_nonce = Some(nonce_user);
        Sealed {
            ciphertext,
            signature,
        }
    }

    /// Decrypt a reply body and check it echoes the nonce of the request
    /// in flight.
    fn open<B: Body>(&mut self, payload: &[u8], echoed: fn(&B) -> &[u8]) -> Result<B, ClientError> {
        let expected = self.pending_nonce.take().ok_or(ClientError::OutOfOrder("reply"))?;
        let body = B::decode(&symmetric_decrypt(&self.session_key, &self.iv, payload)?)?;
        if !ct_eq(echoed(&body), &expected) {
            return Err(ClientError::NonceMismatch);
        }
        Ok(body)
    }

    pub fn list_request(&mut self) -> Request {
        Request::List {
            cookie: self.cookie.clone(),
            sealed: self.seal(),
        }
    }

    /// Usernames currently logged in.
    pub fn open_list(&mut self, reply: &Reply) -> Result<Vec<String>, ClientError> {
        let Reply::List { payload } = reply else {
            return Err(unexpected(reply));
        };
        let body = self.open::<ListBody>(payload, |b| b.nonce_user.as_slice())?;
        Ok(body.list)
    }

    pub fn logout_request(&mut self) -> Request {
        Request::Logout {
            cookie: self.cookie.clone(),
            sealed: self.seal(),
        }
    }

    pub fn open_logout_ack(&mut self, reply: &Reply) -> Result<(), ClientError> {
        let Reply::LogoutAck { payload } = reply else {
            return Err(unexpected(reply));
        };
        self.open::<LogoutAckBody>(payload, |b| b.nonce_user.as_slice())?;
        Ok(())
    }
}
