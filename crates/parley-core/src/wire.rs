//! Parley wire format — every datagram exchanged between client and server.
//!
//! These types ARE the protocol. Each datagram is one envelope carrying a
//! `kind`, and for LOGIN a `context` naming the handshake phase. Both are
//! closed enums: an unknown value is rejected while decoding, never looked
//! up in a table at dispatch time.
//!
//! Encrypted bodies (the plaintext inside a ciphertext field) are envelopes
//! too, described here by the `Body` implementations at the bottom.

use std::fmt;

use crate::crypto::{random_bytes, Iv};
use crate::envelope::{Envelope, EnvelopeError};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Largest datagram either side will accept.
pub const MAX_DATAGRAM: usize = 16 * 1024;

/// Length of client and server nonces in bytes.
pub const NONCE_LEN: usize = 16;

/// Cookie entropy in bytes. Hex-encoded on the wire.
pub const COOKIE_LEN: usize = 32;

/// Field names shared by both directions.
pub mod field {
    pub const KIND: &str = "kind";
    pub const CONTEXT: &str = "context";
    pub const COOKIE: &str = "cookie";
    pub const PAYLOAD: &str = "payload";
    pub const PUBLIC_KEY: &str = "public_key";
    pub const SESSION_KEY: &str = "session_key";
    pub const INIT_VECTOR: &str = "init_vector";
    pub const SIGNATURE: &str = "signature";
    pub const CIPHERTEXT: &str = "ciphertext";
    pub const USERNAME: &str = "username";
    pub const PASSWORD_HASH: &str = "password_hash";
    pub const NONCE_USER: &str = "nonce_user";
    pub const NONCE_SERVER: &str = "nonce_server";
    pub const TIMESTAMP: &str = "timestamp";
    pub const LIST: &str = "list";
}

// ── Kind / Context ────────────────────────────────────────────────────────────

/// Top-level message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Login,
    Logout,
    LogoutAck,
    List,
    Error,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Login => "LOGIN",
            Kind::Logout => "LOGOUT",
            Kind::LogoutAck => "LOGOUT_ACK",
            Kind::List => "LIST",
            Kind::Error => "ERROR",
        }
    }
}

impl TryFrom<&str> for Kind {
    type Error = EnvelopeError;

    fn try_from(value: &str) -> Result<Self, EnvelopeError> {
        match value {
            "LOGIN" => Ok(Kind::Login),
            "LOGOUT" => Ok(Kind::Logout),
            "LOGOUT_ACK" => Ok(Kind::LogoutAck),
            "LIST" => Ok(Kind::List),
            "ERROR" => Ok(Kind::Error),
            other => Err(EnvelopeError::UnknownValue {
                field: field::KIND,
                value: other.to_owned(),
            }),
        }
    }
}

/// Handshake phase carried by LOGIN messages.
///
/// `Init`, `Submit` and `Response` flow client → server; `Cookie`,
/// `Challenge` and `Accepted` flow server → client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    Init,
    Cookie,
    Submit,
    Challenge,
    Response,
    Accepted,
}

impl Context {
    pub fn as_str(self) -> &'static str {
        match self {
            Context::Init => "INIT",
            Context::Cookie => "COOKIE",
            Context::Submit => "SUBMIT",
            Context::Challenge => "CHALLENGE",
            Context::Response => "RESPONSE",
            Context::Accepted => "ACCEPTED",
        }
    }
}

impl TryFrom<&str> for Context {
    type Error = EnvelopeError;

    fn try_from(value: &str) -> Result<Self, EnvelopeError> {
        match value {
            "INIT" => Ok(Context::Init),
            "COOKIE" => Ok(Context::Cookie),
            "SUBMIT" => Ok(Context::Submit),
            "CHALLENGE" => Ok(Context::Challenge),
            "RESPONSE" => Ok(Context::Response),
            "ACCEPTED" => Ok(Context::Accepted),
            other => Err(EnvelopeError::UnknownValue {
                field: field::CONTEXT,
                value: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Cookie ────────────────────────────────────────────────────────────────────

/// Opaque, unguessable token naming one login attempt and, after success,
/// the authenticated session. 256 random bits, independent of the peer's
/// address or the clock.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Cookie(String);

impl Cookie {
    pub fn generate() -> Self {
        Self(hex::encode(random_bytes(COOKIE_LEN)))
    }

    /// Accept only well-formed cookies: lowercase hex of the right length.
    pub fn parse(value: &str) -> Result<Self, EnvelopeError> {
        let well_formed = value.len() == COOKIE_LEN * 2
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(value.to_owned()))
        } else {
            Err(EnvelopeError::UnknownValue {
                field: field::COOKIE,
                value: value.chars().take(16).collect(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cookie({}…)", self.short())
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

// ── Sealed payload ────────────────────────────────────────────────────────────

/// Encrypted request body plus the sender's signature over the ciphertext.
/// Travels as a nested object inside the `payload` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub signature: Vec<u8>,
}

impl Sealed {
    fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_bytes(field::CIPHERTEXT, &self.ciphertext)
            .with_bytes(field::SIGNATURE, &self.signature)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            ciphertext: env.bytes(field::CIPHERTEXT)?,
            signature: env.bytes(field::SIGNATURE)?,
        })
    }
}

// ── Client → Server ───────────────────────────────────────────────────────────

/// Every message a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    LoginInit,
    LoginSubmit {
        cookie: Cookie,
        /// Client SPKI DER, RSA-OAEP encrypted to the server.
        public_key: Vec<u8>,
        /// `Credentials` body, RSA-OAEP encrypted to the server.
        payload: Vec<u8>,
    },
    LoginResponse {
        cookie: Cookie,
        /// The server nonce, AES-encrypted under the session key.
        payload: Vec<u8>,
    },
    List {
        cookie: Cookie,
        sealed: Sealed,
    },
    Logout {
        cookie: Cookie,
        sealed: Sealed,
    },
}

impl Request {
    pub fn kind(&self) -> Kind {
        match self {
            Request::LoginInit | Request::LoginSubmit { .. } | Request::LoginResponse { .. } => {
                Kind::Login
            }
            Request::List { .. } => Kind::List,
            Request::Logout { .. } => Kind::Logout,
        }
    }

    pub fn cookie(&self) -> Option<&Cookie> {
        match self {
            Request::LoginInit => None,
            Request::LoginSubmit { cookie, .. }
            | Request::LoginResponse { cookie, .. }
            | Request::List { cookie, .. }
            | Request::Logout { cookie, .. } => Some(cookie),
        }
    }

    /// Short label for log lines, e.g. `LOGIN/SUBMIT`.
    pub fn label(&self) -> &'static str {
        match self {
            Request::LoginInit => "LOGIN/INIT",
            Request::LoginSubmit { .. } => "LOGIN/SUBMIT",
            Request::LoginResponse { .. } => "LOGIN/RESPONSE",
            Request::List { .. } => "LIST",
            Request::Logout { .. } => "LOGOUT",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let env = Envelope::new().with_str(field::KIND, self.kind().as_str());
        match self {
            Request::LoginInit => env.with_str(field::CONTEXT, Context::Init.as_str()),
            Request::LoginSubmit {
                cookie,
                public_key,
                payload,
            } => env
                .with_str(field::CONTEXT, Context::Submit.as_str())
                .with_str(field::COOKIE, cookie.as_str())
                .with_bytes(field::PUBLIC_KEY, public_key)
                .with_bytes(field::PAYLOAD, payload),
            Request::LoginResponse { cookie, payload } => env
                .with_str(field::CONTEXT, Context::Response.as_str())
                .with_str(field::COOKIE, cookie.as_str())
                .with_bytes(field::PAYLOAD, payload),
            Request::List { cookie, sealed } | Request::Logout { cookie, sealed } => env
                .with_str(field::COOKIE, cookie.as_str())
                .with_map(field::PAYLOAD, sealed.to_envelope()),
        }
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        let kind = Kind::try_from(env.str(field::KIND)?)?;
        match kind {
            Kind::Login => {
                let context = Context::try_from(env.str(field::CONTEXT)?)?;
                match context {
                    Context::Init => Ok(Request::LoginInit),
                    Context::Submit => Ok(Request::LoginSubmit {
                        cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                        public_key: env.bytes(field::PUBLIC_KEY)?,
                        payload: env.bytes(field::PAYLOAD)?,
                    }),
                    Context::Response => Ok(Request::LoginResponse {
                        cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                        payload: env.bytes(field::PAYLOAD)?,
                    }),
                    // Server-only phases are never valid inbound.
                    other => Err(EnvelopeError::UnknownValue {
                        field: field::CONTEXT,
                        value: other.as_str().to_owned(),
                    }),
                }
            }
            Kind::List => Ok(Request::List {
                cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                sealed: Sealed::from_envelope(&env.map(field::PAYLOAD)?)?,
            }),
            Kind::Logout => Ok(Request::Logout {
                cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                sealed: Sealed::from_envelope(&env.map(field::PAYLOAD)?)?,
            }),
            other => Err(EnvelopeError::UnknownValue {
                field: field::KIND,
                value: other.as_str().to_owned(),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_envelope().encode()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(EnvelopeError::TooLarge(bytes.len()));
        }
        Self::from_envelope(&Envelope::decode(bytes)?)
    }
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// The signed challenge sent in reply to SUBMIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub cookie: Cookie,
    /// Session key, RSA-OAEP encrypted to the client's declared public key.
    pub session_key: Vec<u8>,
    pub iv: Iv,
    /// `ChallengeBody`, AES-encrypted under the session key.
    pub payload: Vec<u8>,
    /// Server RSA-PSS signature over [`signed_bytes`](Self::signed_bytes).
    pub signature: Vec<u8>,
}

impl Challenge {
    /// The exact byte string covered by the signature.
    pub fn signed_bytes(session_key: &[u8], iv: &Iv, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(session_key.len() + iv.len() + payload.len());
        out.extend_from_slice(session_key);
        out.extend_from_slice(iv);
        out.extend_from_slice(payload);
        out
    }
}

/// Every message the server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Cookie { cookie: Cookie },
    Challenge(Challenge),
    Accepted { cookie: Cookie, payload: Vec<u8> },
    List { payload: Vec<u8> },
    LogoutAck { payload: Vec<u8> },
    /// Uniform failure notice. Never says why.
    Error,
}

impl Reply {
    /// Short label for log lines, e.g. `LOGIN/CHALLENGE`.
    pub fn label(&self) -> &'static str {
        match self {
            Reply::Cookie { .. } => "LOGIN/COOKIE",
            Reply::Challenge(_) => "LOGIN/CHALLENGE",
            Reply::Accepted { .. } => "LOGIN/ACCEPTED",
            Reply::List { .. } => "LIST",
            Reply::LogoutAck { .. } => "LOGOUT_ACK",
            Reply::Error => "ERROR",
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let login = || Envelope::new().with_str(field::KIND, Kind::Login.as_str());
        match self {
            Reply::Cookie { cookie } => login()
                .with_str(field::CONTEXT, Context::Cookie.as_str())
                .with_str(field::COOKIE, cookie.as_str()),
            Reply::Challenge(c) => login()
                .with_str(field::CONTEXT, Context::Challenge.as_str())
                .with_str(field::COOKIE, c.cookie.as_str())
                .with_bytes(field::SESSION_KEY, &c.session_key)
                .with_bytes(field::INIT_VECTOR, &c.iv)
                .with_bytes(field::PAYLOAD, &c.payload)
                .with_bytes(field::SIGNATURE, &c.signature),
            Reply::Accepted { cookie, payload } => login()
                .with_str(field::CONTEXT, Context::Accepted.as_str())
                .with_str(field::COOKIE, cookie.as_str())
                .with_bytes(field::PAYLOAD, payload),
            Reply::List { payload } => Envelope::new()
                .with_str(field::KIND, Kind::List.as_str())
                .with_bytes(field::PAYLOAD, payload),
            Reply::LogoutAck { payload } => Envelope::new()
                .with_str(field::KIND, Kind::LogoutAck.as_str())
                .with_bytes(field::PAYLOAD, payload),
            Reply::Error => Envelope::new().with_str(field::KIND, Kind::Error.as_str()),
        }
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        match Kind::try_from(env.str(field::KIND)?)? {
            Kind::Login => match Context::try_from(env.str(field::CONTEXT)?)? {
                Context::Cookie => Ok(Reply::Cookie {
                    cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                }),
                Context::Challenge => Ok(Reply::Challenge(Challenge {
                    cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                    session_key: env.bytes(field::SESSION_KEY)?,
                    iv: env.array(field::INIT_VECTOR)?,
                    payload: env.bytes(field::PAYLOAD)?,
                    signature: env.bytes(field::SIGNATURE)?,
                })),
                Context::Accepted => Ok(Reply::Accepted {
                    cookie: Cookie::parse(env.str(field::COOKIE)?)?,
                    payload: env.bytes(field::PAYLOAD)?,
                }),
                other => Err(EnvelopeError::UnknownValue {
                    field: field::CONTEXT,
                    value: other.as_str().to_owned(),
                }),
            },
            Kind::List => Ok(Reply::List {
                payload: env.bytes(field::PAYLOAD)?,
            }),
            Kind::LogoutAck => Ok(Reply::LogoutAck {
                payload: env.bytes(field::PAYLOAD)?,
            }),
            Kind::Error => Ok(Reply::Error),
            Kind::Logout => Err(EnvelopeError::UnknownValue {
                field: field::KIND,
                value: Kind::Logout.as_str().to_owned(),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        self.to_envelope().encode()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(EnvelopeError::TooLarge(bytes.len()));
        }
        Self::from_envelope(&Envelope::decode(bytes)?)
    }
}

// ── Encrypted bodies ──────────────────────────────────────────────────────────

/// A plaintext carried inside a ciphertext field. Each body declares the
/// fields it expects.
pub trait Body: Sized {
    fn to_envelope(&self) -> Envelope;
    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError>;

    fn encode(&self) -> Vec<u8> {
        self.to_envelope().encode()
    }

    fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Self::from_envelope(&Envelope::decode(bytes)?)
    }
}

/// SUBMIT payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    /// Hex SHA-256 of the user's password.
    pub password_hash: String,
    pub nonce_user: Vec<u8>,
    pub timestamp: u64,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl Body for Credentials {
    fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_str(field::USERNAME, self.username.as_str())
            .with_str(field::PASSWORD_HASH, self.password_hash.as_str())
            .with_bytes(field::NONCE_USER, &self.nonce_user)
            .with_u64(field::TIMESTAMP, self.timestamp)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            username: env.str(field::USERNAME)?.to_owned(),
            password_hash: env.str(field::PASSWORD_HASH)?.to_owned(),
            nonce_user: env.bytes(field::NONCE_USER)?,
            timestamp: env.u64(field::TIMESTAMP)?,
        })
    }
}

/// CHALLENGE payload: the server nonce plus the context binding it to this
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeBody {
    pub nonce_server: Vec<u8>,
    pub nonce_user: Vec<u8>,
    pub cookie: Cookie,
    pub timestamp: u64,
}

impl Body for ChallengeBody {
    fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_bytes(field::NONCE_SERVER, &self.nonce_server)
            .with_bytes(field::NONCE_USER, &self.nonce_user)
            .with_str(field::COOKIE, self.cookie.as_str())
            .with_u64(field::TIMESTAMP, self.timestamp)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            nonce_server: env.bytes(field::NONCE_SERVER)?,
            nonce_user: env.bytes(field::NONCE_USER)?,
            cookie: Cookie::parse(env.str(field::COOKIE)?)?,
            timestamp: env.u64(field::TIMESTAMP)?,
        })
    }
}

/// ACCEPTED payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedBody {
    pub username: String,
    pub nonce_user: Vec<u8>,
}

impl Body for AcceptedBody {
    fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_str(field::USERNAME, self.username.as_str())
            .with_bytes(field::NONCE_USER, &self.nonce_user)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            username: env.str(field::USERNAME)?.to_owned(),
            nonce_user: env.bytes(field::NONCE_USER)?,
        })
    }
}

/// Body of an authenticated LIST or LOGOUT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub username: String,
    pub nonce_user: Vec<u8>,
    pub timestamp: u64,
}

impl Body for RequestBody {
    fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_str(field::USERNAME, self.username.as_str())
            .with_bytes(field::NONCE_USER, &self.nonce_user)
            .with_u64(field::TIMESTAMP, self.timestamp)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            username: env.str(field::USERNAME)?.to_owned(),
            nonce_user: env.bytes(field::NONCE_USER)?,
            timestamp: env.u64(field::TIMESTAMP)?,
        })
    }
}

/// LIST reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListBody {
    pub list: Vec<String>,
    pub nonce_user: Vec<u8>,
}

impl Body for ListBody {
    fn to_envelope(&self) -> Envelope {
        Envelope::new()
            .with_list(field::LIST, self.list.iter().cloned())
            .with_bytes(field::NONCE_USER, &self.nonce_user)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            list: env.list(field::LIST)?,
            nonce_user: env.bytes(field::NONCE_USER)?,
        })
    }
}

/// LOGOUT_ACK reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutAckBody {
    pub nonce_user: Vec<u8>,
}

impl Body for LogoutAckBody {
    fn to_envelope(&self) -> Envelope {
        Envelope::new().with_bytes(field::NONCE_USER, &self.nonce_user)
    }

    fn from_envelope(env: &Envelope) -> Result<Self, EnvelopeError> {
        Ok(Self {
            nonce_user: env.bytes(field::NONCE_USER)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
