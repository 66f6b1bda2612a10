//! Envelope codec — named fields over a text-safe transport.
//!
//! An envelope is a flat JSON object. Text fields are JSON strings, raw
//! bytes are standard base64 strings, integers are JSON numbers, and a
//! group of fields can be nested as a sub-envelope. The codec never
//! guesses: every accessor names the field and the shape it expects, and
//! a missing or mistyped field is an `EnvelopeError`.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Builders ──────────────────────────────────────────────────────────────

    pub fn with_str(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_owned(), Value::String(value.into()));
        self
    }

    /// Binary payload, carried as base64.
    pub fn with_bytes(mut self, name: &str, value: &[u8]) -> Self {
        self.fields
            .insert(name.to_owned(), Value::String(STANDARD.encode(value)));
        self
    }

    pub fn with_u64(mut self, name: &str, value: u64) -> Self {
        self.fields.insert(name.to_owned(), Value::from(value));
        self
    }

    pub fn with_map(mut self, name: &str, value: Envelope) -> Self {
        self.fields.insert(name.to_owned(), Value::Object(value.fields));
        self
    }

    pub fn with_list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = values.into_iter().map(|v| Value::String(v.into())).collect();
        self.fields.insert(name.to_owned(), Value::Array(list));
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn field(&self, name: &str) -> Result<&Value, EnvelopeError> {
        self.fields
            .get(name)
            .ok_or_else(|| EnvelopeError::Missing(name.to_owned()))
    }

    pub fn str(&self, name: &str) -> Result<&str, EnvelopeError> {
        self.field(name)?
            .as_str()
            .ok_or_else(|| EnvelopeError::wrong_type(name, "string"))
    }

    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, EnvelopeError> {
        STANDARD
            .decode(self.str(name)?)
            .map_err(|_| EnvelopeError::BadEncoding(name.to_owned()))
    }

    /// Bytes of an exact length, e.g. an IV.
    pub fn array<const N: usize>(&self, name: &str) -> Result<[u8; N], EnvelopeError> {
        let bytes = self.bytes(name)?;
        bytes.as_slice().try_into().map_err(|_| EnvelopeError::BadLength {
            field: name.to_owned(),
            expected: N,
            actual: bytes.len(),
        })
    }

    pub fn u64(&self, name: &str) -> Result<u64, EnvelopeError> {
        self.field(name)?
            .as_u64()
            .ok_or_else(|| EnvelopeError::wrong_type(name, "non-negative integer"))
    }

    pub fn map(&self, name: &str) -> Result<Envelope, EnvelopeError> {
        match self.field(name)? {
            Value::Object(fields) => Ok(Envelope {
                fields: fields.clone(),
            }),
            _ => Err(EnvelopeError::wrong_type(name, "object")),
        }
    }

    pub fn list(&self, name: &str) -> Result<Vec<String>, EnvelopeError> {
        let Value::Array(items) = self.field(name)? else {
            return Err(EnvelopeError::wrong_type(name, "list"));
        };
        items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| EnvelopeError::wrong_type(name, "list of strings"))
            })
            .collect()
    }

    // ── Encoding ──────────────────────────────────────────────────────────────

    pub fn encode(&self) -> Vec<u8> {
        Value::Object(self.fields.clone()).to_string().into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(fields)) => Ok(Self { fields }),
            Ok(_) => Err(EnvelopeError::NotAnObject),
            Err(e) => Err(EnvelopeError::Malformed(e.to_string())),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    Missing(String),

    #[error("field `{field}` is not a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("field `{0}` is not valid base64")]
    BadEncoding(String),

    #[error("field `{field}` has {actual} bytes, expected {expected}")]
    BadLength {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("unknown {field} `{value}`")]
    UnknownValue { field: &'static str, value: String },

    #[error("datagram of {0} bytes exceeds the size limit")]
    TooLarge(usize),
}

impl EnvelopeError {
    fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.to_owned(),
            expected,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
