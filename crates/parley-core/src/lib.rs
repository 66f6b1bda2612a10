//! parley-core — wire format, envelope codec, configuration and
//! cryptographic primitives. All other Parley crates depend on this one.

pub mod config;
pub mod crypto;
pub mod envelope;
pub mod freshness;
pub mod wire;

pub use envelope::{Envelope, EnvelopeError};
pub use wire::{Body, Cookie, Reply, Request};
