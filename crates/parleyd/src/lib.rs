//! parleyd — the Parley login daemon, as a library so the listener can be
//! embedded in tests.

pub mod keys;
pub mod listener;

pub use listener::LoginListener;
