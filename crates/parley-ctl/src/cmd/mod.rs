//! CLI command modules.

pub mod udp;
