//! Configuration system for Parley.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PARLEY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/parley/config.toml
//!   3. ~/.config/parley/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    /// Registered users. This is the credential store the daemon serves from.
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP address the daemon listens on.
    pub bind: String,
    /// PKCS#8 PEM private key. Generated on first run if missing.
    pub private_key_path: PathBuf,
    /// Send a bare ERROR datagram when a request fails. Off = silent drop.
    pub reply_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Pending handshakes older than this are evicted.
    pub pending_ttl_secs: u64,
    /// RESPONSE must arrive within this many seconds of the challenge.
    pub challenge_ttl_secs: u64,
    /// How often the expiry sweep runs.
    pub sweep_interval_secs: u64,
    /// Upper bound on concurrently pending handshakes.
    pub max_pending: usize,
}

/// One registered user: salt and hex SHA-256(salt || password_hash).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub salt: String,
    pub verifier: String,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9090".to_string(),
            private_key_path: config_dir().join("server.private.pem"),
            reply_on_failure: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 60,
            challenge_ttl_secs: 30,
            sweep_interval_secs: 5,
            max_pending: 4096,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("parley")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ParleyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            Self::from_toml(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            ParleyConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ParleyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PARLEY_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PARLEY_SERVER__BIND") {
            self.server.bind = v;
        }
        if let Ok(v) = std::env::var("PARLEY_SERVER__PRIVATE_KEY_PATH") {
            self.server.private_key_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PARLEY_SERVER__REPLY_ON_FAILURE") {
            self.server.reply_on_failure = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("PARLEY_LIMITS__PENDING_TTL_SECS") {
            if let Ok(n) = v.parse() {
                self.limits.pending_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PARLEY_LIMITS__CHALLENGE_TTL_SECS") {
            if let Ok(n) = v.parse() {
                self.limits.challenge_ttl_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PARLEY_LIMITS__SWEEP_INTERVAL_SECS") {
            if let Ok(n) = v.parse() {
                self.limits.sweep_interval_secs = n;
            }
        }
        if let Ok(v) = std::env::var("PARLEY_LIMITS__MAX_PENDING") {
            if let Ok(n) = v.parse() {
                self.limits.max_pending = n;
            }
        }
    }
}
