//! Server-wide configuration.
//!
//! Recognizes the environment variables of `spec.md` §6. Unknown
//! variables are ignored. No module-level mutable flags: everything
//! lands in one struct, constructed once and passed down to the
//! components that need it (router, rate limiter, logger).

use crate::error::{Error, Result};
use std::env;

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `LISTEN_ADDR` — address an embedding HTTP front end should bind.
    /// Not used by this crate directly (HTTP transport is out of
    /// scope), but carried through so an embedder has one place to
    /// read it from.
    pub listen_addr: String,
    /// `STORE_URL` — connection string for the backing mailbox store.
    /// Opaque to this crate; forwarded to whatever `Store` impl the
    /// embedder constructs.
    pub store_url: String,
    /// `LOG_DIR` — directory diagnostic logs are written under.
    pub log_dir: String,
    /// `DEBUG` — verbose logging.
    pub debug: bool,
    /// `AS_LOG_SPLIT` — split diagnostic logs into per-category files.
    pub log_split: bool,
    /// `AS_REDACT` — redact PII (addresses, subjects) from logs.
    pub redact: bool,
    /// `RATE_LIMIT_PER_MIN` — token bucket refill rate per (user,
    /// device, cmd), per `spec.md` §4.2.
    pub rate_limit_per_min: u32,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Reads from a `.env` file if present. All variables have
    /// defaults, so this never fails on missing configuration; it can
    /// still fail if a variable is present but not parseable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `RATE_LIMIT_PER_MIN` is set but not
    /// a valid `u32`.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:443".to_string()),
            store_url: env::var("STORE_URL")
                .unwrap_or_else(|_| "sqlite:///./activesync.db".to_string()),
            log_dir: env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            debug: env_bool("DEBUG", true),
            log_split: env_bool("AS_LOG_SPLIT", true),
            redact: env_bool("AS_REDACT", false),
            rate_limit_per_min: env::var("RATE_LIMIT_PER_MIN")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|e| Error::Config(format!("Invalid RATE_LIMIT_PER_MIN: {e}")))?,
        })
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}
