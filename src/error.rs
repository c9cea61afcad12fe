//! Crate-wide error taxonomy.
//!
//! HTTP-level errors (this enum) are kept separate from EAS-level
//! per-collection `Status` codes ([`crate::sync::SyncStatus`]) and Ping
//! `Status` codes ([`crate::ping::PingStatus`]): the former surface as
//! an HTTP status on the wire, the latter are embedded inside a
//! successful WBXML response body. See `spec.md` §7.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed WBXML: {0}")]
    MalformedWbxml(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("authentication failed")]
    AuthFailed,

    #[error("device provisioning required")]
    ProvisioningRequired,

    #[error("policy key mismatch")]
    PolicyKeyMismatch,

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u32 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The HTTP status this error maps to, per `spec.md` §7.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::MalformedWbxml(_) => 400,
            Self::UnknownCommand(_) => 501,
            Self::AuthRequired | Self::AuthFailed => 401,
            Self::ProvisioningRequired | Self::PolicyKeyMismatch => 449,
            Self::RateLimited { .. } => 429,
            Self::StoreUnavailable(_) => 500,
            Self::Config(_) => 500,
            Self::Internal(_) => 500,
        }
    }
}
