use thiserror::Error;

/// Unified error type for the parrot runtime.
#[derive(Error, Debug)]
pub enum ParrotError {
    // ── Client errors ──────────────────────────────────────────
    #[error("client error: {0}")]
    Client(String),

    #[error("client not connected")]
    NotConnected,

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: guild {guild}: {reason}")]
    Store { guild: String, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ParrotError>;
