use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the request-configuration and usage-accounting core.
///
/// None of these are retried locally: each one is either a user input
/// mistake or a local filesystem problem.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed credential: {message}")]
    MalformedCredential { message: String },

    #[error("Unknown subscription tier: {tier}")]
    UnknownTier { tier: String },

    #[error("Profile not found: {}", path.display())]
    ProfileNotFound { path: PathBuf },

    #[error("Profile {name} already exists, pass --force to overwrite it")]
    ProfileExists { name: String },

    #[error("Corrupt usage ledger {}: {message}", path.display())]
    CorruptLedger { path: PathBuf, message: String },

    #[error("Only one host flag can be used, got: {}", flags.join(", "))]
    AmbiguousHostSelection { flags: Vec<String> },

    #[error("Invalid query syntax at position {position}: {message}")]
    InvalidQuerySyntax { position: usize, message: String },

    #[error("Failed to persist usage ledger {}: {source}", path.display())]
    UsageLedgerPersistFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub fn malformed_credential(message: impl Into<String>) -> Self {
        Self::MalformedCredential { message: message.into() }
    }

    pub fn unknown_tier(tier: impl Into<String>) -> Self {
        Self::UnknownTier { tier: tier.into() }
    }

    pub fn corrupt_ledger(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptLedger {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_query(position: usize, message: impl Into<String>) -> Self {
        Self::InvalidQuerySyntax {
            position,
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Unified application error.
///
/// This ensures all layers (config, network, parsing)
/// fail in a predictable and debuggable way.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Healthcheck failed: {0}")]
    Health(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
