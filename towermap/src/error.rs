//! Error types for the towermap library.

use thiserror::Error;

/// Errors that can occur while searching or persisting tower data.
///
/// Provider transport failures never appear here: a failed tile fetch yields
/// an empty observation list.
#[derive(Error, Debug)]
pub enum TowerError {
    /// IO error when opening or creating the database file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite store failure.
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A store failed in a way that is not tied to a specific backend.
    #[error("Store error: {reason}")]
    Store { reason: String },

    /// Configuration values that cannot produce a working search engine.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The provider HTTP client could not be constructed.
    #[error("Provider client error: {reason}")]
    ProviderClient { reason: String },
}

/// Result type alias using [`TowerError`].
pub type Result<T> = std::result::Result<T, TowerError>;
