//! Error types for leadbot.

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Messenger error: {0}")]
    Messenger(#[from] MessengerError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Messenger transport errors.
#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("Failed to send to chat {chat}: {reason}")]
    SendFailed { chat: i64, reason: String },

    #[error("Bot API poll failed: {0}")]
    PollFailed(String),

    #[error("Invalid update payload: {0}")]
    InvalidUpdate(String),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
