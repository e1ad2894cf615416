use thiserror::Error;

/// Unified error type for the entire Mirkobot runtime.
#[derive(Error, Debug)]
pub enum MirkobotError {
    // ── Module errors ──────────────────────────────────────────
    #[error("module error: {module}: {reason}")]
    Module { module: String, reason: String },

    // ── Bus errors ─────────────────────────────────────────────
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("handler failed on {topic}: {reason}")]
    Handler { topic: String, reason: String },

    // ── Channel errors ─────────────────────────────────────────
    #[error("channel error: {channel}: {reason}")]
    Channel { channel: String, reason: String },

    #[error("channel not connected: {0}")]
    ChannelNotConnected(String),

    #[error("channel connect timed out: {0}")]
    ConnectTimeout(String),

    #[error("invalid token: {0}")]
    Token(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MirkobotError {
    /// Shorthand for a [`MirkobotError::Channel`] error.
    pub fn channel(channel: impl Into<String>, reason: impl ToString) -> Self {
        Self::Channel {
            channel: channel.into(),
            reason: reason.to_string(),
        }
    }

    /// Shorthand for a [`MirkobotError::Module`] error.
    pub fn module(module: impl Into<String>, reason: impl ToString) -> Self {
        Self::Module {
            module: module.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MirkobotError>;
