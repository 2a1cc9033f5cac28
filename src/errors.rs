// src/errors.rs

//! Defines the primary error type for the crate.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering protocol, transport, and lifecycle failures.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum SentinelPoolError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Syntax error")]
    SyntaxError,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Server error reply: {0}")]
    ServerError(String),

    #[error("Bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation not possible in the current state: {0}")]
    InvalidState(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Client has been dropped")]
    ClientGone,
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for SentinelPoolError {
    fn clone(&self) -> Self {
        match self {
            SentinelPoolError::Io(e) => SentinelPoolError::Io(Arc::clone(e)),
            SentinelPoolError::IncompleteData => SentinelPoolError::IncompleteData,
            SentinelPoolError::SyntaxError => SentinelPoolError::SyntaxError,
            SentinelPoolError::UnexpectedReply(s) => SentinelPoolError::UnexpectedReply(s.clone()),
            SentinelPoolError::ServerError(s) => SentinelPoolError::ServerError(s.clone()),
            SentinelPoolError::Bootstrap(s) => SentinelPoolError::Bootstrap(s.clone()),
            SentinelPoolError::Config(s) => SentinelPoolError::Config(s.clone()),
            SentinelPoolError::InvalidState(s) => SentinelPoolError::InvalidState(s.clone()),
            SentinelPoolError::Timeout => SentinelPoolError::Timeout,
            SentinelPoolError::ConnectionClosed => SentinelPoolError::ConnectionClosed,
            SentinelPoolError::Subscription(s) => SentinelPoolError::Subscription(s.clone()),
            SentinelPoolError::ClientGone => SentinelPoolError::ClientGone,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for SentinelPoolError {
    fn from(e: std::io::Error) -> Self {
        SentinelPoolError::Io(Arc::new(e))
    }
}

impl From<tokio::time::error::Elapsed> for SentinelPoolError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        SentinelPoolError::Timeout
    }
}

impl From<toml::de::Error> for SentinelPoolError {
    fn from(e: toml::de::Error) -> Self {
        SentinelPoolError::Config(e.to_string())
    }
}
