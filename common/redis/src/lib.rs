use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

// Re-export ErrorKind so consumers can construct CustomRedisError in tests
pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }

    /// True when the store could not answer at all: connection refused or dropped,
    /// command timeout, a server-side error reply, or a client that was never
    /// configured correctly.
    ///
    /// `NotFound` and `ParseError` are answers about the data, not about the store,
    /// so callers must handle them separately.
    pub fn is_unavailable(&self) -> bool {
        match self {
            CustomRedisError::Timeout | CustomRedisError::Redis(_) => true,
            CustomRedisError::InvalidConfiguration(_) => true,
            CustomRedisError::NotFound | CustomRedisError::ParseError(_) => false,
        }
    }

    /// True when a cached connection should be thrown away before the next command.
    pub(crate) fn is_connection_broken(&self) -> bool {
        match self {
            CustomRedisError::Timeout => true,
            CustomRedisError::Redis(err) => {
                err.kind() == redis::ErrorKind::IoError
                    || err.is_io_error()
                    || err.is_connection_dropped()
                    || err.is_connection_refusal()
            }
            _ => false,
        }
    }
}

/// The subset of key-value commands the flag service relies on.
///
/// Every command is a single round trip; nothing here spans multiple keys.
#[async_trait]
pub trait Client {
    /// Returns `NotFound` when the key is absent and `ParseError` when the stored
    /// bytes are not valid UTF-8.
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    /// SET NX. Returns `false` when the key already existed and nothing was written.
    async fn set_nx(&self, k: String, v: String) -> Result<bool, CustomRedisError>;
    async fn exists(&self, k: String) -> Result<bool, CustomRedisError>;
    /// INCR, returning the value after the increment.
    async fn incr(&self, k: String) -> Result<i64, CustomRedisError>;
    /// EXPIRE. Returns `false` when the key does not exist.
    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError>;
    /// TTL in seconds: `-1` when the key has no expiry, `-2` when it does not exist.
    async fn ttl(&self, k: String) -> Result<i64, CustomRedisError>;
    /// One SCAN step. A returned cursor of `0` means the iteration is complete;
    /// a page may be empty or contain keys already seen on earlier pages.
    async fn scan(
        &self,
        pattern: String,
        cursor: u64,
        count: usize,
    ) -> Result<(u64, Vec<String>), CustomRedisError>;
}

// Module declarations
mod client;
mod mock;

// Re-export public APIs
pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};
