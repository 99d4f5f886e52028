use std::fmt;

use thiserror::Error;

/// Backend fault from any storage implementation (Postgres, Redis, memory)
#[derive(Debug, Error)]
#[error("storage error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(cause: impl fmt::Display) -> Self {
        StoreError(cause.to_string())
    }
}

#[derive(Debug, Error)]
#[error("event publish failed: {0}")]
pub struct PublishError(pub String);

impl PublishError {
    pub fn new(cause: impl fmt::Display) -> Self {
        PublishError(cause.to_string())
    }
}
