//! Store Error Types

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Consumer group '{group}' does not exist on '{key}'")]
    NoGroup { key: String, group: String },

    #[error("Invalid entry id: {id}")]
    InvalidId { id: String },

    #[error("Unexpected store reply: {message}")]
    Protocol { message: String },

    #[error("Store state lock poisoned")]
    Poisoned,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
