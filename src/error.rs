use thiserror::Error;

/// Fatal errors surfaced while constructing an election. Nothing raised
/// inside the running loop ever reaches the caller.
#[derive(Error, Debug)]
pub enum ElectionError {
    #[error("Failed to resolve instance identity: {0}")]
    Identity(String),

    #[error("Invalid election config: {0}")]
    InvalidConfig(String),

    #[error("Failed to create lock for election {0}")]
    LockConstruction(String),

    #[error("Leader lease expired {0:?} ago and has not been renewed")]
    LeaseExpired(std::time::Duration),
}

/// Errors returned by a lock store. All of them are retryable from the
/// point of view of the election loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("Lock record not found")]
    NotFound,

    /// Stale resource version, or a create raced with another writer.
    #[error("Resource version conflict")]
    Conflict,

    #[error("Lock store unavailable: {0}")]
    Unavailable(String),

    #[error("Lock store call timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, ElectionError>;
