use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row could not be decoded.
    #[error("corrupt result {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook endpoint answered with a non-2xx status.
    #[error("webhook {name} returned {status}")]
    Webhook { name: String, status: u16 },
}

pub type Result<T> = std::result::Result<T, ResultsError>;
