use thiserror::Error;

/// Errors raised while delivering outreach to the messaging service
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Messaging request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Messaging service answered with a non-success status
    #[error("Messaging service rejected interaction {interaction_id}: HTTP {status}")]
    Rejected { interaction_id: uuid::Uuid, status: u16 },

    #[error("Messaging configuration error: {0}")]
    Config(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;
