use thiserror::Error;
use uuid::Uuid;

/// Classified failures of an exchange operation. Running out of time is not
/// one of them: late callers get the expired exchange back.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Exchange {0} not found")]
    NotFound(Uuid),

    #[error("User {user_id} may not perform this action on exchange {exchange_id}")]
    Forbidden { exchange_id: Uuid, user_id: Uuid },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}
