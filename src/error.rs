//! Engine error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{Currency, PostingReceipt};
use crate::loans::LoanStatus;

pub type Result<T> = std::result::Result<T, EconomyError>;

#[derive(Debug, Error)]
pub enum EconomyError {
    #[error("insufficient {currency}: available {available}, requested {requested}")]
    InsufficientFunds {
        currency: Currency,
        available: i64,
        requested: i64,
    },

    /// The posting was already applied; carries the original receipt.
    #[error("posting {} already applied", .0.key)]
    DuplicateApplication(Box<PostingReceipt>),

    #[error("requested {requested} coins exceeds available credit {available}")]
    CreditLimitExceeded { available: i64, requested: i64 },

    #[error("loan {loan_id} is already active")]
    LoanAlreadyActive { loan_id: Uuid },

    #[error("loan {loan_id} is {status:?}, not active")]
    LoanNotActive { loan_id: Uuid, status: LoanStatus },

    #[error("loan {0} not found")]
    LoanNotFound(Uuid),

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("loan term of {0} days is not offered")]
    InvalidTerm(u32),

    #[error("wallet for {0} is archived")]
    WalletArchived(String),

    #[error("comment {comment_id} not found on post {post_id}")]
    CommentNotFound { post_id: String, comment_id: String },

    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EconomyError {
    /// Stable identifier used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            EconomyError::InsufficientFunds { .. } => "InsufficientFunds",
            EconomyError::DuplicateApplication(_) => "DuplicateApplication",
            EconomyError::CreditLimitExceeded { .. } => "CreditLimitExceeded",
            EconomyError::LoanAlreadyActive { .. } => "LoanAlreadyActive",
            EconomyError::LoanNotActive { .. } => "LoanNotActive",
            EconomyError::LoanNotFound(_) => "LoanNotFound",
            EconomyError::UnknownEventType(_) => "UnknownEventType",
            EconomyError::InvalidEvent(_) => "InvalidEvent",
            EconomyError::InvalidAmount(_) => "InvalidAmount",
            EconomyError::InvalidTerm(_) => "InvalidTerm",
            EconomyError::WalletArchived(_) => "WalletArchived",
            EconomyError::CommentNotFound { .. } => "CommentNotFound",
            EconomyError::ConcurrentModification(_) => "ConcurrentModification",
            EconomyError::Storage(_) => "Storage",
        }
    }

    /// Version conflicts are retried before they surface.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EconomyError::ConcurrentModification(_))
    }

    /// Internal faults are logged for operators and never described to callers.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            EconomyError::Storage(_) | EconomyError::DuplicateApplication(_)
        )
    }
}

impl From<sqlx::Error> for EconomyError {
    fn from(err: sqlx::Error) -> Self {
        EconomyError::Storage(err.to_string())
    }
}
