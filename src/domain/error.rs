//! Transfer error taxonomy
//!
//! Every way a transfer attempt can terminate short of success, as typed
//! values checked by the caller. Nothing in the engine panics or throws for
//! control flow.

use thiserror::Error;

use super::{AccountId, AccountStatus, AmountError};

/// Terminal failures of a transfer attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Amount was zero, negative, or out of range
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    /// Source and destination are the same account
    #[error("Cannot transfer to the same account")]
    SameAccount,

    /// Account does not exist
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account exists but is not active
    #[error("Account {account_id} is not active (status: {status})")]
    AccountNotActive {
        account_id: AccountId,
        status: AccountStatus,
    },

    /// Actor is not permitted to debit the source account
    #[error("Actor is not authorized to debit the source account")]
    Unauthorized,

    /// Source balance does not cover the amount
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    /// Row lock could not be acquired within the bounded wait
    #[error("Timed out waiting for account lock")]
    LockTimeout,

    /// Storage-layer fault during apply or append; any applied deltas were
    /// rolled back
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// A rollback after a storage fault itself failed. Balances and ledger
    /// may disagree; requires out-of-band reconciliation.
    #[error("Inconsistent state, reconciliation required: {0}")]
    InconsistentState(String),
}

impl TransferError {
    /// Client errors: the request itself was invalid, retrying unchanged
    /// cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount(_)
                | Self::SameAccount
                | Self::AccountNotFound(_)
                | Self::AccountNotActive { .. }
                | Self::Unauthorized
                | Self::InsufficientFunds { .. }
        )
    }

    /// Transient errors: retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::PersistenceFailure(_))
    }

    /// Stable machine-readable code, used by audit records and the HTTP
    /// error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount(_) => "invalid_amount",
            Self::SameAccount => "same_account",
            Self::AccountNotFound(_) => "account_not_found",
            Self::AccountNotActive { .. } => "account_not_active",
            Self::Unauthorized => "unauthorized",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::LockTimeout => "lock_timeout",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::InconsistentState(_) => "inconsistent_state",
        }
    }
}
