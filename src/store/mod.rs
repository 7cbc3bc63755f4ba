//! Account Store
//!
//! Durable keyed storage of account state, and the atomic unit of work a
//! transfer runs inside. The engine owns the decision to mutate balances;
//! the store is the sole durable owner of balance values.
//!
//! Locking lives at the storage layer (row locks, not in-process mutexes) so
//! the engine stays correct when deployed across multiple instances.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::domain::{Account, AccountId, Balance};
use crate::ledger::{AppendOutcome, LedgerEntry};

/// Storage-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("Timed out waiting for account lock")]
    LockTimeout,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage fault: {0}")]
    Backend(String),
}

/// Contract consumed by the transfer engine.
///
/// `lock_for_update` acquires both row locks in ascending `AccountId` order
/// regardless of argument order, which is what makes concurrent transfers in
/// opposite directions deadlock-free.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read current account state without locking.
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Acquire exclusive row locks on both accounts and open the transfer's
    /// atomic unit of work. Lock acquisition is bounded; `LockTimeout` is
    /// returned rather than blocking forever.
    async fn lock_for_update(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Box<dyn TransferUnit>, StoreError>;
}

/// The atomic unit of work for one transfer attempt.
///
/// Debit, credit, and ledger append all happen through one unit and become
/// visible together at `commit`. Dropping a unit without committing releases
/// the locks and discards every staged mutation, so lock release never
/// depends on the caller still being present.
#[async_trait]
pub trait TransferUnit: Send {
    /// Re-read account state under the held lock.
    async fn account(&mut self, id: AccountId) -> Result<Account, StoreError>;

    /// Apply a signed balance delta to a locked row. Rejects any delta that
    /// would take the balance negative or past the maximum representable
    /// value.
    async fn apply_delta(&mut self, id: AccountId, delta: i64) -> Result<Balance, StoreError>;

    /// Append a ledger entry within this unit. Key uniqueness is enforced at
    /// the same atomicity boundary as the write.
    async fn append_ledger(&mut self, entry: &LedgerEntry) -> Result<AppendOutcome, StoreError>;

    /// Make every staged mutation durable and visible, then release locks.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every staged mutation and release locks. Explicit so a failed
    /// rollback is observable to the engine.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

impl std::fmt::Debug for dyn TransferUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransferUnit")
    }
}

/// Direction-independent lock order: ascending account id.
pub(crate) fn lock_order(a: AccountId, b: AccountId) -> (AccountId, AccountId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}
