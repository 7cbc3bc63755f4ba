//! Ledger
//!
//! Append-only record of every balance-affecting event. Entries are written
//! exclusively by the transfer engine inside the transfer's atomic unit and
//! are never mutated afterwards; a correction is a new `Reversed` entry, not
//! an edit. Read paths serve audit and reporting collaborators only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::{AccountId, Amount, Balance};
use crate::store::StoreError;

/// Maximum accepted idempotency key length, in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Caller-supplied token identifying a logical transfer attempt.
///
/// Retries of the same logical attempt carry the same key and are folded
/// into the first completed result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdempotencyKey(String);

/// Idempotency key validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdempotencyKeyError {
    #[error("Idempotency key must not be empty")]
    Empty,

    #[error("Idempotency key exceeds {MAX_IDEMPOTENCY_KEY_LEN} bytes (got {0})")]
    TooLong(usize),
}

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Result<Self, IdempotencyKeyError> {
        let key = key.into();
        if key.is_empty() {
            return Err(IdempotencyKeyError::Empty);
        }
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(IdempotencyKeyError::TooLong(key.len()));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for IdempotencyKey {
    type Error = IdempotencyKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        IdempotencyKey::new(value)
    }
}

impl From<IdempotencyKey> for String {
    fn from(key: IdempotencyKey) -> Self {
        key.0
    }
}

/// Ledger entry status.
///
/// Only `Completed` entries affect balance history. `Reversed` marks a
/// compensating entry written by out-of-band reconciliation; the engine never
/// writes one itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Failed,
    Reversed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Completed => "completed",
            EntryStatus::Failed => "failed",
            EntryStatus::Reversed => "reversed",
        }
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(EntryStatus::Completed),
            "failed" => Ok(EntryStatus::Failed),
            "reversed" => Ok(EntryStatus::Reversed),
            other => Err(format!("unknown entry status: {other}")),
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable ledger entry.
///
/// Invariant: for every `Completed` entry the implied balance deltas sum to
/// zero (the debit on source equals the credit on destination). The
/// balance-after fields let an idempotent replay return the original result
/// without touching account rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Monotonic ordering, assigned by the ledger at append time.
    pub sequence: i64,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub amount: Amount,
    pub status: EntryStatus,
    pub idempotency_key: IdempotencyKey,
    pub source_balance_after: Balance,
    pub destination_balance_after: Balance,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build a `Completed` entry for a transfer that has debited and
    /// credited successfully. The sequence is assigned on append.
    pub fn completed(
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Amount,
        idempotency_key: IdempotencyKey,
        source_balance_after: Balance,
        destination_balance_after: Balance,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            source_account_id,
            destination_account_id,
            amount,
            status: EntryStatus::Completed,
            idempotency_key,
            source_balance_after,
            destination_balance_after,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an append attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Entry written; sequence as assigned by the ledger.
    Appended { sequence: i64 },
    /// An entry with this idempotency key already exists. Enforced at the
    /// same atomicity boundary as the write, not just by a pre-check.
    DuplicateKey,
}

/// Cursor-based page request for ledger reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerCursor {
    /// Return entries with sequence strictly greater than this.
    pub after_sequence: i64,
    pub limit: u32,
}

impl Default for LedgerCursor {
    fn default() -> Self {
        Self {
            after_sequence: 0,
            limit: 100,
        }
    }
}

/// Read-side ledger contract.
///
/// Serves the engine's idempotency lookup and the audit/reporting
/// collaborators. Appends happen through the store's transfer unit so they
/// share the transfer's atomic boundary.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Look up the entry recorded under an idempotency key, if any.
    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError>;

    /// Entries touching an account, ordered by sequence ascending.
    ///
    /// Finite and restartable: callers resume by passing the last seen
    /// sequence as the cursor. Reporting path only, never the transfer hot
    /// path.
    async fn entries_for_account(
        &self,
        account_id: AccountId,
        cursor: LedgerCursor,
    ) -> Result<Vec<LedgerEntry>, StoreError>;
}
