//! Transfer Engine
//!
//! Orchestrates a single transfer request into a consistent account/ledger
//! mutation pair. A transfer attempt moves through
//! `Received -> Validated -> Locked -> Debited -> Credited -> Logged ->
//! Completed`; any failure after locking rolls the atomic unit back, so the
//! only terminal states are a completed transfer or an unchanged pair of
//! accounts.
//!
//! Precondition checks run before any lock is taken. The locked phase runs
//! as a detached task so a cancelled caller can never abandon held locks:
//! the attempt is always driven to commit or rollback.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink};
use crate::auth::AuthorizationGate;
use crate::domain::{
    Account, AccountId, Amount, Balance, OperationContext, TransferError,
};
use crate::ledger::{
    AppendOutcome, EntryStatus, IdempotencyKey, Ledger, LedgerEntry,
};
use crate::store::{AccountStore, StoreError, TransferUnit};

/// Terminal result of a completed transfer. Identical on idempotent replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    pub transaction_id: Uuid,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub amount: Amount,
    pub source_balance_after: Balance,
    pub destination_balance_after: Balance,
    pub status: EntryStatus,
}

impl From<LedgerEntry> for TransferResult {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            transaction_id: entry.id,
            source_account_id: entry.source_account_id,
            destination_account_id: entry.destination_account_id,
            amount: entry.amount,
            source_balance_after: entry.source_balance_after,
            destination_balance_after: entry.destination_balance_after,
            status: entry.status,
        }
    }
}

/// What the precondition pass decided about an attempt.
enum Readiness {
    /// All preconditions hold; proceed to the locked phase.
    Proceed(Amount),
    /// The key already resolved to a completed transfer.
    Replay(TransferResult),
}

/// The funds transfer and ledger consistency engine.
pub struct TransferEngine {
    store: Arc<dyn AccountStore>,
    ledger: Arc<dyn Ledger>,
    gate: Arc<dyn AuthorizationGate>,
    audit: Arc<dyn AuditSink>,
}

impl TransferEngine {
    pub fn new(
        store: Arc<dyn AccountStore>,
        ledger: Arc<dyn Ledger>,
        gate: Arc<dyn AuthorizationGate>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            ledger,
            gate,
            audit,
        }
    }

    /// Execute one transfer attempt.
    ///
    /// Precondition failures return before any lock is taken. A retried
    /// request carrying an already-completed idempotency key returns the
    /// original result without touching balances.
    pub async fn transfer(
        &self,
        source: AccountId,
        destination: AccountId,
        amount_minor: i64,
        idempotency_key: IdempotencyKey,
        context: &OperationContext,
    ) -> Result<TransferResult, TransferError> {
        let amount = match self
            .preflight(source, destination, amount_minor, &idempotency_key, context)
            .await
        {
            Ok(Readiness::Proceed(amount)) => amount,
            Ok(Readiness::Replay(prior)) => {
                self.emit(context, source, destination, amount_minor, "completed")
                    .await;
                return Ok(prior);
            }
            Err(e) => {
                self.emit(context, source, destination, amount_minor, e.code())
                    .await;
                return Err(e);
            }
        };

        // Locked phase. Detached so neither lock release nor audit emission
        // depends on the caller still being present; the attempt always
        // reaches commit or rollback, and its audit record is written, even
        // if this future is dropped.
        let store = Arc::clone(&self.store);
        let ledger = Arc::clone(&self.ledger);
        let audit = Arc::clone(&self.audit);
        let key = idempotency_key.clone();
        let record_context = context.clone();
        let handle = tokio::spawn(async move {
            let result =
                locked_phase(store, ledger, source, destination, amount, key).await;

            let outcome = match &result {
                Ok(_) => "completed",
                Err(e) => e.code(),
            };
            audit
                .emit(AuditRecord::new(
                    &record_context,
                    source,
                    destination,
                    Some(amount),
                    outcome,
                ))
                .await;

            result
        });

        handle.await.map_err(|e| {
            TransferError::PersistenceFailure(format!("transfer task failed: {e}"))
        })?
    }

    /// Preconditions, in order. Each is a distinct terminal failure.
    async fn preflight(
        &self,
        source: AccountId,
        destination: AccountId,
        amount_minor: i64,
        idempotency_key: &IdempotencyKey,
        context: &OperationContext,
    ) -> Result<Readiness, TransferError> {
        let amount = Amount::new(amount_minor)?;

        if source == destination {
            return Err(TransferError::SameAccount);
        }

        if let Some(prior) = self
            .ledger
            .find_by_idempotency_key(idempotency_key)
            .await
            .map_err(map_store_error)?
        {
            if prior.status == EntryStatus::Completed {
                tracing::debug!(
                    idempotency_key = %idempotency_key,
                    transaction_id = %prior.id,
                    "idempotent replay, returning prior result"
                );
                return Ok(Readiness::Replay(prior.into()));
            }
        }

        let source_account = self.fetch_active(source).await?;
        let _destination_account = self.fetch_active(destination).await?;

        if !self
            .gate
            .is_authorized(context.actor_id, source_account.id)
            .await
            .map_err(map_store_error)?
        {
            return Err(TransferError::Unauthorized);
        }

        Ok(Readiness::Proceed(amount))
    }

    /// Audit emission for outcomes decided on the caller path, before any
    /// lock is taken.
    async fn emit(
        &self,
        context: &OperationContext,
        source: AccountId,
        destination: AccountId,
        amount_minor: i64,
        outcome: &str,
    ) {
        self.audit
            .emit(AuditRecord::new(
                context,
                source,
                destination,
                Amount::new(amount_minor).ok(),
                outcome,
            ))
            .await;
    }

    async fn fetch_active(&self, id: AccountId) -> Result<Account, TransferError> {
        let account = self
            .store
            .get(id)
            .await
            .map_err(map_store_error)?
            .ok_or(TransferError::AccountNotFound(id))?;

        if !account.can_transact() {
            return Err(TransferError::AccountNotActive {
                account_id: id,
                status: account.status,
            });
        }
        Ok(account)
    }
}

/// Everything between lock acquisition and commit. Runs detached from the
/// caller.
async fn locked_phase(
    store: Arc<dyn AccountStore>,
    ledger: Arc<dyn Ledger>,
    source: AccountId,
    destination: AccountId,
    amount: Amount,
    idempotency_key: IdempotencyKey,
) -> Result<TransferResult, TransferError> {
    let mut unit = store
        .lock_for_update(source, destination)
        .await
        .map_err(map_store_error)?;

    // Reconfirm under the locks: precondition reads were unlocked and may
    // be stale by now.
    let source_account = match reverify(&mut unit, source).await {
        Ok(account) => account,
        Err(e) => return Err(abort(unit, e).await),
    };
    if let Err(e) = reverify(&mut unit, destination).await {
        return Err(abort(unit, e).await);
    }

    if !source_account.balance.is_sufficient_for(amount) {
        return Err(abort(
            unit,
            TransferError::InsufficientFunds {
                required: amount.minor_units(),
                available: source_account.balance.minor_units(),
            },
        )
        .await);
    }

    let source_after = match unit.apply_delta(source, -amount.minor_units()).await {
        Ok(balance) => balance,
        Err(e) => return Err(abort(unit, map_store_error(e)).await),
    };

    // A failure from here on reverses the debit: rollback discards the
    // whole unit before anything becomes visible.
    let destination_after = match unit.apply_delta(destination, amount.minor_units()).await {
        Ok(balance) => balance,
        Err(e) => return Err(abort(unit, map_store_error(e)).await),
    };

    let entry = LedgerEntry::completed(
        source,
        destination,
        amount,
        idempotency_key.clone(),
        source_after,
        destination_after,
    );

    match unit.append_ledger(&entry).await {
        Ok(AppendOutcome::Appended { sequence }) => {
            tracing::debug!(
                transaction_id = %entry.id,
                sequence,
                "ledger entry appended"
            );
        }
        Ok(AppendOutcome::DuplicateKey) => {
            // Same-key race: another attempt won the write. Fold into its
            // completed result instead of double-executing.
            let failure = TransferError::PersistenceFailure(
                "concurrent attempt with the same idempotency key did not complete".to_string(),
            );
            if let e @ TransferError::InconsistentState(_) = abort(unit, failure.clone()).await {
                return Err(e);
            }
            return match ledger.find_by_idempotency_key(&idempotency_key).await {
                Ok(Some(prior)) if prior.status == EntryStatus::Completed => Ok(prior.into()),
                Ok(_) => Err(failure),
                Err(e) => Err(map_store_error(e)),
            };
        }
        // A transfer is not real until its ledger entry exists: reverse
        // both deltas and surface the fault.
        Err(e) => return Err(abort(unit, map_store_error(e)).await),
    }

    let transaction_id = entry.id;
    unit.commit()
        .await
        .map_err(|e| TransferError::PersistenceFailure(format!("commit failed: {e}")))?;

    tracing::info!(
        %transaction_id,
        %source,
        %destination,
        amount_minor = amount.minor_units(),
        "transfer completed"
    );

    Ok(TransferResult {
        transaction_id,
        source_account_id: source,
        destination_account_id: destination,
        amount,
        source_balance_after: source_after,
        destination_balance_after: destination_after,
        status: EntryStatus::Completed,
    })
}

/// Re-read an account under the held lock and re-check its status.
async fn reverify(
    unit: &mut Box<dyn TransferUnit>,
    id: AccountId,
) -> Result<Account, TransferError> {
    let account = unit.account(id).await.map_err(map_store_error)?;
    if !account.can_transact() {
        return Err(TransferError::AccountNotActive {
            account_id: id,
            status: account.status,
        });
    }
    Ok(account)
}

/// Roll the unit back and report `failure`. A rollback failure outranks the
/// original error: balances may now disagree with the ledger.
async fn abort(unit: Box<dyn TransferUnit>, failure: TransferError) -> TransferError {
    match unit.rollback().await {
        Ok(()) => failure,
        Err(e) => {
            tracing::error!(original = %failure, rollback_error = %e, "rollback failed");
            TransferError::InconsistentState(format!("rollback failed after `{failure}`: {e}"))
        }
    }
}

fn map_store_error(e: StoreError) -> TransferError {
    match e {
        StoreError::AccountNotFound(id) => TransferError::AccountNotFound(id),
        StoreError::InsufficientFunds {
            required,
            available,
        } => TransferError::InsufficientFunds {
            required,
            available,
        },
        StoreError::LockTimeout => TransferError::LockTimeout,
        StoreError::Database(e) => TransferError::PersistenceFailure(e.to_string()),
        StoreError::Backend(msg) => TransferError::PersistenceFailure(msg),
    }
}
