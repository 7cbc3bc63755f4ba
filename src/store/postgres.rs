//! Postgres store
//!
//! Production backend. One sqlx transaction per transfer: ordered
//! `SELECT ... FOR UPDATE` row locks, guarded balance updates, and the
//! ledger insert all commit or roll back together. The unique index on
//! `ledger_entries.idempotency_key` enforces key uniqueness at the write
//! boundary, which keeps multi-instance deployments safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountNumber, AccountStatus, Amount, Balance, MAX_AMOUNT_MINOR,
};
use crate::ledger::{
    AppendOutcome, EntryStatus, IdempotencyKey, Ledger, LedgerCursor, LedgerEntry,
};

use super::{lock_order, AccountStore, StoreError, TransferUnit};

/// Postgres error code for `lock_not_available` (lock_timeout expiry).
const PG_LOCK_NOT_AVAILABLE: &str = "55P03";

/// Postgres error code for `unique_violation`.
const PG_UNIQUE_VIOLATION: &str = "23505";

type AccountRow = (Uuid, String, i64, String, bool, DateTime<Utc>);

type EntryRow = (
    Uuid,
    i64,
    Uuid,
    Uuid,
    i64,
    String,
    String,
    i64,
    i64,
    DateTime<Utc>,
);

const ACCOUNT_COLUMNS: &str = "id, account_number, balance_minor, status, is_admin, created_at";

const ENTRY_COLUMNS: &str = "id, sequence, source_account_id, destination_account_id, \
     amount_minor, status, idempotency_key, source_balance_after, \
     destination_balance_after, created_at";

fn account_from_row(row: AccountRow) -> Result<Account, StoreError> {
    let (id, account_number, balance_minor, status, is_admin, created_at) = row;
    Ok(Account {
        id: AccountId::from_uuid(id),
        account_number: AccountNumber::new(account_number),
        balance: Balance::new(balance_minor).map_err(|e| StoreError::Backend(e.to_string()))?,
        status: status
            .parse::<AccountStatus>()
            .map_err(StoreError::Backend)?,
        is_admin,
        created_at,
    })
}

fn entry_from_row(row: EntryRow) -> Result<LedgerEntry, StoreError> {
    let (
        id,
        sequence,
        source_account_id,
        destination_account_id,
        amount_minor,
        status,
        idempotency_key,
        source_balance_after,
        destination_balance_after,
        created_at,
    ) = row;
    Ok(LedgerEntry {
        id,
        sequence,
        source_account_id: AccountId::from_uuid(source_account_id),
        destination_account_id: AccountId::from_uuid(destination_account_id),
        amount: Amount::new(amount_minor).map_err(|e| StoreError::Backend(e.to_string()))?,
        status: status.parse::<EntryStatus>().map_err(StoreError::Backend)?,
        idempotency_key: IdempotencyKey::new(idempotency_key)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        source_balance_after: Balance::new(source_balance_after)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        destination_balance_after: Balance::new(destination_balance_after)
            .map_err(|e| StoreError::Backend(e.to_string()))?,
        created_at,
    })
}

fn is_pg_error(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some(code))
}

/// Postgres-backed account store and ledger.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_wait: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_wait: Duration) -> Self {
        Self { pool, lock_wait }
    }

    async fn lock_row(
        tx: &mut Transaction<'static, Postgres>,
        id: AccountId,
    ) -> Result<(), StoreError> {
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| {
                    if is_pg_error(&e, PG_LOCK_NOT_AVAILABLE) {
                        StoreError::LockTimeout
                    } else {
                        StoreError::Database(e)
                    }
                })?;

        match locked {
            Some(_) => Ok(()),
            None => Err(StoreError::AccountNotFound(id)),
        }
    }
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn lock_for_update(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Box<dyn TransferUnit>, StoreError> {
        let (first, second) = lock_order(a, b);

        let mut tx = self.pool.begin().await?;

        // SET accepts no bind parameters; the value is a checked integer.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_wait.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Self::lock_row(&mut tx, first).await?;
        Self::lock_row(&mut tx, second).await?;

        Ok(Box::new(PgUnit { tx }))
    }
}

#[async_trait]
impl Ledger for PostgresStore {
    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE idempotency_key = $1 AND status = 'completed'"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(entry_from_row).transpose()
    }

    async fn entries_for_account(
        &self,
        account_id: AccountId,
        cursor: LedgerCursor,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
             WHERE (source_account_id = $1 OR destination_account_id = $1) \
               AND sequence > $2 \
             ORDER BY sequence ASC \
             LIMIT $3"
        ))
        .bind(account_id.as_uuid())
        .bind(cursor.after_sequence)
        .bind(i64::from(cursor.limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl TransferUnit for PgUnit {
    async fn account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => account_from_row(row),
            None => Err(StoreError::AccountNotFound(id)),
        }
    }

    async fn apply_delta(&mut self, id: AccountId, delta: i64) -> Result<Balance, StoreError> {
        // Guarded update: refuses to take the balance negative or past the
        // maximum representable value.
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts \
             SET balance_minor = balance_minor + $2 \
             WHERE id = $1 \
               AND balance_minor + $2 >= 0 \
               AND balance_minor + $2 <= $3 \
             RETURNING balance_minor",
        )
        .bind(id.as_uuid())
        .bind(delta)
        .bind(MAX_AMOUNT_MINOR)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(balance_minor) = updated {
            return Balance::new(balance_minor).map_err(|e| StoreError::Backend(e.to_string()));
        }

        // Distinguish a missing row, an insufficient balance, and a credit
        // past the cap.
        let available: Option<i64> =
            sqlx::query_scalar("SELECT balance_minor FROM accounts WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;

        match available {
            Some(available) if available + delta < 0 => Err(StoreError::InsufficientFunds {
                required: -delta,
                available,
            }),
            Some(available) => Err(StoreError::Backend(format!(
                "balance {} would exceed the maximum allowed value",
                available + delta
            ))),
            None => Err(StoreError::AccountNotFound(id)),
        }
    }

    async fn append_ledger(&mut self, entry: &LedgerEntry) -> Result<AppendOutcome, StoreError> {
        let inserted: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "INSERT INTO ledger_entries (\
                 id, source_account_id, destination_account_id, amount_minor, \
                 status, idempotency_key, source_balance_after, \
                 destination_balance_after, created_at\
             ) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING sequence",
        )
        .bind(entry.id)
        .bind(entry.source_account_id.as_uuid())
        .bind(entry.destination_account_id.as_uuid())
        .bind(entry.amount.minor_units())
        .bind(entry.status.as_str())
        .bind(entry.idempotency_key.as_str())
        .bind(entry.source_balance_after.minor_units())
        .bind(entry.destination_balance_after.minor_units())
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await;

        match inserted {
            Ok(sequence) => Ok(AppendOutcome::Appended { sequence }),
            Err(e) if is_pg_error(&e, PG_UNIQUE_VIOLATION) => Ok(AppendOutcome::DuplicateKey),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
