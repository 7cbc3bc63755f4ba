//! In-memory store
//!
//! Single-process backend used by tests and `STORE_BACKEND=memory`. Each
//! account row carries its own async mutex; a transfer unit stages working
//! copies and publishes them atomically at commit, so no intermediate state
//! is ever observable outside the held locks.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::domain::{Account, AccountId, Amount, Balance};
use crate::ledger::{AppendOutcome, IdempotencyKey, Ledger, LedgerCursor, LedgerEntry};

use super::{lock_order, AccountStore, StoreError, TransferUnit};

/// Default bound on row-lock acquisition.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);

/// Ledger state. `by_key` holds a reservation (`None`) from append time
/// until the owning unit commits (`Some(sequence)`) or rolls back, which is
/// how same-key races are decided at the write boundary.
#[derive(Default)]
struct LedgerState {
    entries: BTreeMap<i64, LedgerEntry>,
    by_key: HashMap<IdempotencyKey, Option<i64>>,
    next_sequence: i64,
}

struct Inner {
    rows: RwLock<HashMap<AccountId, Account>>,
    row_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    ledger: Mutex<LedgerState>,
    lock_wait: Duration,
}

/// In-memory account store and ledger.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_lock_wait(DEFAULT_LOCK_WAIT)
    }

    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: RwLock::new(HashMap::new()),
                row_locks: Mutex::new(HashMap::new()),
                ledger: Mutex::new(LedgerState {
                    entries: BTreeMap::new(),
                    by_key: HashMap::new(),
                    next_sequence: 1,
                }),
                lock_wait,
            }),
        }
    }

    /// Insert or replace an account row. Seeding path for tests and the
    /// memory backend; approval workflow lives outside this core.
    pub fn insert_account(&self, account: Account) {
        let id = account.id;
        self.inner
            .rows
            .write()
            .expect("rows lock poisoned")
            .insert(id, account);
        self.inner
            .row_locks
            .lock()
            .expect("row_locks lock poisoned")
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
    }

    fn row_lock(&self, id: AccountId) -> Result<Arc<tokio::sync::Mutex<()>>, StoreError> {
        self.inner
            .row_locks
            .lock()
            .expect("row_locks lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }

    fn read_row(&self, id: AccountId) -> Result<Account, StoreError> {
        self.inner
            .rows
            .read()
            .expect("rows lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self
            .inner
            .rows
            .read()
            .expect("rows lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn lock_for_update(
        &self,
        a: AccountId,
        b: AccountId,
    ) -> Result<Box<dyn TransferUnit>, StoreError> {
        let (first, second) = lock_order(a, b);

        let first_lock = self.row_lock(first)?;
        let second_lock = self.row_lock(second)?;

        let wait = self.inner.lock_wait;
        let g1 = tokio::time::timeout(wait, first_lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;
        let g2 = tokio::time::timeout(wait, second_lock.lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;

        // Working copies read under the locks; published only at commit.
        let mut staged = HashMap::new();
        staged.insert(first, self.read_row(first)?);
        staged.insert(second, self.read_row(second)?);

        Ok(Box::new(MemoryUnit {
            inner: Arc::clone(&self.inner),
            _guards: vec![g1, g2],
            staged,
            staged_entry: None,
            finished: false,
        }))
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let ledger = self.inner.ledger.lock().expect("ledger lock poisoned");
        let sequence = match ledger.by_key.get(key) {
            Some(Some(sequence)) => *sequence,
            // Reserved by an in-flight unit, or unknown: not visible yet.
            Some(None) | None => return Ok(None),
        };
        Ok(ledger.entries.get(&sequence).cloned())
    }

    async fn entries_for_account(
        &self,
        account_id: AccountId,
        cursor: LedgerCursor,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let ledger = self.inner.ledger.lock().expect("ledger lock poisoned");
        Ok(ledger
            .entries
            .range(cursor.after_sequence + 1..)
            .map(|(_, entry)| entry)
            .filter(|entry| {
                entry.source_account_id == account_id
                    || entry.destination_account_id == account_id
            })
            .take(cursor.limit as usize)
            .cloned()
            .collect())
    }
}

struct MemoryUnit {
    inner: Arc<Inner>,
    _guards: Vec<OwnedMutexGuard<()>>,
    staged: HashMap<AccountId, Account>,
    staged_entry: Option<LedgerEntry>,
    finished: bool,
}

impl MemoryUnit {
    fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(entry) = self.staged_entry.take() {
            let mut ledger = self.inner.ledger.lock().expect("ledger lock poisoned");
            ledger.by_key.remove(&entry.idempotency_key);
        }
    }
}

#[async_trait]
impl TransferUnit for MemoryUnit {
    async fn account(&mut self, id: AccountId) -> Result<Account, StoreError> {
        self.staged
            .get(&id)
            .cloned()
            .ok_or(StoreError::AccountNotFound(id))
    }

    async fn apply_delta(&mut self, id: AccountId, delta: i64) -> Result<Balance, StoreError> {
        let account = self
            .staged
            .get_mut(&id)
            .ok_or(StoreError::AccountNotFound(id))?;

        let new_balance = if delta >= 0 {
            Amount::new(delta)
                .and_then(|amount| account.balance.credit(amount))
                .map_err(|e| StoreError::Backend(e.to_string()))?
        } else {
            let amount =
                Amount::new(-delta).map_err(|e| StoreError::Backend(e.to_string()))?;
            account
                .balance
                .debit(amount)
                .map_err(|_| StoreError::InsufficientFunds {
                    required: -delta,
                    available: account.balance.minor_units(),
                })?
        };

        account.balance = new_balance;
        Ok(new_balance)
    }

    async fn append_ledger(&mut self, entry: &LedgerEntry) -> Result<AppendOutcome, StoreError> {
        let mut ledger = self.inner.ledger.lock().expect("ledger lock poisoned");

        if ledger.by_key.contains_key(&entry.idempotency_key) {
            return Ok(AppendOutcome::DuplicateKey);
        }

        let sequence = ledger.next_sequence;
        ledger.next_sequence += 1;
        // Reserve the key now; the entry itself becomes visible at commit.
        ledger.by_key.insert(entry.idempotency_key.clone(), None);

        let mut staged = entry.clone();
        staged.sequence = sequence;
        self.staged_entry = Some(staged);

        Ok(AppendOutcome::Appended { sequence })
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        {
            let mut rows = self.inner.rows.write().expect("rows lock poisoned");
            for (id, account) in self.staged.drain() {
                rows.insert(id, account);
            }
        }

        if let Some(entry) = self.staged_entry.take() {
            let mut ledger = self.inner.ledger.lock().expect("ledger lock poisoned");
            ledger
                .by_key
                .insert(entry.idempotency_key.clone(), Some(entry.sequence));
            ledger.entries.insert(entry.sequence, entry);
        }

        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.discard();
        Ok(())
    }
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountNumber, AccountStatus, Amount};

    fn active_account(balance: i64) -> Account {
        Account::new(
            AccountId::new(),
            AccountNumber::new("1000000001"),
            balance,
            AccountStatus::Active,
        )
        .unwrap()
    }

    fn entry_for(
        source: AccountId,
        destination: AccountId,
        key: &str,
    ) -> LedgerEntry {
        LedgerEntry::completed(
            source,
            destination,
            Amount::new(100).unwrap(),
            IdempotencyKey::new(key).unwrap(),
            Balance::zero(),
            Balance::new(100).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_staged_mutations_invisible_until_commit() {
        let store = MemoryStore::new();
        let a = active_account(1_000);
        let b = active_account(0);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_account(a);
        store.insert_account(b);

        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        unit.apply_delta(a_id, -100).await.unwrap();
        unit.apply_delta(b_id, 100).await.unwrap();

        // Outside readers still see the pre-transfer balances.
        assert_eq!(
            store.get(a_id).await.unwrap().unwrap().balance.minor_units(),
            1_000
        );

        unit.commit().await.unwrap();

        assert_eq!(
            store.get(a_id).await.unwrap().unwrap().balance.minor_units(),
            900
        );
        assert_eq!(
            store.get(b_id).await.unwrap().unwrap().balance.minor_units(),
            100
        );
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let store = MemoryStore::new();
        let a = active_account(500);
        let b = active_account(0);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_account(a);
        store.insert_account(b);

        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        unit.apply_delta(a_id, -200).await.unwrap();
        unit.apply_delta(b_id, 200).await.unwrap();
        let outcome = unit.append_ledger(&entry_for(a_id, b_id, "k-roll")).await.unwrap();
        assert!(matches!(outcome, AppendOutcome::Appended { .. }));

        unit.rollback().await.unwrap();

        assert_eq!(
            store.get(a_id).await.unwrap().unwrap().balance.minor_units(),
            500
        );
        let key = IdempotencyKey::new("k-roll").unwrap();
        assert!(store.find_by_idempotency_key(&key).await.unwrap().is_none());

        // Key is reusable after rollback.
        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        let outcome = unit.append_ledger(&entry_for(a_id, b_id, "k-roll")).await.unwrap();
        assert!(matches!(outcome, AppendOutcome::Appended { .. }));
        unit.commit().await.unwrap();
        assert!(store.find_by_idempotency_key(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_delta_rejects_negative_balance() {
        let store = MemoryStore::new();
        let a = active_account(50);
        let b = active_account(0);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_account(a);
        store.insert_account(b);

        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        let err = unit.apply_delta(a_id, -100).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientFunds {
                required: 100,
                available: 50
            }
        ));
    }

    #[tokio::test]
    async fn test_apply_delta_rejects_balance_over_cap() {
        use crate::domain::MAX_AMOUNT_MINOR;

        let store = MemoryStore::new();
        let a = active_account(MAX_AMOUNT_MINOR - 50);
        let b = active_account(0);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_account(a);
        store.insert_account(b);

        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        let err = unit.apply_delta(a_id, 100).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected_at_append() {
        let store = MemoryStore::new();
        let a = active_account(1_000);
        let b = active_account(0);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_account(a);
        store.insert_account(b);

        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        unit.append_ledger(&entry_for(a_id, b_id, "k1")).await.unwrap();
        unit.commit().await.unwrap();

        let mut unit = store.lock_for_update(a_id, b_id).await.unwrap();
        let outcome = unit.append_ledger(&entry_for(a_id, b_id, "k1")).await.unwrap();
        assert!(matches!(outcome, AppendOutcome::DuplicateKey));
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let store = MemoryStore::with_lock_wait(Duration::from_millis(20));
        let a = active_account(100);
        let b = active_account(100);
        let (a_id, b_id) = (a.id, b.id);
        store.insert_account(a);
        store.insert_account(b);

        let held = store.lock_for_update(a_id, b_id).await.unwrap();
        let err = store.lock_for_update(a_id, b_id).await.unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout));
        drop(held);

        // Locks released on drop; acquisition succeeds again.
        assert!(store.lock_for_update(a_id, b_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_entries_for_account_cursor() {
        let store = MemoryStore::new();
        let a = active_account(1_000);
        let b = active_account(0);
        let c = active_account(0);
        let (a_id, b_id, c_id) = (a.id, b.id, c.id);
        store.insert_account(a);
        store.insert_account(b);
        store.insert_account(c);

        for (i, dest) in [b_id, c_id, b_id].iter().enumerate() {
            let mut unit = store.lock_for_update(a_id, *dest).await.unwrap();
            unit.append_ledger(&entry_for(a_id, *dest, &format!("k{i}")))
                .await
                .unwrap();
            unit.commit().await.unwrap();
        }

        let all = store
            .entries_for_account(a_id, LedgerCursor::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));

        let b_only = store
            .entries_for_account(b_id, LedgerCursor::default())
            .await
            .unwrap();
        assert_eq!(b_only.len(), 2);

        // Restart from the first entry's sequence.
        let rest = store
            .entries_for_account(
                a_id,
                LedgerCursor {
                    after_sequence: all[0].sequence,
                    limit: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].sequence, all[1].sequence);
    }

    #[tokio::test]
    async fn test_lock_unknown_account() {
        let store = MemoryStore::new();
        let a = active_account(100);
        let a_id = a.id;
        store.insert_account(a);

        let missing = AccountId::new();
        let err = store.lock_for_update(a_id, missing).await.unwrap_err();
        assert!(matches!(err, StoreError::AccountNotFound(id) if id == missing));
    }
}
