//! Concurrency properties of the transfer engine
//!
//! Runs the engine against the in-memory store under real parallel load:
//! conservation of funds, no negative balances, deadlock freedom, exact-once
//! draining, and same-key races.

use std::sync::Arc;

use corebank::audit::MemoryAuditSink;
use corebank::auth::OwnerOrAdminGate;
use corebank::domain::{
    Account, AccountId, AccountNumber, AccountStatus, OperationContext, TransferError,
};
use corebank::engine::TransferEngine;
use corebank::ledger::{IdempotencyKey, Ledger, LedgerCursor};
use corebank::store::{AccountStore, MemoryStore};
use uuid::Uuid;

fn engine_on(store: Arc<MemoryStore>) -> Arc<TransferEngine> {
    Arc::new(TransferEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(OwnerOrAdminGate::new(store)),
        Arc::new(MemoryAuditSink::new()),
    ))
}

fn seed(store: &MemoryStore, balance: i64) -> AccountId {
    let account = Account::new(
        AccountId::new(),
        AccountNumber::new(format!("n-{}", Uuid::new_v4())),
        balance,
        AccountStatus::Active,
    )
    .unwrap();
    let id = account.id;
    store.insert_account(account);
    id
}

async fn balance_of(store: &MemoryStore, id: AccountId) -> i64 {
    store.get(id).await.unwrap().unwrap().balance.minor_units()
}

fn key(s: impl Into<String>) -> IdempotencyKey {
    IdempotencyKey::new(s).unwrap()
}

/// N transfers alternating direction between the same two accounts all
/// reach a terminal state: the direction-independent lock order leaves no
/// room for deadlock.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn deadlock_freedom_under_opposing_transfers() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_on(store.clone());

    let a = seed(&store, 10_000);
    let b = seed(&store, 10_000);

    let mut handles = Vec::new();
    for i in 0..200 {
        let engine = engine.clone();
        let (source, destination) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            engine
                .transfer(
                    source,
                    destination,
                    10,
                    key(format!("opposing-{i}")),
                    &OperationContext::new(source),
                )
                .await
        }));
    }

    // Every attempt terminates; a deadlock would hang the join here.
    let done = tokio::time::timeout(std::time::Duration::from_secs(30), async {
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    })
    .await;
    assert!(done.is_ok(), "transfers did not all reach a terminal state");

    // 100 each way at 10 units: conservation leaves both unchanged.
    assert_eq!(balance_of(&store, a).await, 10_000);
    assert_eq!(balance_of(&store, b).await, 10_000);
}

/// 1000 concurrent 1-unit transfers out of a 1000-balance account succeed
/// exactly 1000 times; one more concurrent attempt fails for lack of funds.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn linearizable_drain_of_single_account() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_on(store.clone());

    let a = seed(&store, 1_000);
    let destinations: Vec<AccountId> = (0..1_001).map(|_| seed(&store, 0)).collect();

    let mut handles = Vec::new();
    for (i, destination) in destinations.iter().enumerate() {
        let engine = engine.clone();
        let destination = *destination;
        handles.push(tokio::spawn(async move {
            engine
                .transfer(
                    a,
                    destination,
                    1,
                    key(format!("drain-{i}")),
                    &OperationContext::new(a),
                )
                .await
        }));
    }

    let mut completed = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(TransferError::InsufficientFunds { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(completed, 1_000);
    assert_eq!(insufficient, 1);
    assert_eq!(balance_of(&store, a).await, 0);

    // Every successful unit landed somewhere; total funds conserved.
    let mut total = 0;
    for destination in &destinations {
        total += balance_of(&store, *destination).await;
    }
    assert_eq!(total, 1_000);
}

/// Concurrent retries with the same idempotency key execute exactly once:
/// one ledger entry, one balance mutation, and the same result for every
/// caller that got one.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn same_key_race_executes_once() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_on(store.clone());

    let a = seed(&store, 1_000);
    let b = seed(&store, 0);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .transfer(a, b, 250, key("racing-key"), &OperationContext::new(a))
                .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => results.push(result),
            // A loser may observe the winner mid-flight and report a
            // retryable failure instead of folding; it must never
            // double-execute.
            Err(TransferError::PersistenceFailure(_)) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert!(!results.is_empty());
    let first = &results[0];
    assert!(results.iter().all(|r| r == first));

    // Exactly one execution.
    assert_eq!(balance_of(&store, a).await, 750);
    assert_eq!(balance_of(&store, b).await, 250);
    let entries = store
        .entries_for_account(a, LedgerCursor::default())
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
}

/// Random transfer mesh: whatever interleaving happens, funds are conserved
/// and no balance ever goes negative.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn conservation_across_transfer_mesh() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_on(store.clone());

    let accounts: Vec<AccountId> = (0..10).map(|_| seed(&store, 1_000)).collect();
    let initial_total: i64 = 10 * 1_000;

    let mut handles = Vec::new();
    for i in 0..500 {
        let engine = engine.clone();
        let source = accounts[i % accounts.len()];
        let destination = accounts[(i * 7 + 3) % accounts.len()];
        handles.push(tokio::spawn(async move {
            engine
                .transfer(
                    source,
                    destination,
                    ((i % 9) + 1) as i64 * 10,
                    key(format!("mesh-{i}")),
                    &OperationContext::new(source),
                )
                .await
        }));
    }

    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => {}
            // Self-transfers in the mesh and drained sources are expected.
            Err(TransferError::SameAccount)
            | Err(TransferError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    let mut total = 0;
    for account in &accounts {
        let balance = balance_of(&store, *account).await;
        assert!(balance >= 0);
        total += balance;
    }
    assert_eq!(total, initial_total);
}

/// A caller that disappears after the engine accepted the request does not
/// strand the account locks: the locked phase runs to a terminal state and
/// later transfers proceed.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_caller_does_not_strand_locks() {
    let store = Arc::new(MemoryStore::new());
    let engine = engine_on(store.clone());

    let a = seed(&store, 1_000);
    let b = seed(&store, 0);

    for i in 0..20 {
        let engine = engine.clone();
        let ctx = OperationContext::new(a);
        let attempt = tokio::spawn(async move {
            engine
                .transfer(a, b, 10, key(format!("cancel-{i}")), &ctx)
                .await
        });
        // Abort mid-flight; the engine still drives the attempt to commit
        // or rollback.
        attempt.abort();
        let _ = attempt.await;
    }

    // Locks are free and the books balance.
    let result = engine
        .transfer(a, b, 10, key("after-cancel"), &OperationContext::new(a))
        .await
        .unwrap();
    assert_eq!(result.amount.minor_units(), 10);

    let total = balance_of(&store, a).await + balance_of(&store, b).await;
    assert_eq!(total, 1_000);
}
