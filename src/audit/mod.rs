//! Audit emission
//!
//! Every terminal transfer outcome, success or failure, produces exactly one
//! structured audit record. The records are consumed by an external
//! append-only log; this module only defines the record shape and the sink
//! seam. The default sink writes a structured tracing event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AccountId, Amount, OperationContext};

/// One audit record per terminal transfer outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub actor_id: AccountId,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub amount_minor: i64,
    /// `"completed"` or a `TransferError` code.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl AuditRecord {
    pub fn new(
        context: &OperationContext,
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Option<Amount>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            actor_id: context.actor_id,
            source_account_id,
            destination_account_id,
            amount_minor: amount.map(|a| a.minor_units()).unwrap_or(0),
            outcome: outcome.into(),
            correlation_id: context.correlation_id,
        }
    }
}

/// Outbound audit collaborator. Emission is fire-and-forget from the
/// engine's perspective; a sink failure never fails the transfer.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, record: AuditRecord);
}

/// Default sink: one structured tracing event per record.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn emit(&self, record: AuditRecord) {
        tracing::info!(
            target: "corebank::audit",
            actor_id = %record.actor_id,
            source_account_id = %record.source_account_id,
            destination_account_id = %record.destination_account_id,
            amount_minor = record.amount_minor,
            outcome = %record.outcome,
            correlation_id = ?record.correlation_id,
            "transfer audit"
        );
    }
}

/// Capturing sink for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: std::sync::Arc<std::sync::Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit lock poisoned").clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn emit(&self, record: AuditRecord) {
        self.records
            .lock()
            .expect("audit lock poisoned")
            .push(record);
    }
}
