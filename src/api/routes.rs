//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{AccountId, OperationContext};
use crate::engine::{TransferEngine, TransferResult};
use crate::error::AppError;
use crate::ledger::{IdempotencyKey, Ledger, LedgerCursor, LedgerEntry};
use crate::store::AccountStore;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TransferEngine>,
    pub store: Arc<dyn AccountStore>,
    pub ledger: Arc<dyn Ledger>,
}

/// Build the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/transfers", post(execute_transfer))
        .route("/accounts/:id", get(get_account))
        .route("/accounts/:id/ledger", get(get_account_ledger))
        .with_state(state)
}

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct TransferRequest {
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor: i64,
    pub idempotency_key: String,
}

#[derive(Debug, Serialize)]
pub struct TransferResponse {
    pub transaction_id: Uuid,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor: i64,
    pub source_balance_after: i64,
    pub destination_balance_after: i64,
    pub status: String,
}

impl From<TransferResult> for TransferResponse {
    fn from(result: TransferResult) -> Self {
        Self {
            transaction_id: result.transaction_id,
            source_account_id: result.source_account_id.as_uuid(),
            destination_account_id: result.destination_account_id.as_uuid(),
            amount_minor: result.amount.minor_units(),
            source_balance_after: result.source_balance_after.minor_units(),
            destination_balance_after: result.destination_balance_after.minor_units(),
            status: result.status.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub id: Uuid,
    pub account_number: String,
    pub balance_minor: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub after: i64,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    100
}

#[derive(Debug, Serialize)]
pub struct LedgerEntryResponse {
    pub transaction_id: Uuid,
    pub sequence: i64,
    pub source_account_id: Uuid,
    pub destination_account_id: Uuid,
    pub amount_minor: i64,
    pub status: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerEntry> for LedgerEntryResponse {
    fn from(entry: LedgerEntry) -> Self {
        Self {
            transaction_id: entry.id,
            sequence: entry.sequence,
            source_account_id: entry.source_account_id.as_uuid(),
            destination_account_id: entry.destination_account_id.as_uuid(),
            amount_minor: entry.amount.minor_units(),
            status: entry.status.as_str().to_string(),
            idempotency_key: entry.idempotency_key.as_str().to_string(),
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    pub account_id: Uuid,
    pub entries: Vec<LedgerEntryResponse>,
}

// =========================================================================
// Handlers
// =========================================================================

/// The upstream request layer authenticates the caller and forwards the
/// verified identity in this header.
const ACTOR_HEADER: &str = "x-actor-id";
const CORRELATION_HEADER: &str = "x-correlation-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

fn context_from_headers(headers: &HeaderMap) -> Result<OperationContext, AppError> {
    let actor_id = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::MissingHeader("X-Actor-Id"))?
        .parse::<Uuid>()
        .map_err(|_| AppError::InvalidRequest("X-Actor-Id must be a UUID".to_string()))?;

    let mut context = OperationContext::new(AccountId::from_uuid(actor_id));
    if let Some(correlation_id) = headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Uuid>().ok())
    {
        context = context.with_correlation_id(correlation_id);
    }
    // First hop of X-Forwarded-For, set by the upstream proxy.
    if let Some(client_ip) = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        context = context.with_client_ip(client_ip);
    }
    context.ensure_correlation_id();

    Ok(context)
}

async fn execute_transfer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    let context = context_from_headers(&headers)?;
    let idempotency_key = IdempotencyKey::new(request.idempotency_key)?;

    let result = state
        .engine
        .transfer(
            AccountId::from_uuid(request.source_account_id),
            AccountId::from_uuid(request.destination_account_id),
            request.amount_minor,
            idempotency_key,
            &context,
        )
        .await?;

    Ok(Json(result.into()))
}

async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let id = AccountId::from_uuid(id);
    let account = state
        .store
        .get(id)
        .await?
        .ok_or(AppError::Transfer(crate::domain::TransferError::AccountNotFound(id)))?;

    Ok(Json(AccountResponse {
        id: account.id.as_uuid(),
        account_number: account.account_number.as_str().to_string(),
        balance_minor: account.balance.minor_units(),
        status: account.status.as_str().to_string(),
        created_at: account.created_at,
    }))
}

async fn get_account_ledger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerResponse>, AppError> {
    let account_id = AccountId::from_uuid(id);
    let entries = state
        .ledger
        .entries_for_account(
            account_id,
            LedgerCursor {
                after_sequence: query.after,
                limit: query.limit.min(1_000),
            },
        )
        .await?;

    Ok(Json(LedgerResponse {
        account_id: id,
        entries: entries.into_iter().map(Into::into).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_context_from_headers() {
        let actor = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACTOR_HEADER,
            HeaderValue::from_str(&actor.to_string()).unwrap(),
        );
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );

        let context = context_from_headers(&headers).unwrap();
        assert_eq!(context.actor_id.as_uuid(), actor);
        assert_eq!(context.client_ip, Some("203.0.113.7".parse().unwrap()));
        assert!(context.correlation_id.is_some());
    }

    #[test]
    fn test_actor_header_required_and_validated() {
        let headers = HeaderMap::new();
        assert!(matches!(
            context_from_headers(&headers),
            Err(AppError::MissingHeader(_))
        ));

        let mut headers = HeaderMap::new();
        headers.insert(ACTOR_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            context_from_headers(&headers),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
