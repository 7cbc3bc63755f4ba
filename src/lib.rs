//! corebank Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod audit;
pub mod auth;
pub mod domain;
pub mod engine;
pub mod ledger;
pub mod store;

// Private modules (used only by the corebank binary)
pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{
    Account, AccountId, AccountNumber, AccountStatus, Amount, AmountError, Balance,
    OperationContext, TransferError,
};
pub use engine::{TransferEngine, TransferResult};
pub use error::{AppError, AppResult};
pub use ledger::{IdempotencyKey, Ledger, LedgerEntry};
