//! Domain types
//!
//! Pure domain model: money, accounts, operation context, and the transfer
//! error taxonomy. No infrastructure dependencies.

mod account;
mod amount;
mod context;
mod error;

pub use account::{Account, AccountId, AccountNumber, AccountStatus};
pub use amount::{Amount, AmountError, Balance, MAX_AMOUNT_MINOR};
pub use context::OperationContext;
pub use error::TransferError;
