//! Account model
//!
//! Account rows are the only shared mutable state in the system. Balances are
//! mutated exclusively by the transfer engine while holding the row lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{AmountError, Balance};

/// Opaque stable account identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AccountId(Uuid);

impl AccountId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Externally-facing account number. Unique, immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(String);

impl AccountNumber {
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account lifecycle status.
///
/// Created `Pending` by registration; moves to `Active` on admin approval.
/// `Suspended` and `Closed` accounts reject all transfer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Pending,
    Active,
    Suspended,
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Pending => "pending",
            AccountStatus::Active => "active",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Closed => "closed",
        }
    }
}

impl std::str::FromStr for AccountStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AccountStatus::Pending),
            "active" => Ok(AccountStatus::Active),
            "suspended" => Ok(AccountStatus::Suspended),
            "closed" => Ok(AccountStatus::Closed),
            other => Err(format!("unknown account status: {other}")),
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Account state as read from the store.
///
/// Invariant: `balance >= 0` at all times observable outside an in-progress
/// transfer (enforced by the `Balance` type and the store's delta checks).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: AccountNumber,
    pub balance: Balance,
    pub status: AccountStatus,
    /// Orthogonal to transfer eligibility; grants authority over other
    /// accounts' debits via the authorization gate.
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Construct a new account in the given status.
    pub fn new(
        id: AccountId,
        account_number: AccountNumber,
        balance_minor: i64,
        status: AccountStatus,
    ) -> Result<Self, AmountError> {
        Ok(Self {
            id,
            account_number,
            balance: Balance::new(balance_minor)?,
            status,
            is_admin: false,
            created_at: Utc::now(),
        })
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    /// Only active accounts may debit or credit.
    pub fn can_transact(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
