//! Amount and Balance types
//!
//! Monetary values are integer minor units (e.g. cents). Floating point is
//! never used, so there is no rounding drift. Both types validate at
//! construction time, ensuring invalid values cannot exist in the system.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum representable value, in minor units (1 trillion).
pub const MAX_AMOUNT_MINOR: i64 = 1_000_000_000_000;

/// Amount represents a validated transfer amount.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Value never exceeds `MAX_AMOUNT_MINOR`
///
/// # Example
/// ```
/// use corebank::domain::Amount;
///
/// let amount = Amount::new(2_500).unwrap();
/// assert_eq!(amount.minor_units(), 2_500);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Amount(i64);

/// Errors that can occur when creating an Amount or Balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(i64),

    #[error("Amount exceeds maximum allowed value ({MAX_AMOUNT_MINOR})")]
    Overflow,

    #[error("Balance may not be negative (got {0})")]
    NegativeBalance(i64),
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::Overflow` if value > `MAX_AMOUNT_MINOR`
    pub fn new(minor_units: i64) -> Result<Self, AmountError> {
        if minor_units <= 0 {
            return Err(AmountError::NotPositive(minor_units));
        }
        if minor_units > MAX_AMOUNT_MINOR {
            return Err(AmountError::Overflow);
        }
        Ok(Self(minor_units))
    }

    /// Get the value in minor units.
    pub fn minor_units(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Amount {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for i64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Balance represents an account balance in minor units.
/// Unlike Amount, Balance can be zero; it can never be negative.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct Balance(i64);

impl Balance {
    /// Create a new balance (zero or positive).
    pub fn new(minor_units: i64) -> Result<Self, AmountError> {
        if minor_units < 0 {
            return Err(AmountError::NegativeBalance(minor_units));
        }
        if minor_units > MAX_AMOUNT_MINOR {
            return Err(AmountError::Overflow);
        }
        Ok(Self(minor_units))
    }

    /// Create a zero balance.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Get the value in minor units.
    pub fn minor_units(&self) -> i64 {
        self.0
    }

    /// Check if balance covers a withdrawal of `amount`.
    pub fn is_sufficient_for(&self, amount: Amount) -> bool {
        self.0 >= amount.minor_units()
    }

    /// Add amount to balance.
    pub fn credit(&self, amount: Amount) -> Result<Balance, AmountError> {
        Balance::new(self.0 + amount.minor_units())
    }

    /// Subtract amount from balance. Fails rather than going negative.
    pub fn debit(&self, amount: Amount) -> Result<Balance, AmountError> {
        Balance::new(self.0 - amount.minor_units())
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Balance {
    type Error = AmountError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Balance::new(value)
    }
}

impl From<Balance> for i64 {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}
