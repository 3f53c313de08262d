//! Fixed-point currency amounts.

use core::fmt;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// ISO-4217 currency code (three upper-case ASCII letters).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");

    pub fn new(code: &str) -> DomainResult<Self> {
        let bytes = code.trim().as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::validation(
                "currency",
                format!("'{code}' is not a three-letter currency code"),
            ));
        }
        let mut out = [0u8; 3];
        for (slot, b) in out.iter_mut().zip(bytes) {
            *slot = b.to_ascii_uppercase();
        }
        Ok(Self(out))
    }

    pub fn code(&self) -> &str {
        // Construction only admits ASCII letters.
        core::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl TryFrom<String> for Currency {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.code().to_string()
    }
}

/// An amount of money in integer minor units (cents for USD).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Amount in minor units.
    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    /// Reject negative amounts, reporting against `field`.
    pub fn ensure_non_negative(self, field: &str) -> DomainResult<Self> {
        if self.is_negative() {
            return Err(DomainError::validation(field, "amount must not be negative"));
        }
        Ok(self)
    }

    pub fn ensure_currency(self, expected: Currency) -> DomainResult<Self> {
        if self.currency != expected {
            return Err(DomainError::CurrencyMismatch {
                left: self.currency.to_string(),
                right: expected.to_string(),
            });
        }
        Ok(self)
    }

    pub fn checked_add(self, other: Money) -> DomainResult<Money> {
        other.ensure_currency(self.currency)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or_else(|| DomainError::validation("amount", "overflow"))?;
        Ok(Money::new(amount, self.currency))
    }

    pub fn checked_sub(self, other: Money) -> DomainResult<Money> {
        other.ensure_currency(self.currency)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or_else(|| DomainError::validation("amount", "overflow"))?;
        Ok(Money::new(amount, self.currency))
    }

    /// Multiply by `numerator / denominator`, flooring the result.
    ///
    /// Computed in `i128` so the intermediate product cannot overflow; only a
    /// result outside `i64` is an error.
    pub fn scale_floor(self, numerator: i64, denominator: i64) -> DomainResult<Money> {
        if denominator <= 0 {
            return Err(DomainError::validation("denominator", "must be positive"));
        }
        let product = i128::from(self.amount) * i128::from(numerator);
        let scaled = product.div_euclid(i128::from(denominator));
        let amount = i64::try_from(scaled)
            .map_err(|_| DomainError::validation("amount", "overflow"))?;
        Ok(Money::new(amount, self.currency))
    }

    /// Multiply by an exact decimal factor (e.g. a unit cost times a quantity),
    /// rounding half away from zero to whole minor units.
    pub fn multiply(self, factor: Decimal) -> DomainResult<Money> {
        let amount = Decimal::from(self.amount)
            .checked_mul(factor)
            .map(|v| v.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
            .and_then(|v| v.to_i64())
            .ok_or_else(|| DomainError::validation("amount", "overflow"))?;
        Ok(Money::new(amount, self.currency))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        let abs = self.amount.unsigned_abs();
        write!(f, "{sign}{}.{:02} {}", abs / 100, abs % 100, self.currency)
    }
}
