//! Non-negative exact decimal quantities for stock levels.

use core::fmt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// A stock quantity. Never negative.
///
/// Serialised as a decimal string so no precision is lost on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl ValueObject for Quantity {}

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn new(value: Decimal) -> DomainResult<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(DomainError::validation(
                "quantity",
                format!("quantity must not be negative (got {value})"),
            ));
        }
        Ok(Self(value.normalize()))
    }

    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Require a strictly positive quantity.
    pub fn ensure_positive(self, field: &str) -> DomainResult<Self> {
        if self.is_zero() {
            return Err(DomainError::validation(field, "quantity must be greater than zero"));
        }
        Ok(self)
    }

    pub fn checked_add(self, other: Quantity) -> DomainResult<Quantity> {
        self.0
            .checked_add(other.0)
            .map(|v| Quantity(v.normalize()))
            .ok_or_else(|| DomainError::validation("quantity", "overflow"))
    }

    /// Subtract, failing with `InsufficientStock` when the result would be negative.
    pub fn checked_sub(self, other: Quantity) -> DomainResult<Quantity> {
        if other.0 > self.0 {
            return Err(DomainError::insufficient_stock(other, self));
        }
        Ok(Quantity((self.0 - other.0).normalize()))
    }

    /// Subtract, clamping at zero.
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        if other.0 >= self.0 {
            Quantity::ZERO
        } else {
            Quantity((self.0 - other.0).normalize())
        }
    }

    /// Signed difference `self - other`.
    pub fn delta(self, other: Quantity) -> Decimal {
        self.0 - other.0
    }

    /// Sum of `quantities`; `Validation { quantity }` on overflow.
    pub fn checked_sum(quantities: impl IntoIterator<Item = Quantity>) -> DomainResult<Quantity> {
        quantities
            .into_iter()
            .try_fold(Quantity::ZERO, |acc, q| acc.checked_add(q))
    }

    /// Add, clamping at `Decimal::MAX`.
    ///
    /// For replaying events whose totals were already checked when the
    /// command was handled.
    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0).normalize())
    }

    /// Apply a signed delta. Going below zero is `InsufficientStock`;
    /// overflowing the decimal range is `Validation { quantity }`.
    pub fn apply_delta(self, delta: Decimal) -> DomainResult<Quantity> {
        let next = self
            .0
            .checked_add(delta)
            .ok_or_else(|| DomainError::validation("quantity", "overflow"))?;
        if next.is_sign_negative() && !next.is_zero() {
            return Err(DomainError::insufficient_stock(
                Quantity(delta.abs()),
                self,
            ));
        }
        Ok(Quantity(next.normalize()))
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Quantity::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
