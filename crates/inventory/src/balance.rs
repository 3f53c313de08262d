//! Stock balance triples and their variance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use etchforge_core::{Quantity, ValueObject};

use crate::ids::LocationId;

/// On-hand / reserved / available for an item or a single location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalances {
    pub on_hand: Quantity,
    pub reserved: Quantity,
    pub available: Quantity,
}

impl ValueObject for StockBalances {}

impl StockBalances {
    /// Balances with `available` derived from the other two.
    ///
    /// `available` clamps at zero when more is reserved than is on hand; the
    /// ledger never produces that state, only corrupted records do.
    pub fn derive(on_hand: Quantity, reserved: Quantity) -> Self {
        Self {
            on_hand,
            reserved,
            available: on_hand.saturating_sub(reserved),
        }
    }

    /// `available == on_hand - reserved` and `on_hand >= reserved`.
    pub fn is_consistent(&self) -> bool {
        self.on_hand >= self.reserved && self.available.value() == self.on_hand.delta(self.reserved)
    }

    /// Signed difference `self - recorded` on every component.
    pub fn variance_from(&self, recorded: &StockBalances) -> StockVariance {
        StockVariance {
            on_hand: self.on_hand.delta(recorded.on_hand),
            reserved: self.reserved.delta(recorded.reserved),
            available: self.available.delta(recorded.available),
        }
    }
}

/// Signed variance between computed and recorded balances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockVariance {
    pub on_hand: Decimal,
    pub reserved: Decimal,
    pub available: Decimal,
}

impl ValueObject for StockVariance {}

impl StockVariance {
    pub fn is_zero(&self) -> bool {
        self.on_hand.is_zero() && self.reserved.is_zero() && self.available.is_zero()
    }
}

/// A location row whose recorded balances differ from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationVariance {
    pub location_id: LocationId,
    pub recorded: StockBalances,
    pub computed: StockBalances,
    pub variance: StockVariance,
}
