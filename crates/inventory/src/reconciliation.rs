//! Reconciliation records: what the recorded item balances were, what they
//! should have been, and whether the gap is still open.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use etchforge_core::{DomainError, Entity, Money, Quantity, TenantId, UserId};
use etchforge_events::Event;

use crate::balance::{LocationVariance, StockBalances, StockVariance};
use crate::ids::{InventoryItemId, ReconciliationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    Open,
    Resolved,
}

/// Who triggered the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationSource {
    Manual,
    Scheduled,
    Api,
}

impl ReconciliationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconciliationSource::Manual => "manual",
            ReconciliationSource::Scheduled => "scheduled",
            ReconciliationSource::Api => "api",
        }
    }
}

impl core::str::FromStr for ReconciliationSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ReconciliationSource::Manual),
            "scheduled" => Ok(ReconciliationSource::Scheduled),
            "api" => Ok(ReconciliationSource::Api),
            other => Err(DomainError::validation(
                "source",
                format!("unsupported reconciliation source '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(rename = "type")]
    pub resolution_type: ResolutionType,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationMetadata {
    /// Recorded balances before the run.
    pub previous: StockBalances,
    /// Balances computed from the ledger.
    pub snapshot: StockBalances,
    pub variance: StockVariance,
    /// Location rows that disagreed with the ledger, even when item totals matched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LocationVariance>,
    /// Computed minus recorded reserve held without a location.
    #[serde(default, skip_serializing_if = "Decimal::is_zero")]
    pub unallocated_reserved_variance: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    /// Computed balances of the run that resolved the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<StockBalances>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReconciliation {
    pub id: ReconciliationId,
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub status: ReconciliationStatus,
    pub source: ReconciliationSource,
    /// On-hand variance (computed minus recorded).
    pub variance_quantity: Decimal,
    /// `variance_quantity` valued at the item's average cost, when it has one.
    pub variance_value: Option<Money>,
    pub expected_quantity: Quantity,
    pub counted_quantity: Quantity,
    pub metadata: ReconciliationMetadata,
    pub initiated_by: UserId,
    pub initiated_at: DateTime<Utc>,
    pub resolved_by: Option<UserId>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Entity for InventoryReconciliation {
    type Id = ReconciliationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

impl InventoryReconciliation {
    pub fn is_open(&self) -> bool {
        self.status == ReconciliationStatus::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Balanced,
    Opened,
    Updated,
    Resolved,
}

impl ReconciliationOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconciliationOutcome::Balanced => "balanced",
            ReconciliationOutcome::Opened => "opened",
            ReconciliationOutcome::Updated => "updated",
            ReconciliationOutcome::Resolved => "resolved",
        }
    }
}

/// Inputs of one reconciliation decision for one item.
#[derive(Debug, Clone)]
pub struct ReconciliationRun {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub recorded: StockBalances,
    pub computed: StockBalances,
    /// Drifted location rows (see `InventoryItem::location_drift`).
    pub locations: Vec<LocationVariance>,
    pub unallocated_reserved_variance: Decimal,
    pub average_cost: Option<Money>,
    pub source: ReconciliationSource,
    pub actor: UserId,
    pub now: DateTime<Utc>,
}

impl ReconciliationRun {
    pub fn variance(&self) -> StockVariance {
        self.computed.variance_from(&self.recorded)
    }

    /// Item totals, every location row and the unallocated reserve all agree
    /// with the ledger.
    pub fn is_balanced(&self) -> bool {
        self.variance().is_zero()
            && self.locations.is_empty()
            && self.unallocated_reserved_variance.is_zero()
    }

    fn variance_value(&self, quantity: Decimal) -> Result<Option<Money>, DomainError> {
        self.average_cost.map(|cost| cost.multiply(quantity)).transpose()
    }
}

/// What should happen to the item's reconciliation record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationDecision {
    Balanced,
    Open(InventoryReconciliation),
    Update(InventoryReconciliation),
    Resolve(InventoryReconciliation),
}

impl ReconciliationDecision {
    pub fn outcome(&self) -> ReconciliationOutcome {
        match self {
            ReconciliationDecision::Balanced => ReconciliationOutcome::Balanced,
            ReconciliationDecision::Open(_) => ReconciliationOutcome::Opened,
            ReconciliationDecision::Update(_) => ReconciliationOutcome::Updated,
            ReconciliationDecision::Resolve(_) => ReconciliationOutcome::Resolved,
        }
    }

    pub fn record(&self) -> Option<&InventoryReconciliation> {
        match self {
            ReconciliationDecision::Balanced => None,
            ReconciliationDecision::Open(r)
            | ReconciliationDecision::Update(r)
            | ReconciliationDecision::Resolve(r) => Some(r),
        }
    }
}

/// Decide the record change for `run`, given the item's open record if any.
///
/// Any drift opens a record or refreshes the open one; a balanced run
/// resolves the open record, or does nothing. Fails only when valuing the
/// variance overflows.
pub fn decide(
    run: &ReconciliationRun,
    open: Option<&InventoryReconciliation>,
) -> Result<ReconciliationDecision, DomainError> {
    let variance = run.variance();

    if run.is_balanced() {
        return Ok(match open {
            Some(existing) => {
                let mut resolved = existing.clone();
                resolved.status = ReconciliationStatus::Resolved;
                resolved.resolved_by = Some(run.actor);
                resolved.resolved_at = Some(run.now);
                resolved.variance_quantity = Decimal::ZERO;
                resolved.variance_value = run.variance_value(Decimal::ZERO)?;
                resolved.metadata.resolution = Some(Resolution {
                    resolution_type: ResolutionType::Auto,
                    resolved_at: run.now,
                });
                resolved.metadata.last_snapshot = Some(run.computed);
                ReconciliationDecision::Resolve(resolved)
            }
            None => ReconciliationDecision::Balanced,
        });
    }

    let variance_value = run.variance_value(variance.on_hand)?;
    Ok(match open {
        Some(existing) => {
            let mut updated = existing.clone();
            updated.counted_quantity = run.computed.on_hand;
            updated.variance_quantity = variance.on_hand;
            updated.variance_value = variance_value;
            updated.metadata.previous = run.recorded;
            updated.metadata.snapshot = run.computed;
            updated.metadata.variance = variance;
            updated.metadata.locations = run.locations.clone();
            updated.metadata.unallocated_reserved_variance = run.unallocated_reserved_variance;
            ReconciliationDecision::Update(updated)
        }
        None => ReconciliationDecision::Open(InventoryReconciliation {
            id: ReconciliationId::new(),
            tenant_id: run.tenant_id,
            item_id: run.item_id,
            status: ReconciliationStatus::Open,
            source: run.source,
            variance_quantity: variance.on_hand,
            variance_value,
            expected_quantity: run.recorded.on_hand,
            counted_quantity: run.computed.on_hand,
            metadata: ReconciliationMetadata {
                previous: run.recorded,
                snapshot: run.computed,
                variance,
                locations: run.locations.clone(),
                unallocated_reserved_variance: run.unallocated_reserved_variance,
                resolution: None,
                last_snapshot: None,
            },
            initiated_by: run.actor,
            initiated_at: run.now,
            resolved_by: None,
            resolved_at: None,
        }),
    })
}

/// Event: ReconciliationOpened (a record was created or refreshed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOpened {
    pub tenant_id: TenantId,
    pub reconciliation_id: ReconciliationId,
    pub item_id: InventoryItemId,
    pub source: ReconciliationSource,
    pub variance: StockVariance,
    pub variance_value: Option<Money>,
    /// Number of drifted location rows.
    pub drifted_locations: usize,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReconciliationResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationResolved {
    pub tenant_id: TenantId,
    pub reconciliation_id: ReconciliationId,
    pub item_id: InventoryItemId,
    pub resolution_type: ResolutionType,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationEvent {
    Opened(ReconciliationOpened),
    Resolved(ReconciliationResolved),
}

impl Event for ReconciliationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReconciliationEvent::Opened(_) => "inventory.reconciliation.opened",
            ReconciliationEvent::Resolved(_) => "inventory.reconciliation.resolved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReconciliationEvent::Opened(e) => e.occurred_at,
            ReconciliationEvent::Resolved(e) => e.occurred_at,
        }
    }
}

impl ReconciliationDecision {
    /// The event announcing this decision, if it changed a record.
    pub fn event(&self, actor: UserId, at: DateTime<Utc>) -> Option<ReconciliationEvent> {
        match self {
            ReconciliationDecision::Balanced => None,
            ReconciliationDecision::Open(r) | ReconciliationDecision::Update(r) => {
                Some(ReconciliationEvent::Opened(ReconciliationOpened {
                    tenant_id: r.tenant_id,
                    reconciliation_id: r.id,
                    item_id: r.item_id,
                    source: r.source,
                    variance: r.metadata.variance,
                    variance_value: r.variance_value,
                    drifted_locations: r.metadata.locations.len(),
                    actor,
                    occurred_at: at,
                }))
            }
            ReconciliationDecision::Resolve(r) => {
                Some(ReconciliationEvent::Resolved(ReconciliationResolved {
                    tenant_id: r.tenant_id,
                    reconciliation_id: r.id,
                    item_id: r.item_id,
                    resolution_type: ResolutionType::Auto,
                    actor,
                    occurred_at: at,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etchforge_core::Currency;
    use rust_decimal_macros::dec;

    use crate::ids::LocationId;

    fn balances(on_hand: Decimal, reserved: Decimal) -> StockBalances {
        StockBalances::derive(Quantity::new(on_hand).unwrap(), Quantity::new(reserved).unwrap())
    }

    fn run(recorded: StockBalances, computed: StockBalances) -> ReconciliationRun {
        ReconciliationRun {
            tenant_id: TenantId::new(),
            item_id: InventoryItemId::new(),
            recorded,
            computed,
            locations: Vec::new(),
            unallocated_reserved_variance: Decimal::ZERO,
            average_cost: None,
            source: ReconciliationSource::Manual,
            actor: UserId::new(),
            now: Utc::now(),
        }
    }

    #[test]
    fn variance_opens_record_with_metadata() {
        let r = run(balances(dec!(150), dec!(0)), balances(dec!(180), dec!(0)));
        let decision = decide(&r, None).unwrap();
        assert_eq!(decision.outcome(), ReconciliationOutcome::Opened);

        let record = decision.record().unwrap();
        assert!(record.is_open());
        assert_eq!(record.variance_quantity, dec!(30));
        assert_eq!(record.expected_quantity, Quantity::from_units(150));
        assert_eq!(record.counted_quantity, Quantity::from_units(180));
        assert_eq!(record.metadata.variance.available, dec!(30));

        let json = serde_json::to_value(&record.metadata).unwrap();
        assert_eq!(json["variance"]["on_hand"], serde_json::json!("30"));
    }

    #[test]
    fn clean_run_resolves_open_record() {
        let opened = decide(&run(balances(dec!(150), dec!(0)), balances(dec!(180), dec!(0))), None).unwrap();
        let open = opened.record().unwrap().clone();

        let clean = run(balances(dec!(180), dec!(0)), balances(dec!(180), dec!(0)));
        let decision = decide(&clean, Some(&open)).unwrap();
        assert_eq!(decision.outcome(), ReconciliationOutcome::Resolved);

        let record = decision.record().unwrap();
        assert_eq!(record.status, ReconciliationStatus::Resolved);
        assert_eq!(record.variance_quantity, Decimal::ZERO);
        assert_eq!(
            record.metadata.resolution.as_ref().map(|r| r.resolution_type),
            Some(ResolutionType::Auto)
        );
        let json = serde_json::to_value(&record.metadata).unwrap();
        assert_eq!(json["resolution"]["type"], serde_json::json!("auto"));

        assert_eq!(decide(&clean, None).unwrap(), ReconciliationDecision::Balanced);
    }

    #[test]
    fn repeated_variance_updates_open_record() {
        let first = decide(&run(balances(dec!(10), dec!(0)), balances(dec!(12), dec!(0))), None).unwrap();
        let open = first.record().unwrap().clone();

        let second = decide(&run(balances(dec!(10), dec!(2)), balances(dec!(12), dec!(0))), Some(&open)).unwrap();
        assert_eq!(second.outcome(), ReconciliationOutcome::Updated);
        let record = second.record().unwrap();
        assert_eq!(record.id, open.id);
        assert_eq!(record.metadata.variance.reserved, dec!(-2));
    }

    #[test]
    fn variance_is_valued_at_average_cost() {
        let mut r = run(balances(dec!(150), dec!(0)), balances(dec!(120), dec!(0)));
        r.average_cost = Some(Money::new(1_250, Currency::USD));
        let decision = decide(&r, None).unwrap();
        let record = decision.record().unwrap();
        assert_eq!(record.variance_value, Some(Money::new(-37_500, Currency::USD)));

        let mut clean = run(balances(dec!(120), dec!(0)), balances(dec!(120), dec!(0)));
        clean.average_cost = r.average_cost;
        let resolved = decide(&clean, Some(record)).unwrap();
        assert_eq!(resolved.record().unwrap().variance_value, Some(Money::zero(Currency::USD)));
    }

    #[test]
    fn location_drift_alone_opens_a_record() {
        let totals = balances(dec!(40), dec!(0));
        let mut r = run(totals, totals);
        let location_id = LocationId::new();
        let recorded = balances(dec!(40), dec!(5));
        r.locations = vec![LocationVariance {
            location_id,
            recorded,
            computed: totals,
            variance: totals.variance_from(&recorded),
        }];
        assert!(r.variance().is_zero());
        assert!(!r.is_balanced());

        let decision = decide(&r, None).unwrap();
        assert_eq!(decision.outcome(), ReconciliationOutcome::Opened);
        let record = decision.record().unwrap();
        assert_eq!(record.variance_quantity, Decimal::ZERO);
        assert_eq!(record.metadata.locations.len(), 1);
        assert_eq!(record.metadata.locations[0].variance.reserved, dec!(-5));

        let json = serde_json::to_value(&record.metadata).unwrap();
        assert_eq!(json["locations"][0]["variance"]["available"], serde_json::json!("5"));
        assert!(json.get("unallocated_reserved_variance").is_none());
    }

    #[test]
    fn parses_sources() {
        assert_eq!("api".parse::<ReconciliationSource>().unwrap(), ReconciliationSource::Api);
        assert!("cron".parse::<ReconciliationSource>().is_err());
    }
}
