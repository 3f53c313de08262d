//! Application services: each public operation runs as one store transaction.
//!
//! A service loads the rows it needs, runs the aggregate's `handle`/`apply`,
//! writes the rows back with a version check and records the resulting events.
//! The store publishes them once the transaction commits.

pub mod ledger;
pub mod negotiation;
pub mod orders;
pub mod reconciliation;

use serde::Serialize;
use uuid::Uuid;

use etchforge_core::{Aggregate, DomainError, Entity, ExpectedVersion};
use etchforge_events::Event;

use crate::error::ServiceResult;
use crate::store::{Table, TenantTables, Transaction};

pub use ledger::{AdjustStockRequest, InventoryLedger, ReserveRequest, SetStockRequest, TransferRequest};
pub use negotiation::{AcceptOutcome, ExistingQuote, NegotiationService, NewQuote, RejectOutcome};
pub use orders::{NewOrder, OrderStageCoordinator};
pub use reconciliation::{
    ReconciliationEngine, ReconciliationMode, ReconciliationReport, TenantReconciliation,
    TenantReconciliationSummary,
};

/// `entity_type` of published envelopes.
pub mod entity_type {
    pub const QUOTE: &str = "quote";
    pub const ORDER: &str = "order";
    pub const INVENTORY_ITEM: &str = "inventory_item";
    pub const INVENTORY_ALERT: &str = "inventory_alert";
    pub const INVENTORY_RECONCILIATION: &str = "inventory_reconciliation";
}

/// Run `command` against `aggregate` and, if it produced events, write the
/// aggregate back to its table and record the events.
pub(crate) fn execute<A>(
    tx: &mut Transaction<'_>,
    table: fn(&mut TenantTables) -> &mut Table<A>,
    entity_type: &'static str,
    aggregate: &mut A,
    command: &A::Command,
) -> ServiceResult<Vec<A::Event>>
where
    A: Aggregate<Error = DomainError> + Entity + Clone,
    A::Event: Event + Serialize,
    <A as Entity>::Id: Into<Uuid>,
{
    let expected = match aggregate.version() {
        0 => ExpectedVersion::New,
        v => ExpectedVersion::Exact(v),
    };

    let events = aggregate.execute(command)?;
    if events.is_empty() {
        return Ok(events);
    }

    table(&mut **tx).save(aggregate.clone(), expected)?;
    tx.record_all(entity_type, (*Entity::id(aggregate)).into(), &events)?;
    Ok(events)
}
