//! Inventory domain module.
//!
//! Business rules for the stock ledger (per-location balances, reservations,
//! movements, alerts), cycle counts and reconciliation records, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod alert;
pub mod balance;
pub mod count;
pub mod ids;
pub mod item;
pub mod location;
pub mod movement;
pub mod reconciliation;
pub mod reservation;

pub use alert::{
    AlertChanges, AlertEvent, AlertSeverity, AlertType, StockAlert, StockAlertRaised,
    StockAlertResolved, evaluate_alerts,
};
pub use balance::{LocationVariance, StockBalances, StockVariance};
pub use count::{CountStatus, CountType, InventoryCount};
pub use ids::{
    AlertId, InventoryCountId, InventoryItemId, LocationId, MovementId, ReconciliationId,
    ReservationId,
};
pub use item::{
    ActiveReservationTotals, AdjustStock, BalancesCorrected, ComputedStock, ConsumeReservedStock,
    CorrectBalances, CreateItem, InventoryCommand, InventoryEvent, InventoryItem,
    InventoryItemSnapshot, ItemCreated, LocationDraw, LocationStock, ReleaseReservedStock,
    ReservationConsumed, ReservationReleased, ReserveStock, SetStock, StockAdjusted, StockReserved,
    StockSet, StockTransferred, TransferStock,
};
pub use location::{InventoryLocation, LocationUpdate};
pub use movement::{InventoryMovement, MovementType};
pub use reconciliation::{
    InventoryReconciliation, ReconciliationDecision, ReconciliationEvent, ReconciliationMetadata,
    ReconciliationOpened, ReconciliationOutcome, ReconciliationResolved, ReconciliationRun,
    ReconciliationSource, ReconciliationStatus, Resolution, ResolutionType, decide,
};
pub use reservation::{
    InventoryReservation, NewReservation, ReservationReference, ReservationStatus,
};
