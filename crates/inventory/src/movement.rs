use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etchforge_core::{Entity, Quantity, TenantId, UserId};

use crate::ids::{InventoryItemId, LocationId, MovementId, ReservationId};
use crate::item::InventoryEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    AdjustmentIncrease,
    AdjustmentDecrease,
    Transfer,
    Reservation,
    ReservationRelease,
    ReservationConsume,
}

impl MovementType {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::AdjustmentIncrease => "adjustment_increase",
            MovementType::AdjustmentDecrease => "adjustment_decrease",
            MovementType::Transfer => "transfer",
            MovementType::Reservation => "reservation",
            MovementType::ReservationRelease => "reservation_release",
            MovementType::ReservationConsume => "reservation_consume",
        }
    }
}

/// Append-only ledger line. `quantity` is always the absolute amount moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub movement_type: MovementType,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    pub reservation_id: Option<ReservationId>,
    pub quantity: Quantity,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl Entity for InventoryMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

impl InventoryMovement {
    /// Ledger lines for a stock event. Creation and corrections produce none;
    /// an absolute set that changes nothing produces none.
    pub fn from_event(event: &InventoryEvent) -> Vec<InventoryMovement> {
        match event {
            InventoryEvent::ItemCreated(_) | InventoryEvent::BalancesCorrected(_) => Vec::new(),
            InventoryEvent::StockSet(e) => adjustment(
                e.tenant_id,
                e.item_id,
                e.location_id,
                e.previous_on_hand,
                e.on_hand,
                e.reason.clone(),
                e.actor,
                e.occurred_at,
            )
            .into_iter()
            .collect(),
            InventoryEvent::StockAdjusted(e) => adjustment(
                e.tenant_id,
                e.item_id,
                e.location_id,
                e.previous_on_hand,
                e.on_hand,
                e.reason.clone(),
                e.actor,
                e.occurred_at,
            )
            .into_iter()
            .collect(),
            InventoryEvent::StockTransferred(e) => vec![InventoryMovement {
                id: MovementId::new(),
                tenant_id: e.tenant_id,
                item_id: e.item_id,
                movement_type: MovementType::Transfer,
                from_location_id: Some(e.from_location_id),
                to_location_id: Some(e.to_location_id),
                reservation_id: None,
                quantity: e.quantity,
                reason: e.reason.clone(),
                actor: e.actor,
                occurred_at: e.occurred_at,
            }],
            InventoryEvent::StockReserved(e) => vec![InventoryMovement {
                id: MovementId::new(),
                tenant_id: e.tenant_id,
                item_id: e.item_id,
                movement_type: MovementType::Reservation,
                from_location_id: e.location_id,
                to_location_id: None,
                reservation_id: Some(e.reservation_id),
                quantity: e.quantity,
                reason: None,
                actor: e.actor,
                occurred_at: e.occurred_at,
            }],
            InventoryEvent::ReservationReleased(e) => vec![InventoryMovement {
                id: MovementId::new(),
                tenant_id: e.tenant_id,
                item_id: e.item_id,
                movement_type: MovementType::ReservationRelease,
                from_location_id: None,
                to_location_id: e.location_id,
                reservation_id: Some(e.reservation_id),
                quantity: e.quantity,
                reason: e.reason.clone(),
                actor: e.actor,
                occurred_at: e.occurred_at,
            }],
            InventoryEvent::ReservationConsumed(e) => e
                .draws
                .iter()
                .map(|draw| InventoryMovement {
                    id: MovementId::new(),
                    tenant_id: e.tenant_id,
                    item_id: e.item_id,
                    movement_type: MovementType::ReservationConsume,
                    from_location_id: Some(draw.location_id),
                    to_location_id: None,
                    reservation_id: Some(e.reservation_id),
                    quantity: draw.quantity,
                    reason: e.reason.clone(),
                    actor: e.actor,
                    occurred_at: e.occurred_at,
                })
                .collect(),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn adjustment(
    tenant_id: TenantId,
    item_id: InventoryItemId,
    location_id: LocationId,
    previous: Quantity,
    current: Quantity,
    reason: Option<String>,
    actor: UserId,
    occurred_at: DateTime<Utc>,
) -> Option<InventoryMovement> {
    let (movement_type, quantity, from, to) = if current > previous {
        (
            MovementType::AdjustmentIncrease,
            current.saturating_sub(previous),
            None,
            Some(location_id),
        )
    } else if current < previous {
        (
            MovementType::AdjustmentDecrease,
            previous.saturating_sub(current),
            Some(location_id),
            None,
        )
    } else {
        return None;
    };

    Some(InventoryMovement {
        id: MovementId::new(),
        tenant_id,
        item_id,
        movement_type,
        from_location_id: from,
        to_location_id: to,
        reservation_id: None,
        quantity,
        reason,
        actor,
        occurred_at,
    })
}
