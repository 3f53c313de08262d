use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etchforge_core::{DomainError, Entity, Quantity, TenantId, UserId};

use crate::ids::{InventoryItemId, LocationId, ReservationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Consumed,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Released => "released",
            ReservationStatus::Consumed => "consumed",
        }
    }
}

/// What a reservation holds stock for, e.g. `("order", "<order id>")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationReference {
    pub reference_type: String,
    pub reference_id: String,
}

/// Stock held for a purpose until it is released or consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReservation {
    id: ReservationId,
    tenant_id: TenantId,
    item_id: InventoryItemId,
    location_id: Option<LocationId>,
    quantity: Quantity,
    status: ReservationStatus,
    reference: Option<ReservationReference>,
    reserved_by: UserId,
    reserved_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    consumed_at: Option<DateTime<Utc>>,
}

/// Input for [`InventoryReservation::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub id: ReservationId,
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub location_id: Option<LocationId>,
    pub quantity: Quantity,
    pub reference: Option<ReservationReference>,
    pub reserved_by: UserId,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl InventoryReservation {
    pub fn open(new: NewReservation) -> Result<Self, DomainError> {
        let quantity = new.quantity.ensure_positive("quantity")?;
        if let Some(expires_at) = new.expires_at {
            if expires_at <= new.reserved_at {
                return Err(DomainError::validation(
                    "expires_at",
                    "expiry must be after the reservation time",
                ));
            }
        }
        if let Some(reference) = &new.reference {
            if reference.reference_type.trim().is_empty() {
                return Err(DomainError::validation(
                    "reference_type",
                    "reference type must not be empty",
                ));
            }
        }

        Ok(Self {
            id: new.id,
            tenant_id: new.tenant_id,
            item_id: new.item_id,
            location_id: new.location_id,
            quantity,
            status: ReservationStatus::Active,
            reference: new.reference,
            reserved_by: new.reserved_by,
            reserved_at: new.reserved_at,
            expires_at: new.expires_at,
            released_at: None,
            consumed_at: None,
        })
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn item_id(&self) -> InventoryItemId {
        self.item_id
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn reference(&self) -> Option<&ReservationReference> {
        self.reference.as_ref()
    }

    pub fn reserved_by(&self) -> UserId {
        self.reserved_by
    }

    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.released_at
    }

    pub fn consumed_at(&self) -> Option<DateTime<Utc>> {
        self.consumed_at
    }

    pub fn release(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.status = ReservationStatus::Released;
        self.released_at = Some(at);
        Ok(())
    }

    pub fn consume(&mut self, at: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.status = ReservationStatus::Consumed;
        self.consumed_at = Some(at);
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if !self.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "reservation is already {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

impl Entity for InventoryReservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn new_reservation(quantity: Quantity) -> NewReservation {
        NewReservation {
            id: ReservationId::new(),
            tenant_id: TenantId::new(),
            item_id: InventoryItemId::new(),
            location_id: None,
            quantity,
            reference: Some(ReservationReference {
                reference_type: "order".to_string(),
                reference_id: "ORD-1001".to_string(),
            }),
            reserved_by: UserId::new(),
            reserved_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let err = InventoryReservation::open(new_reservation(Quantity::ZERO)).unwrap_err();
        match err {
            DomainError::Validation { field, .. } if field == "quantity" => {}
            _ => panic!("Expected Validation error"),
        }
    }

    #[test]
    fn expiry_must_follow_reservation_time() {
        let mut new = new_reservation(Quantity::from_units(2));
        new.expires_at = Some(new.reserved_at - Duration::hours(1));
        assert!(InventoryReservation::open(new).is_err());
    }

    #[test]
    fn release_is_terminal() {
        let mut r =
            InventoryReservation::open(new_reservation(Quantity::new(dec!(2.5)).unwrap())).unwrap();
        r.release(Utc::now()).unwrap();
        assert_eq!(r.status(), ReservationStatus::Released);
        assert!(r.released_at().is_some());

        match r.consume(Utc::now()).unwrap_err() {
            DomainError::InvalidTransition(_) => {}
            _ => panic!("Expected InvalidTransition error"),
        }
    }
}
