//! Identifiers owned by the inventory context.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One inventory item per (tenant, product).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryItemId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReconciliationId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertId(Uuid);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryCountId(Uuid);

etchforge_core::impl_uuid_newtype!(InventoryItemId, "InventoryItemId");
etchforge_core::impl_uuid_newtype!(LocationId, "LocationId");
etchforge_core::impl_uuid_newtype!(ReservationId, "ReservationId");
etchforge_core::impl_uuid_newtype!(ReconciliationId, "ReconciliationId");
etchforge_core::impl_uuid_newtype!(MovementId, "MovementId");
etchforge_core::impl_uuid_newtype!(AlertId, "AlertId");
etchforge_core::impl_uuid_newtype!(InventoryCountId, "InventoryCountId");
