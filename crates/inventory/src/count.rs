//! Physical stock counts planned for a location.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use etchforge_core::{DomainError, Entity, Money, TenantId, UserId};

use crate::ids::{InventoryCountId, LocationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountType {
    Cycle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountStatus {
    Scheduled,
}

/// A count of every item stocked at one location.
///
/// Scheduling only plans the count: `items_counted` and the variances stay at
/// zero until someone records results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCount {
    pub id: InventoryCountId,
    pub tenant_id: TenantId,
    pub location_id: LocationId,
    pub count_type: CountType,
    pub status: CountStatus,
    pub scheduled_for: DateTime<Utc>,
    /// Item rows held at the location when the count was scheduled.
    pub total_items: usize,
    pub items_counted: usize,
    pub variance_quantity: Decimal,
    pub variance_value: Option<Money>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Entity for InventoryCount {
    type Id = InventoryCountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

impl InventoryCount {
    /// Plan a cycle count; without an explicit date it is due one day after `now`.
    pub fn schedule_cycle(
        tenant_id: TenantId,
        location_id: LocationId,
        total_items: usize,
        scheduled_for: Option<DateTime<Utc>>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let scheduled_for = scheduled_for.unwrap_or(now + Duration::days(1));
        if scheduled_for < now {
            return Err(DomainError::validation("scheduled_for", "must not be in the past"));
        }
        Ok(Self {
            id: InventoryCountId::new(),
            tenant_id,
            location_id,
            count_type: CountType::Cycle,
            status: CountStatus::Scheduled,
            scheduled_for,
            total_items,
            items_counted: 0,
            variance_quantity: Decimal::ZERO,
            variance_value: None,
            created_by: actor,
            created_at: now,
        })
    }
}
