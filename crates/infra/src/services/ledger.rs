//! Inventory stock ledger: per-location balances, reservations, movements
//! and low-stock alerts.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use etchforge_core::{DomainError, ProductId, Quantity, TenantId, UserId};
use etchforge_events::{EventBus, EventEnvelope};
use etchforge_inventory::location::normalize_code;
use etchforge_inventory::{
    AdjustStock, ConsumeReservedStock, CreateItem, InventoryCommand, InventoryCount, InventoryEvent,
    InventoryItem, InventoryItemId, InventoryItemSnapshot, InventoryLocation, InventoryMovement,
    InventoryReservation, LocationId, LocationUpdate, NewReservation, ReleaseReservedStock,
    ReservationId, ReservationReference, ReserveStock, SetStock, StockAlert, TransferStock,
    evaluate_alerts,
};

use super::{entity_type, execute};
use crate::error::ServiceResult;
use crate::store::{InMemoryStore, TenantTables, Transaction};

#[derive(Debug, Clone)]
pub struct SetStockRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdjustStockRequest {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub delta: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub quantity: Decimal,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub product_id: ProductId,
    pub quantity: Decimal,
    /// `None` reserves against the item as a whole.
    pub location_id: Option<LocationId>,
    pub reference: Option<ReservationReference>,
    pub expires_at: Option<DateTime<Utc>>,
}

pub(crate) fn item_for_product(tables: &TenantTables, product_id: ProductId) -> Option<InventoryItem> {
    tables
        .items
        .iter()
        .find(|i| i.product_id() == Some(product_id))
        .cloned()
}

pub(crate) fn load_item(tables: &TenantTables, item_id: InventoryItemId) -> ServiceResult<InventoryItem> {
    Ok(tables
        .items
        .get(&item_id)
        .cloned()
        .ok_or_else(DomainError::not_found)?)
}

/// The location must exist and accept stock.
fn receiving_location(tables: &TenantTables, location_id: LocationId) -> ServiceResult<InventoryLocation> {
    let location = tables
        .locations
        .get(&location_id)
        .cloned()
        .ok_or_else(DomainError::not_found)?;
    if !location.is_active() {
        return Err(DomainError::validation(
            "location_id",
            format!("location {} is inactive", location.code()),
        )
        .into());
    }
    Ok(location)
}

fn existing_location(tables: &TenantTables, location_id: LocationId) -> ServiceResult<()> {
    if tables.locations.get(&location_id).is_none() {
        return Err(DomainError::not_found().into());
    }
    Ok(())
}

/// The product's item, created from the product row on first use.
fn ensure_item(tx: &mut Transaction<'_>, product_id: ProductId, now: DateTime<Utc>) -> ServiceResult<InventoryItem> {
    if let Some(item) = item_for_product(tx, product_id) {
        return Ok(item);
    }

    let product = tx
        .products
        .get(&product_id)
        .cloned()
        .ok_or_else(DomainError::not_found)?;
    let item_id = InventoryItemId::new();
    let mut item = InventoryItem::empty(item_id);
    let command = InventoryCommand::CreateItem(CreateItem {
        tenant_id: tx.tenant_id(),
        item_id,
        product_id,
        item_code: product.sku,
        name: product.name,
        low_stock_threshold: product.low_stock_threshold,
        average_cost: product.unit_cost,
        occurred_at: now,
    });
    execute(tx, |t| &mut t.items, entity_type::INVENTORY_ITEM, &mut item, &command)?;
    debug!(tenant_id = %tx.tenant_id(), %item_id, %product_id, "inventory item created");
    Ok(item)
}

/// Run a stock command, write its movements and refresh the item's alerts.
fn apply_stock_command(
    tx: &mut Transaction<'_>,
    item: &mut InventoryItem,
    command: &InventoryCommand,
    actor: UserId,
    now: DateTime<Utc>,
) -> ServiceResult<Vec<InventoryEvent>> {
    let events = execute(tx, |t| &mut t.items, entity_type::INVENTORY_ITEM, item, command)?;
    for event in &events {
        for movement in InventoryMovement::from_event(event) {
            tx.movements.insert(movement)?;
        }
    }
    refresh_alerts(tx, item, actor, now)?;
    Ok(events)
}

/// Resolve alerts whose condition cleared and raise the ones now due.
pub(crate) fn refresh_alerts(
    tx: &mut Transaction<'_>,
    item: &InventoryItem,
    actor: UserId,
    now: DateTime<Utc>,
) -> ServiceResult<()> {
    let item_id = item.id_typed();
    let open: Vec<StockAlert> = tx
        .alerts
        .iter()
        .filter(|a| a.item_id == item_id && !a.resolved)
        .cloned()
        .collect();
    let open_refs: Vec<&StockAlert> = open.iter().collect();
    let changes = evaluate_alerts(item, tx.tenant_id(), &open_refs, now);
    if changes.is_empty() {
        return Ok(());
    }

    for alert_id in &changes.resolved {
        let Some(mut alert) = open.iter().find(|a| a.id == *alert_id).cloned() else {
            continue;
        };
        alert.resolve(actor, now);
        tx.record(entity_type::INVENTORY_ALERT, *alert.id.as_uuid(), &alert.resolved_event(now))?;
        tx.alerts.update(alert)?;
    }
    for alert in changes.raised {
        info!(
            tenant_id = %tx.tenant_id(),
            %item_id,
            alert_type = alert.alert_type.as_str(),
            quantity = %alert.triggered_quantity,
            "stock alert raised"
        );
        tx.record(entity_type::INVENTORY_ALERT, *alert.id.as_uuid(), &alert.raised_event())?;
        tx.alerts.insert(alert)?;
    }
    Ok(())
}

pub struct InventoryLedger<B> {
    store: Arc<InMemoryStore<B>>,
}

impl<B> InventoryLedger<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(store: Arc<InMemoryStore<B>>) -> Self {
        Self { store }
    }

    /// Absolute set of a location's on-hand stock.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, location_id = %request.location_id))]
    pub fn set_stock(&self, tenant_id: TenantId, actor: UserId, request: SetStockRequest) -> ServiceResult<InventoryItem> {
        let item = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            receiving_location(tx, request.location_id)?;
            let mut item = ensure_item(tx, request.product_id, now)?;
            let command = InventoryCommand::SetStock(SetStock {
                tenant_id,
                item_id: item.id_typed(),
                location_id: request.location_id,
                quantity: request.quantity,
                reason: request.reason.clone(),
                actor,
                occurred_at: now,
            });
            apply_stock_command(tx, &mut item, &command, actor, now)?;
            Ok(item)
        })?;

        info!(%tenant_id, item_id = %item.id_typed(), on_hand = %item.current_stock(), "stock set");
        Ok(item)
    }

    /// Relative adjustment of a location's on-hand stock.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, location_id = %request.location_id))]
    pub fn adjust_stock(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        request: AdjustStockRequest,
    ) -> ServiceResult<InventoryItem> {
        let item = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            if request.delta.is_sign_positive() {
                receiving_location(tx, request.location_id)?;
            } else {
                existing_location(tx, request.location_id)?;
            }
            let mut item = ensure_item(tx, request.product_id, now)?;
            let command = InventoryCommand::AdjustStock(AdjustStock {
                tenant_id,
                item_id: item.id_typed(),
                location_id: request.location_id,
                delta: request.delta,
                reason: request.reason.clone(),
                actor,
                occurred_at: now,
            });
            apply_stock_command(tx, &mut item, &command, actor, now)?;
            Ok(item)
        })?;

        info!(%tenant_id, item_id = %item.id_typed(), delta = %request.delta, "stock adjusted");
        Ok(item)
    }

    /// Move free stock between two locations of the same item.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub fn transfer(&self, tenant_id: TenantId, actor: UserId, request: TransferRequest) -> ServiceResult<InventoryItem> {
        let item = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            existing_location(tx, request.from_location_id)?;
            receiving_location(tx, request.to_location_id)?;
            let mut item = item_for_product(tx, request.product_id).ok_or_else(DomainError::not_found)?;
            let command = InventoryCommand::TransferStock(TransferStock {
                tenant_id,
                item_id: item.id_typed(),
                from_location_id: request.from_location_id,
                to_location_id: request.to_location_id,
                quantity: request.quantity,
                reason: request.reason.clone(),
                actor,
                occurred_at: now,
            });
            apply_stock_command(tx, &mut item, &command, actor, now)?;
            Ok(item)
        })?;

        info!(
            %tenant_id,
            item_id = %item.id_typed(),
            from = %request.from_location_id,
            to = %request.to_location_id,
            quantity = %request.quantity,
            "stock transferred"
        );
        Ok(item)
    }

    /// Hold stock for a purpose. Fails when availability would go negative.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub fn reserve(&self, tenant_id: TenantId, actor: UserId, request: ReserveRequest) -> ServiceResult<InventoryReservation> {
        let reservation = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            if let Some(location_id) = request.location_id {
                receiving_location(tx, location_id)?;
            }
            let mut item = ensure_item(tx, request.product_id, now)?;

            let reservation_id = ReservationId::new();
            let command = InventoryCommand::ReserveStock(ReserveStock {
                tenant_id,
                item_id: item.id_typed(),
                reservation_id,
                location_id: request.location_id,
                quantity: request.quantity,
                actor,
                occurred_at: now,
            });
            apply_stock_command(tx, &mut item, &command, actor, now)?;

            let reservation = InventoryReservation::open(NewReservation {
                id: reservation_id,
                tenant_id,
                item_id: item.id_typed(),
                location_id: request.location_id,
                quantity: Quantity::new(request.quantity)?,
                reference: request.reference.clone(),
                reserved_by: actor,
                reserved_at: now,
                expires_at: request.expires_at,
            })?;
            tx.reservations.insert(reservation.clone())?;
            Ok(reservation)
        })?;

        info!(
            %tenant_id,
            reservation_id = %reservation.id_typed(),
            item_id = %reservation.item_id(),
            quantity = %reservation.quantity(),
            "stock reserved"
        );
        Ok(reservation)
    }

    /// Give a reservation's stock back to availability.
    #[instrument(skip(self, reason))]
    pub fn release(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        reservation_id: ReservationId,
        reason: Option<String>,
    ) -> ServiceResult<InventoryReservation> {
        let reservation = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            let mut reservation = tx
                .reservations
                .get(&reservation_id)
                .cloned()
                .ok_or_else(DomainError::not_found)?;
            reservation.release(now)?;

            let mut item = load_item(tx, reservation.item_id())?;
            let command = InventoryCommand::ReleaseReservedStock(ReleaseReservedStock {
                tenant_id,
                item_id: item.id_typed(),
                reservation_id,
                location_id: reservation.location_id(),
                quantity: reservation.quantity(),
                reason: reason.clone(),
                actor,
                occurred_at: now,
            });
            apply_stock_command(tx, &mut item, &command, actor, now)?;
            tx.reservations.update(reservation.clone())?;
            Ok(reservation)
        })?;

        info!(%tenant_id, %reservation_id, reason = reason.as_deref().unwrap_or(""), "reservation released");
        Ok(reservation)
    }

    /// Ship a reservation: on-hand and reserved both drop by its quantity.
    #[instrument(skip(self, reason))]
    pub fn consume(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        reservation_id: ReservationId,
        reason: Option<String>,
    ) -> ServiceResult<InventoryReservation> {
        let reservation = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            let mut reservation = tx
                .reservations
                .get(&reservation_id)
                .cloned()
                .ok_or_else(DomainError::not_found)?;
            reservation.consume(now)?;

            let mut item = load_item(tx, reservation.item_id())?;
            let command = InventoryCommand::ConsumeReservedStock(ConsumeReservedStock {
                tenant_id,
                item_id: item.id_typed(),
                reservation_id,
                location_id: reservation.location_id(),
                quantity: reservation.quantity(),
                reason: reason.clone(),
                actor,
                occurred_at: now,
            });
            apply_stock_command(tx, &mut item, &command, actor, now)?;
            tx.reservations.update(reservation.clone())?;
            Ok(reservation)
        })?;

        info!(%tenant_id, %reservation_id, reason = reason.as_deref().unwrap_or(""), "reservation consumed");
        Ok(reservation)
    }

    /// Codes are unique per tenant after trimming and upper-casing.
    #[instrument(skip(self))]
    pub fn create_location(&self, tenant_id: TenantId, code: &str, name: &str) -> ServiceResult<InventoryLocation> {
        let code = normalize_code(code)?;
        let location = self.store.transaction(tenant_id, |tx| {
            if tx.locations.iter().any(|l| l.code() == code) {
                return Err(DomainError::conflict(format!("location code '{code}' already exists")).into());
            }
            let location = InventoryLocation::create(LocationId::new(), tenant_id, &code, name, Utc::now())?;
            tx.locations.insert(location.clone())?;
            Ok(location)
        })?;

        info!(%tenant_id, location_id = %location.id_typed(), code = location.code(), "location created");
        Ok(location)
    }

    pub fn update_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
        update: LocationUpdate,
    ) -> ServiceResult<InventoryLocation> {
        self.store.transaction(tenant_id, |tx| {
            let mut location = tx
                .locations
                .get(&location_id)
                .cloned()
                .ok_or_else(DomainError::not_found)?;
            location.update(&update, Utc::now())?;
            tx.locations.update(location.clone())?;
            Ok(location)
        })
    }

    pub fn list_locations(&self, tenant_id: TenantId) -> ServiceResult<Vec<InventoryLocation>> {
        self.store.read(tenant_id, |t| t.locations.iter().cloned().collect())
    }

    /// Plan a cycle count of every item stocked at `location_id`, due
    /// `scheduled_for` or one day from now.
    #[instrument(skip(self))]
    pub fn schedule_cycle_count(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        location_id: LocationId,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> ServiceResult<InventoryCount> {
        let count = self.store.transaction(tenant_id, |tx| {
            if tx.locations.get(&location_id).is_none() {
                return Err(DomainError::not_found().into());
            }
            let total_items = tx
                .items
                .iter()
                .filter(|item| item.location(&location_id).is_some())
                .count();
            let count =
                InventoryCount::schedule_cycle(tenant_id, location_id, total_items, scheduled_for, actor, Utc::now())?;
            tx.counts.insert(count.clone())?;
            Ok(count)
        })?;

        info!(
            %tenant_id,
            %location_id,
            count_id = %count.id,
            total_items = count.total_items,
            scheduled_for = %count.scheduled_for,
            "cycle count scheduled"
        );
        Ok(count)
    }

    /// Scheduled counts, optionally of one location only, soonest first.
    pub fn list_counts(&self, tenant_id: TenantId, location_id: Option<LocationId>) -> ServiceResult<Vec<InventoryCount>> {
        let mut counts: Vec<InventoryCount> = self.store.read(tenant_id, |t| {
            t.counts
                .iter()
                .filter(|c| location_id.is_none_or(|id| id == c.location_id))
                .cloned()
                .collect()
        })?;
        counts.sort_by_key(|c| c.scheduled_for);
        Ok(counts)
    }

    pub fn get_item(&self, tenant_id: TenantId, product_id: ProductId) -> ServiceResult<InventoryItem> {
        self.store
            .read(tenant_id, |t| item_for_product(t, product_id))?
            .ok_or_else(|| DomainError::not_found().into())
    }

    pub fn list_items(&self, tenant_id: TenantId) -> ServiceResult<Vec<InventoryItem>> {
        self.store.read(tenant_id, |t| t.items.iter().cloned().collect())
    }

    pub fn get_reservation(&self, tenant_id: TenantId, reservation_id: ReservationId) -> ServiceResult<InventoryReservation> {
        self.store
            .read(tenant_id, |t| t.reservations.get(&reservation_id).cloned())?
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Reservations, optionally of one product only, oldest first.
    pub fn list_reservations(
        &self,
        tenant_id: TenantId,
        product_id: Option<ProductId>,
    ) -> ServiceResult<Vec<InventoryReservation>> {
        self.store.read(tenant_id, |t| {
            let item_id = product_id.map(|p| item_for_product(t, p).map(|i| i.id_typed()));
            t.reservations
                .iter()
                .filter(|r| item_id.is_none_or(|id| id == Some(r.item_id())))
                .cloned()
                .collect()
        })
    }

    /// Ledger lines, optionally of one product only, oldest first.
    pub fn list_movements(&self, tenant_id: TenantId, product_id: Option<ProductId>) -> ServiceResult<Vec<InventoryMovement>> {
        self.store.read(tenant_id, |t| {
            let item_id = product_id.map(|p| item_for_product(t, p).map(|i| i.id_typed()));
            t.movements
                .iter()
                .filter(|m| item_id.is_none_or(|id| id == Some(m.item_id)))
                .cloned()
                .collect()
        })
    }

    pub fn list_alerts(&self, tenant_id: TenantId, include_resolved: bool) -> ServiceResult<Vec<StockAlert>> {
        self.store.read(tenant_id, |t| {
            t.alerts
                .iter()
                .filter(|a| include_resolved || !a.resolved)
                .cloned()
                .collect()
        })
    }

    /// Load an item's balances as recorded by another system, as is.
    ///
    /// Nothing is validated against the ledger; a reconciliation run will
    /// detect any drift.
    #[instrument(skip(self, snapshot), fields(item_id = %snapshot.id))]
    pub fn import_item(&self, tenant_id: TenantId, snapshot: InventoryItemSnapshot) -> ServiceResult<InventoryItem> {
        if snapshot.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found().into());
        }
        let item = InventoryItem::restore(snapshot);
        self.store.transaction(tenant_id, |tx| {
            tx.items.upsert(item.clone())?;
            Ok(())
        })?;
        debug!(%tenant_id, item_id = %item.id_typed(), "inventory item imported");
        Ok(item)
    }
}
