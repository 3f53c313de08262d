//! Transactional in-memory store.
//!
//! State is partitioned per tenant. A transaction holds its tenant partition's
//! mutex from first read to commit, which covers every row a relational backend
//! would lock with `SELECT … FOR UPDATE`. Writes are journaled per table: an
//! `Err` from the transaction body undoes all of them.
//!
//! Events recorded during a transaction are buffered and only wrapped in
//! envelopes (with the tenant's next sequence numbers) and published once the
//! transaction has committed. A bus failure at that point cannot undo the
//! commit: the envelope stays in the tenant's outbox until `redeliver`.

pub mod catalog;
pub mod table;

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use etchforge_core::TenantId;
use etchforge_events::{Event, EventBus, EventEnvelope};
use etchforge_inventory::{
    InventoryCount, InventoryItem, InventoryLocation, InventoryMovement, InventoryReconciliation,
    InventoryReservation, StockAlert,
};
use etchforge_negotiation::Quote;
use etchforge_orders::Order;

use crate::error::{ServiceResult, StoreError};

pub use catalog::{ProductRecord, VendorRecord};
pub use table::{RowKey, Table};

/// Every table of one tenant.
#[derive(Debug)]
pub struct TenantTables {
    pub vendors: Table<VendorRecord>,
    pub products: Table<ProductRecord>,
    pub orders: Table<Order>,
    pub quotes: Table<Quote>,
    pub locations: Table<InventoryLocation>,
    pub items: Table<InventoryItem>,
    pub reservations: Table<InventoryReservation>,
    pub movements: Table<InventoryMovement>,
    pub alerts: Table<StockAlert>,
    pub reconciliations: Table<InventoryReconciliation>,
    pub counts: Table<InventoryCount>,
    next_sequence: u64,
    /// Committed envelopes the bus refused, oldest first. Not journaled.
    undelivered: Vec<EventEnvelope>,
}

impl TenantTables {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            vendors: Table::new("vendors", tenant_id),
            products: Table::new("products", tenant_id),
            orders: Table::new("orders", tenant_id),
            quotes: Table::new("quotes", tenant_id),
            locations: Table::new("inventory_locations", tenant_id),
            items: Table::new("inventory_items", tenant_id),
            reservations: Table::new("inventory_reservations", tenant_id),
            movements: Table::new("inventory_movements", tenant_id),
            alerts: Table::new("inventory_alerts", tenant_id),
            reconciliations: Table::new("inventory_reconciliations", tenant_id),
            counts: Table::new("inventory_counts", tenant_id),
            next_sequence: 1,
            undelivered: Vec::new(),
        }
    }

    fn commit(&mut self) {
        self.vendors.commit();
        self.products.commit();
        self.orders.commit();
        self.quotes.commit();
        self.locations.commit();
        self.items.commit();
        self.reservations.commit();
        self.movements.commit();
        self.alerts.commit();
        self.reconciliations.commit();
        self.counts.commit();
    }

    fn rollback(&mut self) {
        self.vendors.rollback();
        self.products.rollback();
        self.orders.rollback();
        self.quotes.rollback();
        self.locations.rollback();
        self.items.rollback();
        self.reservations.rollback();
        self.movements.rollback();
        self.alerts.rollback();
        self.reconciliations.rollback();
        self.counts.rollback();
    }
}

#[derive(Debug)]
struct PendingEvent {
    entity_id: Uuid,
    entity_type: &'static str,
    event_type: &'static str,
    occurred_at: DateTime<Utc>,
    payload: serde_json::Value,
}

/// An open transaction on one tenant partition.
///
/// Dereferences to the partition's tables.
pub struct Transaction<'a> {
    tenant_id: TenantId,
    tables: &'a mut TenantTables,
    pending: Vec<PendingEvent>,
}

impl Transaction<'_> {
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Buffer `event` for publication after commit.
    pub fn record<E>(&mut self, entity_type: &'static str, entity_id: Uuid, event: &E) -> Result<(), StoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| StoreError::Encode(e.to_string()))?;
        self.pending.push(PendingEvent {
            entity_id,
            entity_type,
            event_type: event.event_type(),
            occurred_at: event.occurred_at(),
            payload,
        });
        Ok(())
    }

    pub fn record_all<'e, E>(
        &mut self,
        entity_type: &'static str,
        entity_id: Uuid,
        events: impl IntoIterator<Item = &'e E>,
    ) -> Result<(), StoreError>
    where
        E: Event + Serialize + 'e,
    {
        for event in events {
            self.record(entity_type, entity_id, event)?;
        }
        Ok(())
    }
}

impl Deref for Transaction<'_> {
    type Target = TenantTables;

    fn deref(&self) -> &Self::Target {
        self.tables
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tables
    }
}

/// Tenant-partitioned in-memory store that publishes committed events to `B`.
#[derive(Debug)]
pub struct InMemoryStore<B> {
    partitions: RwLock<HashMap<TenantId, Arc<Mutex<TenantTables>>>>,
    bus: B,
}

impl<B> InMemoryStore<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    fn partition(&self, tenant_id: TenantId) -> Result<Arc<Mutex<TenantTables>>, StoreError> {
        {
            let partitions = self.partitions.read().map_err(|_| StoreError::Poisoned)?;
            if let Some(p) = partitions.get(&tenant_id) {
                return Ok(p.clone());
            }
        }

        let mut partitions = self.partitions.write().map_err(|_| StoreError::Poisoned)?;
        Ok(partitions
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(TenantTables::new(tenant_id))))
            .clone())
    }

    fn lock<'a>(
        tenant_id: TenantId,
        partition: &'a Mutex<TenantTables>,
    ) -> MutexGuard<'a, TenantTables> {
        match partition.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A transaction body panicked while holding the lock; undo its writes.
                warn!(%tenant_id, "recovering poisoned tenant partition");
                let mut guard = poisoned.into_inner();
                guard.rollback();
                partition.clear_poison();
                guard
            }
        }
    }

    /// Run `body` as one isolated transaction on the tenant's partition.
    ///
    /// `Ok` commits and publishes the recorded events; `Err` rolls back every
    /// write and discards them. Once committed the result is always returned,
    /// even if the bus refuses some of the events.
    pub fn transaction<T>(
        &self,
        tenant_id: TenantId,
        body: impl FnOnce(&mut Transaction<'_>) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let partition = self.partition(tenant_id)?;
        let mut guard = Self::lock(tenant_id, &partition);

        let mut tx = Transaction {
            tenant_id,
            tables: &mut *guard,
            pending: Vec::new(),
        };
        let result = body(&mut tx);
        let pending = std::mem::take(&mut tx.pending);

        match result {
            Ok(value) => {
                guard.commit();
                let envelopes = Self::seal(tenant_id, &mut guard, pending);
                debug!(%tenant_id, events = envelopes.len(), "transaction committed");

                // Published under the partition lock so subscribers see sequence order.
                self.deliver(tenant_id, &mut guard, envelopes);
                Ok(value)
            }
            Err(err) => {
                guard.rollback();
                debug!(%tenant_id, error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Publish the tenant's undelivered envelopes again, oldest first.
    ///
    /// Returns how many are still undelivered afterwards.
    pub fn redeliver(&self, tenant_id: TenantId) -> ServiceResult<usize> {
        let partition = self.partition(tenant_id)?;
        let mut guard = Self::lock(tenant_id, &partition);

        let outbox = std::mem::take(&mut guard.undelivered);
        let attempted = outbox.len();
        self.deliver(tenant_id, &mut guard, outbox);

        let remaining = guard.undelivered.len();
        if attempted > 0 {
            info!(%tenant_id, attempted, remaining, "redelivered outbox events");
        }
        Ok(remaining)
    }

    /// Committed envelopes still waiting for the bus.
    pub fn undelivered(&self, tenant_id: TenantId) -> ServiceResult<Vec<EventEnvelope>> {
        self.read(tenant_id, |t| t.undelivered.clone())
    }

    fn deliver(&self, tenant_id: TenantId, tables: &mut TenantTables, envelopes: Vec<EventEnvelope>) {
        for envelope in envelopes {
            if let Err(e) = self.bus.publish(envelope.clone()) {
                error!(
                    %tenant_id,
                    sequence_number = envelope.sequence_number(),
                    event_type = envelope.event_type(),
                    error = %e,
                    "event publication failed; kept for redelivery"
                );
                tables.undelivered.push(envelope);
            }
        }
    }

    /// Read-only access to the tenant's tables under the partition lock.
    pub fn read<T>(&self, tenant_id: TenantId, f: impl FnOnce(&TenantTables) -> T) -> ServiceResult<T> {
        let partition = self.partition(tenant_id)?;
        let guard = Self::lock(tenant_id, &partition);
        Ok(f(&guard))
    }

    fn seal(
        tenant_id: TenantId,
        tables: &mut TenantTables,
        pending: Vec<PendingEvent>,
    ) -> Vec<EventEnvelope> {
        pending
            .into_iter()
            .map(|p| {
                let sequence_number = tables.next_sequence;
                tables.next_sequence += 1;
                EventEnvelope::new(
                    Uuid::now_v7(),
                    tenant_id,
                    p.entity_id,
                    p.entity_type,
                    sequence_number,
                    p.event_type,
                    p.occurred_at,
                    p.payload,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use etchforge_core::{DomainError, VendorId};
    use etchforge_events::{InMemoryEventBus, Subscription};

    use crate::error::ServiceError;

    type Bus = Arc<InMemoryEventBus<EventEnvelope>>;

    fn store() -> InMemoryStore<Bus> {
        InMemoryStore::new(Arc::new(InMemoryEventBus::new()))
    }

    fn vendor(tenant_id: TenantId) -> VendorRecord {
        VendorRecord {
            id: VendorId::new(),
            tenant_id,
            code: "V-01".to_string(),
            name: "Laser Works".to_string(),
        }
    }

    #[derive(Debug, Clone, Serialize)]
    struct Touched {
        at: DateTime<Utc>,
    }

    impl Event for Touched {
        fn event_type(&self) -> &'static str {
            "test.touched"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn failed_transaction_rolls_back_and_publishes_nothing() {
        let store = store();
        let subscription = store.bus().subscribe();
        let tenant_id = TenantId::new();
        let v = vendor(tenant_id);

        let result: ServiceResult<()> = store.transaction(tenant_id, |tx| {
            tx.vendors.insert(v.clone())?;
            tx.record("vendor", *v.id.as_uuid(), &Touched { at: Utc::now() })?;
            Err(DomainError::invariant("abort").into())
        });

        assert!(result.is_err());
        assert!(store.read(tenant_id, |t| t.vendors.is_empty()).unwrap());
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn committed_events_get_increasing_sequence_numbers() {
        let store = store();
        let subscription = store.bus().subscribe();
        let tenant_id = TenantId::new();

        for _ in 0..2 {
            store
                .transaction(tenant_id, |tx| {
                    let v = vendor(tenant_id);
                    tx.vendors.insert(v.clone())?;
                    tx.record("vendor", *v.id.as_uuid(), &Touched { at: Utc::now() })?;
                    Ok(())
                })
                .unwrap();
        }

        let sequence: Vec<u64> = subscription.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(sequence, vec![1, 2]);
    }

    /// Bus that refuses every message while `down` is set.
    struct FlakyBus {
        inner: InMemoryEventBus<EventEnvelope>,
        down: AtomicBool,
    }

    impl EventBus<EventEnvelope> for FlakyBus {
        type Error = String;

        fn publish(&self, message: EventEnvelope) -> Result<(), Self::Error> {
            if self.down.load(Ordering::SeqCst) {
                return Err("bus unavailable".to_string());
            }
            self.inner.publish(message).map_err(|e| e.to_string())
        }

        fn subscribe(&self) -> Subscription<EventEnvelope> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn bus_failure_keeps_the_commit_and_queues_the_events() {
        let bus = Arc::new(FlakyBus {
            inner: InMemoryEventBus::new(),
            down: AtomicBool::new(true),
        });
        let store = InMemoryStore::new(bus.clone());
        let subscription = store.bus().subscribe();
        let tenant_id = TenantId::new();
        let v = vendor(tenant_id);

        let result: ServiceResult<VendorId> = store.transaction(tenant_id, |tx| {
            tx.vendors.insert(v.clone())?;
            tx.record("vendor", *v.id.as_uuid(), &Touched { at: Utc::now() })?;
            tx.record("vendor", *v.id.as_uuid(), &Touched { at: Utc::now() })?;
            Ok(v.id)
        });

        assert_eq!(result.unwrap(), v.id);
        assert_eq!(store.read(tenant_id, |t| t.vendors.len()).unwrap(), 1);
        assert!(subscription.drain().is_empty());
        let queued: Vec<u64> = store
            .undelivered(tenant_id)
            .unwrap()
            .iter()
            .map(|e| e.sequence_number())
            .collect();
        assert_eq!(queued, vec![1, 2]);

        assert_eq!(store.redeliver(tenant_id).unwrap(), 2);

        bus.down.store(false, Ordering::SeqCst);
        assert_eq!(store.redeliver(tenant_id).unwrap(), 0);
        let delivered: Vec<u64> = subscription.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(delivered, vec![1, 2]);
        assert!(store.undelivered(tenant_id).unwrap().is_empty());
        assert_eq!(store.read(tenant_id, |t| t.vendors.len()).unwrap(), 1);
    }

    #[test]
    fn partitions_are_isolated() {
        let store = store();
        let a = TenantId::new();
        let b = TenantId::new();
        let v = vendor(a);

        store
            .transaction(a, |tx| {
                tx.vendors.insert(v.clone())?;
                Ok(())
            })
            .unwrap();

        assert!(store.read(b, |t| t.vendors.get(&v.id).is_none()).unwrap());
        let cross: ServiceResult<()> = store.transaction(b, |tx| {
            tx.vendors.insert(v.clone())?;
            Ok(())
        });
        assert_eq!(
            cross.unwrap_err(),
            ServiceError::Store(StoreError::TenantMismatch { table: "vendors" })
        );
    }

    #[test]
    fn panicking_transaction_is_undone_on_next_lock() {
        let store = Arc::new(store());
        let tenant_id = TenantId::new();
        let v = vendor(tenant_id);

        let s = store.clone();
        let v2 = v.clone();
        let _ = std::thread::spawn(move || {
            let _: ServiceResult<()> = s.transaction(tenant_id, |tx| {
                tx.vendors.insert(v2)?;
                panic!("body failed");
            });
        })
        .join();

        assert!(store.read(tenant_id, |t| t.vendors.get(&v.id).is_none()).unwrap());
    }
}
