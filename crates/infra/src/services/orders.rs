//! Order stage coordination: syncing the accepted quote into the order and
//! gating manual stage advancement.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use etchforge_core::{Currency, CustomerId, DomainError, OrderId, TenantId, UserId};
use etchforge_events::{EventBus, EventEnvelope};
use etchforge_negotiation::{Quote, QuoteStatus};
use etchforge_orders::{
    AdvanceStage, Order, OrderCommand, OrderStatus, PlaceOrder, RevertToSourcing,
    SyncFromAcceptedQuote,
};

use super::{entity_type, execute};
use crate::error::ServiceResult;
use crate::store::{InMemoryStore, Transaction};

/// An order handed over by the order-entry system.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub order_number: String,
    pub currency: Currency,
    pub status: OrderStatus,
}

pub(crate) fn load_order(tx: &Transaction<'_>, order_id: OrderId) -> ServiceResult<Order> {
    Ok(tx
        .orders
        .get(&order_id)
        .cloned()
        .ok_or_else(DomainError::not_found)?)
}

fn accepted_quote_count(tx: &Transaction<'_>, order_id: OrderId) -> usize {
    tx.quotes
        .iter()
        .filter(|q| q.order_id() == Some(order_id) && q.status() == QuoteStatus::Accepted)
        .count()
}

/// Copy the accepted quote's commercial terms onto its order and move the
/// order to `customer_quote`.
pub(crate) fn sync_from_accepted_quote(
    tx: &mut Transaction<'_>,
    quote: &Quote,
    actor: UserId,
    now: DateTime<Utc>,
) -> ServiceResult<Order> {
    let (Some(order_id), Some(vendor_id)) = (quote.order_id(), quote.vendor_id()) else {
        return Err(DomainError::invariant("accepted quote has no order or vendor").into());
    };

    let mut order = load_order(tx, order_id)?;
    let command = OrderCommand::SyncFromAcceptedQuote(SyncFromAcceptedQuote {
        tenant_id: tx.tenant_id(),
        order_id,
        quote_id: quote.id_typed(),
        vendor_id,
        latest_offer: quote.latest_offer(),
        terms: quote.terms().clone(),
        actor,
        occurred_at: now,
    });
    execute(tx, |t| &mut t.orders, entity_type::ORDER, &mut order, &command)?;
    Ok(order)
}

/// Move an order that is still being sourced back to `vendor_sourcing`.
pub(crate) fn revert_to_sourcing(
    tx: &mut Transaction<'_>,
    order_id: OrderId,
    actor: UserId,
    now: DateTime<Utc>,
) -> ServiceResult<Order> {
    let mut order = load_order(tx, order_id)?;
    let command = OrderCommand::RevertToSourcing(RevertToSourcing {
        tenant_id: tx.tenant_id(),
        order_id,
        actor,
        occurred_at: now,
    });
    execute(tx, |t| &mut t.orders, entity_type::ORDER, &mut order, &command)?;
    Ok(order)
}

/// Validate and apply a stage transition inside an open transaction.
pub(crate) fn advance_stage(
    tx: &mut Transaction<'_>,
    order_id: OrderId,
    target: OrderStatus,
    note: Option<String>,
    actor: UserId,
    now: DateTime<Utc>,
) -> ServiceResult<Order> {
    let mut order = load_order(tx, order_id)?;
    let command = OrderCommand::AdvanceStage(AdvanceStage {
        tenant_id: tx.tenant_id(),
        order_id,
        target,
        accepted_quote_count: accepted_quote_count(tx, order_id),
        note,
        actor,
        occurred_at: now,
    });
    execute(tx, |t| &mut t.orders, entity_type::ORDER, &mut order, &command)?;
    Ok(order)
}

pub struct OrderStageCoordinator<B> {
    store: Arc<InMemoryStore<B>>,
}

impl<B> OrderStageCoordinator<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(store: Arc<InMemoryStore<B>>) -> Self {
        Self { store }
    }

    /// Bring an order into the negotiation slice.
    #[instrument(skip(self, order), fields(order_number = %order.order_number))]
    pub fn place_order(&self, tenant_id: TenantId, actor: UserId, order: NewOrder) -> ServiceResult<Order> {
        let order_id = OrderId::new();
        let placed = self.store.transaction(tenant_id, |tx| {
            let mut aggregate = Order::empty(order_id);
            let command = OrderCommand::PlaceOrder(PlaceOrder {
                tenant_id,
                order_id,
                customer_id: order.customer_id,
                order_number: order.order_number.clone(),
                currency: order.currency,
                status: order.status,
                actor,
                occurred_at: Utc::now(),
            });
            execute(tx, |t| &mut t.orders, entity_type::ORDER, &mut aggregate, &command)?;
            Ok(aggregate)
        })?;

        info!(%tenant_id, %order_id, status = %placed.status(), "order placed");
        Ok(placed)
    }

    pub fn get_order(&self, tenant_id: TenantId, order_id: OrderId) -> ServiceResult<Order> {
        self.store
            .read(tenant_id, |t| t.orders.get(&order_id).cloned())?
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Manually move an order to `target`.
    #[instrument(skip(self, note))]
    pub fn advance_stage(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        target: OrderStatus,
        actor: UserId,
        note: Option<String>,
    ) -> ServiceResult<Order> {
        let order = self.store.transaction(tenant_id, |tx| {
            advance_stage(tx, order_id, target, note, actor, Utc::now())
        })?;

        info!(%tenant_id, %order_id, status = %order.status(), "order stage advanced");
        Ok(order)
    }

    /// Stages the order may be moved to from its current status.
    pub fn available_transitions(&self, tenant_id: TenantId, order_id: OrderId) -> ServiceResult<Vec<OrderStatus>> {
        let order = self.get_order(tenant_id, order_id)?;
        Ok(order.available_transitions().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etchforge_events::InMemoryEventBus;

    use crate::error::ServiceError;

    fn coordinator() -> OrderStageCoordinator<Arc<InMemoryEventBus<EventEnvelope>>> {
        OrderStageCoordinator::new(Arc::new(InMemoryStore::new(Arc::new(InMemoryEventBus::new()))))
    }

    fn new_order(status: OrderStatus) -> NewOrder {
        NewOrder {
            customer_id: CustomerId::new(),
            order_number: "ORD-2001".to_string(),
            currency: Currency::USD,
            status,
        }
    }

    #[test]
    fn advance_follows_the_status_machine() {
        let coordinator = coordinator();
        let tenant_id = TenantId::new();
        let actor = UserId::new();
        let order = coordinator
            .place_order(tenant_id, actor, new_order(OrderStatus::Pending))
            .unwrap();

        let moved = coordinator
            .advance_stage(tenant_id, order.id_typed(), OrderStatus::VendorSourcing, actor, None)
            .unwrap();
        assert_eq!(moved.status(), OrderStatus::VendorSourcing);
        assert_eq!(moved.status_history().len(), 2);

        let err = coordinator
            .advance_stage(tenant_id, order.id_typed(), OrderStatus::Shipping, actor, None)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation { ref field, .. }) if field == "status"));
    }

    #[test]
    fn customer_quote_requires_an_accepted_quote() {
        let coordinator = coordinator();
        let tenant_id = TenantId::new();
        let actor = UserId::new();
        let order = coordinator
            .place_order(tenant_id, actor, new_order(OrderStatus::VendorNegotiation))
            .unwrap();

        let err = coordinator
            .advance_stage(tenant_id, order.id_typed(), OrderStatus::CustomerQuote, actor, None)
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Domain(DomainError::Validation { ref field, .. }) if field == "vendor_negotiation"
        ));
        assert_eq!(
            coordinator.get_order(tenant_id, order.id_typed()).unwrap().status(),
            OrderStatus::VendorNegotiation
        );
    }

    #[test]
    fn foreign_orders_are_not_found() {
        let coordinator = coordinator();
        let owner = TenantId::new();
        let order = coordinator
            .place_order(owner, UserId::new(), new_order(OrderStatus::Pending))
            .unwrap();

        let other = TenantId::new();
        assert_eq!(
            coordinator.get_order(other, order.id_typed()).unwrap_err(),
            ServiceError::Domain(DomainError::NotFound)
        );
        assert!(coordinator.available_transitions(other, order.id_typed()).is_err());
        assert_eq!(
            coordinator.available_transitions(owner, order.id_typed()).unwrap(),
            vec![OrderStatus::VendorSourcing, OrderStatus::Cancelled]
        );
    }
}
