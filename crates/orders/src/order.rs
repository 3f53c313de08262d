use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etchforge_core::{
    Aggregate, AggregateRoot, Currency, CustomerId, DomainError, DomainResult, Entity, Money,
    OrderId, TenantId, UserId, VendorId,
};
use etchforge_events::Event;
use etchforge_negotiation::{QuoteId, QuoteTerms};

use crate::status::OrderStatus;

/// Customer quotation = vendor price × 135 / 100, floored.
pub const MARKUP_NUMERATOR: i64 = 135;
pub const MARKUP_DENOMINATOR: i64 = 100;

/// Quotation amount shown to the customer for a vendor price.
pub fn quotation_amount_for(vendor_price: Money) -> DomainResult<Money> {
    vendor_price.scale_floor(MARKUP_NUMERATOR, MARKUP_DENOMINATOR)
}

/// One entry of the order's status audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub from: Option<OrderStatus>,
    pub to: OrderStatus,
    pub actor: UserId,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
}

/// Aggregate root: Order (negotiation slice).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    tenant_id: Option<TenantId>,
    customer_id: Option<CustomerId>,
    order_number: String,
    currency: Currency,
    status: OrderStatus,
    vendor_id: Option<VendorId>,
    vendor_quoted_price: Option<Money>,
    vendor_terms: Option<QuoteTerms>,
    quotation_amount: Option<Money>,
    accepted_quote_id: Option<QuoteId>,
    status_history: Vec<StatusHistoryEntry>,
    updated_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            customer_id: None,
            order_number: String::new(),
            currency: Currency::USD,
            status: OrderStatus::New,
            vendor_id: None,
            vendor_quoted_price: None,
            vendor_terms: None,
            quotation_amount: None,
            accepted_quote_id: None,
            status_history: Vec::new(),
            updated_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> Option<CustomerId> {
        self.customer_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn vendor_quoted_price(&self) -> Option<Money> {
        self.vendor_quoted_price
    }

    pub fn vendor_terms(&self) -> Option<&QuoteTerms> {
        self.vendor_terms.as_ref()
    }

    pub fn quotation_amount(&self) -> Option<Money> {
        self.quotation_amount
    }

    pub fn accepted_quote_id(&self) -> Option<QuoteId> {
        self.accepted_quote_id
    }

    pub fn status_history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Statuses a manual `AdvanceStage` may target from the current one.
    pub fn available_transitions(&self) -> &'static [OrderStatus] {
        self.status.allowed_transitions()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

/// Command: PlaceOrder. Orders are created by the order-entry system; this is
/// how they enter the negotiation slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub order_number: String,
    pub currency: Currency,
    pub status: OrderStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SyncFromAcceptedQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFromAcceptedQuote {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub quote_id: QuoteId,
    pub vendor_id: VendorId,
    pub latest_offer: Money,
    pub terms: QuoteTerms,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceStage.
///
/// `accepted_quote_count` is the number of accepted quotes for this order,
/// counted by the caller in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceStage {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub target: OrderStatus,
    pub accepted_quote_count: usize,
    pub note: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevertToSourcing (every quote of the order was rejected).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertToSourcing {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    SyncFromAcceptedQuote(SyncFromAcceptedQuote),
    AdvanceStage(AdvanceStage),
    RevertToSourcing(RevertToSourcing),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub order_number: String,
    pub currency: Currency,
    pub status: OrderStatus,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderSyncedFromQuote. Carries the before/after commercial fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSyncedFromQuote {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub quote_id: QuoteId,
    pub previous_vendor_id: Option<VendorId>,
    pub vendor_id: VendorId,
    pub vendor_quoted_price: Money,
    pub vendor_terms: QuoteTerms,
    pub quotation_amount: Money,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusChanged {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub note: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderSyncedFromQuote(OrderSyncedFromQuote),
    OrderStatusChanged(OrderStatusChanged),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderSyncedFromQuote(_) => "orders.order.synced_from_quote",
            OrderEvent::OrderStatusChanged(_) => "orders.order.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderSyncedFromQuote(e) => e.occurred_at,
            OrderEvent::OrderStatusChanged(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.customer_id = Some(e.customer_id);
                self.order_number = e.order_number.clone();
                self.currency = e.currency;
                self.status = e.status;
                self.status_history.push(StatusHistoryEntry {
                    from: None,
                    to: e.status,
                    actor: e.actor,
                    note: None,
                    at: e.occurred_at,
                });
                self.created = true;
            }
            OrderEvent::OrderSyncedFromQuote(e) => {
                self.vendor_id = Some(e.vendor_id);
                self.vendor_quoted_price = Some(e.vendor_quoted_price);
                self.vendor_terms = Some(e.vendor_terms.clone());
                self.quotation_amount = Some(e.quotation_amount);
                self.accepted_quote_id = Some(e.quote_id);
            }
            OrderEvent::OrderStatusChanged(e) => {
                self.status = e.to;
                self.status_history.push(StatusHistoryEntry {
                    from: Some(e.from),
                    to: e.to,
                    actor: e.actor,
                    note: e.note.clone(),
                    at: e.occurred_at,
                });
            }
        }

        self.updated_at = Some(Event::occurred_at(event));
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::SyncFromAcceptedQuote(cmd) => self.handle_sync(cmd),
            OrderCommand::AdvanceStage(cmd) => self.handle_advance(cmd),
            OrderCommand::RevertToSourcing(cmd) => self.handle_revert(cmd),
        }
    }
}

impl Order {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn status_changed(
        &self,
        tenant_id: TenantId,
        to: OrderStatus,
        note: Option<String>,
        actor: UserId,
        occurred_at: DateTime<Utc>,
    ) -> OrderEvent {
        OrderEvent::OrderStatusChanged(OrderStatusChanged {
            tenant_id,
            order_id: self.id,
            from: self.status,
            to,
            note,
            actor,
            occurred_at,
        })
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;

        let order_number = cmd.order_number.trim();
        if order_number.is_empty() {
            return Err(DomainError::validation("order_number", "must not be empty"));
        }

        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            customer_id: cmd.customer_id,
            order_number: order_number.to_string(),
            currency: cmd.currency,
            status: cmd.status,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_sync(&self, cmd: &SyncFromAcceptedQuote) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.status.is_sourcing() {
            return Err(DomainError::invalid_transition(format!(
                "order in status '{}' can no longer take a vendor quote",
                self.status
            )));
        }

        let vendor_quoted_price = cmd.latest_offer.ensure_currency(self.currency)?;
        let quotation_amount = quotation_amount_for(vendor_quoted_price)?;

        let mut events = vec![OrderEvent::OrderSyncedFromQuote(OrderSyncedFromQuote {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            quote_id: cmd.quote_id,
            previous_vendor_id: self.vendor_id,
            vendor_id: cmd.vendor_id,
            vendor_quoted_price,
            vendor_terms: cmd.terms.clone(),
            quotation_amount,
            occurred_at: cmd.occurred_at,
        })];
        events.push(self.status_changed(
            cmd.tenant_id,
            OrderStatus::CustomerQuote,
            Some("vendor quote accepted".to_string()),
            cmd.actor,
            cmd.occurred_at,
        ));
        Ok(events)
    }

    fn handle_advance(&self, cmd: &AdvanceStage) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if cmd.target == self.status {
            return Err(DomainError::validation(
                "status",
                format!("order is already in status '{}'", self.status),
            ));
        }
        if !self.status.can_transition_to(cmd.target) {
            return Err(DomainError::validation(
                "status",
                format!("cannot transition from '{}' to '{}'", self.status, cmd.target),
            ));
        }

        if self.status == OrderStatus::VendorNegotiation && cmd.target == OrderStatus::CustomerQuote
        {
            match cmd.accepted_quote_count {
                0 => {
                    return Err(DomainError::validation(
                        "vendor_negotiation",
                        "No accepted vendor quote found. Please accept a quote before advancing.",
                    ));
                }
                1 => {}
                n => {
                    return Err(DomainError::invariant(format!(
                        "order has {n} accepted vendor quotes"
                    )));
                }
            }
            if self.vendor_quoted_price.is_none() || self.quotation_amount.is_none() {
                return Err(DomainError::validation(
                    "vendor_negotiation",
                    "Order is missing required data (vendor quoted price and quotation amount). Please re-accept the vendor quote.",
                ));
            }
        }

        Ok(vec![self.status_changed(
            cmd.tenant_id,
            cmd.target,
            cmd.note.clone(),
            cmd.actor,
            cmd.occurred_at,
        )])
    }

    /// No-op unless the order is still being sourced; an order that has moved
    /// past negotiation keeps its status.
    fn handle_revert(&self, cmd: &RevertToSourcing) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_order_id(cmd.order_id)?;

        if !self.status.is_sourcing() || self.status == OrderStatus::VendorSourcing {
            return Ok(Vec::new());
        }

        Ok(vec![self.status_changed(
            cmd.tenant_id,
            OrderStatus::VendorSourcing,
            Some("all vendor quotes rejected".to_string()),
            cmd.actor,
            cmd.occurred_at,
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn usd(amount: i64) -> Money {
        Money::new(amount, Currency::USD)
    }

    fn placed(tenant_id: TenantId, status: OrderStatus) -> Order {
        let order_id = OrderId::new();
        let mut order = Order::empty(order_id);
        order
            .execute(&OrderCommand::PlaceOrder(PlaceOrder {
                tenant_id,
                order_id,
                customer_id: CustomerId::new(),
                order_number: "ORD-1001".to_string(),
                currency: Currency::USD,
                status,
                actor: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order
    }

    fn sync(order: &Order, tenant_id: TenantId, offer: Money) -> OrderCommand {
        OrderCommand::SyncFromAcceptedQuote(SyncFromAcceptedQuote {
            tenant_id,
            order_id: order.id_typed(),
            quote_id: QuoteId::new(),
            vendor_id: VendorId::new(),
            latest_offer: offer,
            terms: QuoteTerms::default(),
            actor: UserId::new(),
            occurred_at: test_time(),
        })
    }

    fn advance(order: &Order, tenant_id: TenantId, target: OrderStatus, accepted: usize) -> OrderCommand {
        OrderCommand::AdvanceStage(AdvanceStage {
            tenant_id,
            order_id: order.id_typed(),
            target,
            accepted_quote_count: accepted,
            note: None,
            actor: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn sync_copies_quote_and_applies_markup() {
        let tenant_id = test_tenant_id();
        let mut order = placed(tenant_id, OrderStatus::VendorNegotiation);

        let events = order.execute(&sync(&order, tenant_id, usd(4_500_000))).unwrap();
        assert_eq!(events.len(), 2);

        assert_eq!(order.vendor_quoted_price(), Some(usd(4_500_000)));
        assert_eq!(order.quotation_amount(), Some(usd(6_075_000)));
        assert_eq!(order.status(), OrderStatus::CustomerQuote);
        assert!(order.vendor_id().is_some());
        assert!(order.accepted_quote_id().is_some());

        let last = order.status_history().last().unwrap();
        assert_eq!(last.from, Some(OrderStatus::VendorNegotiation));
        assert_eq!(last.to, OrderStatus::CustomerQuote);
    }

    #[test]
    fn sync_rejects_foreign_currency() {
        let tenant_id = test_tenant_id();
        let order = placed(tenant_id, OrderStatus::VendorNegotiation);
        let eur = Money::new(100, Currency::new("EUR").unwrap());

        let err = order.handle(&sync(&order, tenant_id, eur)).unwrap_err();
        assert!(matches!(err, DomainError::CurrencyMismatch { .. }));
    }

    #[test]
    fn sync_after_negotiation_is_invalid() {
        let tenant_id = test_tenant_id();
        let order = placed(tenant_id, OrderStatus::AwaitingPayment);

        let err = order.handle(&sync(&order, tenant_id, usd(10))).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn advance_to_customer_quote_requires_accepted_quote() {
        let tenant_id = test_tenant_id();
        let order = placed(tenant_id, OrderStatus::VendorNegotiation);

        let err = order
            .handle(&advance(&order, tenant_id, OrderStatus::CustomerQuote, 0))
            .unwrap_err();
        match err {
            DomainError::Validation { field, message } if field == "vendor_negotiation" => {
                assert_eq!(
                    message,
                    "No accepted vendor quote found. Please accept a quote before advancing."
                );
            }
            _ => panic!("Expected Validation error for missing accepted quote"),
        }
    }

    #[test]
    fn advance_to_customer_quote_requires_synced_fields() {
        let tenant_id = test_tenant_id();
        let order = placed(tenant_id, OrderStatus::VendorNegotiation);

        let err = order
            .handle(&advance(&order, tenant_id, OrderStatus::CustomerQuote, 1))
            .unwrap_err();
        match err {
            DomainError::Validation { field, message } if field == "vendor_negotiation" => {
                assert!(message.contains("missing required data"));
            }
            _ => panic!("Expected Validation error for missing data"),
        }
    }

    #[test]
    fn advance_with_two_accepted_quotes_is_inconsistent() {
        let tenant_id = test_tenant_id();
        let order = placed(tenant_id, OrderStatus::VendorNegotiation);

        let err = order
            .handle(&advance(&order, tenant_id, OrderStatus::CustomerQuote, 2))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn advance_rejects_unsupported_and_same_status_targets() {
        let tenant_id = test_tenant_id();
        let order = placed(tenant_id, OrderStatus::Pending);

        for target in [OrderStatus::Pending, OrderStatus::Shipping] {
            let err = order.handle(&advance(&order, tenant_id, target, 0)).unwrap_err();
            match err {
                DomainError::Validation { field, .. } if field == "status" => {}
                _ => panic!("Expected Validation error for target {target}"),
            }
        }
    }

    #[test]
    fn advance_records_status_history() {
        let tenant_id = test_tenant_id();
        let mut order = placed(tenant_id, OrderStatus::Pending);

        order
            .execute(&advance(&order, tenant_id, OrderStatus::VendorSourcing, 0))
            .unwrap();
        assert_eq!(order.status(), OrderStatus::VendorSourcing);
        assert_eq!(order.status_history().len(), 2);
        assert_eq!(order.version(), 2);
    }

    #[test]
    fn revert_to_sourcing_only_while_negotiating() {
        let tenant_id = test_tenant_id();
        let revert = |order: &Order| {
            OrderCommand::RevertToSourcing(RevertToSourcing {
                tenant_id,
                order_id: order.id_typed(),
                actor: UserId::new(),
                occurred_at: test_time(),
            })
        };

        let mut negotiating = placed(tenant_id, OrderStatus::VendorNegotiation);
        negotiating.execute(&revert(&negotiating)).unwrap();
        assert_eq!(negotiating.status(), OrderStatus::VendorSourcing);

        let quoted = placed(tenant_id, OrderStatus::CustomerQuote);
        assert!(quoted.handle(&revert(&quoted)).unwrap().is_empty());

        let sourcing = placed(tenant_id, OrderStatus::VendorSourcing);
        assert!(sourcing.handle(&revert(&sourcing)).unwrap().is_empty());
    }

    #[test]
    fn other_tenant_cannot_touch_order() {
        let order = placed(test_tenant_id(), OrderStatus::Pending);
        let err = order
            .handle(&advance(&order, test_tenant_id(), OrderStatus::VendorSourcing, 0))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn synced_quotation_is_floor_of_markup(amount in 0i64..=1_000_000_000_000i64) {
            let tenant_id = test_tenant_id();
            let mut order = placed(tenant_id, OrderStatus::VendorNegotiation);
            order.execute(&sync(&order, tenant_id, usd(amount))).unwrap();

            let expected = (i128::from(amount) * 135 / 100) as i64;
            prop_assert_eq!(order.vendor_quoted_price(), Some(usd(amount)));
            prop_assert_eq!(order.quotation_amount(), Some(usd(expected)));
        }
    }
}
