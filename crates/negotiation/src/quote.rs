use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use etchforge_core::{
    Aggregate, AggregateRoot, Currency, DomainError, Entity, Money, OrderId, TenantId, UserId,
    VendorId,
};
use etchforge_events::Event;

use crate::history::{HistoryAction, HistoryEntry};

/// Rejection reasons shorter than this (after trimming) are refused.
pub const MIN_REASON_LEN: usize = 10;
pub const MAX_REASON_LEN: usize = 1000;

const AUTO_REJECT_REASON: &str = "another quote accepted";

/// External identifier of a quote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteId(Uuid);

etchforge_core::impl_uuid_newtype!(QuoteId, "QuoteId");

/// Quote lifecycle.
///
/// `open → countered → {accepted | rejected | expired}`, and `open` may go
/// straight to any terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    Open,
    Countered,
    Accepted,
    Rejected,
    Expired,
}

impl QuoteStatus {
    /// Open or countered: the quote can still be negotiated or decided.
    pub fn is_active(self) -> bool {
        matches!(self, QuoteStatus::Open | QuoteStatus::Countered)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuoteStatus::Open => "open",
            QuoteStatus::Countered => "countered",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
            QuoteStatus::Expired => "expired",
        }
    }
}

impl core::fmt::Display for QuoteStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commercial terms attached to a vendor's offer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteTerms {
    pub payment_terms: Option<String>,
    pub shipping_terms: Option<String>,
    pub warranty: Option<String>,
    pub notes: Option<String>,
}

/// Aggregate root: Quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    id: QuoteId,
    tenant_id: Option<TenantId>,
    order_id: Option<OrderId>,
    vendor_id: Option<VendorId>,
    initial_offer: Money,
    latest_offer: Money,
    terms: QuoteTerms,
    lead_time_days: Option<u32>,
    round: u32,
    status: QuoteStatus,
    history: Vec<HistoryEntry>,
    expires_at: Option<DateTime<Utc>>,
    created_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Quote {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: QuoteId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_id: None,
            vendor_id: None,
            initial_offer: Money::zero(Currency::USD),
            latest_offer: Money::zero(Currency::USD),
            terms: QuoteTerms::default(),
            lead_time_days: None,
            round: 0,
            status: QuoteStatus::Open,
            history: Vec::new(),
            expires_at: None,
            created_at: None,
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> QuoteId {
        self.id
    }

    pub fn order_id(&self) -> Option<OrderId> {
        self.order_id
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn initial_offer(&self) -> Money {
        self.initial_offer
    }

    pub fn latest_offer(&self) -> Money {
        self.latest_offer
    }

    pub fn terms(&self) -> &QuoteTerms {
        &self.terms
    }

    pub fn lead_time_days(&self) -> Option<u32> {
        self.lead_time_days
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn status(&self) -> QuoteStatus {
        self.status
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_active(&self) -> bool {
        self.created && self.status.is_active()
    }

    /// Still active but past its `expires_at`: the next accept/counter must
    /// flip it to `expired` instead of proceeding.
    pub fn is_expiry_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| at < now)
    }
}

impl AggregateRoot for Quote {
    type Id = QuoteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Entity for Quote {
    type Id = QuoteId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

/// Command: CreateQuote.
///
/// `order_currency` and `active_quote_exists` are facts about other aggregates,
/// looked up by the caller inside the same transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateQuote {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub initial_offer: Money,
    pub terms: QuoteTerms,
    pub lead_time_days: Option<u32>,
    pub expires_at: DateTime<Utc>,
    pub order_currency: Currency,
    pub active_quote_exists: bool,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CounterOffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterOffer {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub new_offer: Money,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AcceptQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptQuote {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectQuote {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub reason: String,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AutoRejectQuote (a sibling was accepted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoRejectQuote {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub accepted_quote_id: QuoteId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireQuote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireQuote {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteCommand {
    CreateQuote(CreateQuote),
    CounterOffer(CounterOffer),
    AcceptQuote(AcceptQuote),
    RejectQuote(RejectQuote),
    AutoRejectQuote(AutoRejectQuote),
    ExpireQuote(ExpireQuote),
}

/// Event: QuoteCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCreated {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub initial_offer: Money,
    pub terms: QuoteTerms,
    pub lead_time_days: Option<u32>,
    pub expires_at: DateTime<Utc>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteCountered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCountered {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub previous_offer: Money,
    pub new_offer: Money,
    pub round: u32,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteAccepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteAccepted {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub previous_status: QuoteStatus,
    pub accepted_offer: Money,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteRejected.
///
/// `accepted_quote_id` is set when the rejection cascaded from accepting a
/// sibling quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRejected {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub previous_status: QuoteStatus,
    pub reason: String,
    pub accepted_quote_id: Option<QuoteId>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuoteExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteExpired {
    pub tenant_id: TenantId,
    pub quote_id: QuoteId,
    pub order_id: OrderId,
    pub previous_status: QuoteStatus,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteEvent {
    QuoteCreated(QuoteCreated),
    QuoteCountered(QuoteCountered),
    QuoteAccepted(QuoteAccepted),
    QuoteRejected(QuoteRejected),
    QuoteExpired(QuoteExpired),
}

impl Event for QuoteEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QuoteEvent::QuoteCreated(_) => "negotiation.quote.created",
            QuoteEvent::QuoteCountered(_) => "negotiation.quote.countered",
            QuoteEvent::QuoteAccepted(_) => "negotiation.quote.accepted",
            QuoteEvent::QuoteRejected(_) => "negotiation.quote.rejected",
            QuoteEvent::QuoteExpired(_) => "negotiation.quote.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            QuoteEvent::QuoteCreated(e) => e.occurred_at,
            QuoteEvent::QuoteCountered(e) => e.occurred_at,
            QuoteEvent::QuoteAccepted(e) => e.occurred_at,
            QuoteEvent::QuoteRejected(e) => e.occurred_at,
            QuoteEvent::QuoteExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Quote {
    type Command = QuoteCommand;
    type Event = QuoteEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            QuoteEvent::QuoteCreated(e) => {
                self.id = e.quote_id;
                self.tenant_id = Some(e.tenant_id);
                self.order_id = Some(e.order_id);
                self.vendor_id = Some(e.vendor_id);
                self.initial_offer = e.initial_offer;
                self.latest_offer = e.initial_offer;
                self.terms = e.terms.clone();
                self.lead_time_days = e.lead_time_days;
                self.round = 1;
                self.status = QuoteStatus::Open;
                self.expires_at = Some(e.expires_at);
                self.created_at = Some(e.occurred_at);
                self.closed_at = None;
                self.history.clear();
                self.history.push(HistoryEntry {
                    action: HistoryAction::Created {
                        initial_offer: e.initial_offer,
                        lead_time_days: e.lead_time_days,
                    },
                    at: e.occurred_at,
                    actor: Some(e.actor),
                });
                self.created = true;
            }
            QuoteEvent::QuoteCountered(e) => {
                self.latest_offer = e.new_offer;
                self.round = e.round;
                self.status = QuoteStatus::Countered;
                self.history.push(HistoryEntry {
                    action: HistoryAction::CounterOffered {
                        previous_offer: e.previous_offer,
                        new_offer: e.new_offer,
                        notes: e.notes.clone(),
                    },
                    at: e.occurred_at,
                    actor: Some(e.actor),
                });
            }
            QuoteEvent::QuoteAccepted(e) => {
                self.status = QuoteStatus::Accepted;
                self.closed_at = Some(e.occurred_at);
                self.history.push(HistoryEntry {
                    action: HistoryAction::Accepted {
                        offer: e.accepted_offer,
                    },
                    at: e.occurred_at,
                    actor: Some(e.actor),
                });
            }
            QuoteEvent::QuoteRejected(e) => {
                self.status = QuoteStatus::Rejected;
                self.closed_at = Some(e.occurred_at);
                let action = match e.accepted_quote_id {
                    Some(accepted_quote_id) => HistoryAction::AutoRejected {
                        reason: e.reason.clone(),
                        accepted_quote_id,
                    },
                    None => HistoryAction::Rejected {
                        reason: e.reason.clone(),
                    },
                };
                self.history.push(HistoryEntry {
                    action,
                    at: e.occurred_at,
                    actor: Some(e.actor),
                });
            }
            QuoteEvent::QuoteExpired(e) => {
                self.status = QuoteStatus::Expired;
                self.closed_at = Some(e.occurred_at);
                self.history.push(HistoryEntry {
                    action: HistoryAction::Expired {
                        expires_at: e.expires_at,
                    },
                    at: e.occurred_at,
                    actor: None,
                });
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            QuoteCommand::CreateQuote(cmd) => self.handle_create(cmd),
            QuoteCommand::CounterOffer(cmd) => self.handle_counter(cmd),
            QuoteCommand::AcceptQuote(cmd) => self.handle_accept(cmd),
            QuoteCommand::RejectQuote(cmd) => self.handle_reject(cmd),
            QuoteCommand::AutoRejectQuote(cmd) => self.handle_auto_reject(cmd),
            QuoteCommand::ExpireQuote(cmd) => self.handle_expire(cmd),
        }
    }
}

/// Validate a manual rejection reason, returning it trimmed.
pub fn validate_rejection_reason(reason: &str) -> Result<String, DomainError> {
    let trimmed = reason.trim();
    let len = trimmed.chars().count();
    if len < MIN_REASON_LEN {
        return Err(DomainError::validation(
            "reason",
            format!("rejection reason must be at least {MIN_REASON_LEN} characters"),
        ));
    }
    if len > MAX_REASON_LEN {
        return Err(DomainError::validation(
            "reason",
            format!("rejection reason must be at most {MAX_REASON_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

impl Quote {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    /// A quote of another tenant is reported exactly like a missing one.
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_quote_id(&self, quote_id: QuoteId) -> Result<(), DomainError> {
        if self.id != quote_id {
            return Err(DomainError::invariant("quote_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<(), DomainError> {
        if !self.status.is_active() {
            return Err(DomainError::invalid_transition(format!(
                "cannot {action} a quote in status '{}'",
                self.status
            )));
        }
        Ok(())
    }

    fn order_id_or_invariant(&self) -> Result<OrderId, DomainError> {
        self.order_id
            .ok_or_else(|| DomainError::invariant("created quote has no order"))
    }

    fn handle_create(&self, cmd: &CreateQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("quote already exists"));
        }
        self.ensure_quote_id(cmd.quote_id)?;

        if cmd.active_quote_exists {
            return Err(DomainError::DuplicateActiveQuote);
        }

        let initial_offer = cmd
            .initial_offer
            .ensure_non_negative("initial_offer")?
            .ensure_currency(cmd.order_currency)?;

        if cmd.expires_at <= cmd.occurred_at {
            return Err(DomainError::validation(
                "expires_at",
                "expiry must be in the future",
            ));
        }

        Ok(vec![QuoteEvent::QuoteCreated(QuoteCreated {
            tenant_id: cmd.tenant_id,
            quote_id: cmd.quote_id,
            order_id: cmd.order_id,
            vendor_id: cmd.vendor_id,
            initial_offer,
            terms: cmd.terms.clone(),
            lead_time_days: cmd.lead_time_days,
            expires_at: cmd.expires_at,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_counter(&self, cmd: &CounterOffer) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_quote_id(cmd.quote_id)?;
        self.ensure_active("counter")?;

        if self.is_expiry_due(cmd.occurred_at) {
            return Err(DomainError::QuoteExpired);
        }

        let new_offer = cmd
            .new_offer
            .ensure_non_negative("new_offer")?
            .ensure_currency(self.latest_offer.currency())?;

        Ok(vec![QuoteEvent::QuoteCountered(QuoteCountered {
            tenant_id: cmd.tenant_id,
            quote_id: cmd.quote_id,
            order_id: self.order_id_or_invariant()?,
            previous_offer: self.latest_offer,
            new_offer,
            round: self.round + 1,
            notes: cmd.notes.clone(),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_accept(&self, cmd: &AcceptQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_quote_id(cmd.quote_id)?;

        match self.status {
            QuoteStatus::Accepted => return Err(DomainError::QuoteAlreadyAccepted),
            QuoteStatus::Expired => return Err(DomainError::QuoteExpired),
            _ => {}
        }
        if self.is_expiry_due(cmd.occurred_at) {
            return Err(DomainError::QuoteExpired);
        }
        self.ensure_active("accept")?;

        let vendor_id = self
            .vendor_id
            .ok_or_else(|| DomainError::invariant("created quote has no vendor"))?;

        Ok(vec![QuoteEvent::QuoteAccepted(QuoteAccepted {
            tenant_id: cmd.tenant_id,
            quote_id: cmd.quote_id,
            order_id: self.order_id_or_invariant()?,
            vendor_id,
            previous_status: self.status,
            accepted_offer: self.latest_offer,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        let reason = validate_rejection_reason(&cmd.reason)?;
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_quote_id(cmd.quote_id)?;
        self.ensure_active("reject")?;

        Ok(vec![QuoteEvent::QuoteRejected(QuoteRejected {
            tenant_id: cmd.tenant_id,
            quote_id: cmd.quote_id,
            order_id: self.order_id_or_invariant()?,
            previous_status: self.status,
            reason,
            accepted_quote_id: None,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_auto_reject(&self, cmd: &AutoRejectQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_quote_id(cmd.quote_id)?;
        self.ensure_active("auto-reject")?;

        if cmd.accepted_quote_id == self.id {
            return Err(DomainError::invariant("a quote cannot reject itself"));
        }

        Ok(vec![QuoteEvent::QuoteRejected(QuoteRejected {
            tenant_id: cmd.tenant_id,
            quote_id: cmd.quote_id,
            order_id: self.order_id_or_invariant()?,
            previous_status: self.status,
            reason: AUTO_REJECT_REASON.to_string(),
            accepted_quote_id: Some(cmd.accepted_quote_id),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireQuote) -> Result<Vec<QuoteEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_tenant(cmd.tenant_id)?;
        self.ensure_quote_id(cmd.quote_id)?;
        self.ensure_active("expire")?;

        let expires_at = match self.expires_at {
            Some(at) if at < cmd.occurred_at => at,
            _ => {
                return Err(DomainError::invalid_transition(
                    "quote has not reached its expiry",
                ));
            }
        };

        Ok(vec![QuoteEvent::QuoteExpired(QuoteExpired {
            tenant_id: cmd.tenant_id,
            quote_id: cmd.quote_id,
            order_id: self.order_id_or_invariant()?,
            previous_status: self.status,
            expires_at,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
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

    fn create_cmd(tenant_id: TenantId, quote_id: QuoteId, now: DateTime<Utc>) -> CreateQuote {
        CreateQuote {
            tenant_id,
            quote_id,
            order_id: OrderId::new(),
            vendor_id: VendorId::new(),
            initial_offer: usd(5_000_000),
            terms: QuoteTerms {
                payment_terms: Some("net 30".to_string()),
                ..QuoteTerms::default()
            },
            lead_time_days: Some(21),
            expires_at: now + Duration::days(7),
            order_currency: Currency::USD,
            active_quote_exists: false,
            actor: UserId::new(),
            occurred_at: now,
        }
    }

    fn open_quote(tenant_id: TenantId, now: DateTime<Utc>) -> Quote {
        let quote_id = QuoteId::new();
        let mut quote = Quote::empty(quote_id);
        quote
            .execute(&QuoteCommand::CreateQuote(create_cmd(tenant_id, quote_id, now)))
            .unwrap();
        quote
    }

    fn accept(quote: &Quote, tenant_id: TenantId, at: DateTime<Utc>) -> QuoteCommand {
        QuoteCommand::AcceptQuote(AcceptQuote {
            tenant_id,
            quote_id: quote.id_typed(),
            actor: UserId::new(),
            occurred_at: at,
        })
    }

    fn counter(quote: &Quote, tenant_id: TenantId, amount: i64, at: DateTime<Utc>) -> QuoteCommand {
        QuoteCommand::CounterOffer(CounterOffer {
            tenant_id,
            quote_id: quote.id_typed(),
            new_offer: usd(amount),
            notes: Some("revised".to_string()),
            actor: UserId::new(),
            occurred_at: at,
        })
    }

    fn reject(quote: &Quote, tenant_id: TenantId, reason: &str) -> QuoteCommand {
        QuoteCommand::RejectQuote(RejectQuote {
            tenant_id,
            quote_id: quote.id_typed(),
            reason: reason.to_string(),
            actor: UserId::new(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn create_opens_quote_at_round_one() {
        let tenant_id = test_tenant_id();
        let quote = open_quote(tenant_id, test_time());

        assert_eq!(quote.status(), QuoteStatus::Open);
        assert_eq!(quote.round(), 1);
        assert_eq!(quote.latest_offer(), usd(5_000_000));
        assert_eq!(quote.history().len(), 1);
        assert_eq!(quote.history()[0].action.name(), "created");
        assert_eq!(quote.version(), 1);
    }

    #[test]
    fn create_with_active_sibling_is_duplicate() {
        let quote_id = QuoteId::new();
        let mut cmd = create_cmd(test_tenant_id(), quote_id, test_time());
        cmd.active_quote_exists = true;

        let err = Quote::empty(quote_id)
            .handle(&QuoteCommand::CreateQuote(cmd))
            .unwrap_err();
        assert_eq!(err, DomainError::DuplicateActiveQuote);
    }

    #[test]
    fn create_rejects_negative_or_foreign_currency_offer() {
        let quote_id = QuoteId::new();
        let mut cmd = create_cmd(test_tenant_id(), quote_id, test_time());
        cmd.initial_offer = usd(-1);
        let err = Quote::empty(quote_id)
            .handle(&QuoteCommand::CreateQuote(cmd.clone()))
            .unwrap_err();
        match err {
            DomainError::Validation { field, .. } if field == "initial_offer" => {}
            _ => panic!("Expected Validation error"),
        }

        cmd.initial_offer = Money::new(100, Currency::new("EUR").unwrap());
        let err = Quote::empty(quote_id)
            .handle(&QuoteCommand::CreateQuote(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::CurrencyMismatch { .. }));
    }

    #[test]
    fn counter_increments_round_and_records_history() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);

        let events = quote.execute(&counter(&quote, tenant_id, 4_800_000, now)).unwrap();
        match &events[0] {
            QuoteEvent::QuoteCountered(e) => {
                assert_eq!(e.previous_offer, usd(5_000_000));
                assert_eq!(e.new_offer, usd(4_800_000));
                assert_eq!(e.round, 2);
            }
            _ => panic!("Expected QuoteCountered event"),
        }

        assert_eq!(quote.status(), QuoteStatus::Countered);
        assert_eq!(quote.round(), 2);
        assert_eq!(quote.latest_offer(), usd(4_800_000));
        assert_eq!(quote.initial_offer(), usd(5_000_000));
        match &quote.history()[1].action {
            HistoryAction::CounterOffered { notes, .. } => {
                assert_eq!(notes.as_deref(), Some("revised"));
            }
            other => panic!("unexpected history entry: {other:?}"),
        }
    }

    #[test]
    fn counter_on_terminal_quote_is_invalid_transition() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);
        quote.execute(&accept(&quote, tenant_id, now)).unwrap();

        let err = quote.handle(&counter(&quote, tenant_id, 1, now)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn counter_past_expiry_reports_expired() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let quote = open_quote(tenant_id, now);

        let later = now + Duration::days(8);
        let err = quote.handle(&counter(&quote, tenant_id, 1, later)).unwrap_err();
        assert_eq!(err, DomainError::QuoteExpired);
    }

    #[test]
    fn accept_closes_quote() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);

        quote.execute(&accept(&quote, tenant_id, now)).unwrap();
        assert_eq!(quote.status(), QuoteStatus::Accepted);
        assert_eq!(quote.closed_at(), Some(now));
        assert_eq!(quote.history().last().unwrap().action.name(), "accepted");
    }

    #[test]
    fn accept_twice_reports_already_accepted_without_change() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);
        quote.execute(&accept(&quote, tenant_id, now)).unwrap();
        let before = quote.clone();

        let err = quote.execute(&accept(&quote, tenant_id, now)).unwrap_err();
        assert_eq!(err, DomainError::QuoteAlreadyAccepted);
        assert_eq!(quote, before);
    }

    #[test]
    fn accept_past_expiry_fails_even_when_open() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let quote = open_quote(tenant_id, now);
        let later = now + Duration::days(7) + Duration::seconds(1);

        assert!(quote.is_expiry_due(later));
        let err = quote.handle(&accept(&quote, tenant_id, later)).unwrap_err();
        assert_eq!(err, DomainError::QuoteExpired);
    }

    #[test]
    fn expire_then_accept_reports_expired() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);
        let later = now + Duration::days(10);

        quote
            .execute(&QuoteCommand::ExpireQuote(ExpireQuote {
                tenant_id,
                quote_id: quote.id_typed(),
                occurred_at: later,
            }))
            .unwrap();
        assert_eq!(quote.status(), QuoteStatus::Expired);
        assert_eq!(quote.closed_at(), Some(later));

        let err = quote.handle(&accept(&quote, tenant_id, now)).unwrap_err();
        assert_eq!(err, DomainError::QuoteExpired);
    }

    #[test]
    fn expire_before_expiry_is_invalid() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let quote = open_quote(tenant_id, now);

        let err = quote
            .handle(&QuoteCommand::ExpireQuote(ExpireQuote {
                tenant_id,
                quote_id: quote.id_typed(),
                occurred_at: now,
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn accept_rejected_quote_is_invalid_transition() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);
        quote
            .execute(&reject(&quote, tenant_id, "Price too high for budget"))
            .unwrap();

        let err = quote.handle(&accept(&quote, tenant_id, now)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn reject_requires_meaningful_reason() {
        let tenant_id = test_tenant_id();
        let quote = open_quote(tenant_id, test_time());

        let err = quote.handle(&reject(&quote, tenant_id, "   too high   ")).unwrap_err();
        match err {
            DomainError::Validation { field, message } if field == "reason" => {
                assert!(message.contains("at least 10"));
            }
            _ => panic!("Expected Validation error for short reason"),
        }

        let long = "x".repeat(MAX_REASON_LEN + 1);
        assert!(quote.handle(&reject(&quote, tenant_id, &long)).is_err());
    }

    #[test]
    fn reject_records_trimmed_reason() {
        let tenant_id = test_tenant_id();
        let mut quote = open_quote(tenant_id, test_time());

        quote
            .execute(&reject(&quote, tenant_id, "  Price too high for budget "))
            .unwrap();
        assert_eq!(quote.status(), QuoteStatus::Rejected);
        assert!(quote.closed_at().is_some());
        match &quote.history().last().unwrap().action {
            HistoryAction::Rejected { reason } => assert_eq!(reason, "Price too high for budget"),
            other => panic!("unexpected history entry: {other:?}"),
        }

        let err = quote
            .handle(&reject(&quote, tenant_id, "Price too high for budget"))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }

    #[test]
    fn auto_reject_records_accepted_sibling() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let mut quote = open_quote(tenant_id, now);
        let winner = QuoteId::new();

        quote
            .execute(&QuoteCommand::AutoRejectQuote(AutoRejectQuote {
                tenant_id,
                quote_id: quote.id_typed(),
                accepted_quote_id: winner,
                actor: UserId::new(),
                occurred_at: now,
            }))
            .unwrap();

        assert_eq!(quote.status(), QuoteStatus::Rejected);
        match &quote.history().last().unwrap().action {
            HistoryAction::AutoRejected {
                reason,
                accepted_quote_id,
            } => {
                assert_eq!(reason, "another quote accepted");
                assert_eq!(*accepted_quote_id, winner);
            }
            other => panic!("unexpected history entry: {other:?}"),
        }
    }

    #[test]
    fn foreign_tenant_sees_not_found() {
        let now = test_time();
        let quote = open_quote(test_tenant_id(), now);

        let err = quote.handle(&accept(&quote, test_tenant_id(), now)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let tenant_id = test_tenant_id();
        let now = test_time();
        let quote = open_quote(tenant_id, now);
        let before = quote.clone();

        let _ = quote.handle(&counter(&quote, tenant_id, 10, now)).unwrap();
        let _ = quote.handle(&accept(&quote, tenant_id, now)).unwrap();
        assert_eq!(quote, before);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Counter(i64),
        Accept,
        Reject,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0i64..10_000_000).prop_map(Op::Counter),
            Just(Op::Accept),
            Just(Op::Reject),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        /// Once terminal, no command moves a quote again, and the history only grows.
        #[test]
        fn terminal_states_are_absorbing(ops in prop::collection::vec(op_strategy(), 1..12)) {
            let tenant_id = test_tenant_id();
            let now = test_time();
            let mut quote = open_quote(tenant_id, now);
            let mut terminal: Option<QuoteStatus> = None;
            let mut history_len = quote.history().len();

            for op in ops {
                let cmd = match op {
                    Op::Counter(amount) => counter(&quote, tenant_id, amount, now),
                    Op::Accept => accept(&quote, tenant_id, now),
                    Op::Reject => reject(&quote, tenant_id, "Price too high for budget"),
                };
                let result = quote.execute(&cmd);

                if let Some(status) = terminal {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(quote.status(), status);
                } else if quote.status().is_terminal() {
                    terminal = Some(quote.status());
                }
                prop_assert!(quote.history().len() >= history_len);
                history_len = quote.history().len();
                prop_assert!(quote.round() >= 1);
            }
        }
    }
}
