//! Vendor quote negotiation.
//!
//! Accepting a quote, auto-rejecting its open siblings and syncing the order
//! happen in a single tenant transaction, so at most one quote per order can
//! ever be accepted.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use etchforge_core::{DomainError, Money, OrderId, TenantId, UserId, VendorId};
use etchforge_events::{EventBus, EventEnvelope};
use etchforge_negotiation::{
    AcceptQuote, AutoRejectQuote, CounterOffer, CreateQuote, ExpireQuote, Quote, QuoteCommand,
    QuoteId, QuoteStatus, QuoteTerms, RejectQuote, validate_rejection_reason,
};
use etchforge_orders::{Order, OrderStatus};

use super::orders::{advance_stage, load_order, revert_to_sourcing, sync_from_accepted_quote};
use super::{entity_type, execute};
use crate::config::NegotiationSettings;
use crate::error::{ServiceError, ServiceResult};
use crate::store::{InMemoryStore, Transaction};

#[derive(Debug, Clone)]
pub struct NewQuote {
    pub order_id: OrderId,
    pub vendor_id: VendorId,
    pub initial_offer: Money,
    pub terms: QuoteTerms,
    pub lead_time_days: Option<u32>,
    /// Defaults to now plus the configured quote lifetime.
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewQuote {
    pub fn new(order_id: OrderId, vendor_id: VendorId, initial_offer: Money) -> Self {
        Self {
            order_id,
            vendor_id,
            initial_offer,
            terms: QuoteTerms::default(),
            lead_time_days: None,
            expires_at: None,
        }
    }

    pub fn with_terms(mut self, terms: QuoteTerms) -> Self {
        self.terms = terms;
        self
    }

    pub fn with_lead_time_days(mut self, days: u32) -> Self {
        self.lead_time_days = Some(days);
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptOutcome {
    pub quote: Quote,
    pub order: Order,
    pub rejected_quotes_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectOutcome {
    pub quote: Quote,
    pub order: Order,
    /// No open or countered quote is left on the order.
    pub all_quotes_rejected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingQuote {
    pub exists: bool,
    pub quote_id: Option<QuoteId>,
}

/// Result of a transaction that may have to commit a lazy expiry instead.
enum Lazy<T> {
    Done(T),
    Expired,
}

fn load_quote(tx: &Transaction<'_>, quote_id: QuoteId) -> ServiceResult<Quote> {
    Ok(tx
        .quotes
        .get(&quote_id)
        .cloned()
        .ok_or_else(DomainError::not_found)?)
}

fn active_quotes_of(tx: &Transaction<'_>, order_id: OrderId) -> Vec<QuoteId> {
    tx.quotes
        .iter()
        .filter(|q| q.order_id() == Some(order_id) && q.is_active())
        .map(Quote::id_typed)
        .collect()
}

/// Flip `quote` to expired if its deadline has passed. Returns whether it did.
fn expire_if_due(tx: &mut Transaction<'_>, quote: &mut Quote, now: DateTime<Utc>) -> ServiceResult<bool> {
    if !quote.is_expiry_due(now) {
        return Ok(false);
    }
    let command = QuoteCommand::ExpireQuote(ExpireQuote {
        tenant_id: tx.tenant_id(),
        quote_id: quote.id_typed(),
        occurred_at: now,
    });
    execute(tx, |t| &mut t.quotes, entity_type::QUOTE, quote, &command)?;
    Ok(true)
}

pub struct NegotiationService<B> {
    store: Arc<InMemoryStore<B>>,
    settings: NegotiationSettings,
}

impl<B> NegotiationService<B>
where
    B: EventBus<EventEnvelope>,
{
    pub fn new(store: Arc<InMemoryStore<B>>, settings: NegotiationSettings) -> Self {
        Self { store, settings }
    }

    /// Open a quote from `vendor_id` on `order_id`.
    ///
    /// An order waiting in `vendor_sourcing` moves on to `vendor_negotiation`.
    #[instrument(skip(self, new), fields(order_id = %new.order_id, vendor_id = %new.vendor_id))]
    pub fn create(&self, tenant_id: TenantId, actor: UserId, new: NewQuote) -> ServiceResult<Quote> {
        let now = Utc::now();
        let expires_at = new
            .expires_at
            .unwrap_or_else(|| now + self.settings.default_quote_ttl());

        let quote = self.store.transaction(tenant_id, |tx| {
            let order = load_order(tx, new.order_id)?;
            if tx.vendors.get(&new.vendor_id).is_none() {
                return Err(DomainError::not_found().into());
            }
            if !order.status().is_sourcing() {
                return Err(DomainError::invalid_transition(format!(
                    "order in status '{}' no longer accepts vendor quotes",
                    order.status()
                ))
                .into());
            }

            let active_quote_exists = tx.quotes.iter().any(|q| {
                q.order_id() == Some(new.order_id) && q.vendor_id() == Some(new.vendor_id) && q.is_active()
            });

            let quote_id = QuoteId::new();
            let mut quote = Quote::empty(quote_id);
            let command = QuoteCommand::CreateQuote(CreateQuote {
                tenant_id,
                quote_id,
                order_id: new.order_id,
                vendor_id: new.vendor_id,
                initial_offer: new.initial_offer,
                terms: new.terms.clone(),
                lead_time_days: new.lead_time_days,
                expires_at,
                order_currency: order.currency(),
                active_quote_exists,
                actor,
                occurred_at: now,
            });
            execute(tx, |t| &mut t.quotes, entity_type::QUOTE, &mut quote, &command)?;

            if order.status() == OrderStatus::VendorSourcing {
                advance_stage(
                    tx,
                    new.order_id,
                    OrderStatus::VendorNegotiation,
                    Some("vendor quote received".to_string()),
                    actor,
                    now,
                )?;
            }
            Ok(quote)
        })?;

        info!(%tenant_id, quote_id = %quote.id_typed(), offer = quote.latest_offer().amount(), "quote created");
        Ok(quote)
    }

    /// Record a counter offer. A quote past its expiry is flipped to expired
    /// and the call fails with `QuoteExpired`.
    #[instrument(skip(self, new_offer, notes))]
    pub fn counter(
        &self,
        tenant_id: TenantId,
        quote_id: QuoteId,
        new_offer: Money,
        notes: Option<String>,
        actor: UserId,
    ) -> ServiceResult<Quote> {
        let outcome = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            let mut quote = load_quote(tx, quote_id)?;
            if expire_if_due(tx, &mut quote, now)? {
                return Ok(Lazy::Expired);
            }

            let command = QuoteCommand::CounterOffer(CounterOffer {
                tenant_id,
                quote_id,
                new_offer,
                notes: notes.clone(),
                actor,
                occurred_at: now,
            });
            execute(tx, |t| &mut t.quotes, entity_type::QUOTE, &mut quote, &command)?;
            Ok(Lazy::Done(quote))
        })?;

        match outcome {
            Lazy::Done(quote) => {
                info!(%tenant_id, %quote_id, round = quote.round(), "quote countered");
                Ok(quote)
            }
            Lazy::Expired => {
                warn!(%tenant_id, %quote_id, "counter on expired quote");
                Err(DomainError::QuoteExpired.into())
            }
        }
    }

    /// Accept a quote: reject its open siblings and sync the order.
    #[instrument(skip(self))]
    pub fn accept(&self, tenant_id: TenantId, quote_id: QuoteId, actor: UserId) -> ServiceResult<AcceptOutcome> {
        let outcome = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            let mut quote = load_quote(tx, quote_id)?;
            if expire_if_due(tx, &mut quote, now)? {
                return Ok(Lazy::Expired);
            }

            let order_id = quote
                .order_id()
                .ok_or_else(|| DomainError::invariant("quote has no order"))?;
            let already_accepted = tx.quotes.iter().any(|q| {
                q.order_id() == Some(order_id)
                    && q.status() == QuoteStatus::Accepted
                    && q.id_typed() != quote_id
            });
            if already_accepted {
                return Err(DomainError::invalid_transition("order already has an accepted quote").into());
            }

            let command = QuoteCommand::AcceptQuote(AcceptQuote {
                tenant_id,
                quote_id,
                actor,
                occurred_at: now,
            });
            execute(tx, |t| &mut t.quotes, entity_type::QUOTE, &mut quote, &command)?;

            let siblings: Vec<QuoteId> = active_quotes_of(tx, order_id)
                .into_iter()
                .filter(|id| *id != quote_id)
                .collect();
            for sibling_id in &siblings {
                let mut sibling = load_quote(tx, *sibling_id)?;
                let command = QuoteCommand::AutoRejectQuote(AutoRejectQuote {
                    tenant_id,
                    quote_id: *sibling_id,
                    accepted_quote_id: quote_id,
                    actor,
                    occurred_at: now,
                });
                execute(tx, |t| &mut t.quotes, entity_type::QUOTE, &mut sibling, &command)?;
            }

            let order = sync_from_accepted_quote(tx, &quote, actor, now)?;
            Ok(Lazy::Done(AcceptOutcome {
                quote,
                order,
                rejected_quotes_count: siblings.len(),
            }))
        })?;

        match outcome {
            Lazy::Done(accepted) => {
                info!(
                    %tenant_id,
                    %quote_id,
                    order_id = %accepted.order.id_typed(),
                    rejected = accepted.rejected_quotes_count,
                    "quote accepted"
                );
                Ok(accepted)
            }
            Lazy::Expired => {
                warn!(%tenant_id, %quote_id, "accept on expired quote");
                Err(DomainError::QuoteExpired.into())
            }
        }
    }

    /// Reject a quote. When no open quote is left, the order goes back to
    /// `vendor_sourcing`.
    #[instrument(skip(self, reason))]
    pub fn reject(
        &self,
        tenant_id: TenantId,
        quote_id: QuoteId,
        reason: &str,
        actor: UserId,
    ) -> ServiceResult<RejectOutcome> {
        let reason = validate_rejection_reason(reason)?;

        let outcome = self.store.transaction(tenant_id, |tx| {
            let now = Utc::now();
            let mut quote = load_quote(tx, quote_id)?;
            let command = QuoteCommand::RejectQuote(RejectQuote {
                tenant_id,
                quote_id,
                reason: reason.clone(),
                actor,
                occurred_at: now,
            });
            execute(tx, |t| &mut t.quotes, entity_type::QUOTE, &mut quote, &command)?;

            let order_id = quote
                .order_id()
                .ok_or_else(|| DomainError::invariant("quote has no order"))?;
            let all_quotes_rejected = active_quotes_of(tx, order_id).is_empty();
            let order = if all_quotes_rejected {
                revert_to_sourcing(tx, order_id, actor, now)?
            } else {
                load_order(tx, order_id)?
            };

            Ok(RejectOutcome {
                quote,
                order,
                all_quotes_rejected,
            })
        })?;

        info!(%tenant_id, %quote_id, all_quotes_rejected = outcome.all_quotes_rejected, "quote rejected");
        Ok(outcome)
    }

    /// Whether `vendor_id` already has an open or countered quote on `order_id`.
    pub fn check_existing(&self, tenant_id: TenantId, order_id: OrderId, vendor_id: VendorId) -> ServiceResult<ExistingQuote> {
        let quote_id = self.store.read(tenant_id, |t| {
            t.quotes
                .iter()
                .find(|q| q.order_id() == Some(order_id) && q.vendor_id() == Some(vendor_id) && q.is_active())
                .map(Quote::id_typed)
        })?;
        Ok(ExistingQuote {
            exists: quote_id.is_some(),
            quote_id,
        })
    }

    /// Every quote of the order, oldest first.
    pub fn list_for_order(&self, tenant_id: TenantId, order_id: OrderId) -> ServiceResult<Vec<Quote>> {
        self.store.read(tenant_id, |t| {
            if t.orders.get(&order_id).is_none() {
                return Err(ServiceError::from(DomainError::not_found()));
            }
            Ok(t.quotes
                .iter()
                .filter(|q| q.order_id() == Some(order_id))
                .cloned()
                .collect())
        })?
    }

    pub fn get(&self, tenant_id: TenantId, quote_id: QuoteId) -> ServiceResult<Quote> {
        self.store
            .read(tenant_id, |t| t.quotes.get(&quote_id).cloned())?
            .ok_or_else(|| DomainError::not_found().into())
    }

    /// Flip every open or countered quote whose expiry is before `now`.
    #[instrument(skip(self))]
    pub fn expire_due(&self, tenant_id: TenantId, now: DateTime<Utc>) -> ServiceResult<Vec<QuoteId>> {
        let expired = self.store.transaction(tenant_id, |tx| {
            let due: Vec<QuoteId> = tx
                .quotes
                .iter()
                .filter(|q| q.is_expiry_due(now))
                .map(Quote::id_typed)
                .collect();
            for quote_id in &due {
                let mut quote = load_quote(tx, *quote_id)?;
                expire_if_due(tx, &mut quote, now)?;
            }
            Ok(due)
        })?;

        if !expired.is_empty() {
            info!(%tenant_id, count = expired.len(), "expired overdue quotes");
        }
        Ok(expired)
    }
}
