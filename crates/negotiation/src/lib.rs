//! Vendor negotiation domain module.
//!
//! A `Quote` is one vendor's offer against one customer order. This crate holds
//! the quote state machine as deterministic domain logic with no IO or clock
//! access; cross-quote rules such as "accepting one rejects its siblings" are
//! orchestrated by the infrastructure layer inside a single transaction.

pub mod history;
pub mod quote;

pub use history::{HistoryAction, HistoryEntry};
pub use quote::{
    AcceptQuote, AutoRejectQuote, CounterOffer, CreateQuote, ExpireQuote, MAX_REASON_LEN,
    MIN_REASON_LEN, Quote, QuoteAccepted, QuoteCommand, QuoteCountered, QuoteCreated, QuoteEvent,
    QuoteExpired, QuoteId, QuoteRejected, QuoteStatus, QuoteTerms, RejectQuote,
    validate_rejection_reason,
};
