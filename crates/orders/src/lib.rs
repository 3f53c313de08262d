//! Customer orders domain module (negotiation slice).
//!
//! Only the part of an order the vendor negotiation touches lives here: the
//! status machine, the fields synced from an accepted quote, and the quotation
//! markup. Order creation and line-level content are owned elsewhere.

pub mod order;
pub mod status;

pub use order::{
    AdvanceStage, MARKUP_DENOMINATOR, MARKUP_NUMERATOR, Order, OrderCommand, OrderEvent,
    OrderPlaced, OrderStatusChanged, OrderSyncedFromQuote, PlaceOrder, RevertToSourcing,
    StatusHistoryEntry, SyncFromAcceptedQuote, quotation_amount_for,
};
pub use status::OrderStatus;
