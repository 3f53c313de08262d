//! Domain events and their distribution.
//!
//! Domain crates emit plain event enums implementing [`Event`]. The store wraps
//! each one in an [`EventEnvelope`] after commit and hands it to an [`EventBus`].

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
