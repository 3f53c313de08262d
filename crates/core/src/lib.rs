//! `etchforge-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by every bounded context
//! (no infrastructure concerns): identifiers, the domain error model, aggregate
//! traits and the `Money` / `Quantity` value objects.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod money;
pub mod quantity;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{AggregateId, CustomerId, OrderId, ProductId, TenantId, UserId, VendorId};
pub use money::{Currency, Money};
pub use quantity::Quantity;
pub use value_object::ValueObject;
