//! Infrastructure layer: transactional store, application services,
//! background jobs and configuration.

pub mod config;
pub mod error;
pub mod jobs;
pub mod services;
pub mod store;


pub use config::AppConfig;
pub use error::{ServiceError, ServiceResult, StoreError};
pub use services::{
    InventoryLedger, NegotiationService, OrderStageCoordinator, ReconciliationEngine,
};
pub use store::{InMemoryStore, TenantTables, Transaction};
