//! Minimal catalog rows owned by external CRUD.
//!
//! Only what the negotiation and inventory services need to resolve a
//! reference inside a tenant.

use serde::{Deserialize, Serialize};
use tracing::debug;

use etchforge_core::{DomainError, Entity, Money, ProductId, Quantity, TenantId, VendorId};
use etchforge_events::{EventBus, EventEnvelope};

use super::InMemoryStore;
use crate::error::ServiceResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRecord {
    pub id: VendorId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
}

impl Entity for VendorRecord {
    type Id = VendorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub sku: String,
    pub name: String,
    /// Copied onto the inventory item when it is first created.
    pub low_stock_threshold: Quantity,
    /// Vendor price per unit; becomes the item's average cost.
    #[serde(default)]
    pub unit_cost: Option<Money>,
}

impl Entity for ProductRecord {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

impl<B> InMemoryStore<B>
where
    B: EventBus<EventEnvelope>,
{
    /// Seed a vendor row (vendors are maintained by external CRUD).
    pub fn register_vendor(&self, tenant_id: TenantId, code: &str, name: &str) -> ServiceResult<VendorRecord> {
        let code = code.trim();
        if code.is_empty() {
            return Err(DomainError::validation("code", "vendor code must not be empty").into());
        }

        let vendor = VendorRecord {
            id: VendorId::new(),
            tenant_id,
            code: code.to_string(),
            name: name.trim().to_string(),
        };
        self.transaction(tenant_id, |tx| {
            if tx.vendors.iter().any(|v| v.code == vendor.code) {
                return Err(DomainError::conflict(format!("vendor code '{}' already exists", vendor.code)).into());
            }
            tx.vendors.insert(vendor.clone())?;
            Ok(())
        })?;
        debug!(%tenant_id, vendor_id = %vendor.id, "vendor registered");
        Ok(vendor)
    }

    /// Seed a product row (products are maintained by external CRUD).
    pub fn register_product(
        &self,
        tenant_id: TenantId,
        sku: &str,
        name: &str,
        low_stock_threshold: Quantity,
    ) -> ServiceResult<ProductRecord> {
        self.register_costed_product(tenant_id, sku, name, low_stock_threshold, None)
    }

    /// Seed a product row that carries a unit cost.
    pub fn register_costed_product(
        &self,
        tenant_id: TenantId,
        sku: &str,
        name: &str,
        low_stock_threshold: Quantity,
        unit_cost: Option<Money>,
    ) -> ServiceResult<ProductRecord> {
        let sku = sku.trim();
        let unit_cost = unit_cost
            .map(|cost| cost.ensure_non_negative("unit_cost"))
            .transpose()?;
        if sku.is_empty() {
            return Err(DomainError::validation("sku", "product sku must not be empty").into());
        }

        let product = ProductRecord {
            id: ProductId::new(),
            tenant_id,
            sku: sku.to_string(),
            name: name.trim().to_string(),
            low_stock_threshold,
            unit_cost,
        };
        self.transaction(tenant_id, |tx| {
            if tx.products.iter().any(|p| p.sku == product.sku) {
                return Err(DomainError::conflict(format!("product sku '{}' already exists", product.sku)).into());
            }
            tx.products.insert(product.clone())?;
            Ok(())
        })?;
        debug!(%tenant_id, product_id = %product.id, "product registered");
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use etchforge_core::Currency;
    use etchforge_events::InMemoryEventBus;

    use crate::error::ServiceError;

    #[test]
    fn duplicate_codes_conflict_within_a_tenant_only() {
        let store = InMemoryStore::new(Arc::new(InMemoryEventBus::<EventEnvelope>::new()));
        let a = TenantId::new();
        let b = TenantId::new();

        store.register_vendor(a, "LW", "Laser Works").unwrap();
        assert!(matches!(
            store.register_vendor(a, " LW ", "Other"),
            Err(ServiceError::Domain(DomainError::Conflict(_)))
        ));
        store.register_vendor(b, "LW", "Laser Works").unwrap();

        store.register_product(a, "MUG-01", "Etched mug", Quantity::from_units(5)).unwrap();
        assert!(store.register_product(a, "MUG-01", "Mug", Quantity::ZERO).is_err());
        assert!(store.register_product(a, "  ", "Blank", Quantity::ZERO).is_err());
    }

    #[test]
    fn product_cost_must_not_be_negative() {
        let store = InMemoryStore::new(Arc::new(InMemoryEventBus::<EventEnvelope>::new()));
        let tenant_id = TenantId::new();

        let costed = store
            .register_costed_product(tenant_id, "MUG-01", "Etched mug", Quantity::ZERO, Some(Money::new(1_250, Currency::USD)))
            .unwrap();
        assert_eq!(costed.unit_cost, Some(Money::new(1_250, Currency::USD)));
        assert_eq!(store.register_product(tenant_id, "MUG-02", "Mug", Quantity::ZERO).unwrap().unit_cost, None);

        let err = store
            .register_costed_product(tenant_id, "MUG-03", "Mug", Quantity::ZERO, Some(Money::new(-1, Currency::USD)))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Domain(DomainError::Validation { ref field, .. }) if field == "unit_cost"));
    }
}
