use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use etchforge_core::{DomainError, Entity, TenantId};

use crate::ids::LocationId;

const MAX_CODE_LEN: usize = 50;

/// A warehouse / shelf / bin stock can be held at.
///
/// `code` is the tenant-unique business key and never changes; uniqueness is
/// enforced by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLocation {
    id: LocationId,
    tenant_id: TenantId,
    code: String,
    name: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Descriptive fields that may change after creation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

impl InventoryLocation {
    pub fn create(
        id: LocationId,
        tenant_id: TenantId,
        code: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let code = normalize_code(code)?;
        let name = validate_name(name)?;
        Ok(Self {
            id,
            tenant_id,
            code,
            name,
            is_active: true,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id_typed(&self) -> LocationId {
        self.id
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn update(&mut self, update: &LocationUpdate, now: DateTime<Utc>) -> Result<(), DomainError> {
        if let Some(name) = &update.name {
            self.name = validate_name(name)?;
        }
        if let Some(is_active) = update.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now;
        Ok(())
    }
}

impl Entity for InventoryLocation {
    type Id = LocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        Some(self.tenant_id)
    }
}

/// Trimmed, upper-cased location code.
pub fn normalize_code(code: &str) -> Result<String, DomainError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(DomainError::validation("code", "location code is required"));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(DomainError::validation(
            "code",
            format!("location code must be at most {MAX_CODE_LEN} characters"),
        ));
    }
    Ok(code.to_ascii_uppercase())
}

fn validate_name(name: &str) -> Result<String, DomainError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name", "location name is required"));
    }
    Ok(name.to_string())
}
