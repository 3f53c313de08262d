//! A single journaled table of a tenant partition.

use std::collections::{BTreeMap, HashMap};

use etchforge_core::{AggregateRoot, Entity, ExpectedVersion, TenantId};

use crate::error::StoreError;

/// Internal storage key, assigned in insertion order. Never leaves the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(u64);

impl RowKey {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
enum Undo<T> {
    Inserted(RowKey),
    Replaced(RowKey, T),
}

/// Rows indexed by internal key, with a unique index on the external id.
///
/// Every write is journaled while a transaction is open so it can be undone.
#[derive(Debug)]
pub struct Table<T: Entity> {
    name: &'static str,
    tenant_id: TenantId,
    rows: BTreeMap<RowKey, T>,
    by_id: HashMap<T::Id, RowKey>,
    next_key: u64,
    journal: Vec<Undo<T>>,
}

impl<T: Entity + Clone> Table<T> {
    pub fn new(name: &'static str, tenant_id: TenantId) -> Self {
        Self {
            name,
            tenant_id,
            rows: BTreeMap::new(),
            by_id: HashMap::new(),
            next_key: 1,
            journal: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.by_id.get(id).and_then(|key| self.rows.get(key))
    }

    pub fn key_of(&self, id: &T::Id) -> Option<RowKey> {
        self.by_id.get(id).copied()
    }

    /// Rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    fn ensure_partition(&self, row: &T) -> Result<(), StoreError> {
        match row.tenant_id() {
            Some(tenant_id) if tenant_id != self.tenant_id => Err(StoreError::TenantMismatch {
                table: self.name,
            }),
            _ => Ok(()),
        }
    }

    pub fn insert(&mut self, row: T) -> Result<RowKey, StoreError> {
        self.ensure_partition(&row)?;
        let id = *row.id();
        if self.by_id.contains_key(&id) {
            return Err(StoreError::DuplicateRow {
                table: self.name,
                id: format!("{id:?}"),
            });
        }

        let key = RowKey(self.next_key);
        self.next_key += 1;
        self.rows.insert(key, row);
        self.by_id.insert(id, key);
        self.journal.push(Undo::Inserted(key));
        Ok(key)
    }

    /// Replace an existing row (matched by external id).
    pub fn update(&mut self, row: T) -> Result<(), StoreError> {
        self.ensure_partition(&row)?;
        let id = *row.id();
        let key = self.by_id.get(&id).copied().ok_or_else(|| StoreError::MissingRow {
            table: self.name,
            id: format!("{id:?}"),
        })?;

        if let Some(previous) = self.rows.insert(key, row) {
            self.journal.push(Undo::Replaced(key, previous));
        }
        Ok(())
    }

    pub fn upsert(&mut self, row: T) -> Result<(), StoreError> {
        if self.by_id.contains_key(row.id()) {
            self.update(row)
        } else {
            self.insert(row).map(|_| ())
        }
    }

    pub(crate) fn commit(&mut self) {
        self.journal.clear();
    }

    pub(crate) fn rollback(&mut self) {
        while let Some(undo) = self.journal.pop() {
            match undo {
                Undo::Inserted(key) => {
                    if let Some(row) = self.rows.remove(&key) {
                        self.by_id.remove(row.id());
                    }
                }
                Undo::Replaced(key, previous) => {
                    self.rows.insert(key, previous);
                }
            }
        }
    }
}

impl<T> Table<T>
where
    T: Entity + AggregateRoot + Clone,
{
    /// Write an aggregate back, checking the stored row's version first.
    pub fn save(&mut self, row: T, expected: ExpectedVersion) -> Result<(), StoreError> {
        let stored = self.get(Entity::id(&row)).map(|r| r.version());
        if !expected.matches(stored) {
            return Err(StoreError::Concurrency(format!(
                "{} expected {expected:?}, found {stored:?}",
                self.name
            )));
        }
        self.upsert(row)
    }
}
