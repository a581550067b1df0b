//! In-memory record store for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

use crate::store::{RecordStore, UpdateGuard};
use expensync_common::{
    time, Error, Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId, Result,
};

/// In-memory record store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. The lock is held for one record operation at a time and
/// never across an await point.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<RwLock<HashMap<ExpenseId, Expense>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing timestamp assignment.
    ///
    /// Used to seed fixtures with known timestamps.
    pub fn insert(&self, expense: Expense) -> Result<()> {
        self.write()?.insert(expense.id.clone(), expense);
        Ok(())
    }

    /// Number of stored records.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ExpenseId, Expense>>> {
        self.records
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ExpenseId, Expense>>> {
        self.records
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find_by_owner_since(
        &self,
        owner: &OwnerId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Expense>> {
        let records = self.read()?;
        let mut changed: Vec<Expense> = records
            .values()
            .filter(|e| &e.owner_id == owner && e.last_modified > since)
            .cloned()
            .collect();
        changed.sort_by(|a, b| a.last_modified.cmp(&b.last_modified).then(a.id.cmp(&b.id)));
        Ok(changed)
    }

    async fn find_by_owner(&self, owner: &OwnerId) -> Result<Vec<Expense>> {
        let records = self.read()?;
        let mut owned: Vec<Expense> = records
            .values()
            .filter(|e| &e.owner_id == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));
        Ok(owned)
    }

    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn create(
        &self,
        owner: &OwnerId,
        new: NewExpense,
        modified_at: DateTime<Utc>,
    ) -> Result<Expense> {
        let expense = Expense::from_new(
            ExpenseId::generate(),
            owner.clone(),
            new,
            time::truncate_to_millis(modified_at),
        );
        debug!("Creating expense {} for {}", expense.id, owner);
        self.write()?.insert(expense.id.clone(), expense.clone());
        Ok(expense)
    }

    async fn update_in_place(
        &self,
        id: &ExpenseId,
        patch: &ExpensePatch,
        guard: UpdateGuard,
    ) -> Result<Expense> {
        let mut records = self.write()?;
        let current = records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Expense not found: {}", id)))?;

        if current.last_modified != guard.expected_last_modified {
            return Err(Error::StaleWrite(Box::new(current.clone())));
        }

        let modified_at = time::advance(current.last_modified, guard.modified_at);
        patch.apply_to(current, modified_at);
        debug!("Updated expense {} at {}", id, modified_at);
        Ok(current.clone())
    }

    async fn delete_by_id(&self, id: &ExpenseId) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn delete_guarded(
        &self,
        id: &ExpenseId,
        expected_last_modified: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.write()?;
        let Some(current) = records.get(id) else {
            return Ok(false);
        };
        if current.last_modified != expected_last_modified {
            return Err(Error::StaleWrite(Box::new(current.clone())));
        }
        Ok(records.remove(id).is_some())
    }
}
