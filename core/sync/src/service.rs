//! Plain record operations outside of a sync batch.
//!
//! Writes go through the same [`ChangeApplier`] as sync so that an update
//! from a single client still honors its baseline.

use std::sync::Arc;

use expensync_common::{Error, Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId, Result};
use expensync_storage::RecordStore;

use crate::applier::ChangeApplier;
use crate::conflict::DeletePolicy;

/// Record-level operations for one store.
pub struct ExpenseService<S: RecordStore + ?Sized> {
    store: Arc<S>,
    applier: ChangeApplier<S>,
}

impl<S: RecordStore + ?Sized> ExpenseService<S> {
    pub fn new(store: Arc<S>) -> Self {
        // Direct deletes carry no baseline.
        let applier = ChangeApplier::new(Arc::clone(&store), DeletePolicy::Unconditional);
        Self { store, applier }
    }

    /// All expenses of `owner`, newest first.
    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<Expense>> {
        self.store.find_by_owner(owner).await
    }

    pub async fn get(&self, id: &ExpenseId) -> Result<Expense> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Expense not found: {}", id)))
    }

    pub async fn create(&self, owner: &OwnerId, new: NewExpense) -> Result<Expense> {
        self.applier.create(owner, new).await
    }

    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `Conflict` if the record changed after the patch's baseline
    pub async fn update(&self, id: &ExpenseId, patch: &ExpensePatch) -> Result<Expense> {
        self.applier.update(id, patch).await
    }

    pub async fn delete(&self, id: &ExpenseId) -> Result<()> {
        self.applier.delete(id, None).await
    }
}
