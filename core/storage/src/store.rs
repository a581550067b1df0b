//! Record store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use expensync_common::{Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId, Result};

/// Precondition attached to a guarded write.
///
/// The store applies the write only if the record's last-modified value is
/// still `expected_last_modified`. The check and the write happen as one
/// indivisible step per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateGuard {
    /// Last-modified value the caller read before deciding to write.
    pub expected_last_modified: DateTime<Utc>,
    /// Time of the write. The store may move it forward so that the new
    /// last-modified is strictly after the previous one.
    pub modified_at: DateTime<Utc>,
}

impl UpdateGuard {
    pub fn new(expected_last_modified: DateTime<Utc>, modified_at: DateTime<Utc>) -> Self {
        Self {
            expected_last_modified,
            modified_at,
        }
    }
}

/// Durable keyed storage for expense records.
///
/// Implementations must make every single-record operation atomic. Nothing is
/// promised across records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the store name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// All records of `owner` whose last-modified is strictly after `since`,
    /// ordered by last-modified ascending.
    async fn find_by_owner_since(
        &self,
        owner: &OwnerId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Expense>>;

    /// All records of `owner`, newest occurrence date first.
    async fn find_by_owner(&self, owner: &OwnerId) -> Result<Vec<Expense>>;

    /// Get a record by identifier.
    async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>>;

    /// Persist a new record.
    ///
    /// # Postconditions
    /// - A fresh identifier is assigned
    /// - `last_modified` and `created_at` equal `modified_at`
    async fn create(
        &self,
        owner: &OwnerId,
        new: NewExpense,
        modified_at: DateTime<Utc>,
    ) -> Result<Expense>;

    /// Merge `patch` into an existing record.
    ///
    /// # Postconditions
    /// - `last_modified` is strictly after its previous value
    /// - Sync status is `synced`
    ///
    /// # Errors
    /// - `NotFound` if no record has this identifier
    /// - `StaleWrite` carrying the current record if the guard does not match
    async fn update_in_place(
        &self,
        id: &ExpenseId,
        patch: &ExpensePatch,
        guard: UpdateGuard,
    ) -> Result<Expense>;

    /// Remove a record. Returns true iff a record was removed.
    async fn delete_by_id(&self, id: &ExpenseId) -> Result<bool>;

    /// Remove a record only if its last-modified is still `expected_last_modified`.
    ///
    /// Returns false if no record has this identifier.
    ///
    /// # Errors
    /// - `StaleWrite` carrying the current record if it changed
    async fn delete_guarded(
        &self,
        id: &ExpenseId,
        expected_last_modified: DateTime<Utc>,
    ) -> Result<bool>;
}
