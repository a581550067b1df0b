//! Applies pending changes to the record store.
//!
//! Updates and guarded deletes follow a read, resolve, guarded-write loop:
//! the record is read, the baseline is checked against it, and the write is
//! conditioned on the record still being the one that was read. A lost race
//! rereads and resolves again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::conflict::{self, DeletePolicy, Resolution};
use crate::protocol::{ChangeOutcome, PendingChange};
use expensync_common::{time, Error, Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId, Result};
use expensync_storage::{RecordStore, UpdateGuard};

/// Guarded writes attempted before a contended record is reported as a conflict.
pub const MAX_GUARDED_ATTEMPTS: usize = 4;

/// Applies individual changes against a store.
pub struct ChangeApplier<S: RecordStore + ?Sized> {
    store: Arc<S>,
    delete_policy: DeletePolicy,
}

impl<S: RecordStore + ?Sized> ChangeApplier<S> {
    pub fn new(store: Arc<S>, delete_policy: DeletePolicy) -> Self {
        Self {
            store,
            delete_policy,
        }
    }

    /// Apply one pending change on behalf of `owner`.
    ///
    /// Never fails; every error becomes an outcome for this change alone.
    pub async fn apply(&self, owner: &OwnerId, change: &PendingChange) -> ChangeOutcome {
        let result = match change {
            PendingChange::Create { data, .. } => self
                .create(owner, data.clone())
                .await
                .map(|record| ChangeOutcome::Success { id: Some(record.id) }),
            PendingChange::Update { id, data, .. } => self
                .update(id, data)
                .await
                .map(|_| ChangeOutcome::Success { id: None }),
            PendingChange::Delete { id, data, .. } => self
                .delete(id, data.map(|baseline| baseline.last_modified))
                .await
                .map(|()| ChangeOutcome::Success { id: None }),
        };

        match result {
            Ok(outcome) => outcome,
            Err(Error::Conflict(server)) | Err(Error::StaleWrite(server)) => {
                ChangeOutcome::Conflict(server)
            }
            Err(Error::NotFound(_)) => match change.target() {
                Some(id) => ChangeOutcome::NotFound(id.clone()),
                None => ChangeOutcome::Error("Expense not found".to_string()),
            },
            Err(e) => {
                warn!("Failed to apply {} change: {}", change.kind(), e);
                ChangeOutcome::Error(e.to_string())
            }
        }
    }

    /// Create a record owned by `owner`.
    pub async fn create(&self, owner: &OwnerId, new: NewExpense) -> Result<Expense> {
        let record = self.store.create(owner, new, time::now()).await?;
        debug!("Created expense {} for {}", record.id, owner);
        Ok(record)
    }

    /// Merge `patch` into record `id` unless the record changed after the
    /// patch's baseline.
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `Conflict` carrying the server record if the baseline is stale
    pub async fn update(&self, id: &ExpenseId, patch: &ExpensePatch) -> Result<Expense> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.current(id).await?;
            if let Resolution::Conflict(server) = conflict::resolve(Some(&current), patch.last_modified) {
                debug!(
                    "Update of {} rejected: server {} is after baseline {}",
                    id, server.last_modified, patch.last_modified
                );
                return Err(Error::Conflict(server));
            }

            let guard = UpdateGuard::new(current.last_modified, time::now());
            match self.store.update_in_place(id, patch, guard).await {
                Ok(updated) => return Ok(updated),
                Err(Error::StaleWrite(server)) if attempt >= MAX_GUARDED_ATTEMPTS => {
                    warn!("Update of {} lost {} races, reporting conflict", id, attempt);
                    return Err(Error::Conflict(server));
                }
                Err(Error::StaleWrite(_)) => {
                    debug!("Update of {} raced a concurrent write, retrying", id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Delete record `id`.
    ///
    /// The baseline is only honored under [`DeletePolicy::Guarded`].
    ///
    /// # Errors
    /// - `NotFound` if the record does not exist
    /// - `Conflict` if the delete is guarded and the baseline is stale
    pub async fn delete(&self, id: &ExpenseId, baseline: Option<DateTime<Utc>>) -> Result<()> {
        let Some(baseline) = self.delete_policy.baseline_for(baseline) else {
            return if self.store.delete_by_id(id).await? {
                debug!("Deleted expense {}", id);
                Ok(())
            } else {
                Err(not_found(id))
            };
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let current = self.current(id).await?;
            if let Resolution::Conflict(server) = conflict::resolve(Some(&current), baseline) {
                return Err(Error::Conflict(server));
            }

            match self.store.delete_guarded(id, current.last_modified).await {
                Ok(true) => {
                    debug!("Deleted expense {} against baseline {}", id, baseline);
                    return Ok(());
                }
                Ok(false) => return Err(not_found(id)),
                Err(Error::StaleWrite(server)) if attempt >= MAX_GUARDED_ATTEMPTS => {
                    return Err(Error::Conflict(server));
                }
                Err(Error::StaleWrite(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn current(&self, id: &ExpenseId) -> Result<Expense> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found(id))
    }
}

fn not_found(id: &ExpenseId) -> Error {
    Error::NotFound(format!("Expense not found: {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeDelta;
    use expensync_common::{Amount, Category, Description};
    use expensync_storage::MemoryStore;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn owner() -> OwnerId {
        OwnerId::new("U1").unwrap()
    }

    fn lunch() -> NewExpense {
        NewExpense {
            amount: Amount::new(Decimal::from(30)).unwrap(),
            description: Description::new("Lunch").unwrap(),
            category: Category::Food,
            date: None,
        }
    }

    fn amount(value: i64) -> Amount {
        Amount::new(Decimal::from(value)).unwrap()
    }

    fn applier(store: &Arc<MemoryStore>, policy: DeletePolicy) -> ChangeApplier<MemoryStore> {
        ChangeApplier::new(Arc::clone(store), policy)
    }

    #[tokio::test]
    async fn test_create_reports_new_id() {
        let store = Arc::new(MemoryStore::new());
        let applier = applier(&store, DeletePolicy::Unconditional);

        let outcome = applier.apply(&owner(), &PendingChange::create(lunch())).await;
        let ChangeOutcome::Success { id: Some(id) } = outcome else {
            panic!("expected success with a new id");
        };
        let record = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.owner_id, owner());
    }

    #[tokio::test]
    async fn test_update_with_current_baseline() {
        let store = Arc::new(MemoryStore::new());
        let applier = applier(&store, DeletePolicy::Unconditional);
        let created = applier.create(&owner(), lunch()).await.unwrap();

        let patch = ExpensePatch::new(created.last_modified).with_amount(amount(45));
        let updated = applier.update(&created.id, &patch).await.unwrap();

        assert_eq!(updated.amount, amount(45));
        assert_eq!(updated.description, created.description);
        assert!(updated.last_modified > created.last_modified);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts_without_writing() {
        let store = Arc::new(MemoryStore::new());
        let applier = applier(&store, DeletePolicy::Unconditional);
        let created = applier.create(&owner(), lunch()).await.unwrap();

        let stale = ExpensePatch::new(created.last_modified - TimeDelta::seconds(1))
            .with_amount(amount(99));
        let outcome = applier
            .apply(&owner(), &PendingChange::update(created.id.clone(), stale))
            .await;

        assert_eq!(outcome, ChangeOutcome::Conflict(Box::new(created.clone())));
        assert_eq!(store.find_by_id(&created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = Arc::new(MemoryStore::new());
        let applier = applier(&store, DeletePolicy::Unconditional);
        let missing = ExpenseId::new("R404");

        let outcome = applier
            .apply(
                &owner(),
                &PendingChange::update(missing.clone(), ExpensePatch::new(Utc::now())),
            )
            .await;
        assert_eq!(outcome, ChangeOutcome::NotFound(missing));
    }

    #[tokio::test]
    async fn test_unconditional_delete_ignores_baseline() {
        let store = Arc::new(MemoryStore::new());
        let applier = applier(&store, DeletePolicy::Unconditional);
        let created = applier.create(&owner(), lunch()).await.unwrap();

        let change = PendingChange::delete(created.id.clone())
            .with_delete_baseline(created.last_modified - TimeDelta::days(1));
        assert!(applier.apply(&owner(), &change).await.is_success());
        assert!(store.is_empty().unwrap());

        let again = applier.apply(&owner(), &change).await;
        assert_eq!(again, ChangeOutcome::NotFound(created.id));
    }

    #[tokio::test]
    async fn test_guarded_delete() {
        let store = Arc::new(MemoryStore::new());
        let applier = applier(&store, DeletePolicy::Guarded);
        let created = applier.create(&owner(), lunch()).await.unwrap();

        let stale = PendingChange::delete(created.id.clone())
            .with_delete_baseline(created.last_modified - TimeDelta::days(1));
        assert!(applier.apply(&owner(), &stale).await.is_conflict());
        assert_eq!(store.len().unwrap(), 1);

        let current = PendingChange::delete(created.id.clone())
            .with_delete_baseline(created.last_modified);
        assert!(applier.apply(&owner(), &current).await.is_success());
        assert!(store.is_empty().unwrap());
    }

    /// Store whose first guarded writes lose a race to a concurrent writer.
    struct RacingStore {
        inner: MemoryStore,
        races: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for RacingStore {
        fn name(&self) -> &str {
            "racing"
        }

        async fn find_by_owner_since(&self, owner: &OwnerId, since: DateTime<Utc>) -> Result<Vec<Expense>> {
            self.inner.find_by_owner_since(owner, since).await
        }

        async fn find_by_owner(&self, owner: &OwnerId) -> Result<Vec<Expense>> {
            self.inner.find_by_owner(owner).await
        }

        async fn find_by_id(&self, id: &ExpenseId) -> Result<Option<Expense>> {
            self.inner.find_by_id(id).await
        }

        async fn create(&self, owner: &OwnerId, new: NewExpense, modified_at: DateTime<Utc>) -> Result<Expense> {
            self.inner.create(owner, new, modified_at).await
        }

        async fn update_in_place(&self, id: &ExpenseId, patch: &ExpensePatch, guard: UpdateGuard) -> Result<Expense> {
            if self.races.load(Ordering::SeqCst) > 0 {
                self.races.fetch_sub(1, Ordering::SeqCst);
                // A concurrent writer touches the description only.
                let current = self.inner.find_by_id(id).await?.ok_or_else(|| not_found(id))?;
                let intruder = ExpensePatch::new(current.last_modified)
                    .with_description(Description::new("Concurrent")?);
                let intruder_guard = UpdateGuard::new(current.last_modified, time::now());
                self.inner.update_in_place(id, &intruder, intruder_guard).await?;
            }
            self.inner.update_in_place(id, patch, guard).await
        }

        async fn delete_by_id(&self, id: &ExpenseId) -> Result<bool> {
            self.inner.delete_by_id(id).await
        }

        async fn delete_guarded(&self, id: &ExpenseId, expected: DateTime<Utc>) -> Result<bool> {
            self.inner.delete_guarded(id, expected).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_resolves_again() {
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            races: AtomicUsize::new(1),
        });
        let applier = ChangeApplier::new(Arc::clone(&store), DeletePolicy::Unconditional);
        let created = applier.create(&owner(), lunch()).await.unwrap();

        // Baseline far in the future: still accepted after the reread.
        let patch = ExpensePatch::new(created.last_modified + TimeDelta::days(1)).with_amount(amount(5));
        let updated = applier.update(&created.id, &patch).await.unwrap();
        assert_eq!(updated.amount, amount(5));
        assert_eq!(updated.description.as_str(), "Concurrent");

        // Baseline equal to the read value: the reread makes it stale.
        store.races.store(1, Ordering::SeqCst);
        let patch = ExpensePatch::new(updated.last_modified).with_amount(amount(6));
        let error = applier.update(&created.id, &patch).await.unwrap_err();
        assert!(error.is_conflict());
        assert_eq!(error.server_version().unwrap().amount, amount(5));
    }
}
