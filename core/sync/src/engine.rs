//! Sync engine that orchestrates one sync call.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use expensync_common::{ExpenseId, OwnerId, Result};
use expensync_storage::RecordStore;

use crate::applier::ChangeApplier;
use crate::conflict::DeletePolicy;
use crate::protocol::{
    BatchEntry, ChangeOutcome, ResultStatus, SyncRequest, SyncResponse, SyncResultEntry,
};

/// Configuration for the sync engine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of records being written at once within a batch.
    pub max_concurrency: usize,
    /// Largest accepted batch of pending changes.
    pub max_batch_size: usize,
    /// Whether delete baselines are checked.
    pub delete_policy: DeletePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            max_batch_size: 500,
            delete_policy: DeletePolicy::Unconditional,
        }
    }
}

/// Main sync engine for reconciling a client's batch with the store.
pub struct SyncEngine<S: RecordStore + ?Sized> {
    /// Record store holding the server state.
    store: Arc<S>,
    /// Applies individual changes.
    applier: ChangeApplier<S>,
    /// Configuration.
    config: SyncConfig,
}

impl<S: RecordStore + 'static> SyncEngine<S> {
    /// Create a new sync engine owning `store`.
    pub fn new(store: S, config: SyncConfig) -> Self {
        Self::with_store(Arc::new(store), config)
    }
}

impl<S: RecordStore + ?Sized> SyncEngine<S> {
    /// Create a sync engine over a shared store.
    pub fn with_store(store: Arc<S>, config: SyncConfig) -> Self {
        let applier = ChangeApplier::new(Arc::clone(&store), config.delete_policy);
        Self {
            store,
            applier,
            config,
        }
    }

    /// Run one sync call.
    ///
    /// The server-changes delta is read before any pending change is applied.
    /// Every pending change gets exactly one result, at its input index.
    ///
    /// # Errors
    /// - `InvalidInput` if the request is rejected by validation
    /// - Any store error from the delta query; no partial response is produced
    pub async fn synchronize(&self, request: SyncRequest) -> Result<SyncResponse> {
        let start = Instant::now();
        request.validate(self.config.max_batch_size)?;

        let owner = &request.owner_id;
        info!(
            "Starting sync for {} since {} with {} pending changes",
            owner,
            request.last_sync_time,
            request.pending_changes.len()
        );

        let server_changes = self
            .store
            .find_by_owner_since(owner, request.last_sync_time)
            .await
            .map_err(|e| {
                error!("Failed to read server changes for {}: {}", owner, e);
                e
            })?;

        let outcomes = self.apply_batch(owner, &request.pending_changes).await;

        let sync_results = request
            .pending_changes
            .iter()
            .zip(outcomes)
            .map(|(entry, outcome)| SyncResultEntry::from_outcome(outcome, entry.client_ref()))
            .collect();

        let response = SyncResponse {
            server_changes,
            sync_results,
        };

        info!(
            "Sync for {} completed in {:?}: {} server changes, {} applied, {} conflicts, {} failed",
            owner,
            start.elapsed(),
            response.server_changes.len(),
            response.count(ResultStatus::Success),
            response.count(ResultStatus::Conflict),
            response.count(ResultStatus::Error)
        );

        Ok(response)
    }

    /// Apply a batch and return outcomes in input order.
    ///
    /// Changes to the same record run in input order; other changes run
    /// concurrently up to `max_concurrency`. Malformed entries fail in place
    /// without touching the store.
    async fn apply_batch(&self, owner: &OwnerId, entries: &[BatchEntry]) -> Vec<ChangeOutcome> {
        let mut slots: Vec<Option<ChangeOutcome>> = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| match entry {
                BatchEntry::Change(_) => None,
                BatchEntry::Malformed { reason, .. } => {
                    let outcome =
                        ChangeOutcome::Error(format!("Invalid {} change: {}", entry.kind(), reason));
                    log_outcome(index, entry.kind(), &outcome);
                    Some(outcome)
                }
            })
            .collect();

        let mut completed = stream::iter(plan_lanes(entries))
            .map(move |lane| async move {
                let mut done = Vec::with_capacity(lane.len());
                for index in lane {
                    let entry = &entries[index];
                    if let Some(change) = entry.change() {
                        let outcome = self.applier.apply(owner, change).await;
                        log_outcome(index, change.kind(), &outcome);
                        done.push((index, outcome));
                    }
                }
                done
            })
            .buffer_unordered(self.config.max_concurrency.max(1));

        while let Some(done) = completed.next().await {
            for (index, outcome) in done {
                slots[index] = Some(outcome);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| ChangeOutcome::Error("Change was not processed".to_string()))
            })
            .collect()
    }
}

/// Group change indices into lanes. Changes sharing a target record share a
/// lane, in input order; each create is a lane of its own. Malformed entries
/// get no lane.
fn plan_lanes(entries: &[BatchEntry]) -> Vec<Vec<usize>> {
    let mut lanes: Vec<Vec<usize>> = Vec::new();
    let mut by_target: HashMap<&ExpenseId, usize> = HashMap::new();

    for (index, entry) in entries.iter().enumerate() {
        let Some(change) = entry.change() else {
            continue;
        };
        match change.target() {
            Some(id) => {
                let lane = *by_target.entry(id).or_insert_with(|| {
                    lanes.push(Vec::new());
                    lanes.len() - 1
                });
                lanes[lane].push(index);
            }
            None => lanes.push(vec![index]),
        }
    }

    lanes
}

fn log_outcome(index: usize, kind: &str, outcome: &ChangeOutcome) {
    match outcome {
        ChangeOutcome::Success { .. } => {
            debug!("Change {} ({}) applied", index, kind);
        }
        ChangeOutcome::Conflict(server) => {
            warn!(
                "Change {} ({}) conflicts with {} modified at {}",
                index, kind, server.id, server.last_modified
            );
        }
        ChangeOutcome::NotFound(id) => {
            warn!("Change {} ({}) targets missing expense {}", index, kind, id);
        }
        ChangeOutcome::Error(message) => {
            warn!("Change {} ({}) failed: {}", index, kind, message);
        }
    }
}
