//! Sync request and response wire types.
//!
//! Field names are camelCase on the wire:
//!
//! ```text
//! Request:  { ownerId, lastSyncTime, pendingChanges: [ {type, id?, clientRef?, data?} ] }
//! Response: { serverChanges: [Record...], syncResults: [ {status, id?, clientRef?, serverVersion?, message?} ] }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use expensync_common::{Error, Expense, ExpenseId, ExpensePatch, NewExpense, OwnerId, Result};

/// Optional baseline attached to a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteBaseline {
    pub last_modified: DateTime<Utc>,
}

/// A mutation queued on a client while offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PendingChange {
    Create {
        #[serde(rename = "clientRef", default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
        data: NewExpense,
    },
    Update {
        id: ExpenseId,
        #[serde(rename = "clientRef", default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
        data: ExpensePatch,
    },
    Delete {
        id: ExpenseId,
        #[serde(rename = "clientRef", default, skip_serializing_if = "Option::is_none")]
        client_ref: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<DeleteBaseline>,
    },
}

impl PendingChange {
    pub fn create(data: NewExpense) -> Self {
        PendingChange::Create {
            client_ref: None,
            data,
        }
    }

    pub fn update(id: ExpenseId, data: ExpensePatch) -> Self {
        PendingChange::Update {
            id,
            client_ref: None,
            data,
        }
    }

    pub fn delete(id: ExpenseId) -> Self {
        PendingChange::Delete {
            id,
            client_ref: None,
            data: None,
        }
    }

    /// Attach a client-local reference, echoed back in the result.
    pub fn with_client_ref(mut self, reference: impl Into<String>) -> Self {
        let reference = Some(reference.into());
        match &mut self {
            PendingChange::Create { client_ref, .. }
            | PendingChange::Update { client_ref, .. }
            | PendingChange::Delete { client_ref, .. } => *client_ref = reference,
        }
        self
    }

    /// Attach a baseline to a delete. No effect on other kinds.
    pub fn with_delete_baseline(mut self, baseline: DateTime<Utc>) -> Self {
        if let PendingChange::Delete { data, .. } = &mut self {
            *data = Some(DeleteBaseline {
                last_modified: baseline,
            });
        }
        self
    }

    pub fn client_ref(&self) -> Option<&str> {
        match self {
            PendingChange::Create { client_ref, .. }
            | PendingChange::Update { client_ref, .. }
            | PendingChange::Delete { client_ref, .. } => client_ref.as_deref(),
        }
    }

    /// Record targeted by this change. `None` for creates.
    pub fn target(&self) -> Option<&ExpenseId> {
        match self {
            PendingChange::Create { .. } => None,
            PendingChange::Update { id, .. } | PendingChange::Delete { id, .. } => Some(id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingChange::Create { .. } => "create",
            PendingChange::Update { .. } => "update",
            PendingChange::Delete { .. } => "delete",
        }
    }
}

/// One entry of a request's batch.
///
/// An entry that does not parse as a [`PendingChange`] is kept as sent,
/// together with the parse error, so that it fails alone at its index.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEntry {
    Change(PendingChange),
    Malformed { raw: Value, reason: String },
}

impl BatchEntry {
    pub fn change(&self) -> Option<&PendingChange> {
        match self {
            BatchEntry::Change(change) => Some(change),
            BatchEntry::Malformed { .. } => None,
        }
    }

    pub fn client_ref(&self) -> Option<&str> {
        match self {
            BatchEntry::Change(change) => change.client_ref(),
            BatchEntry::Malformed { raw, .. } => raw.get("clientRef").and_then(Value::as_str),
        }
    }

    /// Record targeted by this entry. `None` for creates and malformed entries.
    pub fn target(&self) -> Option<&ExpenseId> {
        self.change().and_then(PendingChange::target)
    }

    /// Change type as sent; "unknown" if a malformed entry has none.
    pub fn kind(&self) -> &str {
        match self {
            BatchEntry::Change(change) => change.kind(),
            BatchEntry::Malformed { raw, .. } => {
                raw.get("type").and_then(Value::as_str).unwrap_or("unknown")
            }
        }
    }
}

impl From<PendingChange> for BatchEntry {
    fn from(change: PendingChange) -> Self {
        BatchEntry::Change(change)
    }
}

impl Serialize for BatchEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            BatchEntry::Change(change) => change.serialize(serializer),
            BatchEntry::Malformed { raw, .. } => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BatchEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(match PendingChange::deserialize(&raw) {
            Ok(change) => BatchEntry::Change(change),
            Err(e) => BatchEntry::Malformed {
                reason: e.to_string(),
                raw,
            },
        })
    }
}

fn initial_sync_time() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// Absent and null both mean a first sync.
fn sync_time_or_initial<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error> {
    Ok(Option::<DateTime<Utc>>::deserialize(deserializer)?.unwrap_or_else(initial_sync_time))
}

/// One sync call from a client.
///
/// The envelope must parse for the call to proceed; individual entries of
/// `pendingChanges` may not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(alias = "userId")]
    pub owner_id: OwnerId,
    /// Exclusive lower bound of the delta. Absent or null on a client's first
    /// sync, which then receives every record.
    #[serde(default = "initial_sync_time", deserialize_with = "sync_time_or_initial")]
    pub last_sync_time: DateTime<Utc>,
    #[serde(default)]
    pub pending_changes: Vec<BatchEntry>,
}

impl SyncRequest {
    pub fn new(owner_id: OwnerId, last_sync_time: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            last_sync_time,
            pending_changes: Vec::new(),
        }
    }

    pub fn with_change(mut self, change: PendingChange) -> Self {
        self.pending_changes.push(BatchEntry::Change(change));
        self
    }

    /// Reject requests the engine will not process.
    ///
    /// # Errors
    /// - `InvalidInput` if the batch exceeds `max_batch_size`
    pub fn validate(&self, max_batch_size: usize) -> Result<()> {
        if self.pending_changes.len() > max_batch_size {
            return Err(Error::InvalidInput(format!(
                "Too many pending changes: {} > {}",
                self.pending_changes.len(),
                max_batch_size
            )));
        }
        Ok(())
    }
}

/// Result of applying one pending change.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeOutcome {
    /// Applied. `id` is set for creates.
    Success { id: Option<ExpenseId> },
    /// Baseline was stale. Carries the unmodified server record.
    Conflict(Box<Expense>),
    /// Target record does not exist.
    NotFound(ExpenseId),
    /// The entry could not be read, or storage failed while applying it.
    Error(String),
}

impl ChangeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ChangeOutcome::Success { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ChangeOutcome::Conflict(_))
    }
}

/// Status reported for one change on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Conflict,
    Error,
}

/// Per-change entry of a sync response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResultEntry {
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ExpenseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<Expense>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncResultEntry {
    /// Build the wire entry for an outcome.
    ///
    /// NotFound is reported as an error with a message naming the record.
    pub fn from_outcome(outcome: ChangeOutcome, client_ref: Option<&str>) -> Self {
        let mut entry = Self {
            status: ResultStatus::Success,
            id: None,
            client_ref: client_ref.map(str::to_string),
            server_version: None,
            message: None,
        };

        match outcome {
            ChangeOutcome::Success { id } => entry.id = id,
            ChangeOutcome::Conflict(server) => {
                entry.status = ResultStatus::Conflict;
                entry.id = Some(server.id.clone());
                entry.server_version = Some(*server);
            }
            ChangeOutcome::NotFound(id) => {
                entry.status = ResultStatus::Error;
                entry.message = Some(format!("Expense not found: {}", id));
                entry.id = Some(id);
            }
            ChangeOutcome::Error(message) => {
                entry.status = ResultStatus::Error;
                entry.message = Some(message);
            }
        }

        entry
    }
}

/// Combined answer to one sync call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Records of the owner modified after the request's last-sync time.
    pub server_changes: Vec<Expense>,
    /// One entry per pending change, in request order.
    pub sync_results: Vec<SyncResultEntry>,
}

impl SyncResponse {
    /// Number of results with the given status.
    pub fn count(&self, status: ResultStatus) -> usize {
        self.sync_results.iter().filter(|r| r.status == status).count()
    }
}
