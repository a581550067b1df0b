//! Conflict detection.
//!
//! Staleness is decided purely by timestamp: a client's change is stale when
//! the server record was modified after the client's baseline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use expensync_common::Expense;

/// Outcome of comparing a baseline against the server record.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The change may be applied.
    Accept,
    /// The server record is newer than the baseline. Carries that record.
    Conflict(Box<Expense>),
}

impl Resolution {
    pub fn is_accept(&self) -> bool {
        matches!(self, Resolution::Accept)
    }
}

/// Decide whether a change made against `baseline` may overwrite `current`.
///
/// - A missing record is accepted; the caller decides whether that means
///   create or not-found.
/// - Equal timestamps are accepted.
pub fn resolve(current: Option<&Expense>, baseline: DateTime<Utc>) -> Resolution {
    match current {
        Some(record) if record.last_modified > baseline => {
            Resolution::Conflict(Box::new(record.clone()))
        }
        _ => Resolution::Accept,
    }
}

/// How deletes interact with conflict detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Deletes always win; any baseline is ignored.
    #[default]
    Unconditional,
    /// A delete carrying a baseline is checked like an update. Deletes
    /// without a baseline stay unconditional.
    Guarded,
}

impl DeletePolicy {
    /// The baseline to check a delete against, if any.
    pub fn baseline_for(&self, baseline: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self {
            DeletePolicy::Unconditional => None,
            DeletePolicy::Guarded => baseline,
        }
    }
}
