//! Checkpoint policy for incremental sync windows
//!
//! The checkpoint marks the upper bound of history already covered for a
//! principal. Policy decisions live here, storage lives in [`MailStore`]:
//! a missing or unreadable checkpoint degrades to a bounded default window,
//! and a failed advance is logged rather than propagated since the next run
//! simply re-covers the window against an idempotent store.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::MailStore;

pub struct CheckpointTracker {
    store: Arc<MailStore>,
    lookback: Duration,
}

impl CheckpointTracker {
    pub fn new(store: Arc<MailStore>, lookback_days: u32) -> Self {
        Self {
            store,
            lookback: Duration::days(i64::from(lookback_days)),
        }
    }

    /// Lower bound for the next sync window.
    ///
    /// Returns the stored checkpoint, or `now - lookback` when the principal
    /// has never synced or the read fails.
    pub fn get(&self, principal_id: i64) -> DateTime<Utc> {
        let default = Utc::now() - self.lookback;

        match self.store.checkpoint(principal_id) {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => {
                info!(
                    principal_id,
                    "No checkpoint yet, starting from default window ({})", default
                );
                default
            }
            Err(e) => {
                warn!(
                    principal_id,
                    "Checkpoint read failed ({}), falling back to default window", e
                );
                default
            }
        }
    }

    /// Unconditionally overwrite the checkpoint.
    ///
    /// Called with the run-start instant, not the newest message time, so
    /// messages landing mid-run with slightly earlier server timestamps are
    /// picked up by the overlap on the next run.
    pub fn advance(&self, principal_id: i64, timestamp: DateTime<Utc>) {
        match self.store.set_checkpoint(principal_id, timestamp) {
            Ok(()) => info!(principal_id, "Checkpoint advanced to {}", timestamp),
            Err(e) => warn!(
                principal_id,
                "Checkpoint write failed ({}), window will be re-covered next run", e
            ),
        }
    }
}
