//! Sync orchestration: one run per principal, composed from the
//! checkpoint tracker, lister, fetcher, extractor, offloader and store.
//!
//! A run walks ReadingCheckpoint -> Listing -> Fetching -> Processing ->
//! AdvancingCheckpoint. Item-level failures are tallied into the run report;
//! credential and listing failures are terminal and leave the checkpoint
//! untouched so the next run retries the same window.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::auth::{CredentialSupplier, SyncClients};
use crate::checkpoint::CheckpointTracker;
use crate::client::FullMessage;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::extractor;
use crate::fetcher::MessageFetcher;
use crate::lister::MessageLister;
use crate::models::{MessageRef, Principal, SyncReport};
use crate::store::{MailStore, NewMessage};

/// Pull-based synchronization engine.
///
/// Dependencies are explicit constructor inputs; the engine owns no global
/// state beyond the set of in-flight runs used to serialize per-principal
/// work. Runs for different principals proceed in parallel.
pub struct SyncEngine {
    supplier: Arc<dyn CredentialSupplier>,
    store: Arc<MailStore>,
    config: SyncConfig,
    active_runs: Mutex<HashSet<i64>>,
}

/// Removes the principal from the active set when a run ends, however it ends
struct RunGuard<'a> {
    engine: &'a SyncEngine,
    principal_id: i64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.engine
            .active_runs
            .lock()
            .unwrap()
            .remove(&self.principal_id);
    }
}

impl SyncEngine {
    pub fn new(
        supplier: Arc<dyn CredentialSupplier>,
        store: Arc<MailStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            supplier,
            store,
            config,
            active_runs: Mutex::new(HashSet::new()),
        }
    }

    fn try_begin(&self, principal_id: i64) -> Result<RunGuard<'_>> {
        let mut active = self.active_runs.lock().unwrap();
        if !active.insert(principal_id) {
            return Err(SyncError::SyncInProgress(principal_id));
        }
        Ok(RunGuard {
            engine: self,
            principal_id,
        })
    }

    /// Run one synchronization for a principal, to completion.
    ///
    /// Returns the run report, or a terminal error (credential rejected,
    /// listing aborted, unknown principal, overlapping run).
    pub async fn run_sync(&self, principal_id: i64) -> Result<SyncReport> {
        let _guard = self.try_begin(principal_id)?;

        let principal = self
            .store
            .principal_by_id(principal_id)?
            .ok_or_else(|| SyncError::UnknownPrincipal(principal_id.to_string()))?;

        info!(principal_id, email = %principal.email, "Sync run starting");

        let clients = self.supplier.clients_for(&principal).await?;

        // Checkpoint advances to run start, not newest message time, so the
        // next window overlaps this one slightly; duplicates are absorbed by
        // idempotent persistence.
        let run_start = Utc::now();

        debug!(principal_id, "Reading checkpoint");
        let tracker = CheckpointTracker::new(Arc::clone(&self.store), self.config.lookback_days);
        let since = tracker.get(principal_id);

        debug!(principal_id, %since, "Listing new messages");
        let lister = MessageLister::new(Arc::clone(&clients.mail), self.config.page_size);
        let refs = lister
            .list(since, &self.config.inbox_label, self.config.max_results)
            .await?;

        if refs.is_empty() {
            info!(principal_id, "No new messages in window");
            tracker.advance(principal_id, run_start);
            return Ok(SyncReport::empty(principal_id, since));
        }

        let total_count = refs.len();
        info!(principal_id, total_count, "Processing messages");

        let fetcher = MessageFetcher::new(Arc::clone(&clients.mail), self.config.batch_size);
        let mut success_count = 0usize;
        let mut error_count = 0usize;

        // Batches run sequentially to bound memory and in-flight load;
        // fetch and persistence fan out concurrently within a batch.
        for batch in refs.chunks(self.config.batch_size) {
            debug!(principal_id, batch_len = batch.len(), "Fetching batch");
            let fetched = fetcher.fetch_batch(batch).await;

            // A credential rejected mid-run is terminal, not per-item
            for (_, result) in &fetched {
                if let Err(e) = result {
                    if e.requires_reauth() {
                        return Err(SyncError::AuthError(format!(
                            "credential rejected during fetch: {}",
                            e
                        )));
                    }
                }
            }

            let outcomes: Vec<bool> = stream::iter(fetched)
                .map(|(message_ref, result)| {
                    self.process_item(&clients, principal_id, message_ref, result)
                })
                .buffer_unordered(self.config.batch_size)
                .collect()
                .await;

            success_count += outcomes.iter().filter(|ok| **ok).count();
            error_count += outcomes.iter().filter(|ok| !**ok).count();
        }

        // Partial success still advances by default: forward progress beats
        // refetching a poison message forever. Configurable for operators
        // who prefer completeness.
        if error_count == 0 || self.config.advance_checkpoint_on_errors {
            tracker.advance(principal_id, run_start);
        } else {
            warn!(
                principal_id,
                error_count, "Holding checkpoint back due to item failures"
            );
        }

        let report = SyncReport {
            principal_id,
            success_count,
            error_count,
            total_count,
            window_start: since,
            completed_at: Utc::now(),
        };
        info!(
            principal_id,
            success = report.success_count,
            errors = report.error_count,
            total = report.total_count,
            "Sync run finished"
        );
        Ok(report)
    }

    /// Run sync for every registered principal with bounded parallelism.
    ///
    /// Per-principal outcomes are independent; one failing run never stops
    /// the others.
    pub async fn run_sync_all(&self) -> Result<Vec<(Principal, Result<SyncReport>)>> {
        let principals = self.store.list_principals()?;
        info!("Syncing {} principals", principals.len());

        let results = stream::iter(principals)
            .map(|principal| async move {
                let report = self.run_sync(principal.id).await;
                if let Err(e) = &report {
                    warn!(
                        principal_id = principal.id,
                        email = %principal.email,
                        "Sync failed: {}",
                        e
                    );
                }
                (principal, report)
            })
            .buffer_unordered(self.config.parallel_principals)
            .collect()
            .await;

        Ok(results)
    }

    /// Process one fetched message: extract, persist, offload, link.
    ///
    /// Returns whether the item counts as a success. Attachment failures do
    /// not fail the message; the row simply ends up with fewer links.
    async fn process_item(
        &self,
        clients: &SyncClients,
        principal_id: i64,
        message_ref: MessageRef,
        fetch_result: Result<FullMessage>,
    ) -> bool {
        let message = match fetch_result {
            Ok(message) => message,
            Err(e) => {
                warn!(gmail_id = %message_ref.id, "Fetch failed: {}", e);
                return false;
            }
        };

        let content = extractor::extract(&message);
        let descriptors = content.attachments.clone();
        let new_message = NewMessage::from_extracted(principal_id, &message_ref, content);
        let was_unread = !new_message.is_read;

        let outcome = match self.store.store_message(&new_message) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(gmail_id = %message_ref.id, "Persistence failed: {}", e);
                return false;
            }
        };

        if !outcome.is_created() {
            // Idempotency short-circuit: row exists, nothing to redo
            debug!(gmail_id = %message_ref.id, "Already stored, skipping");
            return true;
        }

        let message_row_id = outcome.message().id;
        for descriptor in &descriptors {
            match clients.attachments.offload(&message_ref.id, descriptor).await {
                Ok(attachment) => {
                    if let Err(e) = self.store.add_attachment(message_row_id, &attachment) {
                        warn!(
                            gmail_id = %message_ref.id,
                            filename = %descriptor.filename,
                            "Failed to link attachment: {}",
                            e
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        gmail_id = %message_ref.id,
                        filename = %descriptor.filename,
                        "Attachment offload failed, message keeps fewer links: {}",
                        e
                    );
                }
            }
        }

        if self.config.mark_read && was_unread {
            if let Err(e) = clients.mail.mark_read(&message_ref.id).await {
                warn!(gmail_id = %message_ref.id, "Read-marking failed: {}", e);
            }
        }

        true
    }
}
