//! Concurrent full-message retrieval with per-item failure isolation

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::{FullMessage, MailApi};
use crate::error::Result;
use crate::models::MessageRef;

/// Fetches full message content for batches of refs.
///
/// A single ref failing (deleted between listing and fetching, transient
/// refusal that survived retries) yields an `Err` for that ref only; the
/// rest of the batch proceeds. Deciding whether a failure is terminal for
/// the whole run is the orchestrator's call.
pub struct MessageFetcher {
    api: Arc<dyn MailApi>,
    concurrency: usize,
}

impl MessageFetcher {
    pub fn new(api: Arc<dyn MailApi>, concurrency: usize) -> Self {
        Self {
            api,
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch one batch of refs with bounded concurrency.
    ///
    /// Results are paired with their refs; completion order is whatever the
    /// concurrent resolution produces.
    pub async fn fetch_batch(&self, refs: &[MessageRef]) -> Vec<(MessageRef, Result<FullMessage>)> {
        debug!(
            "Fetching batch of {} messages with {} concurrent workers",
            refs.len(),
            self.concurrency
        );

        let results: Vec<(MessageRef, Result<FullMessage>)> = stream::iter(refs.iter().cloned())
            .map(|message_ref| {
                let api = Arc::clone(&self.api);
                async move {
                    let result = api.get_message(&message_ref.id).await;
                    if let Err(e) = &result {
                        warn!("Failed to fetch message {}: {}", message_ref.id, e);
                    }
                    (message_ref, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if failed > 0 {
            warn!("{}/{} fetches in batch failed", failed, results.len());
        }

        results
    }
}
