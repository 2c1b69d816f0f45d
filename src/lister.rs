//! Incremental message listing with server-side filtering and pagination
//!
//! Listing pushes the label and time-window constraints down to the provider
//! so only relevant refs cross the wire. The resulting sequence of pages is
//! lazy and non-restartable; order is provider-defined and callers must not
//! assume chronology.

use async_stream::stream;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info};

use crate::client::{MailApi, MessagePage};
use crate::error::Result;
use crate::models::MessageRef;

/// Build the provider query for one sync window.
///
/// `after:` takes epoch seconds and is inclusive at second granularity,
/// which combined with the run-start checkpoint gives a small, safe overlap
/// between consecutive runs.
pub fn build_query(label: &str, since: DateTime<Utc>) -> String {
    format!("label:{} after:{}", label, since.timestamp())
}

/// Paginating lister over the page-level mail API
pub struct MessageLister {
    api: Arc<dyn MailApi>,
    page_size: u32,
}

impl MessageLister {
    pub fn new(api: Arc<dyn MailApi>, page_size: u32) -> Self {
        Self { api, page_size }
    }

    /// Lazy stream of listing pages for a query.
    ///
    /// Each page is requested only as the stream is polled past the previous
    /// one. The stream ends after the first page without a continuation
    /// token, or after the first error.
    pub fn pages(&self, query: String) -> Pin<Box<dyn Stream<Item = Result<MessagePage>> + Send>> {
        let api = Arc::clone(&self.api);
        let page_size = self.page_size;

        Box::pin(stream! {
            let mut page_token: Option<String> = None;

            loop {
                let result = api.list_page(&query, page_size, page_token.clone()).await;

                match result {
                    Ok(page) => {
                        debug!(
                            "Listed page with {} refs, continuation: {}",
                            page.refs.len(),
                            page.next_page_token.is_some()
                        );
                        let next = page.next_page_token.clone();
                        yield Ok(page);

                        match next {
                            Some(token) => page_token = Some(token),
                            None => break,
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        })
    }

    /// Collect refs matching the window, up to `max_results`.
    ///
    /// All-or-nothing: a failed page discards everything collected so far
    /// and propagates the error, since an incomplete page set carries no
    /// continuation guarantee. Once the cap is reached no further page
    /// requests are issued.
    pub async fn list(
        &self,
        since: DateTime<Utc>,
        label: &str,
        max_results: usize,
    ) -> Result<Vec<MessageRef>> {
        let query = build_query(label, since);
        info!("Listing messages: {}", query);

        let mut pages = self.pages(query);
        let mut refs: Vec<MessageRef> = Vec::new();

        while let Some(page) = pages.next().await {
            let page = page?;
            refs.extend(page.refs);

            if refs.len() >= max_results {
                debug!("Reached listing cap of {} refs", max_results);
                break;
            }
        }

        refs.truncate(max_results);
        info!("Listing complete: {} refs", refs.len());
        Ok(refs)
    }
}
