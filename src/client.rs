//! Mail provider API client with rate limiting and retry logic

use async_trait::async_trait;
use google_gmail1::{
    api::{Message, ModifyMessageRequest},
    hyper_rustls, hyper_util, Gmail,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::auth::{SCOPE_GMAIL_MODIFY, SCOPE_GMAIL_READONLY};
use crate::error::{Result, SyncError};
use crate::models::MessageRef;
use crate::rate_limiter::{QuotaCost, QuotaRateLimiter};

/// Type alias for the Gmail hub to simplify signatures
pub type GmailHub =
    Gmail<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

/// Full message payload as returned by the provider
pub type FullMessage = Message;

/// One page of a listing query
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub refs: Vec<MessageRef>,
    pub next_page_token: Option<String>,
}

/// Page-level mail API operations.
///
/// This is the seam between the sync engine and the provider: pagination,
/// batching and error-isolation policy all live above it, so tests drive
/// those policies by mocking single calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailApi: Send + Sync {
    /// Fetch one page of message refs matching a query
    async fn list_page(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage>;

    /// Fetch a full message by provider id
    async fn get_message(&self, id: &str) -> Result<FullMessage>;

    /// Fetch the binary payload of an attachment
    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;

    /// Remove the UNREAD label from a message
    async fn mark_read(&self, id: &str) -> Result<()>;
}

/// Production Gmail client
///
/// Wraps the Gmail hub with:
/// - a semaphore bounding concurrent in-flight requests
/// - a quota-unit token bucket matching the provider's per-user rate
/// - a bounded timeout per call
/// - exponential backoff retry for transient errors
pub struct GmailMailApi {
    hub: GmailHub,
    rate_limiter: QuotaRateLimiter,
    semaphore: Arc<Semaphore>,
    request_timeout: Duration,
}

impl GmailMailApi {
    pub fn new(hub: GmailHub, max_concurrent: usize, request_timeout: Duration) -> Self {
        Self {
            hub,
            rate_limiter: QuotaRateLimiter::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            request_timeout,
        }
    }

    async fn acquire_slot(&self) -> Result<tokio::sync::SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| SyncError::Unknown(format!("Failed to acquire request slot: {}", e)))
    }

    /// Execute an async operation with exponential backoff retry
    async fn with_retry<T, F, Fut>(
        operation_name: &str,
        max_retries: u32,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() && attempts <= max_retries => {
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                        operation_name,
                        attempts,
                        max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(30));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Wrap a provider call in the configured timeout
    async fn with_timeout<T, Fut>(&self, operation_name: &str, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{} timed out after {:?}",
                    operation_name, self.request_timeout
                );
                Err(SyncError::NetworkError(format!(
                    "{} timed out after {:?}",
                    operation_name, self.request_timeout
                )))
            }
        }
    }
}

#[async_trait]
impl MailApi for GmailMailApi {
    async fn list_page(
        &self,
        query: &str,
        page_size: u32,
        page_token: Option<String>,
    ) -> Result<MessagePage> {
        let _permit = self.rate_limiter.acquire(QuotaCost::Read).await;
        let _slot = self.acquire_slot().await?;

        let query = query.to_string();

        Self::with_retry("list_page", 3, || {
            let query = query.clone();
            let page_token = page_token.clone();
            async move {
                self.with_timeout("list_page", async {
                    let mut call = self
                        .hub
                        .users()
                        .messages_list("me")
                        .q(&query)
                        .max_results(page_size);

                    if let Some(token) = page_token.as_deref() {
                        call = call.page_token(token);
                    }

                    let (_, response) = call.add_scope(SCOPE_GMAIL_READONLY).doit().await?;

                    let refs = response
                        .messages
                        .unwrap_or_default()
                        .into_iter()
                        .filter_map(|m| {
                            let id = m.id?;
                            let thread_id = m.thread_id.unwrap_or_default();
                            Some(MessageRef { id, thread_id })
                        })
                        .collect();

                    Ok(MessagePage {
                        refs,
                        next_page_token: response.next_page_token,
                    })
                })
                .await
            }
        })
        .await
    }

    async fn get_message(&self, id: &str) -> Result<FullMessage> {
        let _permit = self.rate_limiter.acquire(QuotaCost::Read).await;
        let _slot = self.acquire_slot().await?;

        let id = id.to_string();
        Self::with_retry("get_message", 3, || {
            let id = id.clone();
            async move {
                self.with_timeout("get_message", async {
                    debug!("Fetching full message {}", id);
                    let (_, message) = self
                        .hub
                        .users()
                        .messages_get("me", &id)
                        .format("full")
                        .add_scope(SCOPE_GMAIL_READONLY)
                        .doit()
                        .await?;
                    Ok(message)
                })
                .await
            }
        })
        .await
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>> {
        let _permit = self.rate_limiter.acquire(QuotaCost::Read).await;
        let _slot = self.acquire_slot().await?;

        let message_id = message_id.to_string();
        let attachment_id = attachment_id.to_string();
        Self::with_retry("get_attachment", 3, || {
            let message_id = message_id.clone();
            let attachment_id = attachment_id.clone();
            async move {
                self.with_timeout("get_attachment", async {
                    let (_, body) = self
                        .hub
                        .users()
                        .messages_attachments_get("me", &message_id, &attachment_id)
                        .add_scope(SCOPE_GMAIL_READONLY)
                        .doit()
                        .await?;

                    body.data.ok_or_else(|| {
                        SyncError::AttachmentUnavailable(format!(
                            "no payload for attachment {} on message {}",
                            attachment_id, message_id
                        ))
                    })
                })
                .await
            }
        })
        .await
    }

    async fn mark_read(&self, id: &str) -> Result<()> {
        let _permit = self.rate_limiter.acquire(QuotaCost::Modify).await;
        let _slot = self.acquire_slot().await?;

        let id = id.to_string();
        Self::with_retry("mark_read", 3, || {
            let id = id.clone();
            async move {
                self.with_timeout("mark_read", async {
                    let request = ModifyMessageRequest {
                        add_label_ids: None,
                        remove_label_ids: Some(vec!["UNREAD".to_string()]),
                    };

                    self.hub
                        .users()
                        .messages_modify(request, "me", &id)
                        .add_scope(SCOPE_GMAIL_MODIFY)
                        .doit()
                        .await?;

                    Ok(())
                })
                .await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_retry_succeeds_after_transient_error() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailApi::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                let current = count.fetch_add(1, Ordering::SeqCst);
                if current < 2 {
                    // First two attempts fail with transient error
                    Err(SyncError::NetworkError("Connection timeout".to_string()))
                } else {
                    Ok("success".to_string())
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_fails_on_permanent_error() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailApi::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                // Permanent error - should not retry
                Err::<String, _>(SyncError::AuthError("Invalid credentials".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        // Should only attempt once, no retries for permanent errors
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_all_retries() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = Arc::clone(&attempt_count);

        let result = GmailMailApi::with_retry("test_op", 3, || {
            let count = Arc::clone(&attempt_count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                // Always fail with transient error
                Err::<String, _>(SyncError::RateLimitExceeded { retry_after: 1 })
            }
        })
        .await;

        assert!(result.is_err());
        // Should attempt 4 times: initial + 3 retries
        assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_timeout_triggers_network_error() {
        use tokio::time::sleep;

        let timeout_duration = Duration::from_millis(100);
        let slow_operation = async {
            sleep(Duration::from_millis(200)).await;
            Ok::<String, SyncError>("too slow".to_string())
        };

        let result = tokio::time::timeout(timeout_duration, slow_operation).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_mock_list_page() {
        let mut mock = MockMailApi::new();
        mock.expect_list_page()
            .returning(|_, _, _| {
                Ok(MessagePage {
                    refs: vec![MessageRef {
                        id: "m1".to_string(),
                        thread_id: "t1".to_string(),
                    }],
                    next_page_token: None,
                })
            })
            .times(1);

        let page = mock.list_page("label:INBOX", 100, None).await.unwrap();
        assert_eq!(page.refs.len(), 1);
        assert!(page.next_page_token.is_none());
    }
}
