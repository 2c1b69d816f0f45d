//! Common test utilities and fixtures

use async_trait::async_trait;
use google_gmail1::api::{Message, MessagePart, MessagePartBody, MessagePartHeader};
use mockall::mock;
use std::sync::Arc;

use mailsink::auth::{CredentialSupplier, SyncClients};
use mailsink::client::{FullMessage, MailApi, MessagePage};
use mailsink::error::Result;
use mailsink::models::{AttachmentDescriptor, MessageRef, NewAttachment, Principal};
use mailsink::offload::AttachmentStore;

/// Create a test MessageRef
pub fn message_ref(id: &str) -> MessageRef {
    MessageRef {
        id: id.to_string(),
        thread_id: format!("thread_{}", id),
    }
}

/// Create a listing page from refs
pub fn page(ids: Vec<&str>, next_page_token: Option<&str>) -> MessagePage {
    MessagePage {
        refs: ids.into_iter().map(message_ref).collect(),
        next_page_token: next_page_token.map(|t| t.to_string()),
    }
}

fn header(name: &str, value: &str) -> MessagePartHeader {
    MessagePartHeader {
        name: Some(name.to_string()),
        value: Some(value.to_string()),
    }
}

fn text_part(mime_type: &str, data: &str) -> MessagePart {
    MessagePart {
        mime_type: Some(mime_type.to_string()),
        body: Some(MessagePartBody {
            data: Some(data.as_bytes().to_vec()),
            size: Some(data.len() as i32),
            attachment_id: None,
        }),
        ..Default::default()
    }
}

fn attachment_part(filename: &str, mime_type: &str, attachment_id: &str) -> MessagePart {
    MessagePart {
        mime_type: Some(mime_type.to_string()),
        filename: Some(filename.to_string()),
        part_id: Some("2".to_string()),
        body: Some(MessagePartBody {
            data: None,
            size: Some(2048),
            attachment_id: Some(attachment_id.to_string()),
        }),
        ..Default::default()
    }
}

fn base_message(id: &str, payload: MessagePart) -> FullMessage {
    Message {
        id: Some(id.to_string()),
        thread_id: Some(format!("thread_{}", id)),
        snippet: Some("Email snippet...".to_string()),
        label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
        internal_date: Some(1_704_124_800_000),
        payload: Some(payload),
        ..Default::default()
    }
}

/// A plain-text message with standard headers
pub fn plain_message(id: &str, from: &str, subject: &str, body: &str) -> FullMessage {
    let mut payload = text_part("text/plain", body);
    payload.headers = Some(vec![
        header("From", from),
        header("Subject", subject),
        header("To", "me@example.com"),
        header("Date", "Mon, 1 Jan 2024 10:00:00 -0800"),
    ]);
    base_message(id, payload)
}

/// A multipart message carrying a text body plus attachments
pub fn message_with_attachments(
    id: &str,
    from: &str,
    subject: &str,
    attachments: Vec<(&str, &str, &str)>,
) -> FullMessage {
    let mut parts = vec![text_part("text/plain", "see attached")];
    for (filename, mime_type, attachment_id) in attachments {
        parts.push(attachment_part(filename, mime_type, attachment_id));
    }

    let payload = MessagePart {
        mime_type: Some("multipart/mixed".to_string()),
        headers: Some(vec![
            header("From", from),
            header("Subject", subject),
            header("To", "me@example.com"),
            header("Cc", "cc@example.com"),
            header("Date", "Mon, 1 Jan 2024 10:00:00 -0800"),
        ]),
        parts: Some(parts),
        ..Default::default()
    };
    base_message(id, payload)
}

/// A message with no Subject or From headers
pub fn headerless_message(id: &str) -> FullMessage {
    let mut payload = text_part("text/plain", "anonymous body");
    payload.headers = Some(vec![header("To", "me@example.com")]);
    base_message(id, payload)
}

/// A successful offload result for a descriptor
pub fn stored_for(descriptor: &AttachmentDescriptor) -> NewAttachment {
    NewAttachment {
        filename: descriptor.filename.clone(),
        mime_type: descriptor.mime_type.clone(),
        size: descriptor.size,
        drive_file_id: format!("drive_{}", descriptor.filename),
        web_link: format!(
            "https://drive.google.com/file/d/drive_{}/view",
            descriptor.filename
        ),
    }
}

// Mock implementation of MailApi for testing
mock! {
    pub MailApi {}

    #[async_trait]
    impl MailApi for MailApi {
        async fn list_page(
            &self,
            query: &str,
            page_size: u32,
            page_token: Option<String>,
        ) -> Result<MessagePage>;
        async fn get_message(&self, id: &str) -> Result<FullMessage>;
        async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>>;
        async fn mark_read(&self, id: &str) -> Result<()>;
    }
}

// Mock implementation of AttachmentStore for testing
mock! {
    pub AttachmentStore {}

    #[async_trait]
    impl AttachmentStore for AttachmentStore {
        async fn offload(
            &self,
            message_id: &str,
            descriptor: &AttachmentDescriptor,
        ) -> Result<NewAttachment>;
    }
}

/// Supplier handing out pre-built mocks, standing in for the OAuth flow
pub struct FixedSupplier {
    pub mail: Arc<dyn MailApi>,
    pub attachments: Arc<dyn AttachmentStore>,
}

impl FixedSupplier {
    pub fn new(mail: Arc<dyn MailApi>, attachments: Arc<dyn AttachmentStore>) -> Self {
        Self { mail, attachments }
    }
}

#[async_trait]
impl CredentialSupplier for FixedSupplier {
    async fn clients_for(&self, _principal: &Principal) -> Result<SyncClients> {
        Ok(SyncClients {
            mail: Arc::clone(&self.mail),
            attachments: Arc::clone(&self.attachments),
        })
    }
}
