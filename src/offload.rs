//! Attachment offloading into Drive
//!
//! Moves attachment binaries out of the mailbox into durable object storage.
//! All uploads land in one well-known folder, located by name and created on
//! first use; the folder id is cached for the life of the store so
//! concurrent offloads on a fresh account race on a single lookup instead of
//! creating duplicate folders.

use async_trait::async_trait;
use google_drive3::{api::File, hyper_rustls, hyper_util, DriveHub};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::SCOPE_DRIVE_FILE;
use crate::client::MailApi;
use crate::error::{drive_error, Result, SyncError};
use crate::models::{AttachmentDescriptor, NewAttachment};

/// Type alias for the Drive hub to simplify signatures
pub type Drive =
    DriveHub<hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>>;

const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Durable storage for attachment payloads.
///
/// An offload failure never fails the owning message; the orchestrator logs
/// it and persists the message with fewer links.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Download the payload for a descriptor and push it into the store,
    /// returning a persistence-ready reference.
    async fn offload(
        &self,
        message_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> Result<NewAttachment>;
}

/// Search query locating the attachment folder by name
fn folder_query(folder_name: &str) -> String {
    format!(
        "name = '{}' and mimeType = '{}' and trashed = false",
        folder_name.replace('\'', "\\'"),
        FOLDER_MIME_TYPE
    )
}

/// Production offloader backed by Drive
pub struct DriveAttachmentStore {
    hub: Drive,
    mail: Arc<dyn MailApi>,
    folder_name: String,
    folder_id: OnceCell<String>,
}

impl DriveAttachmentStore {
    pub fn new(hub: Drive, mail: Arc<dyn MailApi>, folder_name: String) -> Self {
        Self {
            hub,
            mail,
            folder_name,
            folder_id: OnceCell::new(),
        }
    }

    /// Resolve the attachment folder id, creating the folder if absent.
    async fn ensure_folder(&self) -> Result<&str> {
        self.folder_id
            .get_or_try_init(|| async {
                let query = folder_query(&self.folder_name);
                let (_, listing) = self
                    .hub
                    .files()
                    .list()
                    .q(&query)
                    .add_scope(SCOPE_DRIVE_FILE)
                    .doit()
                    .await
                    .map_err(drive_error)?;

                if let Some(existing) = listing
                    .files
                    .unwrap_or_default()
                    .into_iter()
                    .find_map(|f| f.id)
                {
                    debug!("Using existing attachment folder {}", existing);
                    return Ok(existing);
                }

                let folder = File {
                    name: Some(self.folder_name.clone()),
                    mime_type: Some(FOLDER_MIME_TYPE.to_string()),
                    ..Default::default()
                };

                let (_, created) = self
                    .hub
                    .files()
                    .create(folder)
                    .param("fields", "id")
                    .add_scope(SCOPE_DRIVE_FILE)
                    .upload(Cursor::new(Vec::new()), mime::APPLICATION_OCTET_STREAM)
                    .await
                    .map_err(drive_error)?;

                let id = created.id.ok_or_else(|| {
                    SyncError::ApiError("created folder has no id".to_string())
                })?;
                info!("Created attachment folder '{}' ({})", self.folder_name, id);
                Ok(id)
            })
            .await
            .map(|s| s.as_str())
    }

    /// Retrieve the attachment payload.
    ///
    /// Small attachments arrive inline with the message; larger ones carry a
    /// provider attachment id and need a separate download.
    async fn download(
        &self,
        message_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> Result<Vec<u8>> {
        if let Some(data) = &descriptor.inline_data {
            if !data.is_empty() {
                return Ok(data.clone());
            }
        }

        let attachment_id = descriptor.attachment_id.as_deref().ok_or_else(|| {
            SyncError::AttachmentUnavailable(format!(
                "part {} of message {} has neither inline data nor an attachment id",
                descriptor.part_id, message_id
            ))
        })?;

        let bytes = self.mail.get_attachment(message_id, attachment_id).await?;
        if bytes.is_empty() {
            return Err(SyncError::AttachmentUnavailable(format!(
                "attachment {} on message {} is empty",
                attachment_id, message_id
            )));
        }
        Ok(bytes)
    }

    async fn upload(
        &self,
        folder_id: &str,
        descriptor: &AttachmentDescriptor,
        bytes: Vec<u8>,
    ) -> Result<NewAttachment> {
        let size = bytes.len() as u64;

        let metadata = File {
            name: Some(descriptor.filename.clone()),
            parents: Some(vec![folder_id.to_string()]),
            ..Default::default()
        };

        let content_type: mime::Mime = descriptor
            .mime_type
            .parse()
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);

        let (_, created) = self
            .hub
            .files()
            .create(metadata)
            .param("fields", "id, webViewLink")
            .add_scope(SCOPE_DRIVE_FILE)
            .upload(Cursor::new(bytes), content_type)
            .await
            .map_err(drive_error)?;

        let drive_file_id = created
            .id
            .ok_or_else(|| SyncError::ApiError("uploaded file has no id".to_string()))?;
        let web_link = created.web_view_link.unwrap_or_else(|| {
            format!("https://drive.google.com/file/d/{}/view", drive_file_id)
        });

        Ok(NewAttachment {
            filename: descriptor.filename.clone(),
            mime_type: descriptor.mime_type.clone(),
            size,
            drive_file_id,
            web_link,
        })
    }
}

#[async_trait]
impl AttachmentStore for DriveAttachmentStore {
    async fn offload(
        &self,
        message_id: &str,
        descriptor: &AttachmentDescriptor,
    ) -> Result<NewAttachment> {
        let folder_id = self.ensure_folder().await?.to_string();
        let bytes = self.download(message_id, descriptor).await?;

        debug!(
            "Offloading {} ({} bytes) from message {}",
            descriptor.filename,
            bytes.len(),
            message_id
        );

        self.upload(&folder_id, descriptor, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_query_escapes_quotes() {
        let query = folder_query("Bob's Attachments");
        assert!(query.contains("name = 'Bob\\'s Attachments'"));
        assert!(query.contains("trashed = false"));
        assert!(query.contains(FOLDER_MIME_TYPE));
    }

    #[tokio::test]
    async fn test_mock_offload() {
        let mut mock = MockAttachmentStore::new();
        mock.expect_offload().times(1).returning(|_, descriptor| {
            Ok(NewAttachment {
                filename: descriptor.filename.clone(),
                mime_type: descriptor.mime_type.clone(),
                size: descriptor.size,
                drive_file_id: "drive-1".to_string(),
                web_link: "https://drive.google.com/file/d/drive-1/view".to_string(),
            })
        });

        let descriptor = AttachmentDescriptor {
            filename: "a.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 10,
            attachment_id: Some("att1".to_string()),
            part_id: "2".to_string(),
            inline_data: None,
        };

        let stored = mock.offload("m1", &descriptor).await.unwrap();
        assert_eq!(stored.filename, "a.pdf");
        assert_eq!(stored.drive_file_id, "drive-1");
    }
}
