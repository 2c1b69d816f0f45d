use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered mailbox owner.
///
/// The checkpoint column is mutated only by the sync engine after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub email: String,
    pub display_name: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Bearer credential for one principal, as delivered by the supplier.
///
/// The engine never refreshes tokens; it only validates what it was handed
/// and reports expiry or missing scopes as credential failures.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

impl Credential {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => expiry <= Utc::now(),
            None => false,
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }
}

/// Lightweight listing result, before full content is fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: String,
}

/// Transient extraction result for a single attachment part.
///
/// Converted into a stored attachment by the offloader, or discarded if the
/// offload fails. Small attachments arrive inline in the part body; larger
/// ones carry only a provider attachment id and are downloaded separately.
#[derive(Debug, Clone)]
pub struct AttachmentDescriptor {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub attachment_id: Option<String>,
    pub part_id: String,
    pub inline_data: Option<Vec<u8>>,
}

/// Structured content pulled out of one full message.
///
/// Optional fields stay optional here; defaulting happens in one place at
/// the persistence boundary.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub subject: Option<String>,
    pub sender: Option<String>,
    pub recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub snippet: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub labels: Vec<String>,
    pub is_read: bool,
    pub attachments: Vec<AttachmentDescriptor>,
}

/// A persisted message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub gmail_id: String,
    pub thread_id: String,
    pub principal_id: i64,
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub cc_recipients: Vec<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub snippet: String,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A persisted attachment row, owned by its parent message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAttachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub drive_file_id: String,
    pub web_link: String,
    pub created_at: DateTime<Utc>,
}

/// Store-ready attachment reference produced by a successful offload
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub drive_file_id: String,
    pub web_link: String,
}

/// Summary of one synchronization run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub principal_id: i64,
    pub success_count: usize,
    pub error_count: usize,
    pub total_count: usize,
    pub window_start: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    pub fn empty(principal_id: i64, window_start: DateTime<Utc>) -> Self {
        Self {
            principal_id,
            success_count: 0,
            error_count: 0,
            total_count: 0,
            window_start,
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credential_expiry() {
        let expired = Credential {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            scopes: vec![],
        };
        assert!(expired.is_expired());

        let valid = Credential {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: Some(Utc::now() + Duration::minutes(30)),
            scopes: vec![],
        };
        assert!(!valid.is_expired());

        let no_expiry = Credential {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: None,
            scopes: vec![],
        };
        assert!(!no_expiry.is_expired());
    }

    #[test]
    fn test_credential_scopes() {
        let cred = Credential {
            access_token: "tok".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: None,
            scopes: vec!["https://www.googleapis.com/auth/gmail.readonly".to_string()],
        };
        assert!(cred.has_scope("https://www.googleapis.com/auth/gmail.readonly"));
        assert!(!cred.has_scope("https://www.googleapis.com/auth/drive.file"));
    }

    #[test]
    fn test_stored_message_serialization() {
        let message = StoredMessage {
            id: 1,
            gmail_id: "abc123".to_string(),
            thread_id: "thread1".to_string(),
            principal_id: 7,
            subject: "Test Subject".to_string(),
            sender: "Alice <alice@example.com>".to_string(),
            recipients: vec!["me@example.com".to_string()],
            cc_recipients: vec!["cc@example.com".to_string()],
            body_text: Some("hello".to_string()),
            body_html: None,
            snippet: "hello".to_string(),
            received_at: Utc::now(),
            is_read: false,
            labels: vec!["INBOX".to_string()],
            created_at: Utc::now(),
        };

        let json = serde_json::to_string(&message).unwrap();
        let deserialized: StoredMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(message.gmail_id, deserialized.gmail_id);
        assert_eq!(message.recipients, deserialized.recipients);
        assert_eq!(message.cc_recipients, deserialized.cc_recipients);
    }
}
