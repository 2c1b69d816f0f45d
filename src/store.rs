//! SQLite persistence for principals, messages and attachment references
//!
//! The provider-assigned message id is the idempotency key: the unique
//! constraint on it is the sole cross-run correctness mechanism, and an
//! insert that loses the race is read back as "already exists" rather than
//! surfaced as an error.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Result, SyncError};
use crate::models::{
    ExtractedContent, MessageRef, NewAttachment, Principal, StoredAttachment, StoredMessage,
};

/// Subject stored when a message carries none
pub const DEFAULT_SUBJECT: &str = "No Subject";

/// Sender stored when a message carries none
pub const DEFAULT_SENDER: &str = "Unknown Sender";

/// Database migrations, applied in order via the user_version pragma
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE principals (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT,
            last_synced_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE messages (
            id INTEGER PRIMARY KEY,
            gmail_id TEXT NOT NULL UNIQUE,
            thread_id TEXT NOT NULL,
            principal_id INTEGER NOT NULL,
            subject TEXT NOT NULL,
            sender TEXT NOT NULL,
            recipients TEXT NOT NULL,
            cc_recipients TEXT NOT NULL,
            body_text TEXT,
            body_html TEXT,
            snippet TEXT NOT NULL,
            received_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            labels TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (principal_id) REFERENCES principals(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_messages_principal ON messages(principal_id, received_at DESC);

        CREATE TABLE attachments (
            id INTEGER PRIMARY KEY,
            message_id INTEGER NOT NULL,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            drive_file_id TEXT NOT NULL,
            web_link TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_attachments_message ON attachments(message_id);
        "#,
    )])
}

/// Fully-defaulted message record, ready to insert.
///
/// This is the single normalization step between extraction and storage;
/// nothing downstream re-checks optionality of the defaulted fields.
#[derive(Debug, Clone)]
pub struct NewMessage {
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
}

impl NewMessage {
    pub fn from_extracted(
        principal_id: i64,
        message_ref: &MessageRef,
        content: ExtractedContent,
    ) -> Self {
        Self {
            gmail_id: message_ref.id.clone(),
            thread_id: message_ref.thread_id.clone(),
            principal_id,
            subject: content
                .subject
                .unwrap_or_else(|| DEFAULT_SUBJECT.to_string()),
            sender: content.sender.unwrap_or_else(|| DEFAULT_SENDER.to_string()),
            recipients: content.recipients,
            cc_recipients: content.cc_recipients,
            body_text: content.body_text,
            body_html: content.body_html,
            snippet: content.snippet,
            received_at: content.received_at.unwrap_or_else(Utc::now),
            is_read: content.is_read,
            labels: content.labels,
        }
    }
}

/// Outcome of an idempotent message write
#[derive(Debug)]
pub enum StoreOutcome {
    Created(StoredMessage),
    Existing(StoredMessage),
}

impl StoreOutcome {
    pub fn message(&self) -> &StoredMessage {
        match self {
            StoreOutcome::Created(m) | StoreOutcome::Existing(m) => m,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, StoreOutcome::Created(_))
    }
}

/// SQLite-backed mail store shared across concurrent runs
pub struct MailStore {
    conn: Mutex<Connection>,
}

impl MailStore {
    /// Open (and migrate) the store at the given path
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())?;
        Self::init(conn)
    }

    /// In-memory store, used by tests
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        // WAL for concurrent readers, foreign_keys for cascade deletes
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations().to_latest(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // === Principals ===

    /// Register a principal, returning the existing row if the email is
    /// already known.
    pub fn add_principal(&self, email: &str, display_name: Option<&str>) -> Result<Principal> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT OR IGNORE INTO principals (email, display_name, created_at)
             VALUES (?, ?, ?)",
            params![email, display_name, Utc::now().to_rfc3339()],
        )?;

        Self::principal_by_email_inner(&conn, email)?.ok_or_else(|| {
            SyncError::StorageError(format!("principal {} missing after insert", email))
        })
    }

    pub fn principal_by_id(&self, id: i64) -> Result<Option<Principal>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, email, display_name, last_synced_at, created_at
             FROM principals WHERE id = ?",
            [id],
            Self::principal_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn principal_by_email(&self, email: &str) -> Result<Option<Principal>> {
        let conn = self.conn.lock().unwrap();
        Self::principal_by_email_inner(&conn, email)
    }

    fn principal_by_email_inner(conn: &Connection, email: &str) -> Result<Option<Principal>> {
        conn.query_row(
            "SELECT id, email, display_name, last_synced_at, created_at
             FROM principals WHERE email = ?",
            [email],
            Self::principal_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_principals(&self) -> Result<Vec<Principal>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, email, display_name, last_synced_at, created_at
             FROM principals ORDER BY email",
        )?;

        let principals = stmt
            .query_map([], Self::principal_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(principals)
    }

    fn principal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Principal> {
        let last_synced_at: Option<String> = row.get(3)?;
        let created_at: String = row.get(4)?;
        Ok(Principal {
            id: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            last_synced_at: last_synced_at.as_deref().and_then(parse_timestamp),
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        })
    }

    // === Checkpoints ===

    pub fn checkpoint(&self, principal_id: i64) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let stored: Option<Option<String>> = conn
            .query_row(
                "SELECT last_synced_at FROM principals WHERE id = ?",
                [principal_id],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(value) => Ok(value.as_deref().and_then(parse_timestamp)),
            None => Err(SyncError::UnknownPrincipal(principal_id.to_string())),
        }
    }

    pub fn set_checkpoint(&self, principal_id: i64, timestamp: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE principals SET last_synced_at = ? WHERE id = ?",
            params![timestamp.to_rfc3339(), principal_id],
        )?;

        if updated == 0 {
            return Err(SyncError::UnknownPrincipal(principal_id.to_string()));
        }
        Ok(())
    }

    // === Messages ===

    /// Idempotently persist a message.
    ///
    /// Looks up by provider id first; on miss, INSERT OR IGNORE followed by a
    /// re-read absorbs a concurrent run winning the unique-constraint race.
    /// An existing row is returned unchanged, never updated.
    pub fn store_message(&self, message: &NewMessage) -> Result<StoreOutcome> {
        let conn = self.conn.lock().unwrap();

        if let Some(existing) = Self::message_by_gmail_id_inner(&conn, &message.gmail_id)? {
            return Ok(StoreOutcome::Existing(existing));
        }

        conn.execute(
            "INSERT OR IGNORE INTO messages (
                gmail_id, thread_id, principal_id, subject, sender,
                recipients, cc_recipients, body_text, body_html, snippet,
                received_at, is_read, labels, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                message.gmail_id,
                message.thread_id,
                message.principal_id,
                message.subject,
                message.sender,
                serde_json::to_string(&message.recipients)?,
                serde_json::to_string(&message.cc_recipients)?,
                message.body_text,
                message.body_html,
                message.snippet,
                message.received_at.to_rfc3339(),
                message.is_read,
                serde_json::to_string(&message.labels)?,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let created = conn.changes() == 1;

        let stored = Self::message_by_gmail_id_inner(&conn, &message.gmail_id)?.ok_or_else(
            || SyncError::StorageError(format!("message {} missing after insert", message.gmail_id)),
        )?;

        Ok(if created {
            StoreOutcome::Created(stored)
        } else {
            StoreOutcome::Existing(stored)
        })
    }

    pub fn message_by_gmail_id(&self, gmail_id: &str) -> Result<Option<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        Self::message_by_gmail_id_inner(&conn, gmail_id)
    }

    pub fn message_count(&self, principal_id: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE principal_id = ?",
            [principal_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn message_by_gmail_id_inner(
        conn: &Connection,
        gmail_id: &str,
    ) -> Result<Option<StoredMessage>> {
        conn.query_row(
            "SELECT id, gmail_id, thread_id, principal_id, subject, sender,
                    recipients, cc_recipients, body_text, body_html, snippet,
                    received_at, is_read, labels, created_at
             FROM messages WHERE gmail_id = ?",
            [gmail_id],
            Self::message_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
        let recipients: String = row.get(6)?;
        let cc_recipients: String = row.get(7)?;
        let received_at: String = row.get(11)?;
        let labels: String = row.get(13)?;
        let created_at: String = row.get(14)?;

        Ok(StoredMessage {
            id: row.get(0)?,
            gmail_id: row.get(1)?,
            thread_id: row.get(2)?,
            principal_id: row.get(3)?,
            subject: row.get(4)?,
            sender: row.get(5)?,
            recipients: serde_json::from_str(&recipients).unwrap_or_default(),
            cc_recipients: serde_json::from_str(&cc_recipients).unwrap_or_default(),
            body_text: row.get(8)?,
            body_html: row.get(9)?,
            snippet: row.get(10)?,
            received_at: parse_timestamp(&received_at).unwrap_or_else(Utc::now),
            is_read: row.get(12)?,
            labels: serde_json::from_str(&labels).unwrap_or_default(),
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        })
    }

    // === Attachments ===

    /// Link a successfully offloaded attachment to its message.
    ///
    /// Runs after the message row exists (two-phase write); a message with
    /// zero links is a valid state.
    pub fn add_attachment(
        &self,
        message_id: i64,
        attachment: &NewAttachment,
    ) -> Result<StoredAttachment> {
        let conn = self.conn.lock().unwrap();
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO attachments (
                message_id, filename, mime_type, size, drive_file_id, web_link, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                message_id,
                attachment.filename,
                attachment.mime_type,
                attachment.size as i64,
                attachment.drive_file_id,
                attachment.web_link,
                created_at.to_rfc3339(),
            ],
        )?;

        Ok(StoredAttachment {
            id: conn.last_insert_rowid(),
            message_id,
            filename: attachment.filename.clone(),
            mime_type: attachment.mime_type.clone(),
            size: attachment.size,
            drive_file_id: attachment.drive_file_id.clone(),
            web_link: attachment.web_link.clone(),
            created_at,
        })
    }

    pub fn attachments_for_message(&self, message_id: i64) -> Result<Vec<StoredAttachment>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, message_id, filename, mime_type, size, drive_file_id, web_link, created_at
             FROM attachments WHERE message_id = ? ORDER BY id",
        )?;

        let attachments = stmt
            .query_map([message_id], |row| {
                let size: i64 = row.get(4)?;
                let created_at: String = row.get(7)?;
                Ok(StoredAttachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    filename: row.get(2)?,
                    mime_type: row.get(3)?,
                    size: size.max(0) as u64,
                    drive_file_id: row.get(5)?,
                    web_link: row.get(6)?,
                    created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(attachments)
    }

    #[cfg(test)]
    fn delete_message(&self, message_id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM messages WHERE id = ?", [message_id])?;
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageRef;

    fn test_store() -> (MailStore, Principal) {
        let store = MailStore::open_in_memory().unwrap();
        let principal = store.add_principal("me@example.com", Some("Me")).unwrap();
        (store, principal)
    }

    fn test_message(principal_id: i64, gmail_id: &str) -> NewMessage {
        NewMessage {
            gmail_id: gmail_id.to_string(),
            thread_id: format!("t-{}", gmail_id),
            principal_id,
            subject: "Subject".to_string(),
            sender: "alice@example.com".to_string(),
            recipients: vec!["me@example.com".to_string()],
            cc_recipients: vec!["cc@example.com".to_string()],
            body_text: Some("hello".to_string()),
            body_html: None,
            snippet: "hello".to_string(),
            received_at: Utc::now(),
            is_read: false,
            labels: vec!["INBOX".to_string()],
        }
    }

    #[test]
    fn test_add_principal_is_get_or_create() {
        let store = MailStore::open_in_memory().unwrap();
        let first = store.add_principal("me@example.com", None).unwrap();
        let second = store.add_principal("me@example.com", None).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_principals().unwrap().len(), 1);
    }

    #[test]
    fn test_store_message_idempotent() {
        let (store, principal) = test_store();
        let message = test_message(principal.id, "g1");

        let first = store.store_message(&message).unwrap();
        assert!(first.is_created());

        let second = store.store_message(&message).unwrap();
        assert!(!second.is_created());
        assert_eq!(first.message().id, second.message().id);

        assert_eq!(store.message_count(principal.id).unwrap(), 1);
    }

    #[test]
    fn test_existing_row_never_updated() {
        let (store, principal) = test_store();
        let message = test_message(principal.id, "g1");
        store.store_message(&message).unwrap();

        let mut changed = test_message(principal.id, "g1");
        changed.subject = "Different subject".to_string();
        let outcome = store.store_message(&changed).unwrap();

        assert_eq!(outcome.message().subject, "Subject");
    }

    #[test]
    fn test_recipients_and_cc_stay_disjoint() {
        let (store, principal) = test_store();
        let message = test_message(principal.id, "g1");
        let outcome = store.store_message(&message).unwrap();

        let stored = outcome.message();
        assert_eq!(stored.recipients, vec!["me@example.com".to_string()]);
        assert_eq!(stored.cc_recipients, vec!["cc@example.com".to_string()]);
        for cc in &stored.cc_recipients {
            assert!(!stored.recipients.contains(cc));
        }
    }

    #[test]
    fn test_from_extracted_applies_defaults() {
        let message_ref = MessageRef {
            id: "g1".to_string(),
            thread_id: "t1".to_string(),
        };
        let content = ExtractedContent::default();

        let message = NewMessage::from_extracted(1, &message_ref, content);
        assert_eq!(message.subject, DEFAULT_SUBJECT);
        assert_eq!(message.sender, DEFAULT_SENDER);
        assert!(message.recipients.is_empty());
        assert!(message.cc_recipients.is_empty());
        assert!(message.body_text.is_none());
    }

    #[test]
    fn test_attachment_roundtrip_and_cascade() {
        let (store, principal) = test_store();
        let outcome = store
            .store_message(&test_message(principal.id, "g1"))
            .unwrap();
        let message_id = outcome.message().id;

        let attachment = NewAttachment {
            filename: "doc.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            size: 1024,
            drive_file_id: "drive-1".to_string(),
            web_link: "https://drive.google.com/file/d/drive-1/view".to_string(),
        };
        store.add_attachment(message_id, &attachment).unwrap();

        let attachments = store.attachments_for_message(message_id).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "doc.pdf");
        assert_eq!(attachments[0].size, 1024);

        // Deleting the message cascades to its attachments
        store.delete_message(message_id).unwrap();
        assert!(store.attachments_for_message(message_id).unwrap().is_empty());
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let (store, principal) = test_store();

        assert!(store.checkpoint(principal.id).unwrap().is_none());

        let now = Utc::now();
        store.set_checkpoint(principal.id, now).unwrap();

        let stored = store.checkpoint(principal.id).unwrap().unwrap();
        assert_eq!(stored.timestamp(), now.timestamp());
    }

    #[test]
    fn test_checkpoint_unknown_principal() {
        let store = MailStore::open_in_memory().unwrap();
        assert!(matches!(
            store.checkpoint(99),
            Err(SyncError::UnknownPrincipal(_))
        ));
        assert!(matches!(
            store.set_checkpoint(99, Utc::now()),
            Err(SyncError::UnknownPrincipal(_))
        ));
    }
}
