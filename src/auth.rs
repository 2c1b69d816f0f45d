//! OAuth2 credential handling and API hub construction
//!
//! The sync engine consumes ready-to-use clients through the
//! [`CredentialSupplier`] trait; it never refreshes tokens itself. The
//! production supplier builds Gmail and Drive hubs over a shared
//! authenticator with one cached token file per principal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use google_gmail1::{hyper_rustls, hyper_util, yup_oauth2, Gmail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::client::{GmailMailApi, MailApi};
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{Credential, Principal};
use crate::offload::{AttachmentStore, DriveAttachmentStore};

/// Read-only mail access; listing, full gets and attachment downloads
pub const SCOPE_GMAIL_READONLY: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Read/write mail access; only needed when read-marking is enabled
pub const SCOPE_GMAIL_MODIFY: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Access to files this application creates in Drive
pub const SCOPE_DRIVE_FILE: &str = "https://www.googleapis.com/auth/drive.file";

/// Scopes a sync run needs, depending on whether read-marking is enabled
pub fn sync_scopes(mark_read: bool) -> Vec<&'static str> {
    if mark_read {
        vec![SCOPE_GMAIL_MODIFY, SCOPE_DRIVE_FILE]
    } else {
        vec![SCOPE_GMAIL_READONLY, SCOPE_DRIVE_FILE]
    }
}

/// Ready-to-use clients for one principal's sync run
pub struct SyncClients {
    pub mail: Arc<dyn MailApi>,
    pub attachments: Arc<dyn AttachmentStore>,
}

/// Supplies authenticated clients for a principal.
///
/// Token acquisition and refresh live behind this boundary; the engine only
/// sees the outcome. A failure here is a credential failure for the run.
#[async_trait]
pub trait CredentialSupplier: Send + Sync {
    async fn clients_for(&self, principal: &Principal) -> Result<SyncClients>;
}

/// Production supplier using the OAuth2 installed-application flow.
///
/// Tokens are persisted to one cache file per principal so repeat runs skip
/// the browser round-trip.
pub struct InstalledFlowSupplier {
    credentials_path: PathBuf,
    token_cache_dir: PathBuf,
    attachment_folder: String,
    max_concurrent: usize,
    request_timeout: Duration,
    mark_read: bool,
}

impl InstalledFlowSupplier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            credentials_path: config.auth.credentials_path.clone(),
            token_cache_dir: config.auth.token_cache_dir.clone(),
            attachment_folder: config.storage.attachment_folder.clone(),
            max_concurrent: config.sync.max_concurrent_requests,
            request_timeout: Duration::from_secs(config.sync.request_timeout_secs),
            mark_read: config.sync.mark_read,
        }
    }

    fn token_cache_path(&self, principal: &Principal) -> PathBuf {
        let file_name = format!("{}.json", principal.email.replace(['@', '/'], "_"));
        self.token_cache_dir.join(file_name)
    }
}

#[async_trait]
impl CredentialSupplier for InstalledFlowSupplier {
    async fn clients_for(&self, principal: &Principal) -> Result<SyncClients> {
        let secret = yup_oauth2::read_application_secret(&self.credentials_path)
            .await
            .map_err(|e| SyncError::AuthError(format!("Failed to read credentials: {}", e)))?;

        tokio::fs::create_dir_all(&self.token_cache_dir).await?;
        let token_cache = self.token_cache_path(principal);

        // HTTPRedirect opens a browser for first-time authorization;
        // afterwards the cached refresh token is used silently.
        let auth = yup_oauth2::InstalledFlowAuthenticator::builder(
            secret,
            yup_oauth2::InstalledFlowReturnMethod::HTTPRedirect,
        )
        .persist_tokens_to_disk(&token_cache)
        .build()
        .await
        .map_err(|e| SyncError::AuthError(format!("Failed to build authenticator: {}", e)))?;

        // Obtain a token up front so the run fails fast on a bad credential
        // instead of midway through a batch.
        let scopes = sync_scopes(self.mark_read);
        let token = auth
            .token(&scopes)
            .await
            .map_err(|e| SyncError::AuthError(format!("Failed to obtain token: {}", e)))?;

        let credential = Credential {
            access_token: token.token().unwrap_or_default().to_string(),
            refresh_token: None,
            expires_at: token
                .expiration_time()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.unix_timestamp(), 0)),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        };
        if credential.access_token.is_empty() {
            return Err(SyncError::AuthError(
                "authenticator returned an empty access token".to_string(),
            ));
        }
        if credential.is_expired() {
            return Err(SyncError::AuthError(
                "access token is already expired".to_string(),
            ));
        }

        secure_token_file(&token_cache).await?;

        // One rustls client shared by both hubs
        let client =
            hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
                .build(
                    hyper_rustls::HttpsConnectorBuilder::new()
                        .with_native_roots()
                        .map_err(|e| {
                            SyncError::AuthError(format!("Failed to load TLS roots: {}", e))
                        })?
                        .https_or_http()
                        .enable_http1()
                        .build(),
                );

        let gmail_hub = Gmail::new(client.clone(), auth.clone());
        let drive_hub = google_drive3::DriveHub::new(client, auth);

        let mail: Arc<dyn MailApi> = Arc::new(GmailMailApi::new(
            gmail_hub,
            self.max_concurrent,
            self.request_timeout,
        ));
        let attachments: Arc<dyn AttachmentStore> = Arc::new(DriveAttachmentStore::new(
            drive_hub,
            Arc::clone(&mail),
            self.attachment_folder.clone(),
        ));

        Ok(SyncClients { mail, attachments })
    }
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
/// to prevent unauthorized access to OAuth2 tokens
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600); // Read/write for owner only
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

/// Secure token file on Windows (stub implementation)
///
/// Windows uses ACLs instead of Unix permissions
#[cfg(windows)]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sync_scopes() {
        let readonly = sync_scopes(false);
        assert!(readonly.contains(&SCOPE_GMAIL_READONLY));
        assert!(readonly.contains(&SCOPE_DRIVE_FILE));
        assert!(!readonly.contains(&SCOPE_GMAIL_MODIFY));

        let with_modify = sync_scopes(true);
        assert!(with_modify.contains(&SCOPE_GMAIL_MODIFY));
        assert!(with_modify.contains(&SCOPE_DRIVE_FILE));
    }

    #[test]
    fn test_token_cache_path_sanitizes_email() {
        let supplier = InstalledFlowSupplier {
            credentials_path: PathBuf::from("credentials.json"),
            token_cache_dir: PathBuf::from("/tmp/tokens"),
            attachment_folder: "Attachments".to_string(),
            max_concurrent: 10,
            request_timeout: Duration::from_secs(30),
            mark_read: false,
        };
        let principal = Principal {
            id: 1,
            email: "alice@example.com".to_string(),
            display_name: None,
            last_synced_at: None,
            created_at: Utc::now(),
        };

        let path = supplier.token_cache_path(&principal);
        assert_eq!(path, PathBuf::from("/tmp/tokens/alice_example.com.json"));
    }

    #[tokio::test]
    async fn test_secure_token_file() {
        let temp_file = NamedTempFile::new().unwrap();
        tokio::fs::write(temp_file.path(), "test content")
            .await
            .unwrap();

        secure_token_file(temp_file.path()).await.unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let metadata = tokio::fs::metadata(temp_file.path()).await.unwrap();
            let perms = metadata.permissions();
            assert_eq!(perms.mode() & 0o777, 0o600);
        }
    }
}
