//! Mailsink
//!
//! A pull-based mailbox ingestion engine: it pulls new messages from a
//! Gmail mailbox since a per-principal checkpoint, extracts structured
//! content from nested multipart payloads, offloads attachment binaries to
//! Drive, and persists everything idempotently into SQLite.
//!
//! # Overview
//!
//! - **Checkpointing**: incremental windows with a bounded first-sync
//!   lookback and safe re-scan overlap
//! - **Listing**: server-side label + time filtering, lazy pagination with
//!   a hard cap
//! - **Fetching**: bounded-concurrency batches with per-item failure
//!   isolation
//! - **Extraction**: recursive part-tree fold into bodies and attachment
//!   descriptors
//! - **Offloading**: attachment download + Drive upload into a well-known
//!   folder
//! - **Persistence**: idempotent writes keyed by the provider message id
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mailsink::{auth::InstalledFlowSupplier, config::Config, store::MailStore, sync::SyncEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("mailsink.toml".as_ref()).await?;
//!
//!     let store = Arc::new(MailStore::open(&config.storage.database_path)?);
//!     let supplier = Arc::new(InstalledFlowSupplier::from_config(&config));
//!     let engine = SyncEngine::new(supplier, Arc::clone(&store), config.sync.clone());
//!
//!     let principal = store.add_principal("me@example.com", None)?;
//!     let report = engine.run_sync(principal.id).await?;
//!     println!("synced {}/{}", report.success_count, report.total_count);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - Credential supplier boundary and API hub construction
//! - [`checkpoint`] - Sync-window checkpoint policy
//! - [`client`] - Rate-limited mail API client with retry logic
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`extractor`] - Part-tree content extraction
//! - [`fetcher`] - Concurrent batch fetching
//! - [`lister`] - Paginated incremental listing
//! - [`models`] - Core data structures
//! - [`offload`] - Attachment offloading into Drive
//! - [`rate_limiter`] - Provider quota management
//! - [`store`] - SQLite persistence
//! - [`sync`] - Run orchestration

pub mod auth;
pub mod checkpoint;
pub mod client;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod lister;
pub mod models;
pub mod offload;
pub mod rate_limiter;
pub mod store;
pub mod sync;

// Re-export commonly used types for convenience
pub use error::{Result, SyncError};

// Core data models
pub use models::{
    AttachmentDescriptor, ExtractedContent, MessageRef, Principal, StoredAttachment,
    StoredMessage, SyncReport,
};

// Client seams
pub use auth::{CredentialSupplier, InstalledFlowSupplier, SyncClients};
pub use client::{FullMessage, GmailMailApi, MailApi, MessagePage};
pub use offload::{AttachmentStore, DriveAttachmentStore};

// Engine
pub use checkpoint::CheckpointTracker;
pub use config::{Config, SyncConfig};
pub use fetcher::MessageFetcher;
pub use lister::MessageLister;
pub use store::{MailStore, NewMessage, StoreOutcome};
pub use sync::SyncEngine;
