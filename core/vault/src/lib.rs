//! Lockbox vault: sessions, unlock, and encrypted record access.
//!
//! This crate ties key derivation and field encryption to a document store:
//! - [`Session`] tracks the signed-in user and the unlock state
//! - [`RecordAccess`] saves and loads records, encrypting content on demand
//! - [`watch_records`] and [`watch_stats`] keep live views up to date
//!
//! # Security Model
//! - The key is derived from the login password and never persisted
//! - Metadata (title, tags, timestamps) is stored in the clear
//! - Content is encrypted only when the caller asks for it
//! - A per-user key check separates wrong passwords from corrupted records

pub mod access;
pub mod canary;
pub mod config;
pub mod identity;
pub mod record;
pub mod search;
pub mod session;
pub mod stats;
pub mod watch;

pub use access::{open_document, LoadReport, RecordAccess};
pub use canary::KEYCHECK_COLLECTION;
pub use config::{LockboxConfig, StoreSettings};
pub use identity::{Identity, IdentityProvider, StaticIdentity};
pub use record::{parse_tags, Content, Record, RecordDraft, RecordMetadata, StoredContent};
pub use search::search;
pub use session::{Session, SessionState};
pub use stats::{watch_stats, DashboardStats};
pub use watch::{watch_records, Watch};
