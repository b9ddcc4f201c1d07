//! Document store abstraction for Lockbox.
//!
//! This module provides a trait-based interface over a remote document
//! database (collections of JSON-like documents with equality queries and
//! real-time snapshot subscriptions), plus two bundled backends and a
//! registry for resolving the configured backend by name.
//!
//! # Design Principles
//! - Store isolation: no encryption logic lives here; documents are opaque
//! - Async operations: all I/O operations are async
//! - Unified error semantics: backend failures surface as `StoreUnavailable`

pub mod local;
pub mod memory;
pub mod registry;
pub mod store;
pub mod subscription;

pub use local::LocalStore;
pub use memory::MemoryStore;
pub use registry::{StoreFactory, StoreRegistry};
pub use store::{Document, DocumentStore, Fields, Filter};
pub use subscription::{ChangeFeed, Snapshot, Subscription};
