//! # paperbot-db
//!
//! Durable state for paperbot.
//!
//! This crate provides:
//! - [`FileSeenStore`]: seen-paper store backed by one JSON document
//! - [`PgSeenStore`]: seen-paper store backed by a PostgreSQL table
//! - [`KeywordFile`]: the keyword subscription file
//!
//! Both stores implement [`paperbot_core::SeenPaperStore`] with all-or-nothing
//! commits. Neither supports two processes writing the same backing storage.
//!
//! ## Example
//!
//! ```rust,ignore
//! use paperbot_db::{FileSeenStore, SeenPaperStore};
//!
//! let store = FileSeenStore::open_in("/var/lib/paperbot").await?;
//! let added = store.commit(&ids, chrono::Utc::now()).await?;
//! ```

pub mod atomic;
pub mod file_store;
pub mod keywords;
mod pool;
pub mod seen;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use paperbot_core::*;

pub use atomic::write_atomic;
pub use file_store::FileSeenStore;
pub use keywords::KeywordFile;
pub use seen::PgSeenStore;
