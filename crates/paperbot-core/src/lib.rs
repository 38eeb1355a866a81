//! # paperbot-core
//!
//! Core types, traits, and keyword matching for paperbot.
//!
//! This crate provides the data model shared by every other paperbot crate,
//! the collaborator traits (paper source, chat platform, seen-paper store),
//! and the pure keyword matcher.
//!
//! ## Logging fields
//!
//! Crates log with `tracing` using a shared set of structured field names:
//! `subsystem`, `component`, `op`, `cycle_id`, `paper_id`, `channel`,
//! `duration_ms`, `attempt`, `retry_in_ms`, `error`, `error_kind`.

pub mod defaults;
pub mod error;
pub mod keywords;
pub mod matcher;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use keywords::{normalize_term, KeywordSet, TrackedKeyword};
pub use matcher::{match_paper, matches};
pub use models::*;
pub use traits::*;
