//! # paperbot-sources
//!
//! Adapters between paperbot and the outside world.
//!
//! This crate provides:
//! - [`ArxivSource`]: paper source over the arXiv Atom API
//! - [`SlackClient`]: chat platform over Slack `chat.postMessage`
//! - In-process doubles for both (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use paperbot_sources::{ArxivSource, PaperSource, KeywordSet};
//!
//! #[tokio::main]
//! async fn main() -> paperbot_sources::Result<()> {
//!     let source = ArxivSource::from_env()?;
//!     let keywords = KeywordSet::parse(["diffusion"])?;
//!     let papers = source.fetch_candidates(&keywords).await?;
//!     println!("{} candidates", papers.len());
//!     Ok(())
//! }
//! ```

pub mod arxiv;
pub mod slack;

// In-process doubles for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use paperbot_core::*;

pub use arxiv::{build_query, normalize_arxiv_id, ArxivConfig, ArxivSource};
pub use slack::{truncate_chars, SlackClient, SlackConfig};
