//! # paperbot-jobs
//!
//! Polling pipeline for paperbot.
//!
//! This crate provides:
//! - [`run_cycle`]: fetch, match, diff against the seen set, and commit
//! - [`Dispatcher`]: best-effort fan-out of a batch to a chat channel
//! - [`Scheduler`]: fixed-interval cycles with overlap suppression, fetch
//!   retries with capped exponential backoff, and state/event broadcasting
//!
//! New papers are committed to the seen-paper store before any message is
//! posted. A crash between the two loses those notifications and never
//! repeats them.
//!
//! ## Example
//!
//! ```ignore
//! use paperbot_jobs::{SchedulerBuilder, SchedulerConfig};
//!
//! let scheduler = SchedulerBuilder::new(source, store, slack)
//!     .with_config(SchedulerConfig::from_env())
//!     .with_channel(ChannelId::new("#papers"))
//!     .with_keywords(keywords)
//!     .build();
//!
//! // Start scheduler and get handle
//! let handle = scheduler.start();
//!
//! // Listen for events
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! ```

pub mod backoff;
pub mod dispatcher;
pub mod engine;
pub mod scheduler;

// Re-export core types
pub use paperbot_core::*;

pub use backoff::BackoffPolicy;
pub use dispatcher::{
    escape_mrkdwn, format_authors, format_header, format_message, DispatchFailure,
    DispatchOutcome, Dispatcher,
};
pub use engine::{run_cycle, CycleContext, StateCallback};
pub use scheduler::{
    CycleReport, CycleTrigger, Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerEvent,
    SchedulerHandle,
};
