//! Core traits for paperbot's collaborators.
//!
//! The polling pipeline only talks to the outside world through these
//! interfaces, which keeps the engine testable against in-process doubles.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::keywords::KeywordSet;
use crate::models::{ChannelId, PaperId, PaperRecord, SeenSet};

// =============================================================================
// PAPER SOURCE
// =============================================================================

/// Scholarly index queried for candidate papers.
///
/// Paging and rate limiting are the adapter's concern.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Fetch candidate papers for the current keyword set.
    ///
    /// # Errors
    /// `Error::Fetch` for network or upstream failures; the caller retries.
    async fn fetch_candidates(&self, keywords: &KeywordSet) -> Result<Vec<PaperRecord>>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

// =============================================================================
// CHAT PLATFORM
// =============================================================================

/// Chat platform receiving notifications.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Post `text` to `channel`.
    ///
    /// # Errors
    /// `Error::Dispatch` if the platform rejected or never received the message.
    async fn post_message(&self, channel: &ChannelId, text: &str) -> Result<()>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

// =============================================================================
// SEEN-PAPER STORE
// =============================================================================

/// Durable record of already-notified paper identifiers.
///
/// Implementations must make `commit` all-or-nothing with respect to crashes:
/// once it returns `Ok`, every id is durable; if it fails, none of the batch is
/// recorded. Storage failures surface as `Error::StoreUnavailable`.
///
/// A store assumes a single writing process. Running two instances against the
/// same backing storage is unsupported.
#[async_trait]
pub trait SeenPaperStore: Send + Sync {
    /// Reconstruct the full seen set from durable storage.
    async fn load(&self) -> Result<SeenSet>;

    /// Whether `id` has already been committed.
    async fn has(&self, id: &PaperId) -> Result<bool>;

    /// Durably record `ids` as first seen at `at`.
    ///
    /// Ids already present keep their original timestamp. Returns the ids
    /// newly recorded by this call. An empty set is a no-op.
    async fn commit(&self, ids: &BTreeSet<PaperId>, at: DateTime<Utc>) -> Result<BTreeSet<PaperId>>;

    /// Subset of `ids` not yet committed.
    async fn unseen(&self, ids: &BTreeSet<PaperId>) -> Result<BTreeSet<PaperId>> {
        let mut unseen = BTreeSet::new();
        for id in ids {
            if !self.has(id).await? {
                unseen.insert(id.clone());
            }
        }
        Ok(unseen)
    }

    /// Number of committed ids.
    async fn len(&self) -> Result<usize> {
        Ok(self.load().await?.len())
    }
}
