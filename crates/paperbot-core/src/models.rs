//! Core data models for paperbot.
//!
//! These types are shared across all paperbot crates. `PaperRecord` and
//! `MatchResult` live for one polling cycle; `SeenSet` is the only durable
//! state and is owned by a [`crate::SeenPaperStore`].

use std::collections::btree_map;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::keywords::TrackedKeyword;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Issuer-assigned, globally unique paper identifier. The dedup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaperId(String);

impl PaperId {
    /// Create an identifier, trimming surrounding whitespace.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PaperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PaperId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Opaque destination handle for notifications.
///
/// Resolution (channel name vs. platform id) is left to the chat adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PAPERS
// =============================================================================

/// Candidate paper as fetched from the paper source.
///
/// Only `id` takes part in deduplication; every other field is presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: PaperId,
    pub title: String,
    pub summary: String,
    pub published: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub authors: Vec<String>,
}

impl PaperRecord {
    /// Create a record with the given identity and text, published now.
    pub fn new(id: impl AsRef<str>, title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            id: PaperId::new(id),
            title: title.into(),
            summary: summary.into(),
            published: Utc::now(),
            url: String::new(),
            authors: Vec::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = published;
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }
}

/// A paper together with the tracked keywords it satisfied.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub paper: PaperRecord,
    pub keywords: BTreeSet<TrackedKeyword>,
}

impl MatchResult {
    pub fn id(&self) -> &PaperId {
        &self.paper.id
    }
}

/// Ordered new matches destined for one channel.
///
/// Order is discovery order within the cycle: fetch order, then identifier.
#[derive(Debug, Clone, Default)]
pub struct NotificationBatch {
    items: Vec<MatchResult>,
}

impl NotificationBatch {
    pub fn new(items: Vec<MatchResult>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MatchResult> {
        self.items.iter()
    }

    /// Identifiers in batch order.
    pub fn ids(&self) -> Vec<PaperId> {
        self.items.iter().map(|m| m.id().clone()).collect()
    }
}

impl IntoIterator for NotificationBatch {
    type Item = MatchResult;
    type IntoIter = std::vec::IntoIter<MatchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a NotificationBatch {
    type Item = &'a MatchResult;
    type IntoIter = std::slice::Iter<'a, MatchResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// =============================================================================
// SEEN SET
// =============================================================================

/// Identifiers already notified, with the time each was first committed.
///
/// Entries are append-only: `record` never overwrites an existing timestamp
/// and there is no removal API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenSet {
    entries: BTreeMap<PaperId, DateTime<Utc>>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &PaperId) -> bool {
        self.entries.contains_key(id)
    }

    /// When `id` was first notified, if ever.
    pub fn first_seen(&self, id: &PaperId) -> Option<DateTime<Utc>> {
        self.entries.get(id).copied()
    }

    /// Record `id` at `at` unless already present. Returns true if newly added.
    pub fn record(&mut self, id: PaperId, at: DateTime<Utc>) -> bool {
        match self.entries.entry(id) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(at);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, PaperId, DateTime<Utc>> {
        self.entries.iter()
    }
}

// =============================================================================
// CYCLE STATE
// =============================================================================

/// Named states of the scheduler/retry state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    /// Waiting for the next tick.
    Idle,
    /// Requesting candidates from the paper source.
    Fetching,
    /// Running the keyword matcher and seen-set partition.
    Matching,
    /// Durably recording new identifiers.
    Committing,
    /// Posting notifications for committed matches.
    Dispatching,
    /// Waiting before retrying a failed fetch.
    Backoff,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Fetching => "fetching",
            CycleState::Matching => "matching",
            CycleState::Committing => "committing",
            CycleState::Dispatching => "dispatching",
            CycleState::Backoff => "backoff",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
