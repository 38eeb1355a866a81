//! Centralized default constants for paperbot.
//!
//! **This module is the single source of truth** for shared default values.
//! Adapters, the scheduler and the CLI reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// SCHEDULING
// =============================================================================

/// Interval between polling cycles (one day, like the original daily search).
pub const POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Maximum fetch attempts within one cycle before giving up until the next tick.
pub const MAX_FETCH_ATTEMPTS: u32 = 5;

/// First backoff delay after a recoverable fetch failure.
pub const BACKOFF_INITIAL_MS: u64 = 2_000;

/// Upper bound for any single backoff delay.
pub const BACKOFF_MAX_MS: u64 = 5 * 60 * 1_000;

/// Growth factor between consecutive backoff delays.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Random jitter added on top of each backoff delay.
pub const BACKOFF_JITTER_MS: u64 = 1_000;

/// Broadcast channel capacity for scheduler events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// ARXIV
// =============================================================================

/// arXiv query endpoint.
pub const ARXIV_BASE_URL: &str = "http://export.arxiv.org/api/query";

/// Categories tracked when none are configured.
///
/// cs.CV computer vision, cs.AI artificial intelligence, cs.LG and stat.ML
/// machine learning, cs.GR graphics.
pub const ARXIV_CATEGORIES: &[&str] = &["cs.CV", "cs.AI", "cs.LG", "stat.ML", "cs.GR"];

/// Entries requested per page.
pub const ARXIV_PAGE_SIZE: usize = 100;

/// Upper bound on entries fetched per cycle.
pub const ARXIV_MAX_RESULTS: usize = 200;

/// Base wait between page requests (arXiv asks clients to throttle).
pub const ARXIV_WAIT_TIME_MS: u64 = 5_000;

/// Random jitter added to the wait between pages.
pub const ARXIV_WAIT_JITTER_MS: u64 = 3_000;

/// Entries published earlier than this window are not candidates.
///
/// Thursday and Friday submissions are announced on Sunday evening, so a
/// Monday poll sees them up to ~67h old. Four days also absorbs a holiday
/// skip; the seen store makes the overlap free.
pub const ARXIV_LOOKBACK_HOURS: i64 = 96;

/// HTTP timeout for a single arXiv request.
pub const ARXIV_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// CHAT
// =============================================================================

/// Slack Web API base URL.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

/// Channel used when none is configured.
pub const CHANNEL: &str = "#paperbot_debug";

/// HTTP timeout for a single chat message.
pub const SLACK_TIMEOUT_SECS: u64 = 10;

/// Maximum characters in a Slack section block.
pub const SLACK_SECTION_MAX_CHARS: usize = 3_000;

/// Maximum characters of an abstract included in a notification.
pub const SUMMARY_MAX_CHARS: usize = 1_200;

/// Authors named before the list is cut to "et al.".
pub const AUTHORS_MAX_NAMES: usize = 10;

/// Character budget of the authors line, before escaping.
pub const AUTHORS_MAX_CHARS: usize = 400;

// =============================================================================
// STORAGE
// =============================================================================

/// File name of the seen-paper document inside the cache folder.
pub const SEEN_FILE_NAME: &str = "seen.json";

/// File name of the keyword subscription document inside the cache folder.
pub const KEYWORDS_FILE_NAME: &str = "keywords.json";
