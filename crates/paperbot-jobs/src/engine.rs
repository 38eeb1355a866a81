//! Poll-and-diff engine: one fetch, match, and commit pass.

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, instrument, trace};
use uuid::Uuid;

use paperbot_core::{
    match_paper, CycleState, KeywordSet, MatchResult, NotificationBatch, PaperId, PaperSource,
    Result, SeenPaperStore,
};

/// State callback type for cycle progress.
pub type StateCallback = Box<dyn Fn(CycleState) + Send + Sync>;

/// Context provided to a single cycle run.
pub struct CycleContext {
    /// Correlation id shared by every attempt of one cycle.
    pub cycle_id: Uuid,
    /// 1-based attempt number within the cycle.
    pub attempt: u32,
    state_callback: Option<StateCallback>,
}

impl CycleContext {
    /// Create a context with a fresh time-ordered cycle id.
    pub fn new() -> Self {
        Self {
            cycle_id: Uuid::now_v7(),
            attempt: 1,
            state_callback: None,
        }
    }

    pub fn with_cycle_id(mut self, cycle_id: Uuid) -> Self {
        self.cycle_id = cycle_id;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Set the state callback.
    pub fn with_state_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(CycleState) + Send + Sync + 'static,
    {
        self.state_callback = Some(Box::new(callback));
        self
    }

    /// Report a state transition to the callback.
    pub fn report_state(&self, state: CycleState) {
        if let Some(ref callback) = self.state_callback {
            callback(state);
        }
    }
}

impl Default for CycleContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Fetch candidates, keep unseen matches, and durably mark them seen.
///
/// The commit happens before anything is returned: a paper in the returned
/// batch is already recorded, so a crash after this point can lose its
/// notification but never repeat it.
///
/// Fetch errors propagate untouched and leave the store alone. Store errors
/// propagate as `StoreUnavailable` with nothing recorded.
#[instrument(
    skip_all,
    fields(subsystem = "engine", op = "run_cycle", cycle_id = %ctx.cycle_id, attempt = ctx.attempt)
)]
pub async fn run_cycle(
    source: &dyn PaperSource,
    store: &dyn SeenPaperStore,
    keywords: &KeywordSet,
    ctx: &CycleContext,
) -> Result<NotificationBatch> {
    if keywords.is_empty() {
        debug!("No keywords tracked, skipping fetch");
        return Ok(NotificationBatch::default());
    }

    let start = Instant::now();

    ctx.report_state(CycleState::Fetching);
    let candidates = source.fetch_candidates(keywords).await?;
    let fetched = candidates.len();

    ctx.report_state(CycleState::Matching);
    let mut in_fetch: BTreeSet<PaperId> = BTreeSet::new();
    let mut matched: Vec<MatchResult> = Vec::new();
    for paper in candidates {
        let Some(result) = match_paper(paper, keywords) else {
            continue;
        };
        if !in_fetch.insert(result.id().clone()) {
            trace!(paper_id = %result.id(), "Duplicate id within fetch dropped");
            continue;
        }
        trace!(paper_id = %result.id(), keywords = result.keywords.len(), "Paper matched");
        matched.push(result);
    }

    let fresh = store.unseen(&in_fetch).await?;
    debug!(
        fetched,
        matched = matched.len(),
        fresh = fresh.len(),
        "Diffed against seen set"
    );

    ctx.report_state(CycleState::Committing);
    let committed = store.commit(&fresh, Utc::now()).await?;

    let items: Vec<MatchResult> = matched
        .into_iter()
        .filter(|m| committed.contains(m.id()))
        .collect();

    info!(
        fetched,
        new = items.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Cycle diff committed"
    );

    Ok(NotificationBatch::new(items))
}
