//! Scheduler and retry controller.
//!
//! Runs one poll cycle per interval tick. At most one cycle runs at a time:
//! a tick or manual trigger that arrives while a cycle is in flight (backoff
//! waits included) is skipped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use paperbot_core::defaults;
use paperbot_core::{
    ChannelId, ChatPlatform, CycleState, Error, KeywordSet, PaperId, PaperSource, Result,
    SeenPaperStore,
};

use crate::backoff::BackoffPolicy;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::engine::{run_cycle, CycleContext};

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scheduled cycles.
    pub poll_interval: Duration,
    /// Fetch attempts per cycle before giving up.
    pub max_attempts: u32,
    /// Delay policy between fetch attempts.
    pub backoff: BackoffPolicy,
    /// Run the first cycle immediately instead of after one interval.
    pub run_on_start: bool,
    /// Whether to schedule cycles at all.
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(defaults::POLL_INTERVAL_SECS),
            max_attempts: defaults::MAX_FETCH_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            run_on_start: true,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PAPERBOT_ENABLED` | `true` | Enable/disable scheduled polling |
    /// | `PAPERBOT_POLL_INTERVAL_SECS` | `86400` | Seconds between cycles |
    /// | `PAPERBOT_MAX_ATTEMPTS` | `5` | Fetch attempts per cycle |
    /// | `PAPERBOT_BACKOFF_INITIAL_MS` | `2000` | First retry delay |
    /// | `PAPERBOT_BACKOFF_MAX_MS` | `300000` | Retry delay cap |
    /// | `PAPERBOT_RUN_ON_START` | `true` | Poll immediately at startup |
    pub fn from_env() -> Self {
        let flag = |name: &str| {
            std::env::var(name)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true)
        };
        let number = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
        };

        let poll_interval_secs = number("PAPERBOT_POLL_INTERVAL_SECS")
            .unwrap_or(defaults::POLL_INTERVAL_SECS)
            .max(1);
        let max_attempts = number("PAPERBOT_MAX_ATTEMPTS")
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(defaults::MAX_FETCH_ATTEMPTS)
            .max(1);
        let initial_ms = number("PAPERBOT_BACKOFF_INITIAL_MS").unwrap_or(defaults::BACKOFF_INITIAL_MS);
        let max_ms = number("PAPERBOT_BACKOFF_MAX_MS")
            .unwrap_or(defaults::BACKOFF_MAX_MS)
            .max(initial_ms);

        Self {
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_attempts,
            backoff: BackoffPolicy::new(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
            ),
            run_on_start: flag("PAPERBOT_RUN_ON_START"),
            enabled: flag("PAPERBOT_ENABLED"),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    /// Interval tick.
    Scheduled,
    /// Explicit request through the handle.
    Manual,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// Fetch attempts used.
    pub attempts: u32,
    /// New matches committed and handed to the dispatcher.
    pub notified: usize,
    pub outcome: DispatchOutcome,
}

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// Scheduler loop started.
    SchedulerStarted,
    /// Scheduler loop stopped.
    SchedulerStopped,
    /// The state machine moved.
    StateChanged {
        cycle_id: Option<Uuid>,
        state: CycleState,
    },
    /// A cycle began.
    CycleStarted { cycle_id: Uuid, trigger: CycleTrigger },
    /// A tick or trigger arrived while a cycle was running.
    CycleSkipped { trigger: CycleTrigger },
    /// A fetch failed and will be retried.
    FetchRetry {
        cycle_id: Uuid,
        attempt: u32,
        retry_in: Duration,
        error: String,
    },
    /// One notification could not be delivered.
    DispatchFailed {
        cycle_id: Uuid,
        paper_id: PaperId,
        error: String,
    },
    /// A cycle finished; some notifications may still have failed.
    CycleCompleted {
        cycle_id: Uuid,
        notified: usize,
        delivered: usize,
        failed: usize,
    },
    /// A cycle aborted without notifying anything.
    CycleFailed {
        cycle_id: Uuid,
        error_kind: &'static str,
        error: String,
    },
}

/// Shared pieces of one cycle run, cloned into spawned cycle tasks.
struct CycleRunner {
    source: Arc<dyn PaperSource>,
    store: Arc<dyn SeenPaperStore>,
    dispatcher: Dispatcher,
    channel: ChannelId,
    max_attempts: u32,
    backoff: BackoffPolicy,
    event_tx: broadcast::Sender<SchedulerEvent>,
    state_tx: Arc<watch::Sender<CycleState>>,
}

impl CycleRunner {
    fn set_state(
        state_tx: &watch::Sender<CycleState>,
        event_tx: &broadcast::Sender<SchedulerEvent>,
        cycle_id: Option<Uuid>,
        state: CycleState,
    ) {
        state_tx.send_replace(state);
        let _ = event_tx.send(SchedulerEvent::StateChanged { cycle_id, state });
    }

    fn enter(&self, cycle_id: Option<Uuid>, state: CycleState) {
        Self::set_state(&self.state_tx, &self.event_tx, cycle_id, state);
    }

    /// Fetch with retries, then dispatch. Ends in `Idle` either way.
    #[instrument(skip(self, keywords), fields(subsystem = "scheduler", op = "cycle", cycle_id = tracing::field::Empty))]
    async fn run(&self, keywords: KeywordSet, trigger: CycleTrigger) -> Result<CycleReport> {
        let cycle_id = Uuid::now_v7();
        tracing::Span::current().record("cycle_id", tracing::field::display(cycle_id));
        let start = Instant::now();

        info!(?trigger, keywords = keywords.len(), "Cycle started");
        let _ = self
            .event_tx
            .send(SchedulerEvent::CycleStarted { cycle_id, trigger });

        let mut attempt = 1;
        let batch = loop {
            let state_tx = self.state_tx.clone();
            let event_tx = self.event_tx.clone();
            let ctx = CycleContext::new()
                .with_cycle_id(cycle_id)
                .with_attempt(attempt)
                .with_state_callback(move |state| {
                    Self::set_state(&state_tx, &event_tx, Some(cycle_id), state);
                });

            match run_cycle(
                self.source.as_ref(),
                self.store.as_ref(),
                &keywords,
                &ctx,
            )
            .await
            {
                Ok(batch) => break batch,
                Err(e) if e.is_recoverable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, backing off"
                    );
                    self.enter(Some(cycle_id), CycleState::Backoff);
                    let _ = self.event_tx.send(SchedulerEvent::FetchRetry {
                        cycle_id,
                        attempt,
                        retry_in: delay,
                        error: e.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    match &e {
                        Error::StoreUnavailable(_) => error!(
                            error = %e,
                            error_kind = e.kind(),
                            "Seen-paper store unavailable, cycle aborted"
                        ),
                        _ if e.is_recoverable() => warn!(
                            attempts = attempt,
                            error = %e,
                            error_kind = e.kind(),
                            "Fetch attempts exhausted, cycle abandoned"
                        ),
                        _ => error!(error = %e, error_kind = e.kind(), "Cycle failed"),
                    }
                    self.enter(None, CycleState::Idle);
                    let _ = self.event_tx.send(SchedulerEvent::CycleFailed {
                        cycle_id,
                        error_kind: e.kind(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        };

        let notified = batch.len();
        let outcome = if batch.is_empty() {
            DispatchOutcome::default()
        } else {
            self.enter(Some(cycle_id), CycleState::Dispatching);
            self.dispatcher.dispatch(&batch, &self.channel).await
        };

        for failure in &outcome.failures {
            let _ = self.event_tx.send(SchedulerEvent::DispatchFailed {
                cycle_id,
                paper_id: failure.paper_id.clone(),
                error: failure.error.clone(),
            });
        }

        self.enter(None, CycleState::Idle);
        info!(
            attempts = attempt,
            notified,
            delivered = outcome.delivered.len(),
            failed = outcome.failures.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Cycle completed"
        );
        let _ = self.event_tx.send(SchedulerEvent::CycleCompleted {
            cycle_id,
            notified,
            delivered: outcome.delivered.len(),
            failed: outcome.failures.len(),
        });

        Ok(CycleReport {
            cycle_id,
            attempts: attempt,
            notified,
            outcome,
        })
    }
}

/// Clears the busy flag when a cycle task ends, aborts, or panics.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    trigger_tx: mpsc::Sender<()>,
    keywords: Arc<RwLock<KeywordSet>>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
    state_rx: watch::Receiver<CycleState>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the scheduler to stop. A running cycle is aborted.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Request a cycle now. Skipped if one is already running.
    pub async fn trigger(&self) -> Result<()> {
        self.trigger_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Scheduler is not running".into()))?;
        Ok(())
    }

    /// Replace the tracked keywords. Takes effect from the next cycle.
    pub async fn update_keywords(&self, keywords: KeywordSet) {
        info!(count = keywords.len(), "Tracked keywords updated");
        *self.keywords.write().await = keywords;
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }

    /// Current state.
    pub fn state(&self) -> CycleState {
        *self.state_rx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_watch(&self) -> watch::Receiver<CycleState> {
        self.state_rx.clone()
    }

    /// Wait for the scheduler loop to exit.
    pub async fn join(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Scheduler task failed: {}", e)))
    }
}

/// Periodic poll scheduler.
pub struct Scheduler {
    runner: Arc<CycleRunner>,
    config: SchedulerConfig,
    keywords: Arc<RwLock<KeywordSet>>,
    state_rx: watch::Receiver<CycleState>,
}

impl Scheduler {
    /// Get a receiver for scheduler events. Subscribe before `start` to see
    /// the first cycle.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.runner.event_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> CycleState {
        *self.state_rx.borrow()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run a single cycle now, with fetch retries, outside the loop.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let keywords = self.keywords.read().await.clone();
        self.runner.run(keywords, CycleTrigger::Manual).await
    }

    /// Start the scheduler loop and return a handle for control.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let event_rx = self.runner.event_tx.subscribe();
        let state_rx = self.state_rx.clone();
        let keywords = self.keywords.clone();

        let task = tokio::spawn(async move {
            self.run(shutdown_rx, trigger_rx).await;
        });

        SchedulerHandle {
            shutdown_tx,
            trigger_tx,
            keywords,
            event_rx,
            state_rx,
            task,
        }
    }

    #[instrument(skip_all, fields(subsystem = "scheduler"))]
    async fn run(self, mut shutdown_rx: mpsc::Receiver<()>, mut trigger_rx: mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Scheduler is disabled, not starting");
            return;
        }

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_attempts = self.config.max_attempts,
            channel = %self.runner.channel,
            "Scheduler started"
        );
        let _ = self.runner.event_tx.send(SchedulerEvent::SchedulerStarted);

        let first_tick = if self.config.run_on_start {
            tokio::time::Instant::now()
        } else {
            tokio::time::Instant::now() + self.config.poll_interval
        };
        let mut ticker = interval_at(first_tick, self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let busy = Arc::new(AtomicBool::new(false));
        let mut running: Option<JoinHandle<()>> = None;

        loop {
            let trigger = tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => CycleTrigger::Scheduled,
                Some(()) = trigger_rx.recv() => CycleTrigger::Manual,
            };

            if busy.swap(true, Ordering::AcqRel) {
                info!(?trigger, "Cycle still running, skipping");
                let _ = self
                    .runner
                    .event_tx
                    .send(SchedulerEvent::CycleSkipped { trigger });
                continue;
            }

            let guard = BusyGuard(busy.clone());
            let runner = self.runner.clone();
            let keywords = self.keywords.read().await.clone();
            running = Some(tokio::spawn(async move {
                let _guard = guard;
                // Failures are logged and broadcast by the runner.
                let _ = runner.run(keywords, trigger).await;
            }));
        }

        if let Some(task) = running.take() {
            if !task.is_finished() {
                warn!("Aborting running cycle");
                task.abort();
                let _ = task.await;
            }
        }

        self.runner.enter(None, CycleState::Idle);
        let _ = self.runner.event_tx.send(SchedulerEvent::SchedulerStopped);
        info!("Scheduler stopped");
    }
}

/// Builder for creating a scheduler.
pub struct SchedulerBuilder {
    source: Arc<dyn PaperSource>,
    store: Arc<dyn SeenPaperStore>,
    platform: Arc<dyn ChatPlatform>,
    config: SchedulerConfig,
    channel: ChannelId,
    keywords: KeywordSet,
    summary_max_chars: usize,
    header: bool,
}

impl SchedulerBuilder {
    /// Create a new scheduler builder.
    pub fn new(
        source: Arc<dyn PaperSource>,
        store: Arc<dyn SeenPaperStore>,
        platform: Arc<dyn ChatPlatform>,
    ) -> Self {
        Self {
            source,
            store,
            platform,
            config: SchedulerConfig::default(),
            channel: ChannelId::new(defaults::CHANNEL),
            keywords: KeywordSet::new(),
            summary_max_chars: defaults::SUMMARY_MAX_CHARS,
            header: false,
        }
    }

    /// Set the scheduler configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the destination channel.
    pub fn with_channel(mut self, channel: ChannelId) -> Self {
        self.channel = channel;
        self
    }

    /// Set the initial keyword set.
    pub fn with_keywords(mut self, keywords: KeywordSet) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn with_summary_max_chars(mut self, max: usize) -> Self {
        self.summary_max_chars = max;
        self
    }

    /// Post a "Found N papers" header ahead of each non-empty batch.
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Build and return the scheduler.
    pub fn build(self) -> Scheduler {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let (state_tx, state_rx) = watch::channel(CycleState::Idle);

        let runner = CycleRunner {
            source: self.source,
            store: self.store,
            dispatcher: Dispatcher::new(self.platform)
                .with_summary_max_chars(self.summary_max_chars)
                .with_header(self.header),
            channel: self.channel,
            max_attempts: self.config.max_attempts.max(1),
            backoff: self.config.backoff.clone(),
            event_tx,
            state_tx: Arc::new(state_tx),
        };

        Scheduler {
            runner: Arc::new(runner),
            config: self.config,
            keywords: Arc::new(RwLock::new(self.keywords)),
            state_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(86_400));
        assert_eq!(config.max_attempts, 5);
        assert!(config.run_on_start);
        assert!(config.enabled);
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::default()
            .with_poll_interval(Duration::from_secs(60))
            .with_max_attempts(0)
            .with_run_on_start(false)
            .with_enabled(false);

        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 1);
        assert!(!config.run_on_start);
        assert!(!config.enabled);
    }

    #[test]
    fn test_busy_guard_clears_flag() {
        let busy = Arc::new(AtomicBool::new(true));
        {
            let _guard = BusyGuard(busy.clone());
        }
        assert!(!busy.load(Ordering::Acquire));
    }

    #[test]
    fn test_event_debug() {
        let event = SchedulerEvent::CycleSkipped {
            trigger: CycleTrigger::Manual,
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("CycleSkipped"));
        assert!(debug_str.contains("Manual"));
    }
}
