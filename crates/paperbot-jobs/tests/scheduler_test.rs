//! Scheduler tests on a paused clock.
//!
//! This test suite validates:
//! - Ticks that fire during a running cycle are skipped, not queued
//! - Fetch failures back off exponentially and give up after max attempts
//! - Store failures abort only the current cycle
//! - Manual triggers share the overlap gate
//! - Keyword updates apply to the next cycle
//! - Shutdown aborts a running cycle

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paperbot_jobs::{
    BackoffPolicy, ChannelId, CycleState, CycleTrigger, Error, KeywordSet, PaperId, PaperRecord,
    Result, Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerEvent, SeenPaperStore, SeenSet,
};
use paperbot_sources::mock::{MockChatPlatform, MockPaperSource};
use tokio::sync::broadcast;

/// In-memory store whose commits can be made to fail.
#[derive(Default)]
struct MemoryStore {
    seen: Mutex<SeenSet>,
    fail_commits: AtomicBool,
}

#[async_trait]
impl SeenPaperStore for MemoryStore {
    async fn load(&self) -> Result<SeenSet> {
        Ok(self.seen.lock().unwrap().clone())
    }

    async fn has(&self, id: &PaperId) -> Result<bool> {
        Ok(self.seen.lock().unwrap().contains(id))
    }

    async fn commit(&self, ids: &BTreeSet<PaperId>, at: DateTime<Utc>) -> Result<BTreeSet<PaperId>> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("simulated outage".into()));
        }
        let mut seen = self.seen.lock().unwrap();
        Ok(ids
            .iter()
            .filter(|id| seen.record((*id).clone(), at))
            .cloned()
            .collect())
    }
}

struct Fixture {
    source: MockPaperSource,
    store: Arc<MemoryStore>,
    chat: MockChatPlatform,
}

impl Fixture {
    fn new(source: MockPaperSource) -> Self {
        Self {
            source,
            store: Arc::new(MemoryStore::default()),
            chat: MockChatPlatform::new(),
        }
    }

    fn scheduler(&self, config: SchedulerConfig, keywords: &[&str]) -> Scheduler {
        SchedulerBuilder::new(
            Arc::new(self.source.clone()),
            self.store.clone(),
            Arc::new(self.chat.clone()),
        )
        .with_config(config)
        .with_channel(ChannelId::new("#papers"))
        .with_keywords(KeywordSet::parse(keywords.iter().copied()).unwrap())
        .build()
    }
}

fn paper(id: &str, title: &str) -> PaperRecord {
    PaperRecord::new(id, title, "")
}

fn config() -> SchedulerConfig {
    SchedulerConfig::default()
        .with_poll_interval(Duration::from_secs(10))
        .with_max_attempts(3)
        .with_backoff(
            BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
                .with_jitter(Duration::ZERO),
        )
}

/// Receive events until `pred` matches, collecting everything seen on the way.
async fn wait_for<F>(rx: &mut broadcast::Receiver<SchedulerEvent>, pred: F) -> Vec<SchedulerEvent>
where
    F: Fn(&SchedulerEvent) -> bool,
{
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(3600), async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            let done = pred(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("timed out waiting for scheduler event");
    seen
}

fn is_completed(e: &SchedulerEvent) -> bool {
    matches!(e, SchedulerEvent::CycleCompleted { .. })
}

fn skipped(events: &[SchedulerEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SchedulerEvent::CycleSkipped { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_ticks_are_skipped() {
    let fx = Fixture::new(
        MockPaperSource::new()
            .with_papers(vec![paper("P1", "Transformer Models")])
            .with_latency(Duration::from_secs(25)),
    );
    let scheduler = fx.scheduler(config(), &["transformer"]);
    let mut events = scheduler.events();
    let handle = scheduler.start();

    let seen = wait_for(&mut events, is_completed).await;

    // Ticks at 10s and 20s land inside the 25s cycle.
    assert_eq!(skipped(&seen), 2);
    assert_eq!(fx.source.fetch_count(), 1);
    assert_eq!(fx.chat.posted().len(), 1);

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fetch_retries_with_backoff_then_succeeds() {
    let fx = Fixture::new(
        MockPaperSource::new()
            .with_fetch_error("503")
            .with_fetch_error("timeout")
            .with_papers(vec![paper("P1", "Transformer Models")]),
    );
    let scheduler = fx.scheduler(config(), &["transformer"]);
    let mut events = scheduler.events();

    let start = tokio::time::Instant::now();
    let report = scheduler.run_once().await.unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(report.notified, 1);
    assert!(report.outcome.is_complete());
    assert!(start.elapsed() >= Duration::from_secs(3));

    let mut delays = Vec::new();
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SchedulerEvent::FetchRetry { retry_in, .. } => delays.push(retry_in),
            SchedulerEvent::StateChanged { state, .. } => states.push(state),
            _ => {}
        }
    }
    assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    assert!(states.contains(&CycleState::Backoff));
    assert!(states.contains(&CycleState::Dispatching));
    assert_eq!(states.last(), Some(&CycleState::Idle));
    assert_eq!(scheduler.state(), CycleState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_gives_up_after_max_attempts() {
    let fx = Fixture::new(
        MockPaperSource::new()
            .with_fetch_error("a")
            .with_fetch_error("b")
            .with_fetch_error("c")
            .with_papers(vec![paper("P1", "Transformer Models")]),
    );
    let scheduler = fx.scheduler(config(), &["transformer"]);

    let err = scheduler.run_once().await.unwrap_err();
    assert!(matches!(err, Error::Fetch(_)));
    assert_eq!(fx.source.fetch_count(), 3);
    assert!(fx.store.load().await.unwrap().is_empty());
    assert_eq!(fx.chat.attempt_count(), 0);

    // The next cycle starts from scratch.
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.attempts, 1);
    assert_eq!(report.notified, 1);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_aborts_cycle_and_next_tick_recovers() {
    let fx = Fixture::new(MockPaperSource::new().with_papers(vec![paper("P1", "Transformer Models")]));
    fx.store.fail_commits.store(true, Ordering::SeqCst);

    let scheduler = fx.scheduler(config(), &["transformer"]);
    let mut events = scheduler.events();
    let handle = scheduler.start();

    let seen = wait_for(&mut events, |e| matches!(e, SchedulerEvent::CycleFailed { .. })).await;
    match seen.last() {
        Some(SchedulerEvent::CycleFailed { error_kind, .. }) => {
            assert_eq!(*error_kind, "store_unavailable")
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SchedulerEvent::FetchRetry { .. })));
    assert_eq!(fx.chat.attempt_count(), 0);
    assert_eq!(handle.state(), CycleState::Idle);

    fx.store.fail_commits.store(false, Ordering::SeqCst);
    wait_for(&mut events, is_completed).await;
    assert_eq!(fx.chat.posted().len(), 1);
    assert!(fx.store.has(&PaperId::new("P1")).await.unwrap());

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_shares_overlap_gate() {
    let fx = Fixture::new(
        MockPaperSource::new()
            .with_papers(vec![paper("P1", "Transformer Models")])
            .with_latency(Duration::from_secs(5)),
    );
    let scheduler = fx.scheduler(
        config()
            .with_poll_interval(Duration::from_secs(3600))
            .with_run_on_start(false),
        &["transformer"],
    );
    let mut events = scheduler.events();
    let handle = scheduler.start();

    handle.trigger().await.unwrap();
    let seen = wait_for(&mut events, |e| matches!(e, SchedulerEvent::CycleStarted { .. })).await;
    assert!(matches!(
        seen.last(),
        Some(SchedulerEvent::CycleStarted {
            trigger: CycleTrigger::Manual,
            ..
        })
    ));

    handle.trigger().await.unwrap();
    let seen = wait_for(&mut events, is_completed).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SchedulerEvent::CycleSkipped {
            trigger: CycleTrigger::Manual
        }
    )));
    assert_eq!(fx.source.fetch_count(), 1);

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_keyword_update_applies_to_next_cycle() {
    let fx = Fixture::new(MockPaperSource::new().with_papers(vec![paper("P1", "Transformer Models")]));
    let scheduler = fx.scheduler(config(), &["diffusion"]);
    let mut events = scheduler.events();
    let handle = scheduler.start();

    let seen = wait_for(&mut events, is_completed).await;
    assert!(matches!(
        seen.last(),
        Some(SchedulerEvent::CycleCompleted { notified: 0, .. })
    ));

    handle
        .update_keywords(KeywordSet::parse(["transformer"]).unwrap())
        .await;
    let seen = wait_for(&mut events, is_completed).await;
    assert!(matches!(
        seen.last(),
        Some(SchedulerEvent::CycleCompleted { notified: 1, .. })
    ));
    assert_eq!(
        fx.source.get_calls().last().cloned(),
        Some(vec!["transformer".to_string()])
    );

    handle.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_aborts_running_cycle() {
    let fx = Fixture::new(
        MockPaperSource::new()
            .with_papers(vec![paper("P1", "Transformer Models")])
            .with_latency(Duration::from_secs(600)),
    );
    let scheduler = fx.scheduler(config(), &["transformer"]);
    let mut events = scheduler.events();
    let handle = scheduler.start();

    wait_for(&mut events, |e| {
        matches!(
            e,
            SchedulerEvent::StateChanged {
                state: CycleState::Fetching,
                ..
            }
        )
    })
    .await;

    handle.shutdown().await.unwrap();
    let seen = wait_for(&mut events, |e| matches!(e, SchedulerEvent::SchedulerStopped)).await;
    assert!(!seen.iter().any(is_completed));

    let state = handle.state_watch();
    handle.join().await.unwrap();

    assert_eq!(*state.borrow(), CycleState::Idle);
    assert!(fx.store.load().await.unwrap().is_empty());
    assert_eq!(fx.chat.attempt_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_scheduler_does_not_poll() {
    let fx = Fixture::new(MockPaperSource::new().with_papers(vec![paper("P1", "Transformer Models")]));
    let scheduler = fx.scheduler(config().with_enabled(false), &["transformer"]);
    let handle = scheduler.start();

    handle.join().await.unwrap();
    assert_eq!(fx.source.fetch_count(), 0);
}
