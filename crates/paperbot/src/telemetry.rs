//! Mirrors scheduler events into the log under a stable target.

use tokio::sync::broadcast::{error::RecvError, Receiver};

use paperbot_jobs::SchedulerEvent;

/// Log every scheduler event until the bus closes.
pub async fn event_mirror(mut rx: Receiver<SchedulerEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match &event {
                SchedulerEvent::SchedulerStarted => {
                    tracing::info!(
                        target: "paperbot::events",
                        event = "scheduler.started",
                        "Scheduler started"
                    );
                }
                SchedulerEvent::SchedulerStopped => {
                    tracing::info!(
                        target: "paperbot::events",
                        event = "scheduler.stopped",
                        "Scheduler stopped"
                    );
                }
                SchedulerEvent::StateChanged { cycle_id, state } => {
                    tracing::debug!(
                        target: "paperbot::events",
                        event = "state.changed",
                        cycle_id = ?cycle_id, %state,
                        "State changed"
                    );
                }
                SchedulerEvent::CycleStarted { cycle_id, trigger } => {
                    tracing::info!(
                        target: "paperbot::events",
                        event = "cycle.started",
                        %cycle_id, ?trigger,
                        "Cycle started"
                    );
                }
                SchedulerEvent::CycleSkipped { trigger } => {
                    tracing::info!(
                        target: "paperbot::events",
                        event = "cycle.skipped",
                        ?trigger,
                        "Cycle skipped, previous one still running"
                    );
                }
                SchedulerEvent::FetchRetry {
                    cycle_id,
                    attempt,
                    retry_in,
                    error,
                } => {
                    tracing::warn!(
                        target: "paperbot::events",
                        event = "fetch.retry",
                        %cycle_id, attempt,
                        retry_in_ms = retry_in.as_millis() as u64,
                        %error,
                        "Fetch failed, retrying"
                    );
                }
                SchedulerEvent::DispatchFailed {
                    cycle_id,
                    paper_id,
                    error,
                } => {
                    tracing::warn!(
                        target: "paperbot::events",
                        event = "dispatch.failed",
                        %cycle_id, %paper_id, %error,
                        "Notification not delivered"
                    );
                }
                SchedulerEvent::CycleCompleted {
                    cycle_id,
                    notified,
                    delivered,
                    failed,
                } => {
                    tracing::info!(
                        target: "paperbot::events",
                        event = "cycle.completed",
                        %cycle_id, notified, delivered, failed,
                        "Cycle completed"
                    );
                }
                SchedulerEvent::CycleFailed {
                    cycle_id,
                    error_kind,
                    error,
                } => {
                    tracing::error!(
                        target: "paperbot::events",
                        event = "cycle.failed",
                        %cycle_id, error_kind, %error,
                        "Cycle failed"
                    );
                }
            },
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(missed = n, "Event mirror lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
