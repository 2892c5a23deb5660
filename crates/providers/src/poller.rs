//! Polling loop for async provider tasks.
//!
//! Drives a single task from submission to a terminal outcome by
//! polling the provider on a fixed cadence. Transient transport errors
//! never terminate the loop; only an explicit terminal payload, the
//! deadline, or cancellation does.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::provider::{Provider, TaskOutput, TaskPoll};

/// Default cadence between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default overall deadline for one task.
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(600);

/// Cadence and deadline for one polling run.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Time between consecutive status checks.
    pub interval: Duration,
    /// Overall budget; exceeding it ends the run as [`PollResult::TimedOut`].
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

impl PollConfig {
    /// Apply a provider-specific cadence override, keeping the deadline.
    pub fn with_interval_override(mut self, interval: Option<Duration>) -> Self {
        if let Some(interval) = interval {
            self.interval = interval;
        }
        self
    }
}

/// Terminal outcome of one polling run.
#[derive(Debug, Clone)]
pub enum PollResult {
    /// The provider reported success. Every output variant is carried.
    Succeeded(Vec<TaskOutput>),
    /// The provider reported failure.
    Failed { reason: String },
    /// The deadline elapsed without a terminal report.
    TimedOut,
    /// Polling stopped because the work was cancelled, either by
    /// process shutdown or by an external cancel of the generation.
    Cancelled,
}

/// Poll `task_id` until it reaches a terminal state.
///
/// * `cancel` - process shutdown token; stops the loop between polls.
/// * `is_cancelled` - probe for external cancellation of the owning
///   record, checked once per tick before the provider call.
///
/// Poll errors (network, malformed bodies) are logged and treated as
/// "still running": the provider may recover before the deadline.
pub async fn poll_until_terminal<F, Fut>(
    provider: Arc<dyn Provider>,
    task_id: &str,
    config: PollConfig,
    cancel: &CancellationToken,
    is_cancelled: F,
) -> PollResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let started = tokio::time::Instant::now();
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the provider gets a
    // head start before the first status check.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(task_id, "poller stopping: shutdown requested");
                return PollResult::Cancelled;
            }
            _ = interval.tick() => {}
        }

        if started.elapsed() > config.deadline {
            tracing::warn!(
                task_id,
                deadline_secs = config.deadline.as_secs(),
                "poller giving up: deadline exceeded"
            );
            return PollResult::TimedOut;
        }

        if is_cancelled().await {
            tracing::info!(task_id, "poller stopping: record cancelled");
            return PollResult::Cancelled;
        }

        // Race the provider call against shutdown too, so a slow or
        // hung poll cannot delay process exit.
        let poll = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(task_id, "poller stopping: shutdown requested");
                return PollResult::Cancelled;
            }
            poll = provider.poll(task_id) => poll,
        };

        match poll {
            Ok(TaskPoll::Running) => {}
            Ok(TaskPoll::Succeeded { outputs }) => {
                tracing::info!(task_id, outputs = outputs.len(), "task succeeded");
                return PollResult::Succeeded(outputs);
            }
            Ok(TaskPoll::Failed { reason }) => {
                tracing::warn!(task_id, reason = %reason, "task failed");
                return PollResult::Failed { reason };
            }
            Err(err) => {
                tracing::warn!(task_id, error = %err, "poll attempt failed, will retry");
            }
        }
    }
}
