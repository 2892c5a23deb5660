//! Staleness detection and the stuck-job recovery decision table.
//!
//! The sweeper in `atelier-sweeper` performs the I/O (polling the
//! provider, downloading output, updating rows); the decision of *what*
//! to do with a stale record is made here so it can be tested without a
//! database or network.

use std::time::Duration;

use crate::lifecycle::GenerationStatus;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// Default staleness threshold: 5 minutes without a row update.
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(300);

/// Whether a record is stale enough for sweeper recovery.
///
/// Eligibility requires `now - updated_at` to *exceed* the threshold:
/// a record exactly at the boundary is not yet eligible.
pub fn is_stale(updated_at: Timestamp, now: Timestamp, threshold: Duration) -> bool {
    let age = now.signed_duration_since(updated_at);
    match chrono::Duration::from_std(threshold) {
        Ok(threshold) => age > threshold,
        // Threshold too large to represent; nothing is ever stale.
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Decision table
// ---------------------------------------------------------------------------

/// What one status poll of the record's provider task reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedTask {
    /// The provider finished and published output at this URL.
    Done { output_url: Option<String> },
    /// The provider reported a terminal failure.
    Failed { reason: String },
    /// The provider is still working.
    Running,
}

/// Recovery action for one stale record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Record is already terminal; running recovery again is a no-op.
    Skip,
    /// Download the provider's output, upload it to storage, complete.
    CompleteFromOutput { output_url: String },
    /// Output is already durably stored (crash between upload and status
    /// write); advance the record to completed directly.
    MarkCompleted,
    /// Terminal failure observed at the provider; fail with its reason.
    Fail { reason: String },
    /// Provider is still working; not stuck, leave the record alone.
    LeaveUntouched,
    /// Pending record whose dispatch never happened; re-invoke it from
    /// the beginning.
    Reinvoke,
    /// No recovery applies; force-fail with a diagnostic naming the
    /// stuck status and elapsed time.
    ForceFail { diagnostic: String },
}

/// Decide how to recover a stale record.
///
/// * `status` — the record's current status (re-read inside the sweep
///   loop, which makes a second sweep over recovered records a no-op).
/// * `task` — result of polling the record's provider task, if it has one.
/// * `output_stored` — whether the record already carries an output URL.
/// * `elapsed` — how long since the record last progressed.
pub fn decide(
    status: GenerationStatus,
    task: Option<&ObservedTask>,
    output_stored: bool,
    elapsed: Duration,
) -> RecoveryAction {
    if status.is_terminal() {
        return RecoveryAction::Skip;
    }

    if status == GenerationStatus::Processing {
        match task {
            Some(ObservedTask::Done {
                output_url: Some(url),
            }) => {
                return RecoveryAction::CompleteFromOutput {
                    output_url: url.clone(),
                }
            }
            Some(ObservedTask::Done { output_url: None }) => {
                return RecoveryAction::Fail {
                    reason: "Provider reported done without any output".into(),
                }
            }
            Some(ObservedTask::Failed { reason }) => {
                return RecoveryAction::Fail {
                    reason: reason.clone(),
                }
            }
            Some(ObservedTask::Running) => return RecoveryAction::LeaveUntouched,
            None => {}
        }

        if output_stored {
            // The upload finished but the completion write never landed.
            return RecoveryAction::MarkCompleted;
        }
    }

    if status == GenerationStatus::Pending {
        // Credits are reserved but the dispatch never reached a provider.
        return RecoveryAction::Reinvoke;
    }

    RecoveryAction::ForceFail {
        diagnostic: format!(
            "Stuck in status '{}' for {}s with no recoverable state",
            status.as_str(),
            elapsed.as_secs()
        ),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
