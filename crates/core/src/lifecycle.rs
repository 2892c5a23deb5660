//! Generation status state machine and transition rules.
//!
//! The status ids match the 1-based seed order of the
//! `generation_statuses` lookup table in the database.

// ---------------------------------------------------------------------------
// GenerationStatus
// ---------------------------------------------------------------------------

/// Status id type matching SMALLINT in the database.
pub type StatusId = i16;

/// Lifecycle status of a generation record.
///
/// `Pending` means credits are reserved but the provider has not yet
/// accepted the job. `Processing` means the provider accepted it.
/// `Completed`, `Failed`, and `Cancelled` are terminal.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Pending = 1,
    Processing = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

/// Terminal statuses: completed, failed, cancelled.
pub const TERMINAL_STATUSES: [GenerationStatus; 3] = [
    GenerationStatus::Completed,
    GenerationStatus::Failed,
    GenerationStatus::Cancelled,
];

/// Statuses the sweeper considers "in flight" and eligible for recovery.
pub const IN_FLIGHT_STATUSES: [GenerationStatus; 2] =
    [GenerationStatus::Pending, GenerationStatus::Processing];

impl GenerationStatus {
    /// Return the database status id.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Parse from a database status id.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Processing),
            3 => Some(Self::Completed),
            4 => Some(Self::Failed),
            5 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Database/API string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }
}

impl From<GenerationStatus> for StatusId {
    fn from(value: GenerationStatus) -> Self {
        value as StatusId
    }
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Whether `from -> to` is a legal status transition.
///
/// Transitions are monotonic: once `Processing` begins there is no way
/// back to `Pending`, and terminal statuses admit no transition at all.
/// An operator retry creates a fresh record instead of rewinding this one.
pub fn can_transition(from: GenerationStatus, to: GenerationStatus) -> bool {
    use GenerationStatus::*;
    match (from, to) {
        (Pending, Processing) => true,
        // Dispatch can fail or be cancelled before the provider accepts.
        (Pending, Failed) | (Pending, Cancelled) => true,
        (Processing, Completed) | (Processing, Failed) | (Processing, Cancelled) => true,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// FailureReason
// ---------------------------------------------------------------------------

/// Why a generation transitioned to `Failed`.
///
/// Stored on the audit row so timeouts, provider errors, and storage
/// errors can be distinguished after the fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The provider call or poll loop exceeded its deadline.
    Timeout,
    /// The provider returned an error or malformed response.
    ProviderError,
    /// The provider succeeded but persisting the output did not.
    StorageError,
}

impl FailureReason {
    /// Stable string form for audit rows.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ProviderError => "provider_error",
            Self::StorageError => "storage_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use GenerationStatus::*;

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(Pending.id(), 1);
        assert_eq!(Processing.id(), 2);
        assert_eq!(Completed.id(), 3);
        assert_eq!(Failed.id(), 4);
        assert_eq!(Cancelled.id(), 5);
    }

    #[test]
    fn from_id_round_trips() {
        for status in [Pending, Processing, Completed, Failed, Cancelled] {
            assert_eq!(GenerationStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(GenerationStatus::from_id(0), None);
        assert_eq!(GenerationStatus::from_id(6), None);
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(Cancelled.is_terminal());
        assert!(!Pending.is_terminal());
        assert!(!Processing.is_terminal());
    }

    #[test]
    fn pending_can_start_processing() {
        assert!(can_transition(Pending, Processing));
    }

    #[test]
    fn pending_can_fail_or_cancel_before_dispatch() {
        assert!(can_transition(Pending, Failed));
        assert!(can_transition(Pending, Cancelled));
    }

    #[test]
    fn processing_reaches_all_terminal_states() {
        assert!(can_transition(Processing, Completed));
        assert!(can_transition(Processing, Failed));
        assert!(can_transition(Processing, Cancelled));
    }

    #[test]
    fn no_transition_back_to_pending() {
        assert!(!can_transition(Processing, Pending));
        assert!(!can_transition(Completed, Pending));
        assert!(!can_transition(Failed, Pending));
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        for from in TERMINAL_STATUSES {
            for to in [Pending, Processing, Completed, Failed, Cancelled] {
                assert!(!can_transition(from, to), "{from:?} -> {to:?} must be illegal");
            }
        }
    }

    #[test]
    fn pending_cannot_complete_directly() {
        // Output must be produced and stored while processing.
        assert!(!can_transition(Pending, Completed));
    }

    #[test]
    fn failure_reason_strings_are_stable() {
        assert_eq!(FailureReason::Timeout.as_str(), "timeout");
        assert_eq!(FailureReason::ProviderError.as_str(), "provider_error");
        assert_eq!(FailureReason::StorageError.as_str(), "storage_error");
    }
}
