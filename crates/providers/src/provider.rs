//! The provider integration trait and its request/response types.

use std::time::Duration;

use atelier_core::types::DbId;

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// A generation request as handed to a provider integration.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub generation_id: DbId,
    pub model_id: String,
    /// The prompt sent to the provider (enhanced variant when present).
    pub prompt: String,
    pub params: serde_json::Value,
}

/// Output of a synchronous provider call: the final bytes plus the
/// metadata needed to store them.
#[derive(Debug, Clone)]
pub struct SyncArtifact {
    pub bytes: Vec<u8>,
    /// File extension for the storage path, e.g. `"png"`.
    pub extension: String,
    /// Raw provider response snapshot for the audit trail.
    pub metadata: serde_json::Value,
}

/// Handle returned by an asynchronous provider call.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    /// Opaque provider-assigned task id.
    pub task_id: String,
    /// Provider-specific poll cadence override, when the provider is
    /// known to be slower than the global default.
    pub poll_interval: Option<Duration>,
}

/// What a provider call produced.
///
/// Whether a provider is sync or async is a property of the provider
/// configuration; the dispatcher propagates whichever shape it receives
/// without forcing one into the other.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    Sync(SyncArtifact),
    Async(TaskHandle),
}

/// One output variant of a finished async task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    /// Provider-hosted URL of the output.
    pub url: String,
    /// File extension, e.g. `"mp4"`.
    pub extension: String,
}

/// Status of an async task at one poll.
#[derive(Debug, Clone)]
pub enum TaskPoll {
    /// Still working; poll again later.
    Running,
    /// Terminal success. Batch providers return every variant here —
    /// the caller selects a default but must not discard the rest.
    Succeeded { outputs: Vec<TaskOutput> },
    /// Terminal failure with the provider's reason.
    Failed { reason: String },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from provider integrations and the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No integration is registered under the requested name.
    #[error("Provider '{0}' is not implemented or not configured")]
    NotImplemented(String),

    /// The HTTP request itself failed (network, DNS, TLS).
    #[error("Provider request failed: {0}")]
    Request(String),

    /// The provider returned a non-2xx status code.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for the audit snapshot.
        body: String,
    },

    /// The dispatch call exceeded its deadline.
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The response body did not match the expected shape.
    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A named external generation provider.
///
/// Implementations adapt one vendor API to the platform's request and
/// status shapes. Terminal-state field names vary per vendor; that
/// adaptation happens entirely inside the implementation so callers
/// only ever see [`DispatchOutcome`] and [`TaskPoll`].
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Registry key for this provider.
    fn name(&self) -> &'static str;

    /// Poll cadence override for this provider's tasks, if any.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }

    /// Submit a generation. Sync providers block and return the final
    /// artifact; async providers return a task handle immediately.
    async fn submit(&self, request: &DispatchRequest) -> Result<DispatchOutcome, ProviderError>;

    /// Check the status of a previously submitted async task.
    async fn poll(&self, task_id: &str) -> Result<TaskPoll, ProviderError>;
}
