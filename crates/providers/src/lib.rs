//! Provider integrations: the dispatch trait, the named-provider
//! registry, a shared HTTP adapter, and the async status poller.

pub mod http;
pub mod poller;
pub mod provider;
pub mod registry;

pub use provider::{
    DispatchOutcome, DispatchRequest, Provider, ProviderError, SyncArtifact, TaskHandle,
    TaskOutput, TaskPoll,
};
pub use registry::ProviderRegistry;
