//! Named-provider registry and dispatch entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::provider::{DispatchOutcome, DispatchRequest, Provider, ProviderError, TaskPoll};

/// Lookup table of provider integrations keyed by name.
///
/// Model configuration names the provider each model routes to; the
/// registry resolves that name at dispatch time. An unknown name is a
/// normal runtime condition (a model configured before its integration
/// ships), not a panic.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name. Replaces any previous
    /// registration with the same name.
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name(), provider);
    }

    /// Resolve a provider by name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotImplemented(name.to_string()))
    }

    /// Submit a request to the named provider, bounded by a deadline.
    ///
    /// For sync providers the deadline covers the whole call; hitting
    /// it drops the in-flight future, so no result can land after a
    /// timeout has been reported.
    pub async fn dispatch(
        &self,
        name: &str,
        request: &DispatchRequest,
        timeout: Duration,
    ) -> Result<DispatchOutcome, ProviderError> {
        let provider = self.get(name)?;
        match tokio::time::timeout(timeout, provider.submit(request)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    provider = name,
                    generation_id = request.generation_id,
                    timeout_secs = timeout.as_secs(),
                    "provider dispatch timed out"
                );
                Err(ProviderError::Timeout(timeout))
            }
        }
    }

    /// Poll an async task on the named provider.
    pub async fn poll_task(&self, name: &str, task_id: &str) -> Result<TaskPoll, ProviderError> {
        let provider = self.get(name)?;
        provider.poll(task_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{SyncArtifact, TaskHandle, TaskOutput};
    use assert_matches::assert_matches;

    struct FakeSync;

    #[async_trait::async_trait]
    impl Provider for FakeSync {
        fn name(&self) -> &'static str {
            "fake-sync"
        }

        async fn submit(
            &self,
            _request: &DispatchRequest,
        ) -> Result<DispatchOutcome, ProviderError> {
            Ok(DispatchOutcome::Sync(SyncArtifact {
                bytes: vec![1, 2, 3],
                extension: "png".to_string(),
                metadata: serde_json::json!({"ok": true}),
            }))
        }

        async fn poll(&self, _task_id: &str) -> Result<TaskPoll, ProviderError> {
            Err(ProviderError::Malformed("sync provider has no tasks".to_string()))
        }
    }

    struct FakeAsync;

    #[async_trait::async_trait]
    impl Provider for FakeAsync {
        fn name(&self) -> &'static str {
            "fake-async"
        }

        async fn submit(
            &self,
            _request: &DispatchRequest,
        ) -> Result<DispatchOutcome, ProviderError> {
            Ok(DispatchOutcome::Async(TaskHandle {
                task_id: "task-42".to_string(),
                poll_interval: None,
            }))
        }

        async fn poll(&self, task_id: &str) -> Result<TaskPoll, ProviderError> {
            assert_eq!(task_id, "task-42");
            Ok(TaskPoll::Succeeded {
                outputs: vec![TaskOutput {
                    url: "https://cdn.example.com/out.mp4".to_string(),
                    extension: "mp4".to_string(),
                }],
            })
        }
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl Provider for SlowProvider {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn submit(
            &self,
            _request: &DispatchRequest,
        ) -> Result<DispatchOutcome, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("dispatch deadline should fire first")
        }

        async fn poll(&self, _task_id: &str) -> Result<TaskPoll, ProviderError> {
            Ok(TaskPoll::Running)
        }
    }

    fn request() -> DispatchRequest {
        DispatchRequest {
            generation_id: 7,
            model_id: "image-standard".to_string(),
            prompt: "a quiet harbor at dawn".to_string(),
            params: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_not_implemented() {
        let registry = ProviderRegistry::new();
        let err = registry
            .dispatch("nope", &request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::NotImplemented(name) if name == "nope");
    }

    #[tokio::test]
    async fn sync_dispatch_returns_artifact() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeSync));
        let outcome = registry
            .dispatch("fake-sync", &request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_matches!(outcome, DispatchOutcome::Sync(artifact) => {
            assert_eq!(artifact.bytes, vec![1, 2, 3]);
            assert_eq!(artifact.extension, "png");
        });
    }

    #[tokio::test]
    async fn async_dispatch_returns_task_handle_and_polls() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(FakeAsync));
        let outcome = registry
            .dispatch("fake-async", &request(), Duration::from_secs(1))
            .await
            .unwrap();
        let task_id = match outcome {
            DispatchOutcome::Async(handle) => handle.task_id,
            other => panic!("expected async outcome, got {other:?}"),
        };

        let poll = registry.poll_task("fake-async", &task_id).await.unwrap();
        assert_matches!(poll, TaskPoll::Succeeded { outputs } => {
            assert_eq!(outputs.len(), 1);
            assert_eq!(outputs[0].extension, "mp4");
        });
    }

    #[tokio::test(start_paused = true)]
    async fn slow_dispatch_times_out() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(SlowProvider));
        let err = registry
            .dispatch("slow", &request(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_matches!(err, ProviderError::Timeout(d) if d == Duration::from_secs(30));
    }
}
