//! Abstract language-model completion capability
//!
//! The memory subsystem does not implement inference. Callers hand it a
//! [`CompletionProvider`]; [`BoundedCompletion`] enforces the deadline every
//! outbound call must carry. A timeout is reported as its own error variant,
//! distinct from provider failures, and is never retried here - retry policy
//! for completions belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{EngramError, EngramResult};

/// Trait for language-model completion backends
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Produce a completion for the given prompt
    async fn complete(&self, prompt: &str) -> EngramResult<String>;

    /// Provider name
    fn name(&self) -> &str;
}

/// A completion capability with an enforced deadline
///
/// Dropping the returned future cancels the underlying call, so requests
/// abandoned by the caller do not keep running.
pub struct BoundedCompletion {
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

impl BoundedCompletion {
    /// Wrap `provider` with a per-call deadline
    pub fn new(provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// Complete `prompt`, failing with [`EngramError::Timeout`] at the deadline
    pub async fn complete(&self, prompt: &str) -> EngramResult<String> {
        match tokio::time::timeout(self.timeout, self.provider.complete(prompt)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    provider = self.provider.name(),
                    timeout_secs = self.timeout.as_secs(),
                    "Completion call exceeded its deadline"
                );
                Err(EngramError::timeout("completion", self.timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        reply: String,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl CompletionProvider for FixedProvider {
        async fn complete(&self, _prompt: &str) -> EngramResult<String> {
            tokio::time::sleep(self.delay).await;
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[tokio::test]
    async fn test_fast_completion_passes_through() {
        let bounded = BoundedCompletion::new(
            Arc::new(FixedProvider {
                reply: "hello".to_string(),
                delay: Duration::ZERO,
            }),
            Duration::from_secs(1),
        );

        assert_eq!(bounded.complete("hi").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_slow_completion_times_out_distinctly() {
        let bounded = BoundedCompletion::new(
            Arc::new(FixedProvider {
                reply: "too late".to_string(),
                delay: Duration::from_secs(60),
            }),
            Duration::from_millis(20),
        );

        let result = bounded.complete("hi").await;
        assert!(matches!(result, Err(EngramError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_provider_errors_are_not_timeouts() {
        struct FailingProvider;

        #[async_trait::async_trait]
        impl CompletionProvider for FailingProvider {
            async fn complete(&self, _prompt: &str) -> EngramResult<String> {
                Err(EngramError::validation("prompt", "rejected", "n/a"))
            }

            fn name(&self) -> &str {
                "failing"
            }
        }

        let bounded =
            BoundedCompletion::new(Arc::new(FailingProvider), Duration::from_secs(1));

        let result = bounded.complete("hi").await;
        assert!(matches!(result, Err(EngramError::Validation { .. })));
    }
}
