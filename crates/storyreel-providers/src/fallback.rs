//! Sequential fallback across several synchronous providers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::adapter::SyncProvider;
use crate::error::{ProviderError, ProviderResult};
use crate::types::{GenerationOutput, GenerationRequest};

/// Tries each provider in order and returns the first success.
pub struct FallbackProvider {
    name: String,
    chain: Vec<Arc<dyn SyncProvider>>,
}

impl FallbackProvider {
    pub fn new(chain: Vec<Arc<dyn SyncProvider>>) -> ProviderResult<Self> {
        if chain.is_empty() {
            return Err(ProviderError::not_configured(
                "fallback chain needs at least one provider",
            ));
        }
        let name = chain
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join("+");
        Ok(Self { name, chain })
    }
}

#[async_trait]
impl SyncProvider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit(&self, request: &GenerationRequest) -> ProviderResult<GenerationOutput> {
        let mut attempts = Vec::with_capacity(self.chain.len());
        let mut retryable = false;

        for provider in &self.chain {
            match provider.submit(request).await {
                Ok(output) => return Ok(output),
                Err(e) => {
                    warn!(
                        provider = provider.name(),
                        custom_id = %request.custom_id,
                        error = %e,
                        "Provider failed, trying next"
                    );
                    retryable |= e.is_retryable();
                    attempts.push(format!("{}: {}", provider.name(), e));
                }
            }
        }

        Err(ProviderError::AllFailed {
            attempts,
            retryable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        result: fn() -> ProviderResult<GenerationOutput>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(name: &'static str, result: fn() -> ProviderResult<GenerationOutput>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SyncProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn submit(&self, _request: &GenerationRequest) -> ProviderResult<GenerationOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn req() -> GenerationRequest {
        GenerationRequest::new("story_0", "sys", "The Door", 0.8)
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let a = Scripted::new("openai", || Err(ProviderError::RateLimited("busy".into())));
        let b = Scripted::new("deepseek", || Ok(GenerationOutput::new("story")));
        let c = Scripted::new("lmstudio", || Ok(GenerationOutput::new("unused")));
        let chain = FallbackProvider::new(vec![
            a as Arc<dyn SyncProvider>,
            b as Arc<dyn SyncProvider>,
            c.clone() as Arc<dyn SyncProvider>,
        ])
        .unwrap();

        assert_eq!(chain.name(), "openai+deepseek+lmstudio");
        let out = chain.submit(&req()).await.unwrap();
        assert_eq!(out.text, "story");
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_failed_keeps_retryability() {
        let a = Scripted::new("openai", || Err(ProviderError::Auth("bad key".into())));
        let b = Scripted::new("deepseek", || Err(ProviderError::RateLimited("busy".into())));
        let chain = FallbackProvider::new(vec![a as Arc<dyn SyncProvider>, b as Arc<dyn SyncProvider>]).unwrap();

        let err = chain.submit(&req()).await.unwrap_err();
        assert!(err.is_retryable());

        let c = Scripted::new("openai", || Err(ProviderError::Auth("bad key".into())));
        let chain = FallbackProvider::new(vec![c as Arc<dyn SyncProvider>]).unwrap();
        assert!(!chain.submit(&req()).await.unwrap_err().is_retryable());
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(FallbackProvider::new(vec![]).is_err());
    }
}
