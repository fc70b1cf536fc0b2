//! C4.2 LLM reviewer fallback combinator: tries a cheap model first, falls back to a premium
//! model on any error or unparseable response, and only surfaces `AiUnavailable` once both
//! have failed. Mirrors the source's cheap-then-premium (DeepSeek-then-Claude) review chain.

use crate::domain::errors::CoreError;
use crate::domain::ports::{ReviewPrompt, SignalReviewer};
use crate::domain::review::ReviewResponse;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

pub struct FallbackReviewer {
    cheap: Arc<dyn SignalReviewer>,
    premium: Arc<dyn SignalReviewer>,
}

impl FallbackReviewer {
    pub fn new(cheap: Arc<dyn SignalReviewer>, premium: Arc<dyn SignalReviewer>) -> Self {
        Self { cheap, premium }
    }

    pub async fn review(&self, prompt: ReviewPrompt) -> Result<ReviewResponse, CoreError> {
        match self.cheap.review(prompt.clone()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => warn!(stage = "ai_reviewer", reviewer = self.cheap.name(), error = %e, "cheap reviewer failed, falling back"),
        }

        match self.premium.review(prompt).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                warn!(stage = "ai_reviewer", reviewer = self.premium.name(), error = %e, "premium reviewer also failed");
                Err(CoreError::AiUnavailable { reason: e.to_string() })
            }
        }
    }
}

/// Lets the watcher / high-vol-track / position-supervisor re-review call sites share the
/// same cheap-then-premium chain as the C4 pipeline, one level below `ReviewPipeline` (no
/// hard-rule gate -- those call sites are re-checking an already-approved signal).
#[async_trait]
impl SignalReviewer for FallbackReviewer {
    async fn review(&self, prompt: ReviewPrompt) -> anyhow::Result<ReviewResponse> {
        FallbackReviewer::review(self, prompt).await.map_err(Into::into)
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::domain::signals::Side;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysFails;
    #[async_trait]
    impl SignalReviewer for AlwaysFails {
        async fn review(&self, _prompt: ReviewPrompt) -> anyhow::Result<ReviewResponse> {
            anyhow::bail!("boom")
        }
        fn name(&self) -> &'static str {
            "always_fails"
        }
    }

    struct AlwaysApproves(Arc<AtomicUsize>);
    #[async_trait]
    impl SignalReviewer for AlwaysApproves {
        async fn review(&self, _prompt: ReviewPrompt) -> anyhow::Result<ReviewResponse> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ReviewResponse { approved: true, confidence: 0.9, side: Side::Long, reasoning: "ok".to_string() })
        }
        fn name(&self) -> &'static str {
            "always_approves"
        }
    }

    fn prompt() -> ReviewPrompt {
        ReviewPrompt { kind: crate::domain::ports::PromptKind::Reversal, body: "test".to_string() }
    }

    #[tokio::test]
    async fn falls_back_to_premium_on_cheap_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let reviewer = FallbackReviewer::new(Arc::new(AlwaysFails), Arc::new(AlwaysApproves(calls.clone())));
        let result = reviewer.review(prompt()).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_failing_surfaces_ai_unavailable() {
        let reviewer = FallbackReviewer::new(Arc::new(AlwaysFails), Arc::new(AlwaysFails));
        let result = reviewer.review(prompt()).await;
        assert!(matches!(result, Err(CoreError::AiUnavailable { .. })));
    }
}
