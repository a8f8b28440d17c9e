use async_trait::async_trait;
use crucible_resilience::RetryPolicy;
use crucible_types::AgentException;

use crate::context::PipelineContext;
use crate::stage::{Stage, StageResult};

/// Forwards to an inner stage when `predicate(ctx)` holds; otherwise
/// returns `Continue` without running it (§4.7).
pub struct ConditionalStage<P> {
    name: String,
    predicate: P,
    inner: Box<dyn Stage>,
}

impl<P> ConditionalStage<P>
where
    P: Fn(&PipelineContext) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: P, inner: Box<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            predicate,
            inner,
        }
    }
}

#[async_trait]
impl<P> Stage for ConditionalStage<P>
where
    P: Fn(&PipelineContext) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn retry_policy(&self) -> Option<RetryPolicy> {
        self.inner.retry_policy()
    }

    async fn execute(&self, ctx: &PipelineContext) -> Result<StageResult, AgentException> {
        if (self.predicate)(ctx) {
            self.inner.execute(ctx).await
        } else {
            Ok(StageResult::Continue)
        }
    }
}
