use async_trait::async_trait;
use tracing::debug;

use super::{AnalysisBackend, BackendError};
use crate::engine::{GenerateOptions, LlmEngine};
use crate::normalize::{parse_opportunity_text, parse_swot_text};
use crate::prompts::{build_ideation_prompt, build_swot_prompt};
use crate::types::{OpportunityItem, ProjectDetails, SwotAnalysis};

/// Adapter for the in-process model runtime: free-text prompts in, the
/// forgiving normalizer out. Field completeness beyond the normalizer's
/// defaults is not guaranteed on this path.
pub struct LocalBackend {
    engine: LlmEngine,
    options: GenerateOptions,
}

impl LocalBackend {
    pub fn new(engine: LlmEngine, options: GenerateOptions) -> Self {
        Self { engine, options }
    }

    // Generation requires a ready engine serving the requested model; loading
    // here is a blocking precondition, not a retry.
    async fn ensure_ready(&self, model_id: &str) -> Result<(), BackendError> {
        let status = self.engine.status();
        if status.ready && status.model.as_deref() == Some(model_id) {
            return Ok(());
        }
        debug!(%model_id, "local model not ready, loading");
        self.engine.load_model(model_id).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalysisBackend for LocalBackend {
    async fn analyze(&self, topic: &str, model_id: &str) -> Result<SwotAnalysis, BackendError> {
        let details = ProjectDetails {
            title: topic.to_string(),
            technology: topic.to_string(),
            market: "General Tech".to_string(),
            description: format!("Perform a deep technical SWOT analysis on {topic}."),
        };
        self.evaluate(&details, model_id).await
    }

    async fn evaluate(
        &self,
        details: &ProjectDetails,
        model_id: &str,
    ) -> Result<SwotAnalysis, BackendError> {
        self.ensure_ready(model_id).await?;
        let prompt = build_swot_prompt(details, "");
        let raw = self.engine.generate(&prompt, &self.options).await?;
        let mut analysis = parse_swot_text(&raw);
        analysis.topic = details.title.clone();
        Ok(analysis)
    }

    async fn generate_opportunities(
        &self,
        technology: &str,
        industry: &str,
        context: &str,
        model_id: &str,
    ) -> Result<Vec<OpportunityItem>, BackendError> {
        self.ensure_ready(model_id).await?;
        let prompt = build_ideation_prompt(technology, industry, context);
        let raw = self.engine.generate(&prompt, &self.options).await?;
        Ok(parse_opportunity_text(&raw))
    }
}
