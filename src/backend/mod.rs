pub mod gemini;
pub mod local;

pub use gemini::GeminiBackend;
pub use local::LocalBackend;

use async_trait::async_trait;

use crate::engine::EngineError;
use crate::types::{OpportunityItem, ProjectDetails, SwotAnalysis};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("API key not found. Set GEMINI_API_KEY in the environment")]
    MissingApiKey,
    #[error("request to hosted model failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("hosted model error ({status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("no usable response from model")]
    EmptyResponse,
    #[error("model response did not match the expected shape: {0}")]
    MalformedResponse(#[from] serde_json::Error),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The three operations every backend answers, regardless of how it talks to
/// its model.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, topic: &str, model_id: &str) -> Result<SwotAnalysis, BackendError>;

    async fn evaluate(
        &self,
        details: &ProjectDetails,
        model_id: &str,
    ) -> Result<SwotAnalysis, BackendError>;

    async fn generate_opportunities(
        &self,
        technology: &str,
        industry: &str,
        context: &str,
        model_id: &str,
    ) -> Result<Vec<OpportunityItem>, BackendError>;
}

// Model identifiers are sniffed exactly once, here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTarget {
    Hosted,
    Local,
}

impl ModelTarget {
    pub fn resolve(model_id: &str) -> Self {
        if model_id.starts_with("gemini") {
            Self::Hosted
        } else {
            Self::Local
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Local => "local",
        }
    }
}

/// Dispatches each operation to the backend the model identifier names.
/// Callers never branch on backend identity themselves.
pub struct Router {
    hosted: GeminiBackend,
    local: LocalBackend,
}

impl Router {
    pub fn new(hosted: GeminiBackend, local: LocalBackend) -> Self {
        Self { hosted, local }
    }

    fn backend_for(&self, model_id: &str) -> &dyn AnalysisBackend {
        match ModelTarget::resolve(model_id) {
            ModelTarget::Hosted => &self.hosted,
            ModelTarget::Local => &self.local,
        }
    }

    pub async fn analyze(
        &self,
        topic: &str,
        model_id: &str,
    ) -> Result<SwotAnalysis, BackendError> {
        self.backend_for(model_id).analyze(topic, model_id).await
    }

    pub async fn evaluate(
        &self,
        details: &ProjectDetails,
        model_id: &str,
    ) -> Result<SwotAnalysis, BackendError> {
        self.backend_for(model_id).evaluate(details, model_id).await
    }

    pub async fn generate_opportunities(
        &self,
        technology: &str,
        industry: &str,
        context: &str,
        model_id: &str,
    ) -> Result<Vec<OpportunityItem>, BackendError> {
        self.backend_for(model_id)
            .generate_opportunities(technology, industry, context, model_id)
            .await
    }
}
