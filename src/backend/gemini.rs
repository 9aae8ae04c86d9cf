use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{AnalysisBackend, BackendError};
use crate::normalize::sources::GroundingMetadata;
use crate::normalize::extract_web_sources;
use crate::types::{OpportunityItem, ProjectDetails, SwotAnalysis};

const SWOT_ANALYST_INSTRUCTION: &str = r#"You are an elite Strategic Technical Intelligence Analyst specializing in Computer Vision, Sensor Design, and Autonomous Systems.
Your task is to evaluate technical projects, patents, and research papers to provide a comprehensive SWOT analysis.

CRITICAL: You have access to web search. Use it to find REAL, VERIFIABLE recent developments, recent patents, and actual Arxiv papers.

Focus on:
1. Technical feasibility (physics, engineering limits).
2. Novelty compared to existing Arxiv papers and Patents.
3. Market trends and commercial viability.

Be critical, precise, and data-driven in your tone."#;

const PROJECT_ASSESSOR_INSTRUCTION: &str = r#"You are an expert Venture Technologist and R&D Assessor for Computer Vision systems.
Evaluate the provided project proposal with extreme scrutiny.

Use web search to validate claims against current state-of-the-art research and market competitors.

Assess:
1. Innovation: Is this novel or a commodity?
2. Feasibility: Are there physics or manufacturing bottlenecks?
3. Market Fit: Does the target market actually need this specific solution?

Provide a candid SWOT analysis."#;

fn swot_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "topic": { "type": "STRING" },
            "strengths": { "type": "ARRAY", "items": { "type": "STRING" } },
            "weaknesses": { "type": "ARRAY", "items": { "type": "STRING" } },
            "opportunities": { "type": "ARRAY", "items": { "type": "STRING" } },
            "threats": { "type": "ARRAY", "items": { "type": "STRING" } },
            "technicalViabilityScore": { "type": "INTEGER", "description": "0 to 100 score" },
            "marketReadinessScore": { "type": "INTEGER", "description": "0 to 100 score" },
            "summary": { "type": "STRING", "description": "A concise executive summary of the technology." },
            "keyPatents": { "type": "ARRAY", "items": { "type": "STRING" }, "description": "Related patent classifications or areas" },
            "relevantPapers": { "type": "ARRAY", "items": { "type": "STRING" }, "description": "Types of research papers relevant to this" }
        },
        "required": ["topic", "strengths", "weaknesses", "opportunities", "threats", "technicalViabilityScore", "marketReadinessScore", "summary"]
    })
}

fn opportunity_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "id": { "type": "STRING" },
                "theme": { "type": "STRING", "description": "Broad category, e.g. 'AR/VR Evolution'" },
                "marketSignal": { "type": "STRING", "description": "The demand or problem statement" },
                "researchCapability": { "type": "STRING", "description": "The technical solution or enabler" },
                "synthesizedOpportunity": { "type": "STRING", "description": "The resulting product concept" },
                "conceptTitle": { "type": "STRING", "description": "A catchy name for the project" },
                "confidenceScore": { "type": "INTEGER", "description": "0-100 rating of success probability" }
            },
            "required": ["id", "theme", "marketSignal", "researchCapability", "synthesizedOpportunity", "conceptTitle", "confidenceScore"]
        }
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Clone, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }

    fn grounding(&self) -> Option<&GroundingMetadata> {
        self.candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
    }
}

/// Adapter for the hosted generateContent endpoint. Field presence and types
/// are enforced server-side through the response schema, so no free-text
/// parsing happens on this path.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(api_key: Option<String>, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn generate_content(
        &self,
        model_id: &str,
        prompt: &str,
        system_instruction: &str,
        enable_search: bool,
        response_schema: serde_json::Value,
    ) -> Result<GenerateContentResponse, BackendError> {
        let api_key = self.api_key.as_deref().ok_or(BackendError::MissingApiKey)?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            system_instruction: Some(Content {
                parts: vec![Part {
                    text: system_instruction,
                }],
            }),
            tools: enable_search.then(|| {
                vec![Tool {
                    google_search: json!({}),
                }]
            }),
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema,
            },
        };

        debug!(%model_id, "dispatching generateContent request");
        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, model_id
            ))
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, body });
        }

        Ok(response.json().await?)
    }

    async fn swot_request(
        &self,
        model_id: &str,
        prompt: &str,
        system_instruction: &str,
    ) -> Result<SwotAnalysis, BackendError> {
        let response = self
            .generate_content(model_id, prompt, system_instruction, true, swot_schema())
            .await?;

        let text = response.text();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        let mut analysis: SwotAnalysis = serde_json::from_str(&text)?;
        analysis.web_sources = Some(extract_web_sources(response.grounding()));
        Ok(analysis)
    }
}

#[async_trait]
impl AnalysisBackend for GeminiBackend {
    async fn analyze(&self, topic: &str, model_id: &str) -> Result<SwotAnalysis, BackendError> {
        let prompt = format!(
            "Conduct a deep-dive strategic analysis on: \"{topic}\".\nEvaluate it specifically within the context of computer vision and sensor technology."
        );
        self.swot_request(model_id, &prompt, SWOT_ANALYST_INSTRUCTION)
            .await
    }

    async fn evaluate(
        &self,
        details: &ProjectDetails,
        model_id: &str,
    ) -> Result<SwotAnalysis, BackendError> {
        let prompt = format!(
            "Conduct a Strategic Project Assessment for:\n\nProject Title: {}\nCore Technology: {}\nTarget Market: {}\nTechnical Description: {}\n\nOutput the result as a structured SWOT analysis JSON.\nFor 'topic', use the Project Title.",
            details.title, details.technology, details.market, details.description
        );
        self.swot_request(model_id, &prompt, PROJECT_ASSESSOR_INSTRUCTION)
            .await
    }

    async fn generate_opportunities(
        &self,
        technology: &str,
        industry: &str,
        context: &str,
        model_id: &str,
    ) -> Result<Vec<OpportunityItem>, BackendError> {
        let tech_constraint = if technology != "All" {
            format!("Focus strictly on {technology} technology.")
        } else {
            "Consider all advanced sensor technologies (LiDAR, SPAD, SWIR, etc).".to_string()
        };
        let market_constraint = if industry != "All" {
            format!("Focus strictly on the {industry} industry.")
        } else {
            "Consider all high-growth sectors (Automotive, Medical, Industrial, etc).".to_string()
        };
        let user_context = if context.is_empty() {
            String::new()
        } else {
            format!("Strategic Context/Ideas provided by user: \"{context}\". Ensure concepts align with this context.")
        };

        let system_instruction = format!(
            "You are a Strategic R&D Architect for a high-tech sensor company.\nYour goal is to synthesize new product opportunities by intersecting emerging Market Needs with advanced Research Capabilities.\n\nConstraints:\n1. {tech_constraint}\n2. {market_constraint}\n3. {user_context}\n\nProcess (Chain of Ideas):\n1. Scan the landscape based on constraints.\n2. Match problems with sensor capabilities.\n3. Generate 3 distinct, high-value product concepts.\n4. Filter for Technical Feasibility x Market Value."
        );

        let response = self
            .generate_content(
                model_id,
                "Generate the top 3 strategic R&D opportunities based on the defined constraints.",
                &system_instruction,
                false,
                opportunity_schema(),
            )
            .await?;

        let text = response.text();
        if text.is_empty() {
            return Err(BackendError::EmptyResponse);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn swot_body() -> String {
        serde_json::to_string(&json!({
            "topic": "SPAD sensors",
            "strengths": ["Picosecond gating"],
            "weaknesses": ["Dark counts"],
            "opportunities": ["Automotive LiDAR"],
            "threats": ["FMCW"],
            "technicalViabilityScore": 82,
            "marketReadinessScore": 64,
            "summary": "Promising.",
            "keyPatents": ["H01L 31/107"],
            "relevantPapers": ["Single-photon imaging"]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let backend = GeminiBackend::new(None, "http://127.0.0.1:9");
        let err = backend
            .analyze("SPAD sensors", "gemini-3-pro-preview")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::MissingApiKey));
    }

    #[tokio::test]
    async fn analyze_parses_schema_output_and_attaches_deduped_sources() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-3-pro-preview:generateContent")
                .header("x-goog-api-key", "test-key")
                .body_contains("googleSearch")
                .body_contains("responseSchema");
            then.status(200).json_body(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": swot_body() }] },
                    "groundingMetadata": {
                        "groundingChunks": [
                            { "web": { "uri": "https://a.example", "title": "A" } },
                            { "web": { "uri": "https://a.example", "title": "A again" } },
                            { "web": { "uri": "https://b.example", "title": "B" } }
                        ]
                    }
                }]
            }));
        });

        let backend = GeminiBackend::new(Some("test-key".into()), &server.url(""));
        let analysis = backend
            .analyze("SPAD sensors", "gemini-3-pro-preview")
            .await
            .unwrap();
        mock.assert();

        assert_eq!(analysis.topic, "SPAD sensors");
        assert_eq!(analysis.technical_viability_score, 82);
        assert_eq!(analysis.key_patents.as_deref(), Some(&["H01L 31/107".to_string()][..]));
        let sources = analysis.web_sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "A");
        assert_eq!(sources[1].uri, "https://b.example");
    }

    #[tokio::test]
    async fn empty_candidates_surface_as_no_usable_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path_contains("generateContent");
            then.status(200).json_body(json!({ "candidates": [] }));
        });

        let backend = GeminiBackend::new(Some("test-key".into()), &server.url(""));
        let err = backend
            .analyze("SPAD sensors", "gemini-3-pro-preview")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::EmptyResponse));
    }

    #[tokio::test]
    async fn api_status_errors_carry_the_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path_contains("generateContent");
            then.status(429).body("quota exhausted");
        });

        let backend = GeminiBackend::new(Some("test-key".into()), &server.url(""));
        let err = backend
            .analyze("SPAD sensors", "gemini-3-pro-preview")
            .await
            .unwrap_err();
        match err {
            BackendError::Api { status, body } => {
                assert_eq!(status.as_u16(), 429);
                assert_eq!(body, "quota exhausted");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[test]
    fn search_tool_is_attached_only_when_enabled() {
        let with_search = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: "p" }],
            }],
            system_instruction: None,
            tools: true.then(|| {
                vec![Tool {
                    google_search: json!({}),
                }]
            }),
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: swot_schema(),
            },
        };
        let value = serde_json::to_value(&with_search).unwrap();
        assert!(value["tools"][0]["googleSearch"].is_object());

        let without_search = GenerateContentRequest {
            tools: None,
            ..with_search
        };
        let value = serde_json::to_value(&without_search).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["generationConfig"]["responseMimeType"], "application/json");
    }

    #[tokio::test]
    async fn opportunities_deserialize_the_schema_array() {
        let server = MockServer::start();
        let items = serde_json::to_string(&json!([
            {
                "id": "opp-1",
                "theme": "Industrial Metrology",
                "marketSignal": "Semiconductor QC",
                "researchCapability": "SPAD timing",
                "synthesizedOpportunity": "ToF board scanner",
                "conceptTitle": "QuantumDepth",
                "confidenceScore": 85
            }
        ]))
        .unwrap();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/models/gemini-3-pro-preview:generateContent");
            then.status(200).json_body(json!({
                "candidates": [{ "content": { "parts": [{ "text": items }] } }]
            }));
        });

        let backend = GeminiBackend::new(Some("test-key".into()), &server.url(""));
        let opportunities = backend
            .generate_opportunities("SPAD", "Automotive", "", "gemini-3-pro-preview")
            .await
            .unwrap();
        mock.assert();

        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].concept_title, "QuantumDepth");
        assert_eq!(opportunities[0].confidence_score, 85);
    }
}
