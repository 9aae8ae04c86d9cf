use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwotAnalysis {
    pub topic: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
    pub technical_viability_score: u32,
    pub market_readiness_score: u32,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_patents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevant_papers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_sources: Option<Vec<WebSource>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebSource {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunityItem {
    pub id: String,
    pub theme: String,
    pub market_signal: String,
    pub research_capability: String,
    pub synthesized_opportunity: String,
    pub concept_title: String,
    pub confidence_score: u32,
}

#[derive(Debug, Clone)]
pub struct ProjectDetails {
    pub title: String,
    pub technology: String,
    pub market: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
