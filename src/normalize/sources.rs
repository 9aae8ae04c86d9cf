use serde::Deserialize;

use crate::types::WebSource;

// Grounding metadata attached to hosted-model candidates. Every level may be
// absent when the model answered without searching.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<WebChunk>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebChunk {
    pub uri: Option<String>,
    pub title: Option<String>,
}

/// Collects cited web sources from grounding metadata: entries need both a
/// uri and a title, duplicates by uri keep the first occurrence, and encounter
/// order is preserved.
pub fn extract_web_sources(metadata: Option<&GroundingMetadata>) -> Vec<WebSource> {
    let Some(metadata) = metadata else {
        return Vec::new();
    };

    let mut sources: Vec<WebSource> = Vec::new();
    for chunk in &metadata.grounding_chunks {
        let Some(web) = &chunk.web else { continue };
        let (Some(uri), Some(title)) = (web.uri.as_deref(), web.title.as_deref()) else {
            continue;
        };
        if uri.is_empty() || title.is_empty() {
            continue;
        }
        if sources.iter().any(|s| s.uri == uri) {
            continue;
        }
        sources.push(WebSource {
            title: title.to_string(),
            uri: uri.to_string(),
        });
    }
    sources
}
