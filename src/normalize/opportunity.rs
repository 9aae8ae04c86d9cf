use crate::types::OpportunityItem;

const DEFAULT_CONFIDENCE: u32 = 70;

#[derive(Default)]
struct Draft {
    concept_title: Option<String>,
    theme: String,
    market_signal: String,
    research_capability: String,
    synthesized_opportunity: String,
    confidence_score: Option<u32>,
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(str::trim)
}

/// Recovers opportunity concepts from `---`-delimited blocks of key-value
/// lines. Blocks that never resolve a TITLE are dropped whole; a missing or
/// non-numeric SCORE falls back to 70.
pub fn parse_opportunity_text(text: &str) -> Vec<OpportunityItem> {
    let mut items = Vec::new();

    for block in text.split("---") {
        if !block.contains("TITLE:") {
            continue;
        }

        let mut draft = Draft::default();
        for line in block.lines() {
            let trimmed = line.trim();
            if let Some(value) = field_value(trimmed, "TITLE:") {
                if !value.is_empty() {
                    draft.concept_title = Some(value.to_string());
                }
            } else if let Some(value) = field_value(trimmed, "THEME:") {
                draft.theme = value.to_string();
            } else if let Some(value) = field_value(trimmed, "MARKET:") {
                draft.market_signal = value.to_string();
            } else if let Some(value) = field_value(trimmed, "RESEARCH:") {
                draft.research_capability = value.to_string();
            } else if let Some(value) = field_value(trimmed, "CONCEPT:") {
                draft.synthesized_opportunity = value.to_string();
            } else if let Some(value) = field_value(trimmed, "SCORE:") {
                draft.confidence_score = value.parse().ok();
            }
        }

        let Some(concept_title) = draft.concept_title else {
            continue;
        };
        items.push(OpportunityItem {
            id: format!("local-{}", uuid::Uuid::new_v4().simple()),
            theme: draft.theme,
            market_signal: draft.market_signal,
            research_capability: draft.research_capability,
            synthesized_opportunity: draft.synthesized_opportunity,
            concept_title,
            confidence_score: draft.confidence_score.unwrap_or(DEFAULT_CONFIDENCE),
        });
    }

    items
}
