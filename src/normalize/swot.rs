use crate::types::SwotAnalysis;

// Small local models rarely emit usable numeric scores, so both are fixed.
const DEFAULT_TECHNICAL_SCORE: u32 = 70;
const DEFAULT_MARKET_SCORE: u32 = 60;

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Strengths,
    Weaknesses,
    Opportunities,
    Threats,
    Summary,
}

fn section_header(line: &str) -> Option<Section> {
    let upper = line.to_uppercase();
    if upper.starts_with("STRENGTHS") {
        Some(Section::Strengths)
    } else if upper.starts_with("WEAKNESSES") {
        Some(Section::Weaknesses)
    } else if upper.starts_with("OPPORTUNITIES") {
        Some(Section::Opportunities)
    } else if upper.starts_with("THREATS") {
        Some(Section::Threats)
    } else if upper.starts_with("SUMMARY") {
        Some(Section::Summary)
    } else {
        None
    }
}

// Accepts "1. text", "- text", "* text" style enumerators and returns the
// text with the enumerator stripped.
fn strip_enumerator(line: &str) -> Option<&str> {
    let prefix_len = line
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '*' | '.')))
        .unwrap_or(line.len());
    if prefix_len == 0 {
        return None;
    }
    let rest = line[prefix_len..].trim_start();
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Recovers a SWOT record from loosely formatted model output. Unrecognized
/// lines are dropped rather than failing the parse; the topic is left empty
/// for the caller to fill in.
pub fn parse_swot_text(text: &str) -> SwotAnalysis {
    let mut analysis = SwotAnalysis {
        topic: String::new(),
        strengths: Vec::new(),
        weaknesses: Vec::new(),
        opportunities: Vec::new(),
        threats: Vec::new(),
        technical_viability_score: DEFAULT_TECHNICAL_SCORE,
        market_readiness_score: DEFAULT_MARKET_SCORE,
        summary: String::new(),
        key_patents: None,
        relevant_papers: None,
        web_sources: None,
    };

    let mut current: Option<Section> = None;
    let mut summary_parts: Vec<&str> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(section) = section_header(trimmed) {
            current = Some(section);
            continue;
        }
        match current {
            Some(Section::Summary) => summary_parts.push(trimmed),
            Some(section) => {
                if let Some(point) = strip_enumerator(trimmed) {
                    let list = match section {
                        Section::Strengths => &mut analysis.strengths,
                        Section::Weaknesses => &mut analysis.weaknesses,
                        Section::Opportunities => &mut analysis.opportunities,
                        Section::Threats => &mut analysis.threats,
                        Section::Summary => unreachable!(),
                    };
                    list.push(point.to_string());
                }
            }
            None => {}
        }
    }

    analysis.summary = summary_parts.join(" ");
    analysis
}
