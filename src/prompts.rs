use crate::types::ProjectDetails;

// Templates tuned for small local models (sub-1B parameters): one worked
// example of the exact output format beats abstract instructions at that size.

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful research assistant. Keep your answers concise and factual.";

pub fn build_swot_prompt(project: &ProjectDetails, context: &str) -> String {
    let context_block = if context.is_empty() {
        String::new()
    } else {
        format!("CONTEXT (recent research and market signals):\n{context}\n\n")
    };

    format!(
        r#"You are a technical analyst. Analyze this project using the context provided.
Do NOT use placeholders like [brackets]. Be specific.

PROJECT:
Title: {title}
Description: {description}
Technology: {technology}
Market: {market}

{context_block}EXAMPLE FORMAT:
STRENGTHS:
1. High quantum efficiency in NIR spectrum.
2. Direct CMOS integration.

WEAKNESSES:
1. High power consumption.
2. Sensitive to ambient temperature.

OPPORTUNITIES:
1. Automotive LiDAR miniaturization.
2. Low-cost industrial scanners.

THREATS:
1. FMCW LiDAR competition.
2. Regulatory export limits.

SUMMARY:
The technology is highly viable for short-range sensing but needs optimization for thermal stability.

Generate your analysis now."#,
        title = project.title,
        description = project.description,
        technology = project.technology,
        market = project.market,
    )
}

pub fn build_ideation_prompt(technology: &str, industry: &str, context: &str) -> String {
    let context_line = if context.is_empty() {
        String::new()
    } else {
        format!("User Context: {context}\n")
    };

    format!(
        r#"You are a Strategic R&D Architect.
Generate 3 novel product concepts for {technology} in the {industry} industry.
{context_line}
CRITICAL: Do NOT use brackets or placeholders in your response. Output real, concrete ideas.

EXAMPLE FORMAT:
---
TITLE: QuantumDepth 3000
THEME: Industrial Metrology
MARKET: High-precision quality control in semiconductor manufacturing.
RESEARCH: Sub-picosecond timing precision in SPAD detectors.
CONCEPT: A direct ToF scanner capable of sub-millimeter accurate 3D maps of circuit boards.
SCORE: 85
---

Generate 3 unique concepts now."#
    )
}
