pub mod opportunity;
pub mod sources;
pub mod swot;

pub use opportunity::parse_opportunity_text;
pub use sources::{extract_web_sources, GroundingMetadata};
pub use swot::parse_swot_text;
