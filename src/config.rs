use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // Absence is a hosted-backend error at call time, not a startup error.
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub ollama_url: String,
    pub default_model: String,
    pub local_model: String,
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
    pub log_dir: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            ollama_url: std::env::var("OLLAMA_URL")
                .unwrap_or_else(|_| "http://localhost:11434".into()),
            default_model: std::env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "gemini-3-pro-preview".into()),
            local_model: std::env::var("LOCAL_MODEL").unwrap_or_else(|_| "qwen3:0.6b".into()),
            max_new_tokens: std::env::var("MAX_NEW_TOKENS")
                .unwrap_or_else(|_| "4096".into())
                .parse()
                .context("MAX_NEW_TOKENS must be a number")?,
            temperature: std::env::var("TEMPERATURE")
                .unwrap_or_else(|_| "0.7".into())
                .parse()
                .context("TEMPERATURE must be a number")?,
            top_k: std::env::var("TOP_K")
                .unwrap_or_else(|_| "20".into())
                .parse()
                .context("TOP_K must be a number")?,
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".into()),
        })
    }
}
