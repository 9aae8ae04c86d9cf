use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Thinking,
    Answering,
}

#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub text: String,
    pub phase: Phase,
}

#[derive(Debug, Clone)]
pub struct SamplingOptions {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub top_k: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            max_new_tokens: 4096,
            temperature: 0.7,
            top_k: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PullProgress {
    pub status: String,
    pub completed: Option<u64>,
    pub total: Option<u64>,
}

/// The model runtime boundary. Implementations are owned exclusively by the
/// engine's worker task; nothing else touches the loaded model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Availability check. An error here means degraded capability, not a
    /// fatal condition.
    async fn probe(&self) -> Result<String>;

    /// Fetch and warm up a model, forwarding download progress as it arrives.
    async fn load(
        &mut self,
        model_id: &str,
        progress: &mut (dyn FnMut(PullProgress) + Send),
    ) -> Result<()>;

    /// Streamed chat completion. The chunk callback returns whether to keep
    /// consuming; returning false stops the stream early and the partial text
    /// accumulated so far is returned.
    async fn generate(
        &mut self,
        messages: &[ChatMessage],
        options: &SamplingOptions,
        on_chunk: &mut (dyn FnMut(StreamChunk) -> bool + Send),
    ) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct OllamaRuntime {
    client: reqwest::Client,
    base_url: String,
    model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: String,
    completed: Option<u64>,
    total: Option<u64>,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Clone, Serialize)]
struct ChatOptions {
    num_predict: u32,
    temperature: f32,
    top_k: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatLine {
    message: Option<ChatLineMessage>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
    thinking: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionResponse {
    version: String,
}

impl OllamaRuntime {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: None,
        }
    }
}

async fn ensure_success(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("{} error ({}): {}", what, status, body);
    }
    Ok(response)
}

// Drains an NDJSON response line by line. Returns false if the handler asked
// to stop before the stream ended.
async fn read_json_lines<T, F>(response: reqwest::Response, mut handle: F) -> Result<bool>
where
    T: serde::de::DeserializeOwned,
    F: FnMut(T) -> bool,
{
    let mut stream = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("Failed to read response stream")?;
        buf.extend_from_slice(&chunk);
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: T =
                serde_json::from_str(line).context("Failed to parse response stream line")?;
            if !handle(value) {
                return Ok(false);
            }
        }
    }

    let rest = String::from_utf8_lossy(&buf);
    let rest = rest.trim();
    if !rest.is_empty() {
        let value: T =
            serde_json::from_str(rest).context("Failed to parse response stream line")?;
        if !handle(value) {
            return Ok(false);
        }
    }
    Ok(true)
}

#[async_trait]
impl TextGenerator for OllamaRuntime {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn probe(&self) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/api/version", self.base_url))
            .send()
            .await
            .context("Failed to reach local model runtime")?;
        let response = ensure_success(response, "Ollama version").await?;
        let version: VersionResponse = response
            .json()
            .await
            .context("Failed to parse version response")?;
        Ok(format!("ollama {}", version.version))
    }

    async fn load(
        &mut self,
        model_id: &str,
        progress: &mut (dyn FnMut(PullProgress) + Send),
    ) -> Result<()> {
        self.model = None;

        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .json(&PullRequest {
                model: model_id,
                stream: true,
            })
            .send()
            .await
            .context("Failed to send pull request")?;
        let response = ensure_success(response, "Ollama pull").await?;

        let mut pull_error: Option<String> = None;
        read_json_lines::<PullLine, _>(response, |line| {
            if let Some(error) = line.error {
                pull_error = Some(error);
                return false;
            }
            progress(PullProgress {
                status: line.status,
                completed: line.completed,
                total: line.total,
            });
            true
        })
        .await?;
        if let Some(error) = pull_error {
            anyhow::bail!("Ollama pull error: {}", error);
        }

        // One-token warmup so the first real request does not pay spin-up.
        let warmup_messages = [ChatMessage::user("a")];
        let warmup = ChatRequest {
            model: model_id,
            messages: &warmup_messages,
            stream: false,
            options: ChatOptions {
                num_predict: 1,
                temperature: 0.0,
                top_k: 1,
            },
        };
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&warmup)
            .send()
            .await
            .context("Failed to send warmup request")?;
        ensure_success(response, "Ollama warmup").await?;

        self.model = Some(model_id.to_string());
        Ok(())
    }

    async fn generate(
        &mut self,
        messages: &[ChatMessage],
        options: &SamplingOptions,
        on_chunk: &mut (dyn FnMut(StreamChunk) -> bool + Send),
    ) -> Result<String> {
        let model = self.model.as_deref().context("No model loaded")?;

        let request = ChatRequest {
            model,
            messages,
            stream: true,
            options: ChatOptions {
                num_predict: options.max_new_tokens,
                temperature: options.temperature,
                top_k: options.top_k,
            },
        };
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .context("Failed to send chat request")?;
        let response = ensure_success(response, "Ollama chat").await?;

        let mut text = String::new();
        let mut stream_error: Option<String> = None;
        read_json_lines::<ChatLine, _>(response, |line| {
            if let Some(error) = line.error {
                stream_error = Some(error);
                return false;
            }
            let Some(message) = line.message else {
                return true;
            };
            if let Some(thinking) = message.thinking {
                if !thinking.is_empty()
                    && !on_chunk(StreamChunk {
                        text: thinking,
                        phase: Phase::Thinking,
                    })
                {
                    return false;
                }
            }
            if !message.content.is_empty() {
                text.push_str(&message.content);
                return on_chunk(StreamChunk {
                    text: message.content,
                    phase: Phase::Answering,
                });
            }
            true
        })
        .await?;
        if let Some(error) = stream_error {
            anyhow::bail!("Ollama chat error: {}", error);
        }

        Ok(text)
    }
}
