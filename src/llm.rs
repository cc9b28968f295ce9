//! Chat completion client.
//!
//! [`ChatModel`] is the seam between the chat flow and the language model:
//! given the full message history it returns a stream of content fragments.
//! [`OpenAIChatModel`] implements it against any OpenAI-compatible
//! `/chat/completions` endpoint with `stream: true`, decoding the upstream
//! SSE body incrementally.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::config::{Credentials, LlmConfig};
use crate::models::Message;

/// Content fragments in upstream order. An `Err` item ends the stream.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a streamed completion for `messages`.
    ///
    /// Errors returned here happen before any fragment exists; errors
    /// yielded by the stream happen mid-completion.
    async fn stream_chat(&self, messages: &[Message]) -> Result<FragmentStream>;
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded line of the upstream SSE body.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum UpstreamLine {
    Content(String),
    Done,
    Skip,
}

/// Decode a single SSE line from an OpenAI-compatible stream.
///
/// Comments, blank lines, non-`data` fields and deltas without content are
/// skipped. An `{"error": ...}` payload is returned as an error.
pub(crate) fn parse_upstream_line(line: &str) -> Result<UpstreamLine> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(UpstreamLine::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(UpstreamLine::Done);
    }
    if data.is_empty() {
        return Ok(UpstreamLine::Skip);
    }

    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| anyhow::anyhow!("Malformed stream chunk: {}", e))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        bail!("{}", message);
    }

    let chunk: StreamChunk = serde_json::from_value(value)
        .map_err(|e| anyhow::anyhow!("Malformed stream chunk: {}", e))?;

    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.and_then(|d| d.content))
        .collect();

    if content.is_empty() {
        Ok(UpstreamLine::Skip)
    } else {
        Ok(UpstreamLine::Content(content))
    }
}

/// Streaming chat client for OpenAI-compatible APIs.
pub struct OpenAIChatModel {
    client: reqwest::Client,
    completions_url: String,
    model: String,
    api_key: String,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig, credentials: &Credentials) -> Result<Self> {
        // Bounds connecting and the gap between reads, never the whole stream.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            completions_url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: credentials.api_key.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn stream_chat(&self, messages: &[Message]) -> Result<FragmentStream> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(&self.completions_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("LLM request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, body);
        }

        let byte_stream = response.bytes_stream();
        let fragments = async_stream::try_stream! {
            let mut buffer: Vec<u8> = Vec::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.map_err(|e| anyhow::anyhow!("Stream read error: {}", e))?;
                buffer.extend_from_slice(&chunk);

                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_upstream_line(&line)? {
                        UpstreamLine::Content(content) => yield content,
                        UpstreamLine::Done => return,
                        UpstreamLine::Skip => {}
                    }
                }
            }

            // Body ended without a trailing newline.
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                if let UpstreamLine::Content(content) = parse_upstream_line(&line)? {
                    yield content;
                }
            }
        };

        let fragments: FragmentStream = fragments.boxed();
        Ok(fragments)
    }
}
