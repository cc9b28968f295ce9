//! Streaming responder: model fragments in, SSE events out.
//!
//! A response moves through `Idle → Streaming → Completed` or ends in
//! `Errored`. Every fragment is forwarded as soon as it arrives, in upstream
//! order, and accumulated; on natural end the accumulated reply (if any) is
//! appended to the conversation as an assistant turn and a `"[DONE]"` event
//! closes the stream. Any upstream failure instead produces exactly one
//! error event and leaves the history without an assistant turn.
//!
//! Wire format per event: `data: <json>\n\n`, where `<json>` is a JSON
//! string literal for content and the marker, or `{"error": "..."}`.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;

use crate::llm::ChatModel;
use crate::models::{Message, Role};
use crate::session::Conversation;

/// Payload of the terminal event.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Streaming,
    Completed,
    Errored,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Done,
    Error(String),
}

impl StreamEvent {
    /// JSON payload placed after `data: `.
    pub fn payload(&self) -> String {
        match self {
            StreamEvent::Content(text) => json_string(text),
            StreamEvent::Done => json_string(DONE_MARKER),
            StreamEvent::Error(message) => format!(
                "{{\"error\": {}}}",
                json_string(&format!("Stream error: {}", message))
            ),
        }
    }

    /// The complete SSE frame for this event.
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.payload())
    }
}

fn json_string(text: &str) -> String {
    serde_json::Value::from(text).to_string()
}

/// Run one assistant turn for the locked conversation.
///
/// The conversation guard travels with the stream, so the conversation
/// stays locked until the stream finishes or is dropped. A dropped stream
/// (client gone) also drops the upstream request and stores nothing.
pub fn respond(
    mut conversation: OwnedMutexGuard<Conversation>,
    model: Arc<dyn ChatModel>,
    pacing: Duration,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let history = conversation.messages().to_vec();
        tracing::debug!(state = ?StreamState::Idle, turns = history.len(), "requesting completion");

        let outcome = match model.stream_chat(&history).await {
            Err(e) => Err(e),
            Ok(mut fragments) => {
                tracing::debug!(state = ?StreamState::Streaming, "upstream stream opened");

                let mut reply = String::new();
                let mut failure = None;
                while let Some(item) = fragments.next().await {
                    match item {
                        Ok(fragment) if fragment.is_empty() => {}
                        Ok(fragment) => {
                            if !pacing.is_zero() {
                                tokio::time::sleep(pacing).await;
                            }
                            reply.push_str(&fragment);
                            yield StreamEvent::Content(fragment);
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                match failure {
                    Some(e) => Err(e),
                    None => Ok(reply),
                }
            }
        };

        match outcome {
            Ok(reply) => {
                if !reply.is_empty() {
                    if let Err(e) = conversation.push(Message::new(Role::Assistant, reply.as_str())) {
                        tracing::warn!(error = %e, "assistant turn not stored");
                    }
                }
                tracing::info!(state = ?StreamState::Completed, chars = reply.len(), "stream finished");
                yield StreamEvent::Done;
            }
            Err(e) => {
                tracing::error!(state = ?StreamState::Errored, error = %e, "Error during streaming");
                yield StreamEvent::Error(e.to_string());
            }
        }
    }
}

/// Encode events as SSE frames for an HTTP body.
pub fn sse_frames(
    events: impl Stream<Item = StreamEvent> + Send + 'static,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    events.map(|event| Ok(Bytes::from(event.to_sse())))
}
