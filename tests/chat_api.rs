//! End-to-end tests of the HTTP surface with in-process collaborators.
//!
//! The router is driven with `tower::ServiceExt::oneshot`; retrieval and
//! the chat model are scripted so the SSE body can be asserted byte for byte.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use tower::ServiceExt;

use doc_chat::index::{IndexError, Retriever};
use doc_chat::llm::{ChatModel, FragmentStream};
use doc_chat::models::{Message, Role};
use doc_chat::server::{build_router, AppState};
use doc_chat::session::SessionStore;

const SYSTEM_PROMPT: &str = "Answer questions about the document.";

/// Returns fixed chunks and records every query it receives.
struct FixedRetriever {
    chunks: Vec<String>,
    queries: Mutex<Vec<String>>,
    fail: bool,
}

impl FixedRetriever {
    fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            queries: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(&[])
        }
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FixedRetriever {
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<String>, IndexError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.fail {
            return Err(IndexError::NotReady);
        }
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

/// Replays scripted fragments and records the history it was sent.
struct ScriptedModel {
    fragments: Vec<&'static str>,
    fail_with: Option<&'static str>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(fragments: &[&'static str]) -> Self {
        Self {
            fragments: fragments.to_vec(),
            fail_with: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing_after(fragments: &[&'static str], message: &'static str) -> Self {
        Self {
            fail_with: Some(message),
            ..Self::new(fragments)
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(&self, messages: &[Message]) -> Result<FragmentStream> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let mut items: Vec<Result<String>> =
            self.fragments.iter().map(|f| Ok(f.to_string())).collect();
        if let Some(message) = self.fail_with {
            items.push(Err(anyhow::anyhow!(message)));
        }
        Ok(futures::stream::iter(items).boxed())
    }
}

struct Harness {
    app: Router,
    sessions: Arc<SessionStore>,
    retriever: Arc<FixedRetriever>,
    model: Arc<ScriptedModel>,
}

fn harness(retriever: FixedRetriever, model: ScriptedModel) -> Harness {
    let sessions = Arc::new(SessionStore::new(SYSTEM_PROMPT));
    let retriever = Arc::new(retriever);
    let model = Arc::new(model);
    let state = AppState::new(
        sessions.clone(),
        retriever.clone(),
        model.clone(),
        3,
        Duration::ZERO,
    );
    Harness {
        app: build_router(state, true),
        sessions,
        retriever,
        model,
    }
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_returns_ok() {
    let h = harness(FixedRetriever::failing(), ScriptedModel::new(&[]));
    let response = h
        .app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body, serde_json::json!({ "status": "OK" }));
}

#[tokio::test]
async fn chat_streams_fragments_then_done() {
    let h = harness(
        FixedRetriever::new(&["chunk one", "chunk two"]),
        ScriptedModel::new(&["Hel", "lo", " world"]),
    );

    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "What is in the document?",
            "conversation_id": "conv-1"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let body = body_string(response).await;
    assert_eq!(
        body,
        "data: \"Hel\"\n\ndata: \"lo\"\n\ndata: \" world\"\n\ndata: \"[DONE]\"\n\n"
    );

    let messages = h.sessions.get("conv-1").unwrap().messages().await;
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0], Message::new(Role::System, SYSTEM_PROMPT));
    assert_eq!(
        messages[1],
        Message::new(
            Role::User,
            "Question: What is in the document?\n\nRelevant context from the document:\nchunk one\nchunk two"
        )
    );
    assert_eq!(messages[2], Message::new(Role::Assistant, "Hello world"));
    assert_eq!(h.retriever.queries(), vec!["What is in the document?"]);
}

#[tokio::test]
async fn model_receives_full_history() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["ok"]));

    for question in ["first", "second"] {
        let response = h
            .app
            .clone()
            .oneshot(chat_request(serde_json::json!({
                "message": question,
                "conversation_id": "conv"
            })))
            .await
            .unwrap();
        body_string(response).await;
    }

    let seen = h.model.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 2);
    // system, user(first), assistant(ok), user(second)
    assert_eq!(seen[1].len(), 4);
    assert_eq!(seen[1][0].role, Role::System);
    assert_eq!(seen[1][2], Message::new(Role::Assistant, "ok"));
    assert!(seen[1][3].content.starts_with("Question: second"));
}

#[tokio::test]
async fn empty_upstream_reply_only_sends_done() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&[]));
    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "anything?",
            "conversation_id": "quiet"
        })))
        .await
        .unwrap();

    assert_eq!(body_string(response).await, "data: \"[DONE]\"\n\n");
    let messages = h.sessions.get("quiet").unwrap().messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::User);
}

#[tokio::test]
async fn upstream_failure_is_reported_in_band() {
    let h = harness(
        FixedRetriever::new(&["ctx"]),
        ScriptedModel::failing_after(&["par"], "upstream exploded"),
    );
    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "hello",
            "conversation_id": "broken"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert_eq!(
        body,
        "data: \"par\"\n\ndata: {\"error\": \"Stream error: upstream exploded\"}\n\n"
    );
    assert!(!body.contains("[DONE]"));

    let messages = h.sessions.get("broken").unwrap().messages().await;
    assert!(messages.iter().all(|m| m.role != Role::Assistant));
}

#[tokio::test]
async fn empty_message_is_rejected_before_retrieval() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["x"]));
    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "",
            "conversation_id": "c"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(h.sessions.is_empty());
    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn missing_conversation_id_is_rejected() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["x"]));
    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({ "message": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.sessions.is_empty());
    assert!(h.retriever.queries().is_empty());
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["x"]));
    let request = Request::builder()
        .method("POST")
        .uri("/chat/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.sessions.is_empty());
}

#[tokio::test]
async fn closed_session_returns_404_without_stream() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["x"]));
    h.sessions.get_or_create("done");
    assert!(h.sessions.close("done").await);

    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "still there?",
            "conversation_id": "done"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_ne!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["code"], "session_closed");
    assert_eq!(
        body["error"]["message"],
        "The chat session has been closed. Please start a new session."
    );
    assert_eq!(h.model.calls(), 0);
    assert!(h.retriever.queries().is_empty());
    assert_eq!(h.sessions.get("done").unwrap().messages().await.len(), 1);
}

#[tokio::test]
async fn retrieval_failure_is_internal_error() {
    let h = harness(FixedRetriever::failing(), ScriptedModel::new(&["x"]));
    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "hello",
            "conversation_id": "c"
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"]["code"], "internal");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Internal server error: "));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn caller_role_is_preserved() {
    let h = harness(FixedRetriever::new(&[]), ScriptedModel::new(&["fine"]));
    let response = h
        .app
        .clone()
        .oneshot(chat_request(serde_json::json!({
            "message": "be brief",
            "role": "system",
            "conversation_id": "r"
        })))
        .await
        .unwrap();
    body_string(response).await;

    let messages = h.sessions.get("r").unwrap().messages().await;
    assert_eq!(messages[1].role, Role::System);
    assert_eq!(messages[0].content, SYSTEM_PROMPT);
}

#[tokio::test]
async fn conversations_do_not_share_history() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["reply"]));
    for id in ["alice", "bob"] {
        let response = h
            .app
            .clone()
            .oneshot(chat_request(serde_json::json!({
                "message": format!("hi from {}", id),
                "conversation_id": id
            })))
            .await
            .unwrap();
        body_string(response).await;
    }

    let alice = h.sessions.get("alice").unwrap().messages().await;
    let bob = h.sessions.get("bob").unwrap().messages().await;
    assert_eq!(alice.len(), 3);
    assert_eq!(bob.len(), 3);
    assert!(alice[1].content.contains("hi from alice"));
    assert!(bob[1].content.contains("hi from bob"));
}

#[tokio::test]
async fn chat_route_without_trailing_slash() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["a"]));
    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({ "message": "q", "conversation_id": "c" }).to_string(),
        ))
        .unwrap();
    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_string(response).await,
        "data: \"a\"\n\ndata: \"[DONE]\"\n\n"
    );
}

#[tokio::test]
async fn concurrent_turns_on_one_conversation_do_not_interleave() {
    let h = harness(FixedRetriever::new(&["ctx"]), ScriptedModel::new(&["a", "b"]));

    let ask = |question: &'static str| {
        let app = h.app.clone();
        async move {
            let response = app
                .oneshot(chat_request(serde_json::json!({
                    "message": question,
                    "conversation_id": "shared"
                })))
                .await
                .unwrap();
            body_string(response).await
        }
    };

    let (first, second) = tokio::join!(ask("one"), ask("two"));
    assert!(first.ends_with("data: \"[DONE]\"\n\n"));
    assert!(second.ends_with("data: \"[DONE]\"\n\n"));

    let roles: Vec<Role> = h
        .sessions
        .get("shared")
        .unwrap()
        .messages()
        .await
        .into_iter()
        .map(|m| m.role)
        .collect();
    assert_eq!(
        roles,
        vec![
            Role::System,
            Role::User,
            Role::Assistant,
            Role::User,
            Role::Assistant
        ]
    );
}
