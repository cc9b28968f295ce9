//! Core data types shared by the retrieval, session and HTTP layers.

use serde::{Deserialize, Serialize};

/// A contiguous span of document text produced by the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
}

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{role, content}` turn; also the wire shape sent to the chat model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Body of `POST /chat/`.
///
/// `message` and `conversation_id` default to empty so that their absence
/// is reported by [`ChatRequest::validate`] with a readable message instead
/// of a deserializer error.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub conversation_id: String,
}

fn default_role() -> Role {
    Role::User
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.message.trim().is_empty() {
            return Err("message must not be empty".to_string());
        }
        if self.conversation_id.trim().is_empty() {
            return Err("conversation_id must not be empty".to_string());
        }
        Ok(())
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "OK".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_to_user() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message":"hi","conversation_id":"c1"}"#).unwrap();
        assert_eq!(req.role, Role::User);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn missing_conversation_id_fails_validation() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(
            req.validate().unwrap_err(),
            "conversation_id must not be empty"
        );
    }

    #[test]
    fn blank_message_fails_validation() {
        let req: ChatRequest =
            serde_json::from_str(r#"{"message":"   ","conversation_id":"c1"}"#).unwrap();
        assert_eq!(req.validate().unwrap_err(), "message must not be empty");
    }

    #[test]
    fn unknown_role_is_rejected_by_deserializer() {
        let res: Result<ChatRequest, _> =
            serde_json::from_str(r#"{"message":"hi","role":"wizard","conversation_id":"c1"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn message_serializes_lowercase_role() {
        let json = serde_json::to_string(&Message::new(Role::Assistant, "x")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"x"}"#);
    }
}
