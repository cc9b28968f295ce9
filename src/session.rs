//! In-memory conversation store.
//!
//! Maps caller-supplied conversation ids to [`Conversation`]s for the
//! lifetime of the process. Nothing is ever evicted or persisted.
//!
//! Each conversation sits behind its own async mutex. The chat flow holds
//! that mutex (via [`SessionHandle::lock_owned`]) from appending the user
//! turn until the assistant turn is stored, so two requests for the same id
//! are applied one after the other instead of interleaving their history.
//! Requests for different ids only share the brief map lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::{Message, Role};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("The chat session has been closed. Please start a new session.")]
    Closed,
}

/// Ordered message history plus an active flag.
///
/// `messages[0]` is the system turn fixed at creation; the only mutations
/// are appends, so it can never change afterwards.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
    active: bool,
}

impl Conversation {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::new(Role::System, system_prompt)],
            active: true,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Mark the conversation as permanently closed.
    pub fn close(&mut self) {
        self.active = false;
    }

    /// Append a turn. Fails once the conversation has been closed.
    pub fn push(&mut self, message: Message) -> Result<(), SessionError> {
        if !self.active {
            return Err(SessionError::Closed);
        }
        self.messages.push(message);
        Ok(())
    }
}

/// Shared handle to one stored conversation.
///
/// Clones refer to the same conversation: history appended through one
/// handle is visible through every other handle for the same id.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Conversation>>,
}

impl SessionHandle {
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Conversation> {
        self.inner.lock().await
    }

    /// Lock for the duration of a streamed turn; the guard can be moved
    /// into the response stream.
    pub async fn lock_owned(&self) -> OwnedMutexGuard<Conversation> {
        self.inner.clone().lock_owned().await
    }

    /// Snapshot of the current history.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages().to_vec()
    }

    pub fn same_as(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Process-wide map from conversation id to conversation.
pub struct SessionStore {
    system_prompt: String,
    conversations: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Return the conversation for `conversation_id`, creating it with the
    /// system prompt if it does not exist yet.
    pub fn get_or_create(&self, conversation_id: &str) -> SessionHandle {
        if let Some(handle) = self.get(conversation_id) {
            return handle;
        }

        let mut map = self
            .conversations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        map.entry(conversation_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(conversation_id, "creating conversation");
                SessionHandle {
                    inner: Arc::new(Mutex::new(Conversation::new(self.system_prompt.clone()))),
                }
            })
            .clone()
    }

    pub fn get(&self, conversation_id: &str) -> Option<SessionHandle> {
        self.conversations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(conversation_id)
            .cloned()
    }

    /// Close an existing conversation. Returns `false` if the id is unknown.
    pub async fn close(&self, conversation_id: &str) -> bool {
        match self.get(conversation_id) {
            Some(handle) => {
                handle.lock().await.close();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.conversations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
