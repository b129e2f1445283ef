//! Message store — persistence for standalone and follow-up messages, keyed
//! by conversation (`contextId`) rather than by task.
//!
//! The donor crate has no standalone message store — it persists message
//! history inline on `Task.history` via `task_manager.rs`. SPEC_FULL.md's C2
//! adds one, modeled on the exact same `RwLock<HashMap<..>>` +
//! insertion-order-vector idiom as [`InMemoryTaskStore`](super::task_store::InMemoryTaskStore),
//! keyed by `contextId` instead of `taskId`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{A2AError, A2AResult};
use crate::types::Message;

/// Trait for persisting and retrieving messages grouped by conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Appends a message to its `contextId`'s history.
    async fn save(&self, message: Message) -> A2AResult<()>;

    /// Returns every message saved under `context_id`, in insertion order.
    async fn get_by_context(&self, context_id: &str) -> A2AResult<Vec<Message>>;

    /// Deletes every message saved under `context_id`.
    async fn delete_by_context(&self, context_id: &str) -> A2AResult<()>;

    /// Atomically replaces `context_id`'s entire message history.
    async fn replace_by_context(&self, context_id: &str, messages: Vec<Message>) -> A2AResult<()>;
}

/// In-memory [`MessageStore`], keyed by `contextId`.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    by_context: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryMessageStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            by_context: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, message: Message) -> A2AResult<()> {
        let Some(context_id) = message.context_id.clone() else {
            return Err(A2AError::MessageOperationException(
                "message has no contextId; MessageStore requires one".to_string(),
            ));
        };
        let mut by_context = self.by_context.write().await;
        by_context
            .entry(context_id.clone())
            .or_default()
            .push(message);
        debug!(context_id = %context_id, "Message saved");
        Ok(())
    }

    async fn get_by_context(&self, context_id: &str) -> A2AResult<Vec<Message>> {
        let by_context = self.by_context.read().await;
        Ok(by_context.get(context_id).cloned().unwrap_or_default())
    }

    async fn delete_by_context(&self, context_id: &str) -> A2AResult<()> {
        let mut by_context = self.by_context.write().await;
        by_context.remove(context_id);
        Ok(())
    }

    async fn replace_by_context(&self, context_id: &str, messages: Vec<Message>) -> A2AResult<()> {
        for message in &messages {
            if message.context_id.as_deref() != Some(context_id) {
                return Err(A2AError::MessageOperationException(format!(
                    "message {} belongs to context {:?}, not {}",
                    message.message_id, message.context_id, context_id
                )));
            }
        }
        let mut by_context = self.by_context.write().await;
        by_context.insert(context_id.to_string(), messages);
        Ok(())
    }
}

/// Scopes a [`MessageStore`] to a single `contextId`, analogous to
/// [`ContextTaskStorage`](super::task_store::ContextTaskStorage).
pub struct ContextMessageStorage {
    inner: Arc<dyn MessageStore>,
    context_id: String,
}

impl ContextMessageStorage {
    /// Creates a storage view scoped to `context_id`.
    pub fn new(inner: Arc<dyn MessageStore>, context_id: impl Into<String>) -> Self {
        Self {
            inner,
            context_id: context_id.into(),
        }
    }

    /// Saves `message`, rejecting it if its `contextId` isn't this view's.
    pub async fn save(&self, message: Message) -> A2AResult<()> {
        if message.context_id.as_deref() != Some(self.context_id.as_str()) {
            return Err(A2AError::MessageOperationException(format!(
                "message {} belongs to context {:?}, not {}",
                message.message_id, message.context_id, self.context_id
            )));
        }
        self.inner.save(message).await
    }

    /// Returns this view's full message history, in insertion order.
    pub async fn history(&self) -> A2AResult<Vec<Message>> {
        self.inner.get_by_context(&self.context_id).await
    }
}
