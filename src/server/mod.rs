//! A2A server framework — traits and implementations for building A2A agents.
//!
//! Mirrors the Python SDK's server module architecture:
//!
//! - [`AgentExecutor`] trait — implement your agent logic
//! - [`RequestContext`] — execution context with task IDs, message, metadata
//! - [`ServerCallContext`] — per-request context with extensions and state
//! - [`RequestContextBuilder`] trait + [`SimpleRequestContextBuilder`] — build contexts
//! - [`TaskStore`] trait + [`InMemoryTaskStore`] — task persistence
//! - [`MessageStore`] trait + [`InMemoryMessageStore`] — standalone message persistence
//! - [`PushConfigStore`] trait + [`InMemoryPushConfigStore`] — per-task push config persistence
//! - [`PushSender`] trait + [`HttpPushSender`] — best-effort push notification delivery
//! - [`EventProcessor`] — the hot multi-subscriber event stream behind a running task
//! - [`Session`] / [`SessionManager`] — bind a computation to its event stream and tear it down
//! - [`KeyedMutex`] — fair per-key async mutex serializing task-scoped operations
//! - [`TaskUpdater`] — thread-safe task state transition helper
//! - [`RequestHandler`] trait + [`DefaultRequestHandler`] — JSON-RPC dispatch
//! - [`a2a_router`] — ready-made axum routes for A2A servers
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use a2a_server::server::*;
//! use a2a_server::types::AgentCard;
//!
//! // 1. Implement your agent logic.
//! struct MyAgent;
//!
//! #[async_trait::async_trait]
//! impl AgentExecutor for MyAgent {
//!     async fn execute(&self, ctx: RequestContext, processor: EventProcessor) -> a2a_server::error::A2AResult<()> {
//!         let updater = TaskUpdater::new(processor, ctx.task_id, ctx.context_id);
//!         updater.start_work(Some("Processing...")).await?;
//!         // ... do work ...
//!         updater.complete(Some("Done!")).await?;
//!         Ok(())
//!     }
//!
//!     async fn cancel(&self, ctx: RequestContext, processor: EventProcessor) -> a2a_server::error::A2AResult<()> {
//!         let updater = TaskUpdater::new(processor, ctx.task_id, ctx.context_id);
//!         updater.cancel(None).await?;
//!         Ok(())
//!     }
//! }
//!
//! // 2. Wire up the server.
//! let executor: Arc<dyn AgentExecutor> = Arc::new(MyAgent);
//! let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
//! let message_store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
//! let push_store: Arc<dyn PushConfigStore> = Arc::new(InMemoryPushConfigStore::new());
//! let push_sender: Arc<dyn PushSender> = Arc::new(NoopPushSender);
//! let handler: Arc<dyn RequestHandler> = Arc::new(
//!     DefaultRequestHandler::new(executor, task_store, message_store, push_store, push_sender)
//! );
//!
//! // 3. Create the router and serve.
//! let app = a2a_router(handler, agent_card);
//! ```

pub mod agent_executor;
pub mod axum_integration;
pub mod event_processor;
pub mod keyed_mutex;
pub mod message_store;
pub mod push_sender;
pub mod push_store;
pub mod request_handler;
pub mod session;
pub mod session_manager;
pub mod task_store;
pub mod task_updater;

// Re-export key types at the server module level for convenience.
pub use crate::types::SendMessageResponse;
pub use agent_executor::{
    AgentExecutor, RequestContext, RequestContextBuilder, ServerCallContext,
    SimpleRequestContextBuilder,
};
pub use axum_integration::a2a_router;
pub use event_processor::{append_artifact_to_task, is_final_event, EventProcessor};
pub use keyed_mutex::{KeyedMutex, KeyedMutexGuard, LockKey, TaskLockGuard};
pub use message_store::{ContextMessageStorage, InMemoryMessageStore, MessageStore};
pub use push_sender::{HttpPushSender, NoopPushSender, PushSender};
pub use push_store::{InMemoryPushConfigStore, PushConfigStore};
pub use request_handler::{DefaultRequestHandler, RequestHandler};
pub use session::{Session, SessionState};
pub use session_manager::{MonitorReady, SessionManager};
pub use task_store::{ContextTaskStorage, InMemoryTaskStore, TaskListParams, TaskListResponse, TaskStore};
pub use task_updater::TaskUpdater;
