//! # a2a-server — transport-agnostic runtime for the Agent-to-Agent (A2A) protocol
//!
//! This crate implements the server-side core of the
//! [A2A protocol](https://a2a-protocol.org/latest/specification/): a request
//! handler for the nine A2A JSON-RPC methods, built around a session layer
//! that coordinates per-task concurrency, event streaming, cancellation,
//! follow-up messages, and post-completion push-notification delivery.
//!
//! ## Overview
//!
//! The core is deliberately transport-agnostic: it consumes typed parameters
//! and a [`server::ServerCallContext`] and produces typed results or event
//! streams. An illustrative axum-based HTTP/SSE adapter is included behind
//! the `server` feature, but nothing in the core depends on it.
//!
//! - **Request Handler** ([`server::RequestHandler`]) — implements the nine
//!   A2A methods.
//! - **Session Manager** ([`server::SessionManager`]) — tracks at most one
//!   active [`server::Session`] per task id, monitors completion, and
//!   triggers push delivery.
//! - **Event Processor** ([`server::EventProcessor`]) — the hot,
//!   multi-subscriber sink the executor publishes into and the source
//!   subscribers stream from; it also applies side effects to the Task
//!   Store.
//! - **Keyed Mutex** ([`server::KeyedMutex`]) — fair per-key locking used to
//!   serialize operations on the same task id.
//! - **Task Store** / **Message Store** / **Push-Config Store** — pluggable,
//!   trait-based persistence with in-memory reference implementations.
//!
//! ## Feature flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | yes     | axum integration for exposing the core over HTTP/SSE |
//!
//! ## Quick start
//!
//! Implement [`server::AgentExecutor`] to define your agent's behavior:
//!
//! ```rust,ignore
//! use a2a_server::server::{AgentExecutor, RequestContext, EventProcessor, TaskUpdater};
//! use a2a_server::types::Part;
//! use a2a_server::error::A2AResult;
//! use async_trait::async_trait;
//!
//! struct EchoAgent;
//!
//! #[async_trait]
//! impl AgentExecutor for EchoAgent {
//!     async fn execute(&self, context: RequestContext, processor: EventProcessor) -> A2AResult<()> {
//!         let updater = TaskUpdater::new(processor, context.task_id.clone(), context.context_id.clone());
//!         updater.complete_with_text("Echo").await
//!     }
//!
//!     async fn cancel(&self, context: RequestContext, processor: EventProcessor) -> A2AResult<()> {
//!         let updater = TaskUpdater::new(processor, context.task_id, context.context_id);
//!         updater.cancel(None).await
//!     }
//! }
//! ```
//!
//! Then wire up `DefaultRequestHandler` behind whatever transport you choose
//! (or the bundled axum adapter, `server::a2a_router`).
//!
//! ## Protocol compliance
//!
//! All wire types match the A2A v0.3 protobuf definitions; the nine RPC
//! method names and the eleven error codes in [`error::A2AError`] are
//! bit-exact with the specification.

pub mod builders;
pub mod error;
pub mod types;
pub mod utils;

#[cfg(feature = "server")]
pub mod server;

/// Prelude module that re-exports commonly used types and traits.
///
/// Import this module with `use a2a_server::prelude::*;` to get access to
/// the most frequently used types without having to import them
/// individually.
pub mod prelude {
    // Core types
    pub use crate::types::{
        AgentCapabilities, AgentCard, AgentInterface, AgentSkill, Artifact, FileContent,
        FileWithBytes, FileWithUri, Message, Part, Role, SendMessageConfiguration,
        SendMessageParams, StreamResponse, Task, TaskArtifactUpdateEvent, TaskState, TaskStatus,
        TaskStatusUpdateEvent,
    };

    // Error types
    pub use crate::error::{A2AError, A2AResult};

    // Builders
    pub use crate::builders::AgentCardBuilder;

    #[cfg(feature = "server")]
    pub use crate::builders::ServerBuilder;

    #[cfg(feature = "server")]
    pub use crate::server::{
        AgentExecutor, EventProcessor, InMemoryPushConfigStore, InMemoryTaskStore,
        KeyedMutex, RequestContext, RequestContextBuilder, Session, SessionManager,
        ServerCallContext, SimpleRequestContextBuilder, TaskStore, TaskUpdater,
    };
}

// Re-export core types at crate root for convenience.
pub use builders::AgentCardBuilder;
pub use error::{A2AError, A2AResult};
pub use types::*;

#[cfg(feature = "server")]
pub use builders::ServerBuilder;
