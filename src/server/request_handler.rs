//! Request handler — implements the nine A2A JSON-RPC methods on top of the
//! session layer.
//!
//! Mirrors Python SDK's `RequestHandler(ABC)` and `DefaultRequestHandler` from
//! `a2a.server.request_handlers`, generalized from the donor's flat
//! `running_agents` map + `consume_until_terminal` loop into the
//! `SessionManager`/`Session`/`EventProcessor`/`KeyedMutex` collaboration
//! SPEC_FULL.md's C9 calls for: non-blocking `message/send`, a real
//! `MonitorReady` handshake before starting a session's computation, and
//! task-key/cancel-key serialization instead of a single flat mutex.
//!
//! Every method here takes and returns the same wire-level parameter and
//! response types the JSON-RPC transport deserializes/serializes directly —
//! there is no separate "handler-local" shape for `message/send` or the
//! push-notification-config methods to translate through.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{A2AError, A2AResult};
use crate::types::{
    AgentCard, CancelTaskParams, CreateTaskPushNotificationConfigParams as SetTaskPushNotificationConfigParams,
    DeleteTaskPushNotificationConfigParams, GetTaskParams, GetTaskPushNotificationConfigParams,
    ListTaskPushNotificationConfigParams, ListTaskPushNotificationConfigResponse, ListTasksParams,
    ListTasksResponse, Message, PushNotificationConfig, SendMessageConfiguration, SendMessageParams,
    SendMessageResponse, StreamResponse, SubscribeToTaskParams, Task, TaskPushNotificationConfig, TaskState,
    TaskStatus,
};

use super::agent_executor::{AgentExecutor, RequestContext};
use super::event_processor::EventProcessor;
use super::keyed_mutex::LockKey;
use super::message_store::MessageStore;
use super::push_sender::PushSender;
use super::push_store::PushConfigStore;
use super::session::Session;
use super::session_manager::SessionManager;
use super::task_store::{is_terminal_state, TaskListParams, TaskStore};

/// Trait for handling A2A JSON-RPC requests.
///
/// Each method corresponds to an A2A JSON-RPC method. The axum integration
/// layer dispatches incoming requests to these methods after deserializing
/// the request's `params` directly into the matching wire type.
///
/// Mirrors Python SDK's `RequestHandler(ABC)` from
/// `a2a.server.request_handlers.request_handler`.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle `message/send` — execute agent logic and return the completed task or message.
    async fn on_message_send(&self, params: SendMessageParams) -> A2AResult<SendMessageResponse>;

    /// Handle `message/stream` — execute agent logic and return an event stream.
    async fn on_message_send_stream(
        &self,
        params: SendMessageParams,
    ) -> A2AResult<broadcast::Receiver<StreamResponse>>;

    /// Handle `tasks/get` — retrieve a task by ID.
    async fn on_get_task(&self, params: GetTaskParams) -> A2AResult<Task>;

    /// Handle `tasks/list` — list tasks matching filter criteria.
    async fn on_list_tasks(&self, params: ListTasksParams) -> A2AResult<ListTasksResponse>;

    /// Handle `tasks/cancel` — cancel a running task.
    async fn on_cancel_task(&self, params: CancelTaskParams) -> A2AResult<Task>;

    /// Handle `tasks/subscribe` — subscribe to events for an existing task.
    async fn on_subscribe_to_task(
        &self,
        params: SubscribeToTaskParams,
    ) -> A2AResult<broadcast::Receiver<StreamResponse>>;

    /// Handle `tasks/resubscribe` — re-attach to a running task's event
    /// stream, or observe an already-empty stream if the task is terminal.
    async fn on_resubscribe_to_task(
        &self,
        params: SubscribeToTaskParams,
    ) -> A2AResult<broadcast::Receiver<StreamResponse>>;

    /// Handle `tasks/pushNotificationConfig/set`.
    async fn on_set_task_push_notification_config(
        &self,
        params: SetTaskPushNotificationConfigParams,
    ) -> A2AResult<TaskPushNotificationConfig>;

    /// Handle `tasks/pushNotificationConfig/get`.
    async fn on_get_task_push_notification_config(
        &self,
        params: GetTaskPushNotificationConfigParams,
    ) -> A2AResult<TaskPushNotificationConfig>;

    /// Handle `tasks/pushNotificationConfig/list`.
    async fn on_list_task_push_notification_config(
        &self,
        params: ListTaskPushNotificationConfigParams,
    ) -> A2AResult<ListTaskPushNotificationConfigResponse>;

    /// Handle `tasks/pushNotificationConfig/delete`.
    async fn on_delete_task_push_notification_config(
        &self,
        params: DeleteTaskPushNotificationConfigParams,
    ) -> A2AResult<()>;

    /// Handle `agent/getAuthenticatedExtendedCard`.
    async fn on_get_authenticated_extended_card(&self) -> A2AResult<AgentCard>;
}

/// Default request handler — standard implementation wiring the executor to
/// the session layer.
///
/// # Lifecycle
///
/// 1. `on_message_send`/`on_message_send_stream` resolve a task id and
///    context id, acquire the `task/<id>` lock, and either register a new
///    [`Session`] with the [`SessionManager`] or deliver a follow-up message
///    to an existing one.
/// 2. The executor publishes events to the session's [`EventProcessor`].
/// 3. For blocking `message/send`: the call waits for the session to reach a
///    terminal state, then returns the final task snapshot.
/// 4. For non-blocking `message/send`: the call returns as soon as the first
///    event lands.
/// 5. For streaming methods: a receiver on the processor's broadcast channel
///    is returned directly.
/// 6. `on_cancel_task` calls the executor's `cancel`, then asks the
///    [`SessionManager`] to tear the session down — which itself serializes
///    against the session's own monitor via the `cancel/<id>` key.
pub struct DefaultRequestHandler {
    executor: Arc<dyn AgentExecutor>,
    task_store: Arc<dyn TaskStore>,
    message_store: Arc<dyn MessageStore>,
    push_store: Arc<dyn PushConfigStore>,
    sessions: SessionManager,
    extended_card: Option<AgentCard>,
}

/// Clamps a wire-level `i32` history length to the `usize` the store expects.
/// Negative values mean "unlimited" on the wire; the store's `None` already
/// means that, so they collapse to the same thing.
fn history_length_as_usize(history_length: Option<i32>) -> Option<usize> {
    history_length.and_then(|h| usize::try_from(h).ok())
}

/// Applies a `ListTasksParams`-style projection to a task fetched at full
/// fidelity from the store.
fn project_task(mut task: Task, history_length: Option<i32>, include_artifacts: bool) -> Task {
    if let Some(n) = history_length_as_usize(history_length) {
        if let Some(history) = task.history.take() {
            let start = history.len().saturating_sub(n);
            task.history = Some(history[start..].to_vec());
        }
    }
    if !include_artifacts {
        task.artifacts = None;
    }
    task
}

fn wrap_push_config(task_id: &str, config: PushNotificationConfig) -> TaskPushNotificationConfig {
    TaskPushNotificationConfig {
        id: config.id.clone(),
        task_id: task_id.to_string(),
        push_notification_config: config,
        tenant: None,
    }
}

impl DefaultRequestHandler {
    /// Creates a handler wiring `executor` to the given stores and a push
    /// sender used for post-completion delivery.
    pub fn new(
        executor: Arc<dyn AgentExecutor>,
        task_store: Arc<dyn TaskStore>,
        message_store: Arc<dyn MessageStore>,
        push_store: Arc<dyn PushConfigStore>,
        push_sender: Arc<dyn PushSender>,
    ) -> Self {
        let sessions = SessionManager::new(
            Arc::clone(&push_store),
            push_sender,
            Arc::clone(&task_store),
        );
        Self {
            executor,
            task_store,
            message_store,
            push_store,
            sessions,
            extended_card: None,
        }
    }

    /// Attaches an extended agent card served by `agent/getAuthenticatedExtendedCard`.
    pub fn with_extended_card(mut self, card: AgentCard) -> Self {
        self.extended_card = Some(card);
        self
    }

    /// Resolves the `(taskId, contextId, existingTask)` a `message/send` or
    /// `message/stream` call targets.
    ///
    /// `TaskNotFound` if `params.message.taskId` is set but no such task
    /// exists; otherwise a fresh pair is minted for a brand-new task.
    async fn resolve_ids(
        &self,
        params: &SendMessageParams,
    ) -> A2AResult<(String, String, Option<Task>)> {
        if let Some(ref task_id) = params.message.task_id {
            let task = self
                .task_store
                .get(task_id, None, true)
                .await?
                .ok_or_else(|| {
                    A2AError::task_not_found(format!(
                        "task {task_id} was specified but does not exist"
                    ))
                })?;
            let context_id = task.context_id.clone();
            Ok((task_id.clone(), context_id, Some(task)))
        } else {
            let task_id = Uuid::new_v4().to_string();
            let context_id = params
                .message
                .context_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            Ok((task_id, context_id, None))
        }
    }

    fn build_request_context(
        task_id: &str,
        context_id: &str,
        message: Option<Message>,
        task: Option<Task>,
        configuration: Option<SendMessageConfiguration>,
        metadata: Option<serde_json::Value>,
    ) -> RequestContext {
        RequestContext {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            message,
            task,
            configuration,
            related_tasks: Vec::new(),
            metadata,
            call_context: None,
        }
    }

    /// Registers and starts a brand-new session for `task_id`, returning a
    /// subscription attached before the computation starts.
    async fn start_session(
        &self,
        task_id: String,
        context_id: String,
        message: Message,
        configuration: Option<SendMessageConfiguration>,
        metadata: Option<serde_json::Value>,
    ) -> A2AResult<(Arc<Session>, broadcast::Receiver<StreamResponse>)> {
        self.message_store.save(message.clone()).await?;

        let processor = EventProcessor::new(
            Arc::clone(&self.task_store),
            Some(task_id.clone()),
            Some(context_id.clone()),
            Some(message.clone()),
        )?;
        let rx = processor.subscribe();

        let context = Self::build_request_context(
            &task_id,
            &context_id,
            Some(message),
            None,
            configuration,
            metadata,
        );

        let executor = Arc::clone(&self.executor);
        let processor_for_exec = processor.clone();
        let session = Arc::new(Session::new(
            task_id.clone(),
            context_id.clone(),
            processor.clone(),
            Box::pin(async move { executor.execute(context, processor_for_exec).await }),
        ));

        let ready = self.sessions.add_session(Arc::clone(&session)).await;
        ready
            .await
            .map_err(|_| A2AError::internal_error("session monitor did not start"))?;

        Ok((session, rx))
    }

    /// Appends `message` to an existing task's history and message store
    /// without starting a new session.
    async fn append_follow_up(&self, task_id: &str, message: Message) -> A2AResult<()> {
        self.message_store.save(message.clone()).await?;

        let task_id_owned = task_id.to_string();
        self.task_store
            .update(
                task_id,
                Box::new(move |current| {
                    let mut task = current
                        .ok_or_else(|| A2AError::task_not_found(task_id_owned.clone()))?;
                    let history = task.history.get_or_insert_with(Vec::new);
                    history.push(message);
                    Ok(task)
                }),
            )
            .await?;
        Ok(())
    }

    fn prepare_message(message: &Message, task_id: &str, context_id: &str) -> Message {
        let mut message = message.clone();
        message.task_id = Some(task_id.to_string());
        message.context_id = Some(context_id.to_string());
        message
    }

    async fn require_task(&self, task_id: &str) -> A2AResult<Task> {
        self.task_store
            .get(task_id, None, true)
            .await?
            .ok_or_else(|| A2AError::task_not_found(task_id.to_string()))
    }
}

#[async_trait]
impl RequestHandler for DefaultRequestHandler {
    async fn on_message_send(&self, params: SendMessageParams) -> A2AResult<SendMessageResponse> {
        let (task_id, context_id, existing_task) = self.resolve_ids(&params).await?;
        let _task_guard = self.sessions.locks().lock(LockKey::task(task_id.clone())).await;

        let blocking = params
            .configuration
            .as_ref()
            .and_then(|c| c.blocking)
            .unwrap_or(true);
        let message = Self::prepare_message(&params.message, &task_id, &context_id);

        if let Some(session) = self.sessions.get_session(&task_id).await {
            self.append_follow_up(&task_id, message).await?;

            if blocking {
                let mut rx = session.processor().subscribe();
                loop {
                    match rx.recv().await {
                        Ok(StreamResponse::StatusUpdate(update))
                            if update.status.state == TaskState::Working
                                || is_terminal_state(update.status.state) =>
                        {
                            break
                        }
                        Ok(StreamResponse::Task(task))
                            if task.status.state == TaskState::Working
                                || is_terminal_state(task.status.state) =>
                        {
                            break
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }

            let task = self.require_task(&task_id).await?;
            return Ok(SendMessageResponse::Task(task));
        }

        if let Some(ref task) = existing_task {
            if is_terminal_state(task.status.state) {
                return Err(A2AError::task_not_cancelable(format!(
                    "task {task_id} is in terminal state {:?}; cannot accept further messages",
                    task.status.state
                )));
            }
        }

        let history_length = params.configuration.as_ref().and_then(|c| c.history_length);
        let (session, mut rx) = self
            .start_session(
                task_id.clone(),
                context_id,
                message,
                params.configuration.clone(),
                params.metadata.clone(),
            )
            .await?;

        if blocking {
            session.join().await?;
            let task = self
                .task_store
                .get(&task_id, history_length_as_usize(history_length), true)
                .await?
                .ok_or_else(|| A2AError::task_not_found(task_id.clone()))?;
            return Ok(SendMessageResponse::Task(task));
        }

        match rx.recv().await {
            Ok(StreamResponse::Message(msg)) => Ok(SendMessageResponse::Message(msg)),
            _ => {
                let task = self.require_task(&task_id).await?;
                Ok(SendMessageResponse::Task(task))
            }
        }
    }

    async fn on_message_send_stream(
        &self,
        params: SendMessageParams,
    ) -> A2AResult<broadcast::Receiver<StreamResponse>> {
        let (task_id, context_id, existing_task) = self.resolve_ids(&params).await?;
        let _task_guard = self.sessions.locks().lock(LockKey::task(task_id.clone())).await;

        let message = Self::prepare_message(&params.message, &task_id, &context_id);

        if let Some(session) = self.sessions.get_session(&task_id).await {
            self.append_follow_up(&task_id, message).await?;
            return Ok(session.processor().subscribe());
        }

        if let Some(ref task) = existing_task {
            if is_terminal_state(task.status.state) {
                return Err(A2AError::task_not_cancelable(format!(
                    "task {task_id} is in terminal state {:?}; cannot accept further messages",
                    task.status.state
                )));
            }
        }

        let (_session, rx) = self
            .start_session(
                task_id,
                context_id,
                message,
                params.configuration.clone(),
                params.metadata.clone(),
            )
            .await?;

        Ok(rx)
    }

    async fn on_get_task(&self, params: GetTaskParams) -> A2AResult<Task> {
        self.task_store
            .get(&params.id, history_length_as_usize(params.history_length), true)
            .await?
            .ok_or_else(|| A2AError::task_not_found(params.id.clone()))
    }

    async fn on_list_tasks(&self, params: ListTasksParams) -> A2AResult<ListTasksResponse> {
        let history_length = params.history_length;
        let include_artifacts = params.include_artifacts.unwrap_or(true);

        let store_params = TaskListParams {
            context_id: params.context_id,
            status: params.status.map(|s| vec![s]),
            page_size: params.page_size.and_then(|n| usize::try_from(n).ok()),
            page_token: params.page_token,
        };
        let resp = self.task_store.list(&store_params).await?;

        let tasks: Vec<Task> = resp
            .tasks
            .into_iter()
            .map(|t| project_task(t, history_length, include_artifacts))
            .collect();

        Ok(ListTasksResponse {
            page_size: tasks.len() as i32,
            total_size: tasks.len() as i32,
            next_page_token: resp.next_page_token.unwrap_or_default(),
            tasks,
        })
    }

    async fn on_cancel_task(&self, params: CancelTaskParams) -> A2AResult<Task> {
        // Acquire `cancel` before `task`: the SessionManager's own monitor
        // tears a session down under the same `cancel/<id>` key once its
        // computation ends, so holding it across `executor.cancel` keeps
        // the monitor from racing that teardown against the cancel events
        // `executor.cancel` is still publishing.
        let _cancel_guard = self.sessions.locks().lock(LockKey::cancel(params.id.clone())).await;
        let _task_guard = self.sessions.locks().lock(LockKey::task(params.id.clone())).await;

        match self.sessions.get_session(&params.id).await {
            None => {
                let task = self.require_task(&params.id).await?;

                if is_terminal_state(task.status.state) {
                    return Err(A2AError::task_not_cancelable(format!(
                        "task {} is already in terminal state {:?}",
                        params.id, task.status.state
                    )));
                }

                let task_id_owned = params.id.clone();
                self.task_store
                    .update(
                        &params.id,
                        Box::new(move |current| {
                            let mut task = current
                                .ok_or_else(|| A2AError::task_not_found(task_id_owned.clone()))?;
                            task.status = TaskStatus {
                                state: TaskState::Canceled,
                                message: None,
                                timestamp: Some(chrono::Utc::now().to_rfc3339()),
                            };
                            Ok(task)
                        }),
                    )
                    .await
            }
            Some(session) => {
                let task = self.require_task(&params.id).await?;
                let context_id = task.context_id.clone();

                let context = Self::build_request_context(
                    &params.id,
                    &context_id,
                    None,
                    Some(task),
                    None,
                    params.metadata.clone(),
                );

                self.executor
                    .cancel(context, session.processor().clone())
                    .await?;

                // Tear the session down ourselves, still holding the
                // `cancel` key, so the monitor cannot observe it removed
                // from the map until every event `executor.cancel` just
                // published has been delivered. The monitor's own teardown
                // afterward is a no-op: `cancel_and_join` is idempotent.
                debug!(task_id = %params.id, "Tearing down session after executor.cancel");
                if let Err(err) = session.cancel_and_join().await {
                    warn!(task_id = %params.id, error = %err, "Session teardown reported an error during cancel");
                }

                self.require_task(&params.id).await
            }
        }
    }

    async fn on_subscribe_to_task(
        &self,
        params: SubscribeToTaskParams,
    ) -> A2AResult<broadcast::Receiver<StreamResponse>> {
        self.require_task(&params.id).await?;

        match self.sessions.get_session(&params.id).await {
            Some(session) => Ok(session.processor().subscribe()),
            None => Err(A2AError::task_not_found(format!(
                "task {} has no active agent execution — cannot subscribe",
                params.id
            ))),
        }
    }

    async fn on_resubscribe_to_task(
        &self,
        params: SubscribeToTaskParams,
    ) -> A2AResult<broadcast::Receiver<StreamResponse>> {
        let task = self.require_task(&params.id).await?;

        if let Some(session) = self.sessions.get_session(&params.id).await {
            return Ok(session.processor().subscribe());
        }

        if is_terminal_state(task.status.state) {
            let (tx, rx) = broadcast::channel(1);
            drop(tx);
            return Ok(rx);
        }

        Err(A2AError::task_not_found(format!(
            "task {} has no active session to resubscribe to",
            params.id
        )))
    }

    async fn on_set_task_push_notification_config(
        &self,
        params: SetTaskPushNotificationConfigParams,
    ) -> A2AResult<TaskPushNotificationConfig> {
        self.require_task(&params.task_id).await?;

        let mut config = params.config;
        config.id = Some(params.config_id);
        let saved = self.push_store.save(&params.task_id, config).await?;

        Ok(TaskPushNotificationConfig {
            id: saved.id.clone(),
            task_id: params.task_id,
            push_notification_config: saved,
            tenant: params.tenant,
        })
    }

    async fn on_get_task_push_notification_config(
        &self,
        params: GetTaskPushNotificationConfigParams,
    ) -> A2AResult<TaskPushNotificationConfig> {
        self.require_task(&params.id).await?;

        let config = match params.push_notification_config_id {
            Some(ref config_id) => self
                .push_store
                .get(&params.id, config_id)
                .await?
                .ok_or_else(|| {
                    A2AError::invalid_params(format!(
                        "no push config {config_id} for task {}",
                        params.id
                    ))
                })?,
            None => self
                .push_store
                .get_all(&params.id)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| {
                    A2AError::invalid_params(format!("task {} has no push config", params.id))
                })?,
        };

        Ok(wrap_push_config(&params.id, config))
    }

    async fn on_list_task_push_notification_config(
        &self,
        params: ListTaskPushNotificationConfigParams,
    ) -> A2AResult<ListTaskPushNotificationConfigResponse> {
        self.require_task(&params.id).await?;

        let configs = self
            .push_store
            .get_all(&params.id)
            .await?
            .into_iter()
            .map(|c| wrap_push_config(&params.id, c))
            .collect();

        Ok(ListTaskPushNotificationConfigResponse {
            configs,
            next_page_token: None,
        })
    }

    async fn on_delete_task_push_notification_config(
        &self,
        params: DeleteTaskPushNotificationConfigParams,
    ) -> A2AResult<()> {
        self.require_task(&params.id).await?;
        self.push_store
            .delete(&params.id, &params.push_notification_config_id)
            .await
    }

    async fn on_get_authenticated_extended_card(&self) -> A2AResult<AgentCard> {
        self.extended_card.clone().ok_or_else(|| {
            A2AError::AuthenticationRequired {
                message: "no authenticated extended card configured for this agent".to_string(),
                data: None,
            }
        })
    }
}
