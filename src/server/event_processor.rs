//! Event processor — the hot multi-subscriber sink/source for task events.
//!
//! Fuses two collaborators the donor crate kept separate: `event_queue.rs`'s
//! broadcast-channel transport (`EventQueue`, `EventConsumer`) and
//! `task_manager.rs`'s side-effect logic (`TaskManager::save_task_event`,
//! `append_artifact_to_task`). SPEC_FULL.md's C5 treats "sink for the
//! executor, source for subscribers" and "normalizes events, persists
//! side-effects to the Task Store" as one component; this module is that
//! component.
//!
//! Every [`StreamResponse`] an executor publishes here is first applied to
//! the [`TaskStore`] (creating the task on first sight if needed, merging
//! status/history, appending artifacts), then broadcast to every current
//! subscriber. There is no replay: a subscriber that attaches after an event
//! was published never sees it, matching the "hot stream" semantics in
//! SPEC_FULL.md §4.5/§5.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::error::{A2AError, A2AResult};
use crate::types::{
    Artifact, Message, StreamResponse, Task, TaskArtifactUpdateEvent, TaskState, TaskStatus,
    TaskStatusUpdateEvent,
};

use super::task_store::TaskStore;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 1024;

/// A task-related event the processor knows how to persist.
///
/// Mirrors the donor's `TaskEvent` union but is reached through
/// [`EventProcessor::publish`] instead of a standalone `TaskManager`.
enum PersistedEvent {
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

/// Sink for an executor's events, source for the handler's and transport's
/// subscribers, and the single place task-store side effects are applied.
///
/// One `EventProcessor` exists per in-flight [`Session`](super::session::Session).
/// Cloning it shares the same broadcast channel and task-store handle.
#[derive(Clone)]
pub struct EventProcessor {
    tx: broadcast::Sender<StreamResponse>,
    closed: Arc<AtomicBool>,
    task_store: Arc<dyn TaskStore>,
    task_id: Arc<Mutex<Option<String>>>,
    context_id: Arc<Mutex<Option<String>>>,
    initial_message: Option<Message>,
    current_task: Arc<Mutex<Option<Task>>>,
}

impl EventProcessor {
    /// Creates a new processor backed by `task_store`.
    ///
    /// `task_id`/`context_id` seed the processor when the caller already
    /// knows them (a follow-up `message/send` on an existing task);
    /// `initial_message` becomes the first history entry of a task created
    /// from scratch.
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        task_id: Option<String>,
        context_id: Option<String>,
        initial_message: Option<Message>,
    ) -> A2AResult<Self> {
        if let Some(ref id) = task_id {
            if id.is_empty() {
                return Err(A2AError::InvalidParams {
                    message: "Task ID must be a non-empty string".to_string(),
                    data: None,
                });
            }
        }

        debug!(task_id = ?task_id, context_id = ?context_id, "EventProcessor initialized");

        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Ok(Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
            task_store,
            task_id: Arc::new(Mutex::new(task_id)),
            context_id: Arc::new(Mutex::new(context_id)),
            initial_message,
            current_task: Arc::new(Mutex::new(None)),
        })
    }

    /// Subscribes to this processor's event stream.
    ///
    /// Subscribers only see events published after this call — there is no
    /// replay of history through this channel (history lives in the Task
    /// Store and is fetched separately via `tasks/get`).
    pub fn subscribe(&self) -> broadcast::Receiver<StreamResponse> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Applies `event`'s side effects to the Task Store, then broadcasts it
    /// to every current subscriber. Returns the same event back so callers
    /// (typically a `TaskUpdater`) can chain further processing.
    ///
    /// If the processor is closed the event is dropped and logged, matching
    /// the donor's closed-queue behavior — publishing after completion is a
    /// programming error in the executor, not a fatal one for the server.
    pub async fn publish(&self, event: StreamResponse) -> A2AResult<StreamResponse> {
        if self.closed.load(Ordering::Acquire) {
            warn!("EventProcessor is closed. Event will not be published.");
            return Ok(event);
        }

        match &event {
            StreamResponse::Task(task) => {
                self.apply(PersistedEvent::Task(task.clone())).await?;
            }
            StreamResponse::StatusUpdate(status) => {
                self.apply(PersistedEvent::StatusUpdate(status.clone()))
                    .await?;
            }
            StreamResponse::ArtifactUpdate(artifact) => {
                self.apply(PersistedEvent::ArtifactUpdate(artifact.clone()))
                    .await?;
            }
            StreamResponse::Message(_) => {
                // Standalone messages bypass the Task Store entirely (§3/§4.5).
            }
        }

        match self.tx.send(event.clone()) {
            Ok(count) => debug!(subscriber_count = count, "Published event"),
            Err(_) => debug!("Published event with no active subscribers"),
        }

        if is_final_event(&event) {
            self.close().await;
        }

        Ok(event)
    }

    /// Closes the processor, preventing further publishes from taking
    /// effect. Idempotent.
    pub async fn close(&self) {
        debug!("Closing EventProcessor.");
        self.closed.store(true, Ordering::Release);
    }

    /// Returns whether the processor has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the task id this processor is bound to, if known yet.
    pub async fn task_id(&self) -> Option<String> {
        self.task_id.lock().await.clone()
    }

    /// Returns the context id this processor is bound to, if known yet.
    pub async fn context_id(&self) -> Option<String> {
        self.context_id.lock().await.clone()
    }

    /// Returns the most recently persisted task snapshot, if any event has
    /// been processed yet.
    pub async fn current_task(&self) -> Option<Task> {
        self.current_task.lock().await.clone()
    }

    /// Collects events from a fresh subscription until a final event is
    /// observed, applying the same lag/timeout handling the donor's
    /// `EventConsumer::consume_all` used. Used by the blocking `message/send`
    /// path.
    pub async fn collect_until_final(&self) -> Vec<StreamResponse> {
        let mut rx = self.subscribe();
        let mut events = Vec::new();
        let timeout = Duration::from_millis(500);

        loop {
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Ok(event)) => {
                    let is_final = is_final_event(&event);
                    events.push(event);
                    if is_final {
                        break;
                    }
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => break,
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(missed = n, "collect_until_final lagged");
                    continue;
                }
                Err(_timeout) => {
                    if self.is_closed() {
                        break;
                    }
                    continue;
                }
            }
        }

        events
    }

    // -- side-effect application (formerly `TaskManager::save_task_event`) --

    async fn apply(&self, event: PersistedEvent) -> A2AResult<()> {
        let (task_id_from_event, context_id_from_event) = match &event {
            PersistedEvent::Task(t) => (t.id.clone(), t.context_id.clone()),
            PersistedEvent::StatusUpdate(e) => (e.task_id.clone(), e.context_id.clone()),
            PersistedEvent::ArtifactUpdate(e) => (e.task_id.clone(), e.context_id.clone()),
        };

        {
            let mut task_id = self.task_id.lock().await;
            if let Some(ref our_id) = *task_id {
                if *our_id != task_id_from_event {
                    return Err(A2AError::InvalidEventException(format!(
                        "task in event doesn't match EventProcessor {} : {}",
                        our_id, task_id_from_event
                    )));
                }
            } else {
                *task_id = Some(task_id_from_event.clone());
            }
        }
        {
            let mut context_id = self.context_id.lock().await;
            if let Some(ref our_ctx) = *context_id {
                if *our_ctx != context_id_from_event {
                    return Err(A2AError::InvalidEventException(format!(
                        "context in event doesn't match EventProcessor {} : {}",
                        our_ctx, context_id_from_event
                    )));
                }
            } else {
                *context_id = Some(context_id_from_event.clone());
            }
        }

        let initial_message = self.initial_message.clone();
        let task = match event {
            PersistedEvent::Task(task) => {
                self.task_store
                    .update(&task_id_from_event, Box::new(move |_current| Ok(task)))
                    .await?
            }
            PersistedEvent::StatusUpdate(status_event) => {
                let ctx_id = context_id_from_event.clone();
                self.task_store
                    .update(
                        &task_id_from_event,
                        Box::new(move |current| {
                            let mut task = current.unwrap_or_else(|| {
                                init_task(&status_event.task_id, &ctx_id, initial_message)
                            });

                            if let Some(ref msg) = task.status.message {
                                let history = task.history.get_or_insert_with(Vec::new);
                                history.push(msg.clone());
                            }

                            if let Some(event_meta) = status_event.metadata {
                                let task_meta = task.metadata.get_or_insert_with(|| {
                                    serde_json::Value::Object(serde_json::Map::new())
                                });
                                if let (Some(task_obj), Some(event_obj)) =
                                    (task_meta.as_object_mut(), event_meta.as_object())
                                {
                                    for (k, v) in event_obj {
                                        task_obj.insert(k.clone(), v.clone());
                                    }
                                }
                            }

                            task.status = status_event.status;
                            Ok(task)
                        }),
                    )
                    .await?
            }
            PersistedEvent::ArtifactUpdate(artifact_event) => {
                let ctx_id = context_id_from_event.clone();
                self.task_store
                    .update(
                        &task_id_from_event,
                        Box::new(move |current| {
                            let mut task = current.unwrap_or_else(|| {
                                init_task(&artifact_event.task_id, &ctx_id, initial_message)
                            });
                            append_artifact_to_task(&mut task, &artifact_event);
                            Ok(task)
                        }),
                    )
                    .await?
            }
        };

        debug!(task_id = %task.id, new_state = %task.status.state, "Applied event to task store");
        *self.current_task.lock().await = Some(task);
        Ok(())
    }
}

fn init_task(task_id: &str, context_id: &str, initial_message: Option<Message>) -> Task {
    info!(task_id = %task_id, context_id = %context_id, "Task not found. Creating new task for event.");
    Task {
        id: task_id.to_string(),
        context_id: context_id.to_string(),
        kind: "task".to_string(),
        status: TaskStatus {
            state: TaskState::Submitted,
            message: None,
            timestamp: None,
        },
        artifacts: None,
        history: initial_message.map(|msg| vec![msg]),
        metadata: None,
    }
}

/// Returns whether `event` marks the end of a task's processing, the point
/// at which a blocking collector or resubscription should stop.
///
/// Mirrors the donor's `EventConsumer::is_final_event`.
pub fn is_final_event(event: &StreamResponse) -> bool {
    match event {
        StreamResponse::StatusUpdate(update) => update.r#final,
        StreamResponse::Message(_) => true,
        StreamResponse::Task(task) => matches!(
            task.status.state,
            TaskState::Completed
                | TaskState::Canceled
                | TaskState::Failed
                | TaskState::Rejected
                | TaskState::Unknown
                | TaskState::InputRequired
        ),
        StreamResponse::ArtifactUpdate(_) => false,
    }
}

/// Appends an artifact to a task based on an artifact update event.
///
/// Mirrors Python SDK's `append_artifact_to_task` from `a2a.utils.helpers`,
/// carried over from the donor's `task_manager.rs` unchanged.
pub fn append_artifact_to_task(task: &mut Task, event: &TaskArtifactUpdateEvent) {
    let artifacts = task.artifacts.get_or_insert_with(Vec::new);

    let new_artifact: &Artifact = &event.artifact;
    let artifact_id = &new_artifact.artifact_id;
    let append_parts = event.append.unwrap_or(false);

    let existing_idx = artifacts.iter().position(|a| a.artifact_id == *artifact_id);

    if !append_parts {
        if let Some(idx) = existing_idx {
            debug!(artifact_id = %artifact_id, task_id = %task.id, "Replacing artifact");
            artifacts[idx] = new_artifact.clone();
        } else {
            debug!(artifact_id = %artifact_id, task_id = %task.id, "Adding new artifact");
            artifacts.push(new_artifact.clone());
        }
    } else if let Some(idx) = existing_idx {
        debug!(artifact_id = %artifact_id, task_id = %task.id, "Appending parts to artifact");
        artifacts[idx].parts.extend(new_artifact.parts.clone());
    } else {
        warn!(
            artifact_id = %artifact_id,
            task_id = %task.id,
            "Received append=true for nonexistent artifact. Ignoring chunk."
        );
    }
}
