//! Session manager — owns the `taskId → Session` map and the monitor that
//! tears a session down once its computation ends.
//!
//! Grounded on the donor's `DefaultRequestHandler`'s `register_producer` /
//! `cleanup_producer` pair in `request_handler.rs`, which inserted and
//! removed entries from `running_agents` around a spawned task. This module
//! generalizes that into a standalone manager and adds what the donor
//! lacked: the `MonitorReady` rendezvous (so a caller that just registered a
//! session can wait until its monitor is actually subscribed before
//! triggering the computation) and the cancel-key handshake against
//! [`KeyedMutex`] so a concurrent `tasks/cancel` cannot race the monitor's
//! own teardown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};
use crate::types::StreamResponse;

use super::keyed_mutex::{KeyedMutex, LockKey};
use super::push_sender::PushSender;
use super::push_store::PushConfigStore;
use super::session::Session;
use super::task_store::TaskStore;

/// Signaled once a session's monitor has subscribed to its Event Processor.
///
/// Callers that spawn a session's computation only after this fires are
/// guaranteed the monitor (and therefore any downstream push-notification
/// delivery) will observe every event, including the first one.
pub type MonitorReady = oneshot::Receiver<()>;

/// Owns live [`Session`]s and drives their teardown.
///
/// Cloning a `SessionManager` shares the same session map, lock registry,
/// and stores — it is meant to be held as a single shared instance, not
/// constructed per request.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    locks: Arc<KeyedMutex<LockKey>>,
    push_store: Arc<dyn PushConfigStore>,
    push_sender: Arc<dyn PushSender>,
    task_store: Arc<dyn TaskStore>,
}

impl SessionManager {
    /// Creates a manager backed by the given stores and sender.
    pub fn new(
        push_store: Arc<dyn PushConfigStore>,
        push_sender: Arc<dyn PushSender>,
        task_store: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(KeyedMutex::new()),
            push_store,
            push_sender,
            task_store,
        }
    }

    /// The shared keyed-mutex registry, for handlers that need to serialize
    /// other task-scoped work (e.g. `message/send`) against the same `task`
    /// key this manager's sessions are registered under.
    pub fn locks(&self) -> &KeyedMutex<LockKey> {
        &self.locks
    }

    /// Registers `session` and spawns its monitor.
    ///
    /// Returns a [`MonitorReady`] receiver that fires once the monitor has
    /// subscribed to the session's Event Processor. The caller should await
    /// it before calling `session.start()` — or, as the handler does, before
    /// returning control to whatever will eventually call `start()` — so no
    /// event published by the computation is missed.
    pub async fn add_session(&self, session: Arc<Session>) -> MonitorReady {
        let task_id = session.task_id().to_string();
        self.sessions
            .write()
            .await
            .insert(task_id.clone(), Arc::clone(&session));

        let (ready_tx, ready_rx) = oneshot::channel();
        let manager = self.clone();
        tokio::spawn(async move {
            manager.monitor(session, ready_tx).await;
        });

        ready_rx
    }

    /// Looks up the live session for `task_id`, if any.
    pub async fn get_session(&self, task_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(task_id).cloned()
    }

    /// Returns the task ids of every currently-registered session.
    pub async fn active_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Requests cancellation of the session for `task_id`, serialized
    /// against the monitor's own teardown via the `cancel/<id>` key.
    ///
    /// Returns [`A2AError::SessionNotActive`] if no session is registered —
    /// callers map this to `TaskNotCancelable` or treat it as a no-op
    /// depending on whether the task is already terminal.
    pub async fn cancel_session(&self, task_id: &str) -> A2AResult<()> {
        let _cancel_guard = self.locks.lock(LockKey::cancel(task_id)).await;
        match self.get_session(task_id).await {
            Some(session) => session.cancel_and_join().await,
            None => Err(A2AError::SessionNotActive(format!(
                "no active session for task {task_id}"
            ))),
        }
    }

    /// Drives one session from registration to teardown.
    ///
    /// 1. Subscribes to the session's Event Processor (establishes the hot
    ///    stream before anything can be missed).
    /// 2. Signals `MonitorReady`.
    /// 3. Starts the computation, watching the subscription for the first
    ///    event it publishes while waiting for it to terminate.
    /// 4. Acquires the `cancel/<id>` key — rendezvous with any in-flight
    ///    `cancel_session` call — then removes the session from the map and
    ///    calls `cancel_and_join` (idempotent; a no-op if the computation
    ///    already finished normally).
    /// 5. Delivers a best-effort push notification to every config
    ///    registered for this task, but only if the first event observed
    ///    was a task snapshot (`StreamResponse::Task`) rather than a
    ///    status/artifact delta — a delta implies a streaming caller is
    ///    already attached to this task, so a push would be redundant.
    async fn monitor(&self, session: Arc<Session>, ready_tx: oneshot::Sender<()>) {
        let task_id = session.task_id().to_string();
        let mut subscription = session.processor().subscribe();

        if ready_tx.send(()).is_err() {
            debug!(task_id = %task_id, "MonitorReady receiver dropped before signal");
        }

        session.start().await;

        let mut first_event_is_snapshot: Option<bool> = None;
        let mut join_fut = Box::pin(session.join());
        let join_result = loop {
            tokio::select! {
                recv = subscription.recv(), if first_event_is_snapshot.is_none() => {
                    match recv {
                        Ok(StreamResponse::Task(_)) => first_event_is_snapshot = Some(true),
                        Ok(_) => first_event_is_snapshot = Some(false),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => first_event_is_snapshot = Some(false),
                    }
                }
                result = &mut join_fut => break result,
            }
        };
        if let Err(err) = join_result {
            warn!(task_id = %task_id, error = %err, "Session computation ended with an error");
        }

        let _cancel_guard = self.locks.lock(LockKey::cancel(&task_id)).await;
        self.sessions.write().await.remove(&task_id);
        if let Err(err) = session.cancel_and_join().await {
            warn!(task_id = %task_id, error = %err, "Session teardown reported an error");
        }
        drop(_cancel_guard);

        if first_event_is_snapshot.unwrap_or(false) {
            self.deliver_push_notifications(&task_id).await;
        } else {
            debug!(task_id = %task_id, "Skipping push delivery: first event was not a task snapshot");
        }
    }

    async fn deliver_push_notifications(&self, task_id: &str) {
        let configs = match self.push_store.get_all(task_id).await {
            Ok(configs) => configs,
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Failed to load push configs");
                return;
            }
        };
        if configs.is_empty() {
            return;
        }

        let task = match self.task_store.get(task_id, None, true).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id = %task_id, "No task snapshot found for push delivery");
                return;
            }
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Failed to load task for push delivery");
                return;
            }
        };

        for config in configs {
            if let Err(err) = self.push_sender.send(&config, &task).await {
                warn!(
                    task_id = %task_id,
                    config_id = ?config.id,
                    error = %err,
                    "Push notification delivery failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::event_processor::EventProcessor;
    use crate::server::push_sender::RecordingPushSender;
    use crate::server::push_store::InMemoryPushConfigStore;
    use crate::server::task_store::InMemoryTaskStore;
    use crate::types::{
        PushNotificationConfig, StreamResponse, Task, TaskState, TaskStatus, TaskStatusUpdateEvent,
    };
    use std::time::Duration;

    fn manager_with(
        task_store: Arc<dyn TaskStore>,
        push_sender: Arc<dyn PushSender>,
    ) -> SessionManager {
        SessionManager::new(
            Arc::new(InMemoryPushConfigStore::new()),
            push_sender,
            task_store,
        )
    }

    #[tokio::test]
    async fn add_session_registers_and_removes_on_completion() {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let manager = manager_with(Arc::clone(&task_store), Arc::new(RecordingPushSender::new()));

        let processor =
            EventProcessor::new(Arc::clone(&task_store), Some("t1".to_string()), Some("ctx1".to_string()), None)
                .unwrap();
        let session = Arc::new(Session::new(
            "t1",
            "ctx1",
            processor,
            Box::pin(async { Ok(()) }),
        ));

        let ready = manager.add_session(Arc::clone(&session)).await;
        ready.await.unwrap();

        assert!(manager.get_session("t1").await.is_some());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.get_session("t1").await.is_none());
        assert!(manager.active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_session_aborts_running_computation() {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let manager = manager_with(Arc::clone(&task_store), Arc::new(RecordingPushSender::new()));

        let processor =
            EventProcessor::new(Arc::clone(&task_store), Some("t1".to_string()), Some("ctx1".to_string()), None)
                .unwrap();
        let session = Arc::new(Session::new(
            "t1",
            "ctx1",
            processor,
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        ));

        let ready = manager.add_session(Arc::clone(&session)).await;
        ready.await.unwrap();

        manager.cancel_session("t1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(manager.get_session("t1").await.is_none());
    }

    #[tokio::test]
    async fn cancel_session_without_registration_errors() {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let manager = manager_with(task_store, Arc::new(RecordingPushSender::new()));
        assert!(manager.cancel_session("missing").await.is_err());
    }

    async fn save_push_config(push_store: &InMemoryPushConfigStore, task_id: &str) {
        push_store
            .save(
                task_id,
                PushNotificationConfig {
                    id: Some("c1".to_string()),
                    url: "https://example.com/hook".to_string(),
                    token: None,
                    authentication: None,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn push_notification_delivered_when_first_event_is_task_snapshot() {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let push_store = Arc::new(InMemoryPushConfigStore::new());
        save_push_config(&push_store, "t1").await;
        let push_sender = Arc::new(RecordingPushSender::new());
        let manager = SessionManager::new(
            push_store,
            Arc::clone(&push_sender) as Arc<dyn PushSender>,
            Arc::clone(&task_store),
        );

        let processor =
            EventProcessor::new(Arc::clone(&task_store), Some("t1".to_string()), Some("ctx1".to_string()), None)
                .unwrap();
        let processor_clone = processor.clone();
        let session = Arc::new(Session::new(
            "t1",
            "ctx1",
            processor,
            Box::pin(async move {
                processor_clone
                    .publish(StreamResponse::Task(Task {
                        id: "t1".to_string(),
                        context_id: "ctx1".to_string(),
                        kind: "task".to_string(),
                        status: TaskStatus {
                            state: TaskState::Submitted,
                            message: None,
                            timestamp: None,
                        },
                        artifacts: None,
                        history: None,
                        metadata: None,
                    }))
                    .await
                    .unwrap();
                processor_clone
                    .publish(StreamResponse::StatusUpdate(TaskStatusUpdateEvent {
                        task_id: "t1".to_string(),
                        context_id: "ctx1".to_string(),
                        kind: "status-update".to_string(),
                        status: TaskStatus {
                            state: TaskState::Completed,
                            message: None,
                            timestamp: None,
                        },
                        r#final: true,
                        metadata: None,
                    }))
                    .await
                    .unwrap();
                Ok(())
            }),
        ));

        let ready = manager.add_session(session).await;
        ready.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = push_sender.sent().await;
        assert_eq!(sent, vec![("t1".to_string(), "https://example.com/hook".to_string())]);
    }

    #[tokio::test]
    async fn push_notification_skipped_when_first_event_is_status_delta() {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let push_store = Arc::new(InMemoryPushConfigStore::new());
        save_push_config(&push_store, "t1").await;
        let push_sender = Arc::new(RecordingPushSender::new());
        let manager = SessionManager::new(
            push_store,
            Arc::clone(&push_sender) as Arc<dyn PushSender>,
            Arc::clone(&task_store),
        );

        let processor =
            EventProcessor::new(Arc::clone(&task_store), Some("t1".to_string()), Some("ctx1".to_string()), None)
                .unwrap();
        let processor_clone = processor.clone();
        let session = Arc::new(Session::new(
            "t1",
            "ctx1",
            processor,
            Box::pin(async move {
                // A streaming caller already attached via `tasks/subscribe`
                // only ever sees deltas, never a `Task` snapshot — a
                // subsequent push would just be noise, so it must not fire.
                processor_clone
                    .publish(StreamResponse::StatusUpdate(TaskStatusUpdateEvent {
                        task_id: "t1".to_string(),
                        context_id: "ctx1".to_string(),
                        kind: "status-update".to_string(),
                        status: TaskStatus {
                            state: TaskState::Completed,
                            message: None,
                            timestamp: None,
                        },
                        r#final: true,
                        metadata: None,
                    }))
                    .await
                    .unwrap();
                Ok(())
            }),
        ));

        let ready = manager.add_session(session).await;
        ready.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = push_sender.sent().await;
        assert!(sent.is_empty());
    }

    #[tokio::test]
    async fn push_notification_skipped_when_no_event_is_published() {
        let task_store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let push_store = Arc::new(InMemoryPushConfigStore::new());
        save_push_config(&push_store, "t1").await;
        let push_sender = Arc::new(RecordingPushSender::new());
        let manager = SessionManager::new(
            push_store,
            Arc::clone(&push_sender) as Arc<dyn PushSender>,
            Arc::clone(&task_store),
        );

        let processor =
            EventProcessor::new(Arc::clone(&task_store), Some("t1".to_string()), Some("ctx1".to_string()), None)
                .unwrap();
        let session = Arc::new(Session::new(
            "t1",
            "ctx1",
            processor,
            Box::pin(async { Ok(()) }),
        ));

        let ready = manager.add_session(session).await;
        ready.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let sent = push_sender.sent().await;
        assert!(sent.is_empty());
    }
}
