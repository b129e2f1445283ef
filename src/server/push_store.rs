//! Push-config store — per-task push-notification subscription storage.
//!
//! The donor crate's `RequestHandler` only exposes `UnsupportedOperation`
//! stubs for the push-config methods and has no backing store at all.
//! Grounded instead on the `other_examples/` pack's trysoma-soma `a2a-rs`
//! `DefaultRequestHandler`, whose `push_config_store` field and
//! `on_set/get/list/delete_task_push_notification_config` handlers are the
//! reference for this component's shape. The in-memory implementation
//! reuses [`InMemoryTaskStore`](super::task_store::InMemoryTaskStore)'s
//! `RwLock<HashMap<..>>` idiom, keyed by task id with a `Vec` of configs per
//! task (a task may have multiple subscriptions).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::A2AResult;
use crate::types::PushNotificationConfig;

/// Trait for persisting per-task push-notification configs.
#[async_trait]
pub trait PushConfigStore: Send + Sync {
    /// Upserts `config` under `task_id`, keyed by `config.id`.
    ///
    /// If `config.id` is `None`, one is generated and the stored (and
    /// returned) config carries it — callers that need the assigned id
    /// should use the return value.
    async fn save(
        &self,
        task_id: &str,
        config: PushNotificationConfig,
    ) -> A2AResult<PushNotificationConfig>;

    /// Returns the config registered under `task_id` with id `config_id`.
    async fn get(
        &self,
        task_id: &str,
        config_id: &str,
    ) -> A2AResult<Option<PushNotificationConfig>>;

    /// Returns every config registered for `task_id`, in insertion order.
    async fn get_all(&self, task_id: &str) -> A2AResult<Vec<PushNotificationConfig>>;

    /// Removes the config registered under `task_id` with id `config_id`.
    ///
    /// Silently succeeds if no such config exists.
    async fn delete(&self, task_id: &str, config_id: &str) -> A2AResult<()>;
}

/// In-memory [`PushConfigStore`].
#[derive(Debug, Default)]
pub struct InMemoryPushConfigStore {
    by_task: RwLock<HashMap<String, Vec<PushNotificationConfig>>>,
}

impl InMemoryPushConfigStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self {
            by_task: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PushConfigStore for InMemoryPushConfigStore {
    async fn save(
        &self,
        task_id: &str,
        mut config: PushNotificationConfig,
    ) -> A2AResult<PushNotificationConfig> {
        if config.id.is_none() {
            config.id = Some(Uuid::new_v4().to_string());
        }
        let id = config.id.clone().expect("id set above");

        let mut by_task = self.by_task.write().await;
        let configs = by_task.entry(task_id.to_string()).or_default();

        if let Some(existing) = configs.iter_mut().find(|c| c.id.as_deref() == Some(&id)) {
            *existing = config.clone();
            debug!(task_id = %task_id, config_id = %id, "Push config updated");
        } else {
            configs.push(config.clone());
            debug!(task_id = %task_id, config_id = %id, "Push config added");
        }

        Ok(config)
    }

    async fn get(
        &self,
        task_id: &str,
        config_id: &str,
    ) -> A2AResult<Option<PushNotificationConfig>> {
        let by_task = self.by_task.read().await;
        Ok(by_task
            .get(task_id)
            .and_then(|configs| configs.iter().find(|c| c.id.as_deref() == Some(config_id)))
            .cloned())
    }

    async fn get_all(&self, task_id: &str) -> A2AResult<Vec<PushNotificationConfig>> {
        let by_task = self.by_task.read().await;
        Ok(by_task.get(task_id).cloned().unwrap_or_default())
    }

    async fn delete(&self, task_id: &str, config_id: &str) -> A2AResult<()> {
        let mut by_task = self.by_task.write().await;
        if let Some(configs) = by_task.get_mut(task_id) {
            configs.retain(|c| c.id.as_deref() != Some(config_id));
        }
        Ok(())
    }
}
