//! Task store — persistence layer for A2A tasks.
//!
//! Mirrors Python SDK's `TaskStore(ABC)` and `InMemoryTaskStore` from
//! `a2a.server.tasks.task_store` and `a2a.server.tasks.inmemory_task_store`,
//! extended with the projection (`historyLength`/`includeArtifacts`) and
//! monotonicity-enforcing `update` that SPEC_FULL.md's C1 adds on top of the
//! donor's plain `save`/`get`.
//!
//! The task store is responsible for persisting and retrieving [`Task`] objects.
//! The [`InMemoryTaskStore`] is provided for development and testing; production
//! deployments should implement the [`TaskStore`] trait backed by a database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};
use crate::types::{Task, TaskState};

/// Parameters for listing tasks with optional filtering and pagination.
#[derive(Debug, Clone, Default)]
pub struct TaskListParams {
    /// Filter tasks by context ID.
    pub context_id: Option<String>,

    /// Filter tasks by state.
    pub status: Option<Vec<TaskState>>,

    /// Maximum number of tasks to return per page.
    pub page_size: Option<usize>,

    /// Opaque token for pagination — the task ID to start after.
    pub page_token: Option<String>,
}

/// Response for a task listing request.
#[derive(Debug, Clone)]
pub struct TaskListResponse {
    /// The tasks matching the query.
    pub tasks: Vec<Task>,

    /// Token for the next page, if more results are available.
    pub next_page_token: Option<String>,
}

/// A read-modify-write mutator handed to [`TaskStore::update`].
///
/// Receives the current task (`None` if it doesn't exist yet) and returns
/// the task to persist. Boxed rather than generic so the trait stays
/// object-safe.
pub type TaskMutator = Box<dyn FnOnce(Option<Task>) -> A2AResult<Task> + Send>;

/// Returns whether `state` is one of the four terminal task states.
pub fn is_terminal_state(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Completed | TaskState::Canceled | TaskState::Failed | TaskState::Rejected
    )
}

/// Trait for persisting and retrieving A2A tasks.
///
/// Implementations must be `Send + Sync` for use in async server contexts.
/// All methods take `&self` and use interior mutability for thread safety.
///
/// # Provided implementations
///
/// - [`InMemoryTaskStore`] — simple in-memory store (data lost on restart)
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Full, unconditional replace of a task.
    ///
    /// Prefer [`update`](Self::update) when the write depends on the task's
    /// current state — `put` performs no monotonicity check.
    async fn put(&self, task: Task) -> A2AResult<()>;

    /// Retrieve a projection of a task by its ID.
    ///
    /// `history_length` limits the tail of `history` returned (`None` means
    /// unlimited); `include_artifacts = false` drops `artifacts` from the
    /// projection. Returns `None` if the task does not exist.
    async fn get(
        &self,
        task_id: &str,
        history_length: Option<usize>,
        include_artifacts: bool,
    ) -> A2AResult<Option<Task>>;

    /// Read-modify-write a task, serialized per-id.
    ///
    /// Rejects, with [`A2AError::InvalidTransition`], a mutator result that
    /// regresses a terminal task back to a non-terminal state.
    async fn update(&self, task_id: &str, mutator: TaskMutator) -> A2AResult<Task>;

    /// Delete a task by its ID.
    ///
    /// Silently succeeds if the task does not exist.
    async fn delete(&self, task_id: &str) -> A2AResult<()>;

    /// List tasks matching the given parameters.
    ///
    /// Supports filtering by context ID and status, and pagination via
    /// `page_size` and `page_token`.
    async fn list(&self, params: &TaskListParams) -> A2AResult<TaskListResponse>;
}

/// In-memory task store backed by a `HashMap`.
///
/// Suitable for development, testing, and short-lived server instances.
/// All task data is lost when the process exits.
///
/// Thread-safe via `tokio::sync::RwLock`. `update` is additionally
/// serialized per-id: the write lock is held for the whole read-modify-write
/// so two concurrent updates to the same task never interleave.
#[derive(Debug)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
    /// Insertion order for deterministic listing/pagination.
    insertion_order: Arc<RwLock<Vec<String>>>,
}

impl InMemoryTaskStore {
    /// Create a new empty in-memory task store.
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            insertion_order: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn project(mut task: Task, history_length: Option<usize>, include_artifacts: bool) -> Task {
        if let Some(n) = history_length {
            if let Some(history) = task.history.as_mut() {
                if history.len() > n {
                    let drop = history.len() - n;
                    history.drain(0..drop);
                }
            }
        }
        if !include_artifacts {
            task.artifacts = None;
        }
        task
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn put(&self, task: Task) -> A2AResult<()> {
        let task_id = task.id.clone();
        let mut tasks = self.tasks.write().await;
        let is_new = !tasks.contains_key(&task_id);
        tasks.insert(task_id.clone(), task);

        if is_new {
            let mut order = self.insertion_order.write().await;
            order.push(task_id.clone());
        }

        debug!(task_id = %task_id, is_new = is_new, "Task saved");
        Ok(())
    }

    async fn get(
        &self,
        task_id: &str,
        history_length: Option<usize>,
        include_artifacts: bool,
    ) -> A2AResult<Option<Task>> {
        let tasks = self.tasks.read().await;
        let task = tasks
            .get(task_id)
            .cloned()
            .map(|t| Self::project(t, history_length, include_artifacts));
        debug!(task_id = %task_id, found = task.is_some(), "Task lookup");
        Ok(task)
    }

    async fn update(&self, task_id: &str, mutator: TaskMutator) -> A2AResult<Task> {
        let mut tasks = self.tasks.write().await;
        let current = tasks.get(task_id).cloned();
        let current_state = current.as_ref().map(|t| t.status.state);

        let next = mutator(current)
            .map_err(|e| A2AError::TaskOperationException(format!("mutator failed: {e}")))?;

        if let Some(cur_state) = current_state {
            if is_terminal_state(cur_state) && !is_terminal_state(next.status.state) {
                return Err(A2AError::InvalidTransition(format!(
                    "task {} is in terminal state {:?}; cannot transition to non-terminal state {:?}",
                    task_id, cur_state, next.status.state
                )));
            }
        }

        let is_new = !tasks.contains_key(task_id);
        tasks.insert(task_id.to_string(), next.clone());
        drop(tasks);

        if is_new {
            let mut order = self.insertion_order.write().await;
            order.push(task_id.to_string());
        }

        debug!(task_id = %task_id, "Task updated");
        Ok(next)
    }

    async fn delete(&self, task_id: &str) -> A2AResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.remove(task_id).is_some() {
            let mut order = self.insertion_order.write().await;
            order.retain(|id| id != task_id);
            debug!(task_id = %task_id, "Task deleted");
        } else {
            warn!(task_id = %task_id, "Attempted to delete non-existent task");
        }
        Ok(())
    }

    async fn list(&self, params: &TaskListParams) -> A2AResult<TaskListResponse> {
        let tasks = self.tasks.read().await;
        let order = self.insertion_order.read().await;

        let start_idx = if let Some(ref token) = params.page_token {
            match order.iter().position(|id| id == token) {
                Some(pos) => pos + 1,
                None => {
                    warn!(page_token = %token, "Invalid page token, starting from beginning");
                    0
                }
            }
        } else {
            0
        };

        let page_size = params.page_size.unwrap_or(usize::MAX);
        let mut result_tasks = Vec::new();
        let mut last_id: Option<String> = None;

        for id in order.iter().skip(start_idx) {
            if result_tasks.len() >= page_size {
                break;
            }

            if let Some(task) = tasks.get(id) {
                if let Some(ref ctx_id) = params.context_id {
                    if task.context_id != *ctx_id {
                        continue;
                    }
                }

                if let Some(ref statuses) = params.status {
                    if !statuses.contains(&task.status.state) {
                        continue;
                    }
                }

                last_id = Some(id.clone());
                result_tasks.push(task.clone());
            }
        }

        let next_page_token = if result_tasks.len() == page_size {
            if let Some(ref last) = last_id {
                let last_pos = order.iter().position(|id| id == last).unwrap_or(0);
                if last_pos + 1 < order.len() {
                    Some(last.clone())
                } else {
                    None
                }
            } else {
                None
            }
        } else {
            None
        };

        debug!(
            count = result_tasks.len(),
            has_more = next_page_token.is_some(),
            "Listed tasks"
        );

        Ok(TaskListResponse {
            tasks: result_tasks,
            next_page_token,
        })
    }
}

/// Scopes a [`TaskStore`] to a single `contextId` for handing to an executor.
///
/// Enforces `task.contextId == this.contextId` on every write and filters
/// `getByContext` results, so an executor cannot accidentally (or
/// maliciously) read or write another conversation's tasks.
pub struct ContextTaskStorage {
    inner: Arc<dyn TaskStore>,
    context_id: String,
}

impl ContextTaskStorage {
    /// Creates a storage view scoped to `context_id`, backed by `inner`.
    pub fn new(inner: Arc<dyn TaskStore>, context_id: impl Into<String>) -> Self {
        Self {
            inner,
            context_id: context_id.into(),
        }
    }

    /// Returns the context id this view is scoped to.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Full replace, rejecting tasks outside this view's context.
    pub async fn put(&self, task: Task) -> A2AResult<()> {
        self.check_context(&task)?;
        self.inner.put(task).await
    }

    /// Retrieve a task by id, but only if it belongs to this view's context.
    pub async fn get(
        &self,
        task_id: &str,
        history_length: Option<usize>,
        include_artifacts: bool,
    ) -> A2AResult<Option<Task>> {
        let task = self.inner.get(task_id, history_length, include_artifacts).await?;
        Ok(task.filter(|t| t.context_id == self.context_id))
    }

    /// Lists every task belonging to this view's context.
    pub async fn get_by_context(&self) -> A2AResult<Vec<Task>> {
        let resp = self
            .inner
            .list(&TaskListParams {
                context_id: Some(self.context_id.clone()),
                ..Default::default()
            })
            .await?;
        Ok(resp.tasks)
    }

    fn check_context(&self, task: &Task) -> A2AResult<()> {
        if task.context_id != self.context_id {
            return Err(A2AError::InvalidParams {
                message: format!(
                    "task {} belongs to context {}, not {}",
                    task.id, task.context_id, self.context_id
                ),
                data: None,
            });
        }
        Ok(())
    }
}
