//! Session — binds one [`EventProcessor`] to one lazy agent computation.
//!
//! Grounded on the donor's `DefaultRequestHandler`'s
//! `running_agents: Mutex<HashMap<String, RunningAgent>>` /
//! spawned-`tokio::task::JoinHandle` idiom in `request_handler.rs`,
//! generalized into a standalone type with an explicit state machine — the
//! donor infers liveness from map membership rather than tracking a state
//! enum directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{A2AError, A2AResult};

use super::event_processor::EventProcessor;

/// A session's lifecycle state.
///
/// ```text
/// CREATED  ── start() ──▶  RUNNING  ── executor returns normally ──▶  COMPLETED
///                             │
///                             │── executor errors ─▶  FAILED
///                             │
///                             └── cancel_and_join() ─▶ CANCELING ──▶ CANCELED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed but not yet started; no computation is running.
    Created,
    /// `start()` has spawned the computation.
    Running,
    /// The computation returned `Ok(())`.
    Completed,
    /// The computation returned `Err(..)` that was not a cancellation.
    Failed,
    /// `cancel_and_join()` has been called; waiting for the computation to
    /// observe the cancellation.
    Canceling,
    /// The computation was aborted and the abort has been observed.
    Canceled,
}

impl SessionState {
    /// Returns whether this state ends the session's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Canceled
        )
    }
}

type BoxedComputation = Pin<Box<dyn Future<Output = A2AResult<()>> + Send>>;

/// One in-flight (or finished) agent computation for a single task.
///
/// The computation is supplied as a boxed future and is **not** polled until
/// [`start`](Self::start) is called — this is the "lazy" part SPEC_FULL.md's
/// C6 calls for, so a caller can register the session with the Session
/// Manager and wait for its monitor to subscribe before any event can be
/// emitted.
///
/// Unlike the donor's design, where events may be buffered and drained by a
/// separate consumer after the agent task finishes, this crate's
/// [`EventProcessor::publish`] applies side effects and broadcasts
/// synchronously — by the time the computation's future resolves, every
/// event it published has already been observed by current subscribers.
/// `join()` therefore only needs to await the computation; there is no
/// separate "drain the stream" step to implement.
///
/// `join()` can be called concurrently by more than one waiter — the
/// Session Manager's own monitor task races the caller that asked for a
/// blocking `message/send` to observe completion. The real driver of the
/// computation lives in `join_fut`, a [`Shared`] future built once in
/// [`start`](Self::start); every `join()` call clones and awaits it rather
/// than consuming a single-use handle, so every waiter actually observes
/// the computation's outcome instead of racing for it.
pub struct Session {
    task_id: String,
    context_id: String,
    processor: EventProcessor,
    state: Arc<Mutex<SessionState>>,
    computation: Mutex<Option<BoxedComputation>>,
    abort_handle: Mutex<Option<AbortHandle>>,
    join_fut: Mutex<Option<Shared<BoxFuture<'static, A2AResult<()>>>>>,
}

impl Session {
    /// Creates a session for `task_id`/`context_id`, wrapping `processor` and
    /// the not-yet-started `computation`.
    pub fn new(
        task_id: impl Into<String>,
        context_id: impl Into<String>,
        processor: EventProcessor,
        computation: BoxedComputation,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            processor,
            state: Arc::new(Mutex::new(SessionState::Created)),
            computation: Mutex::new(Some(computation)),
            abort_handle: Mutex::new(None),
            join_fut: Mutex::new(None),
        }
    }

    /// The task id this session is bound to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The context id this session is bound to.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// The session's Event Processor. Subscribe to this before [`start`](Self::start)
    /// to guarantee no events are missed.
    pub fn processor(&self) -> &EventProcessor {
        &self.processor
    }

    /// Returns the current lifecycle state.
    pub async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Transitions CREATED→RUNNING by spawning the computation. A no-op if
    /// already started.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if *state != SessionState::Created {
            return;
        }

        let Some(computation) = self.computation.lock().await.take() else {
            return;
        };

        debug!(task_id = %self.task_id, "Starting session computation");
        let handle = tokio::spawn(computation);
        *self.abort_handle.lock().await = Some(handle.abort_handle());

        let state_arc = Arc::clone(&self.state);
        let task_id = self.task_id.clone();
        let driver: BoxFuture<'static, A2AResult<()>> = Box::pin(async move {
            match handle.await {
                Ok(result) => {
                    let mut state = state_arc.lock().await;
                    *state = if *state == SessionState::Canceling {
                        SessionState::Canceled
                    } else if result.is_ok() {
                        SessionState::Completed
                    } else {
                        SessionState::Failed
                    };
                    result
                }
                Err(join_err) if join_err.is_cancelled() => {
                    *state_arc.lock().await = SessionState::Canceled;
                    Ok(())
                }
                Err(join_err) => {
                    warn!(task_id = %task_id, error = %join_err, "Session computation panicked");
                    *state_arc.lock().await = SessionState::Failed;
                    Err(A2AError::InternalError {
                        message: format!("agent computation panicked: {join_err}"),
                        data: None,
                    })
                }
            }
        });

        *self.join_fut.lock().await = Some(driver.shared());
        *state = SessionState::Running;
    }

    /// Suspends until the computation terminates (normally, by error, or by
    /// cancellation), returning its result.
    ///
    /// Safe to call concurrently from more than one waiter: every call
    /// clones the same [`Shared`] driver future, so each caller genuinely
    /// observes the computation's outcome rather than only the first caller
    /// to reach this method. A no-op returning `Ok(())` immediately if the
    /// session was never started.
    pub async fn join(&self) -> A2AResult<()> {
        let fut = self.join_fut.lock().await.clone();
        match fut {
            Some(fut) => fut.await,
            None => Ok(()),
        }
    }

    /// Requests cooperative cancellation of the computation, waits for it to
    /// terminate, then closes the Event Processor. Idempotent, and safe to
    /// call concurrently with other `join()`/`cancel_and_join()` callers —
    /// the abort handle and final-state transition are shared with them via
    /// the same driver future `join()` awaits.
    pub async fn cancel_and_join(&self) -> A2AResult<()> {
        {
            let mut state = self.state.lock().await;
            if state.is_terminal() {
                self.processor.close().await;
                return Ok(());
            }
            *state = SessionState::Canceling;
        }

        let abort_handle = self.abort_handle.lock().await.clone();
        if let Some(abort_handle) = abort_handle {
            abort_handle.abort();
        }

        let fut = self.join_fut.lock().await.clone();
        let result = match fut {
            Some(fut) => fut.await,
            None => {
                // Never started: nothing was spawned to abort or await.
                *self.state.lock().await = SessionState::Canceled;
                Ok(())
            }
        };

        self.processor.close().await;
        result
    }
}
