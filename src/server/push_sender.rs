//! Push sender — best-effort HTTP delivery of task snapshots to registered
//! push-notification endpoints.
//!
//! Grounded on the `other_examples/` pack's trysoma-soma `a2a-rs`
//! `DefaultRequestHandler::send_push_notification_if_needed`: a failed send
//! is logged and swallowed, never surfaced to the caller (§4.3's
//! "best-effort" framing, and DESIGN.md's Open Question decision #2 — no
//! retry/backoff/eviction). The HTTP implementation is built on the donor's
//! existing `reqwest` dependency, previously pulled in only for the removed
//! client's SSE consumption and now repurposed as the one core use of that
//! crate.

use async_trait::async_trait;
use tracing::warn;

use crate::types::{PushNotificationConfig, Task};

/// Delivers task-completion notifications to a configured endpoint.
///
/// Implementations must never fail loudly — a delivery failure is this
/// trait's problem to log, not the caller's problem to handle.
#[async_trait]
pub trait PushSender: Send + Sync {
    /// Sends `task`'s current snapshot to the endpoint described by
    /// `config`. Errors are expected to be logged internally rather than
    /// returned; the `Result` exists so callers that *do* want visibility
    /// (e.g. tests) can observe it.
    async fn send(&self, config: &PushNotificationConfig, task: &Task) -> Result<(), String>;
}

/// HTTP reference implementation of [`PushSender`].
///
/// POSTs the task snapshot as JSON to `config.url`, attaching `config.token`
/// as an `X-A2A-Notification-Token` header when present (mirroring the
/// verification-token convention other A2A servers use) and an
/// `Authorization` header derived from `config.authentication` when its
/// first scheme is `Bearer` and credentials are supplied.
pub struct HttpPushSender {
    client: reqwest::Client,
}

impl HttpPushSender {
    /// Creates a sender using a fresh `reqwest::Client`.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPushSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushSender for HttpPushSender {
    async fn send(&self, config: &PushNotificationConfig, task: &Task) -> Result<(), String> {
        let mut request = self.client.post(&config.url).json(task);

        if let Some(ref token) = config.token {
            request = request.header("X-A2A-Notification-Token", token);
        }

        if let Some(ref auth) = config.authentication {
            if let (Some(scheme), Some(creds)) = (
                auth.schemes.iter().find(|s| s.eq_ignore_ascii_case("bearer")),
                auth.credentials.as_ref(),
            ) {
                let _ = scheme;
                request = request.bearer_auth(creds);
            }
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => {
                let status = resp.status();
                warn!(
                    task_id = %task.id,
                    url = %config.url,
                    status = %status,
                    "Push notification endpoint returned a non-success status"
                );
                Err(format!("push endpoint returned {status}"))
            }
            Err(err) => {
                warn!(
                    task_id = %task.id,
                    url = %config.url,
                    error = %err,
                    "Push notification delivery failed"
                );
                Err(err.to_string())
            }
        }
    }
}

/// No-op [`PushSender`] for tests and embeddings that don't want outbound
/// HTTP calls.
#[derive(Debug, Default)]
pub struct NoopPushSender;

#[async_trait]
impl PushSender for NoopPushSender {
    async fn send(&self, _config: &PushNotificationConfig, _task: &Task) -> Result<(), String> {
        Ok(())
    }
}

/// Test double that records every send it was asked to perform, for
/// assertions in integration tests.
#[derive(Debug, Default)]
pub struct RecordingPushSender {
    sent: tokio::sync::Mutex<Vec<(String, String)>>,
}

impl RecordingPushSender {
    /// Creates a sender with an empty record.
    pub fn new() -> Self {
        Self {
            sent: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Returns the `(taskId, url)` pairs recorded so far.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PushSender for RecordingPushSender {
    async fn send(&self, config: &PushNotificationConfig, task: &Task) -> Result<(), String> {
        self.sent
            .lock()
            .await
            .push((task.id.clone(), config.url.clone()));
        Ok(())
    }
}
