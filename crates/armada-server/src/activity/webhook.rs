//! Activity webhook delivery.
//!
//! Payloads are handed to a bounded queue and delivered by a background
//! worker, so a slow or failing endpoint never holds up the operation that
//! produced the activity. Each delivery retries on rate limiting only, within
//! its own elapsed-time budget. Failures are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use armada_core::retry::{ExponentialBackoff, Retry, retry_with_backoff};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Body posted to the webhook endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub timestamp: DateTime<Utc>,
    pub actor_full_name: Option<String>,
    pub actor_id: Option<String>,
    pub actor_email: Option<String>,
    #[serde(rename = "type")]
    pub activity_type: String,
    pub details: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook endpoint is rate limiting requests")]
    RateLimited,

    #[error("webhook endpoint returned status {0}")]
    Status(u16),

    #[error("webhook request failed: {0}")]
    Request(String),
}

/// HTTP client for a single webhook endpoint.
#[derive(Debug)]
pub struct WebhookClient {
    http: reqwest::Client,
    url: String,
    backoff: ExponentialBackoff,
}

impl WebhookClient {
    pub fn new(
        url: &str,
        request_timeout: Duration,
        backoff: ExponentialBackoff,
    ) -> Result<Self, WebhookError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        Ok(Self {
            http,
            url: url.to_string(),
            backoff,
        })
    }

    async fn send_once(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        let response = self
            .http
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(WebhookError::RateLimited);
        }
        Err(WebhookError::Status(status.as_u16()))
    }

    /// Deliver a payload, retrying while the endpoint rate limits.
    pub async fn deliver(&self, payload: &WebhookPayload) -> Result<(), WebhookError> {
        retry_with_backoff(&self.backoff, move || async move {
            match self.send_once(payload).await {
                Ok(()) => Ok(()),
                Err(e @ WebhookError::RateLimited) => Err(Retry::Transient(e)),
                Err(e) => Err(Retry::Permanent(e)),
            }
        })
        .await
    }
}

/// Handle for queueing webhook deliveries.
#[derive(Debug, Clone)]
pub struct WebhookSender {
    tx: mpsc::Sender<WebhookPayload>,
}

impl WebhookSender {
    /// Queue a delivery without waiting. Drops it when the queue is full.
    pub fn dispatch(&self, payload: WebhookPayload) {
        match self.tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(p)) => {
                warn!(activity_type = %p.activity_type, "Webhook queue full, dropping delivery");
            }
            Err(TrySendError::Closed(p)) => {
                warn!(activity_type = %p.activity_type, "Webhook worker stopped, dropping delivery");
            }
        }
    }
}

/// The background delivery task.
pub struct WebhookWorker {
    handle: JoinHandle<()>,
}

impl WebhookWorker {
    /// Spawn the worker. It runs until every [`WebhookSender`] is dropped.
    pub fn spawn(
        client: WebhookClient,
        queue_capacity: usize,
        max_concurrency: usize,
    ) -> (WebhookSender, Self) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let handle = tokio::spawn(run(Arc::new(client), rx, semaphore));

        info!(queue_capacity, max_concurrency, "Webhook worker started");
        (WebhookSender { tx }, Self { handle })
    }

    /// Wait for queued and in-flight deliveries to finish once all senders
    /// are dropped. Aborts whatever is left after `timeout`.
    ///
    /// Returns `true` if the worker drained cleanly.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        if tokio::time::timeout(timeout, &mut self.handle).await.is_ok() {
            info!("Webhook worker drained");
            true
        } else {
            warn!(
                timeout_secs = timeout.as_secs(),
                "Webhook worker did not drain in time, aborting"
            );
            self.handle.abort();
            false
        }
    }
}

async fn run(
    client: Arc<WebhookClient>,
    mut rx: mpsc::Receiver<WebhookPayload>,
    semaphore: Arc<Semaphore>,
) {
    let mut in_flight = JoinSet::new();

    while let Some(payload) = rx.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let client = Arc::clone(&client);
        in_flight.spawn(async move {
            let _permit = permit;
            match client.deliver(&payload).await {
                Ok(()) => debug!(activity_type = %payload.activity_type, "Webhook delivered"),
                Err(e) => warn!(
                    error = %e,
                    activity_type = %payload.activity_type,
                    "Webhook delivery failed"
                ),
            }
        });
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
}
