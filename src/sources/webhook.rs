//! Webhook receiver source
//!
//! An axum router accepts `POST /hooks/{source}` with a JSON payload and
//! queues the resulting item in a shared inbox. The matching
//! [`WebhookSource`] offers every queued item on each poll; an item leaves the
//! queue only once it is acknowledged or discarded.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::{InputItem, InputSource};
use crate::errors::{SourceError, SourceResult};
use crate::job_scheduling::JobPriority;

/// Body accepted by the webhook endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Caller-chosen id; a UUID is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub priority: JobPriority,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAccepted {
    pub source: String,
    pub item_id: String,
}

/// Queues shared between the HTTP handler and the registered sources
#[derive(Clone, Default)]
pub struct WebhookInbox {
    queues: Arc<Mutex<HashMap<String, Vec<InputItem>>>>,
}

impl WebhookInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source name and return the source that reads it
    pub async fn register(&self, name: impl Into<String>) -> WebhookSource {
        let name = name.into();
        self.queues.lock().await.entry(name.clone()).or_default();
        WebhookSource {
            name,
            inbox: self.clone(),
        }
    }

    /// Queue a payload for `source`. Returns `None` for unregistered sources.
    pub async fn push(&self, source: &str, payload: WebhookPayload) -> Option<InputItem> {
        let mut queues = self.queues.lock().await;
        let queue = queues.get_mut(source)?;

        let item_id = payload
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut item = InputItem::new(
            source,
            item_id,
            payload.priority,
            payload.title,
            payload.description,
        );
        item.metadata = payload.metadata;

        queue.push(item.clone());
        Some(item)
    }

    async fn pending(&self, source: &str) -> Vec<InputItem> {
        self.queues
            .lock()
            .await
            .get(source)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop every queued entry for `item_id`, returning how many were removed
    async fn remove(&self, source: &str, item_id: &str) -> usize {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(source) else {
            return 0;
        };
        let before = queue.len();
        queue.retain(|item| item.item_id != item_id);
        before - queue.len()
    }

    /// Router exposing `POST /hooks/{source}`
    pub fn router(&self) -> Router {
        Router::new()
            .route("/hooks/{source}", post(receive_webhook))
            .with_state(self.clone())
    }

    /// Serve the router on `bind` until `cancellation_token` fires
    pub async fn serve(
        &self,
        bind: SocketAddr,
        cancellation_token: CancellationToken,
    ) -> SourceResult<()> {
        let listener = tokio::net::TcpListener::bind(bind)
            .await
            .map_err(|e| SourceError::invalid_config("webhook", format!("cannot bind {bind}: {e}")))?;
        info!("Webhook receiver listening on {}", bind);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancellation_token.cancelled_owned())
            .await
            .map_err(|e| SourceError::invalid_config("webhook", format!("server error: {e}")))?;

        info!("Webhook receiver stopped");
        Ok(())
    }
}

async fn receive_webhook(
    State(inbox): State<WebhookInbox>,
    Path(source): Path<String>,
    Json(payload): Json<WebhookPayload>,
) -> Response {
    match inbox.push(&source, payload).await {
        Some(item) => {
            debug!("Webhook '{}' queued item {}", source, item.item_id);
            (
                StatusCode::ACCEPTED,
                Json(WebhookAccepted {
                    source,
                    item_id: item.item_id,
                }),
            )
                .into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("unknown webhook source '{source}'") })),
        )
            .into_response(),
    }
}

/// Input source backed by a [`WebhookInbox`] queue
pub struct WebhookSource {
    name: String,
    inbox: WebhookInbox,
}

#[async_trait]
impl InputSource for WebhookSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self) -> SourceResult<Vec<InputItem>> {
        Ok(self.inbox.pending(&self.name).await)
    }

    async fn acknowledge(&self, item_id: &str) -> SourceResult<()> {
        self.inbox.remove(&self.name, item_id).await;
        Ok(())
    }

    async fn discard(&self, item_id: &str) -> SourceResult<()> {
        let removed = self.inbox.remove(&self.name, item_id).await;
        if removed > 0 {
            debug!("Dropped redelivered webhook item {} from '{}'", item_id, self.name);
        }
        Ok(())
    }
}
