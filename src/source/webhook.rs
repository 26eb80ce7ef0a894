//! Webhook transport: callback registration and the HTTP listener Telegram
//! delivers updates to.
//!
//! The route is `POST /<token>`, the same path that is registered with
//! `setWebhook`. Every accepted payload is decoded as a Telegram `Update`
//! and pushed onto the shared update channel.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use reqwest::Url;
use teloxide::types::Update;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::platform::telegram::convert_update;
use crate::platform::ChatUpdate;

/// Time allowed to receive a request body.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Time allowed to handle a request end to end.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(60);
/// Upper bound on the combined size of all request headers.
pub const MAX_HEADER_BYTES: usize = 1 << 20;

// Telegram updates are small; this only stops runaway bodies.
const MAX_BODY_BYTES: usize = 4 << 20;

/// What `getWebhookInfo` reports about delivery to the registered URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookStatus {
    pub pending_update_count: u32,
    pub last_error_date: Option<DateTime<Utc>>,
    pub last_error_message: Option<String>,
}

impl WebhookStatus {
    fn delivery_error(&self) -> Option<String> {
        match self.last_error_date {
            Some(date) if date.timestamp() != 0 => Some(
                self.last_error_message
                    .clone()
                    .unwrap_or_else(|| format!("delivery failed at {}", date)),
            ),
            _ => None,
        }
    }
}

/// The two Bot API calls webhook registration needs.
#[async_trait]
pub trait WebhookApi: Send + Sync {
    async fn set_webhook(&self, url: Url) -> Result<()>;
    async fn webhook_status(&self) -> Result<WebhookStatus>;
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(String),
    #[error("{call} failed")]
    Api {
        call: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("Callback to telegram failed: {0}")]
    DeliveryFailed(String),
}

/// `<base>/<token>`, tolerating a trailing slash on the base.
pub fn callback_url(base_url: &Url, token: &str) -> Result<Url, WebhookError> {
    let joined = format!("{}/{}", base_url.as_str().trim_end_matches('/'), token);
    Url::parse(&joined).map_err(|e| WebhookError::InvalidUrl(e.to_string()))
}

/// Register the callback URL and confirm Telegram has not reported a
/// delivery failure for it.
pub async fn register<A: WebhookApi + ?Sized>(
    api: &A,
    base_url: &Url,
    token: &str,
) -> Result<Url, WebhookError> {
    let url = callback_url(base_url, token)?;

    api.set_webhook(url.clone())
        .await
        .map_err(|source| WebhookError::Api {
            call: "setWebhook",
            source,
        })?;

    let status = api
        .webhook_status()
        .await
        .map_err(|source| WebhookError::Api {
            call: "getWebhookInfo",
            source,
        })?;

    if let Some(message) = status.delivery_error() {
        return Err(WebhookError::DeliveryFailed(message));
    }

    info!(
        "Webhook registered ({} pending updates)",
        status.pending_update_count
    );
    Ok(url)
}

#[derive(Clone)]
struct WebhookState {
    token: String,
    tx: mpsc::UnboundedSender<ChatUpdate>,
}

/// Router serving `POST /<token>` with the listener limits applied.
pub fn router(token: &str, tx: mpsc::UnboundedSender<ChatUpdate>) -> Router {
    let state = WebhookState {
        token: token.to_string(),
        tx,
    };
    Router::new()
        .route("/{token}", post(receive_update))
        .layer(middleware::from_fn(enforce_limits))
        .with_state(state)
}

async fn receive_update(
    State(state): State<WebhookState>,
    Path(token): Path<String>,
    body: Body,
) -> StatusCode {
    if token != state.token {
        debug!("Rejected webhook call on unknown path");
        return StatusCode::NOT_FOUND;
    }

    let read = axum::body::to_bytes(body, MAX_BODY_BYTES);
    let bytes = match tokio::time::timeout(READ_TIMEOUT, read).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!("Failed to read webhook body: {}", e);
            return StatusCode::BAD_REQUEST;
        }
        Err(_) => {
            warn!("Timed out reading webhook body");
            return StatusCode::REQUEST_TIMEOUT;
        }
    };

    // Answer 200 even for payloads we cannot decode, otherwise Telegram
    // keeps redelivering them.
    match serde_json::from_slice::<Update>(&bytes) {
        Ok(update) => {
            debug!("Received update {}", update.id.0);
            if state.tx.send(convert_update(&update)).is_err() {
                warn!("Dropping update {}: dispatcher has stopped", update.id.0);
            }
        }
        Err(e) => warn!("Discarding undecodable webhook payload: {}", e),
    }
    StatusCode::OK
}

async fn enforce_limits(req: Request, next: Next) -> Response {
    if !headers_within_limit(req.headers(), MAX_HEADER_BYTES) {
        return StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE.into_response();
    }
    match tokio::time::timeout(WRITE_TIMEOUT, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("Webhook request exceeded {}s", WRITE_TIMEOUT.as_secs());
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

fn headers_within_limit(headers: &HeaderMap, limit: usize) -> bool {
    // name + ": " + value + CRLF, as on the wire
    let total: usize = headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum();
    total <= limit
}

pub struct WebhookServer {
    pub local_addr: SocketAddr,
    pub task: JoinHandle<std::io::Result<()>>,
}

/// Bind `addr` and serve `app` until `shutdown` is cancelled, then drain
/// in-flight requests.
pub async fn start_listener(
    addr: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
) -> Result<WebhookServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!("Webhook listening on {}/<redacted>", local_addr);

    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    });
    Ok(WebhookServer { local_addr, task })
}
