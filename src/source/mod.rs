pub mod polling;
pub mod webhook;

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Transport;
use crate::platform::telegram::TelegramClient;
use crate::platform::ChatUpdate;

/// Inbound updates plus whatever is producing them.
pub struct UpdateSource {
    pub updates: mpsc::UnboundedReceiver<ChatUpdate>,
    pub handle: TransportHandle,
}

/// The running transport. Torn down once, by [`TransportHandle::shutdown`].
pub enum TransportHandle {
    Polling {
        task: JoinHandle<()>,
        shutdown: CancellationToken,
    },
    Webhook {
        server: webhook::WebhookServer,
        shutdown: CancellationToken,
    },
}

impl UpdateSource {
    /// Start the configured transport.
    ///
    /// In webhook mode the callback is registered (and checked) before the
    /// listener binds, so a rejected registration never opens a port.
    pub async fn start(
        transport: &Transport,
        client: &TelegramClient,
        token: &str,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let (tx, updates) = mpsc::unbounded_channel();

        let handle = match transport {
            Transport::Polling { timeout } => {
                info!("Starting in polling mode (timeout {}s)", timeout.as_secs());
                let task = polling::spawn(client.bot().clone(), *timeout, tx, shutdown.clone());
                TransportHandle::Polling { task, shutdown }
            }
            Transport::Webhook { base_url, port } => {
                info!("Starting listener on {}", base_url);
                webhook::register(client, base_url, token).await?;

                let app = webhook::router(token, tx);
                let addr = SocketAddr::from(([0, 0, 0, 0], *port));
                let server = webhook::start_listener(addr, app, shutdown.clone())
                    .await
                    .with_context(|| format!("Failed to start webhook listener on {}", addr))?;
                TransportHandle::Webhook { server, shutdown }
            }
        };

        Ok(Self { updates, handle })
    }
}

impl TransportHandle {
    /// Stop producing updates and wait for the transport to wind down.
    pub async fn shutdown(self) {
        match self {
            TransportHandle::Polling { task, shutdown } => {
                shutdown.cancel();
                if let Err(e) = task.await {
                    error!("Polling task failed: {}", e);
                }
                info!("Polling stopped");
            }
            TransportHandle::Webhook { server, shutdown } => {
                shutdown.cancel();
                let webhook::WebhookServer { local_addr, task } = server;
                match task.await {
                    Ok(Ok(())) => info!("Webhook listener on {} stopped", local_addr),
                    Ok(Err(e)) => warn!("Webhook listener did not drain cleanly: {}", e),
                    Err(e) => error!("Webhook listener task failed: {}", e),
                }
            }
        }
    }
}
