use std::time::Duration;

use futures::StreamExt;
use teloxide::prelude::*;
use teloxide::update_listeners::{AsUpdateStream, Polling, UpdateListener};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::platform::telegram::convert_update;
use crate::platform::ChatUpdate;

/// Long-poll `getUpdates` and forward every update until `shutdown` fires.
pub fn spawn(
    bot: Bot,
    timeout: Duration,
    tx: mpsc::UnboundedSender<ChatUpdate>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Polling and webhooks are exclusive on Telegram's side.
        let mut listener = Polling::builder(bot)
            .timeout(timeout)
            .delete_webhook()
            .await
            .build();

        // Stopping through the listener's own token lets the in-flight long
        // poll finish and acknowledges the last offset.
        let stop_token = listener.stop_token();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            stop_token.stop();
        });

        let stream = listener.as_stream();
        tokio::pin!(stream);

        info!("Polling for updates");
        while let Some(next) = stream.next().await {
            match next {
                Ok(update) => {
                    debug!("Received update {}", update.id.0);
                    if tx.send(convert_update(&update)).is_err() {
                        debug!("Update receiver dropped, stopping polling");
                        break;
                    }
                }
                Err(e) => warn!("Failed to fetch updates: {}", e),
            }
        }

        watcher.abort();
    })
}
