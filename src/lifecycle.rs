use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Running,
    ShuttingDown,
}

/// Process-wide shutdown switch. Fires at most once.
pub struct Lifecycle {
    shutdown: CancellationToken,
    triggered: AtomicBool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            triggered: AtomicBool::new(false),
        }
    }

    /// Token cancelled when shutdown begins. Hand one to every component
    /// that must stop with the process.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[allow(dead_code)]
    pub fn state(&self) -> State {
        if self.triggered.load(Ordering::Acquire) {
            State::ShuttingDown
        } else {
            State::Running
        }
    }

    /// Move to `ShuttingDown`. Returns `false` if that already happened.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("Shutting down");
        self.shutdown.cancel();
        true
    }

    /// Wait for Ctrl-C, then trigger shutdown.
    pub async fn watch_interrupt(self: Arc<Self>) {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Received interrupt");
                    self.trigger();
                }
                Err(e) => error!("Failed to listen for interrupt signal: {}", e),
            },
            // Shutdown started some other way; stop listening.
            _ = self.shutdown.cancelled() => {}
        }
    }
}
