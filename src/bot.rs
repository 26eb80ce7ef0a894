use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::platform::{ChatModerator, ChatUpdate, Member, MembershipEvent};
use crate::spam::{MemberIdentity, SpamPolicy};

/// Consumes updates and fans moderation work out to background tasks.
pub struct Dispatcher {
    moderator: Arc<dyn ChatModerator>,
    policy: Arc<SpamPolicy>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(moderator: Arc<dyn ChatModerator>, policy: SpamPolicy) -> Self {
        Self {
            moderator,
            policy: Arc::new(policy),
            tasks: TaskTracker::new(),
        }
    }

    /// Run until the update channel closes or `shutdown` is cancelled.
    ///
    /// Each update is handled on its own task; the loop never waits for one
    /// to finish, so side effects of consecutive updates may land in any order.
    pub async fn run(
        &self,
        mut updates: mpsc::UnboundedReceiver<ChatUpdate>,
        shutdown: CancellationToken,
    ) {
        info!("Dispatcher started");
        loop {
            let update = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer consuming updates");
                    break;
                }
                next = updates.recv() => match next {
                    Some(update) => update,
                    None => {
                        info!("Update source closed");
                        break;
                    }
                },
            };
            self.dispatch(update);
        }
    }

    /// Spawn the handling task for one update. Returns whether anything was spawned.
    pub fn dispatch(&self, update: ChatUpdate) -> bool {
        let Some(message) = update.message else {
            return false;
        };

        let moderator = Arc::clone(&self.moderator);
        let (chat_id, message_id) = (message.chat_id, message.message_id);

        match message.event {
            MembershipEvent::Joined(members) => {
                debug!(
                    "Update {}: {} member(s) joined chat {}",
                    update.update_id,
                    members.len(),
                    chat_id
                );
                let policy = Arc::clone(&self.policy);
                self.tasks.spawn(async move {
                    handle_join(moderator.as_ref(), &policy, chat_id, message_id, &members).await;
                });
                true
            }
            MembershipEvent::Left(member) => {
                debug!(
                    "Update {}: user {} left chat {}",
                    update.update_id, member.user_id, chat_id
                );
                self.tasks.spawn(async move {
                    delete_service_message(moderator.as_ref(), chat_id, message_id).await;
                });
                true
            }
            MembershipEvent::Other => false,
        }
    }

    /// Number of moderation tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Stop accepting work and wait up to `grace` for running tasks.
    /// Returns `true` if everything finished in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tasks.close();
        if self.tasks.is_empty() {
            return true;
        }
        if grace.is_zero() {
            warn!("Abandoning {} in-flight moderation task(s)", self.in_flight());
            return false;
        }

        info!(
            "Waiting up to {}s for {} moderation task(s)",
            grace.as_secs(),
            self.in_flight()
        );
        match tokio::time::timeout(grace, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "Grace period expired, abandoning {} moderation task(s)",
                    self.in_flight()
                );
                false
            }
        }
    }
}

async fn handle_join(
    moderator: &dyn ChatModerator,
    policy: &SpamPolicy,
    chat_id: i64,
    message_id: i32,
    members: &[Member],
) {
    delete_service_message(moderator, chat_id, message_id).await;

    for member in members {
        let verdict = policy.classify(&MemberIdentity::from(member));
        if !verdict.is_spam() {
            continue;
        }
        info!(
            "Removing user {} from chat {}: {}",
            member.user_id, chat_id, verdict
        );
        if let Err(e) = moderator.remove_member(chat_id, member.user_id).await {
            warn!(
                "Failed to remove user {} from chat {}: {:#}",
                member.user_id, chat_id, e
            );
        }
    }
}

async fn delete_service_message(moderator: &dyn ChatModerator, chat_id: i64, message_id: i32) {
    if let Err(e) = moderator.delete_message(chat_id, message_id).await {
        warn!(
            "Failed to delete message {} in chat {}: {:#}",
            message_id, chat_id, e
        );
    }
}
