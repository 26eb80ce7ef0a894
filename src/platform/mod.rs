pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// An update received from the chat platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUpdate {
    /// Platform-assigned update sequence number
    pub update_id: u32,
    /// Present only for plain chat messages
    pub message: Option<ChatMessage>,
}

/// The parts of a message the moderator acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub chat_id: i64,
    pub message_id: i32,
    pub event: MembershipEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// Service message announcing one or more new members
    Joined(Vec<Member>),
    /// Service message announcing a member left or was removed
    Left(Member),
    /// Any other message
    Other,
}

/// A chat member as reported in a service message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: u64,
    /// Empty when the user has no username
    pub username: String,
    pub first_name: String,
    /// Empty when the user has no last name
    pub last_name: String,
}

/// Moderation actions the dispatcher issues against the platform.
///
/// One handle is shared by every in-flight task, so implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait ChatModerator: Send + Sync {
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()>;

    /// Remove `user_id` from `chat_id` and keep them out.
    async fn remove_member(&self, chat_id: i64, user_id: u64) -> Result<()>;
}
