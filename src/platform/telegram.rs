use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use teloxide::prelude::*;
use teloxide::types::{ChatId, MessageId, UpdateKind, User, UserId};
use tracing::debug;

use crate::platform::{ChatMessage, ChatModerator, ChatUpdate, Member, MembershipEvent};
use crate::source::webhook::{WebhookApi, WebhookStatus};

/// Telegram Bot API client shared by the update source and every moderation task.
///
/// `teloxide::Bot` is reference counted internally, so clones are cheap and
/// concurrent requests are safe.
#[derive(Clone)]
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    /// Validate the credential with `getMe` and return the bot's username.
    pub async fn verify(&self) -> Result<String> {
        let me = self.bot.get_me().await.context("getMe request failed")?;
        Ok(me.user.username.clone().unwrap_or_default())
    }
}

#[async_trait]
impl ChatModerator for TelegramClient {
    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<()> {
        debug!("Deleting message {} in chat {}", message_id, chat_id);
        self.bot
            .delete_message(ChatId(chat_id), MessageId(message_id))
            .await
            .context("deleteMessage failed")?;
        Ok(())
    }

    async fn remove_member(&self, chat_id: i64, user_id: u64) -> Result<()> {
        debug!("Banning user {} in chat {}", user_id, chat_id);
        self.bot
            .ban_chat_member(ChatId(chat_id), UserId(user_id))
            .await
            .context("banChatMember failed")?;
        Ok(())
    }
}

#[async_trait]
impl WebhookApi for TelegramClient {
    async fn set_webhook(&self, url: Url) -> Result<()> {
        self.bot
            .set_webhook(url)
            .await
            .context("setWebhook failed")?;
        Ok(())
    }

    async fn webhook_status(&self) -> Result<WebhookStatus> {
        let info = self
            .bot
            .get_webhook_info()
            .await
            .context("getWebhookInfo failed")?;
        Ok(WebhookStatus {
            pending_update_count: info.pending_update_count,
            last_error_date: info.last_error_date,
            last_error_message: info.last_error_message,
        })
    }
}

/// Project a Telegram update onto the fields the moderator uses.
///
/// Only plain messages are kept; edited messages, channel posts and every
/// other update kind become `message: None`.
pub fn convert_update(update: &Update) -> ChatUpdate {
    let message = match &update.kind {
        UpdateKind::Message(msg) => Some(convert_message(msg)),
        _ => None,
    };
    ChatUpdate {
        update_id: update.id.0,
        message,
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    let event = if let Some(users) = msg.new_chat_members() {
        MembershipEvent::Joined(users.iter().map(convert_user).collect())
    } else if let Some(user) = msg.left_chat_member() {
        MembershipEvent::Left(convert_user(user))
    } else {
        MembershipEvent::Other
    };

    ChatMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0,
        event,
    }
}

fn convert_user(user: &User) -> Member {
    Member {
        user_id: user.id.0,
        username: user.username.clone().unwrap_or_default(),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone().unwrap_or_default(),
    }
}
