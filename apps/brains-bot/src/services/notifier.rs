use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, ParseMode};
use teloxide::{ApiError, RequestError};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The user blocked the bot, deleted their account or never opened a chat.
    #[error("user {0} cannot be reached")]
    UserUnreachable(i64),
    #[error("failed to deliver message to {user_id}: {reason}")]
    Delivery { user_id: i64, reason: String },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        user_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(
        &self,
        user_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), NotifyError> {
        let mut request = self
            .bot
            .send_message(ChatId(user_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard);
        }
        request.await.map(|_| ()).map_err(|e| classify(user_id, e))
    }
}

fn classify(user_id: i64, e: RequestError) -> NotifyError {
    match e {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::UserDeactivated
            | ApiError::ChatNotFound
            | ApiError::BotKicked
            | ApiError::CantInitiateConversation,
        ) => NotifyError::UserUnreachable(user_id),
        other => NotifyError::Delivery {
            user_id,
            reason: other.to_string(),
        },
    }
}
