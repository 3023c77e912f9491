use brains_db::models::Protocol;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ForceReply};
use teloxide::RequestError;
use tracing::{error, info, warn};

use crate::bot::handlers::command::{load_subscription, reply};
use crate::bot::handlers::provision_failure_text;
use crate::bot::keyboards::{
    CB_NOTIFICATIONS, CB_PROTOCOL_PREFIX, CB_REISSUE, CB_SEND_CHECK, CB_SERVER_PREFIX,
};
use crate::messages;
use crate::AppState;

/// Flips `is_notify`. Only active subscriptions have notifications to toggle.
pub(crate) async fn toggle_notifications(state: &AppState, user_id: i64) -> String {
    let Some(mut sub) = load_subscription(state, user_id).await else {
        return messages::NOT_REGISTERED.to_string();
    };
    if !sub.is_active {
        return messages::NEEDS_ACTIVE.to_string();
    }
    sub.is_notify = !sub.is_notify;
    match state.subscriptions.edit_one(&sub).await {
        Ok(()) => messages::notifications(sub.is_notify),
        Err(e) => {
            error!("Failed to toggle notifications for {}: {:#}", user_id, e);
            messages::PROVISION_FAILED.to_string()
        }
    }
}

pub(crate) async fn switch_server(state: &AppState, user_id: i64, server_id: i64) -> String {
    if let Some(sub) = load_subscription(state, user_id).await {
        if sub.active_server_id == Some(server_id) {
            if let Some(key) = sub.live_key() {
                return messages::key(key);
            }
        }
    }
    match state.provisioning.switch_server(user_id, server_id).await {
        Ok(sub) => messages::issued(&sub),
        Err(e) => provision_failure_text(user_id, &e).to_string(),
    }
}

pub(crate) async fn switch_protocol(state: &AppState, user_id: i64, protocol: Protocol) -> String {
    if let Some(sub) = load_subscription(state, user_id).await {
        if sub.protocol().ok() == Some(protocol) {
            if let Some(key) = sub.live_key() {
                return messages::key(key);
            }
        }
    }
    match state.provisioning.switch_protocol(user_id, protocol).await {
        Ok(sub) => messages::issued(&sub),
        Err(e) => provision_failure_text(user_id, &e).to_string(),
    }
}

pub async fn callback_handler(bot: Bot, q: CallbackQuery, state: AppState) -> Result<(), RequestError> {
    let user_id = q.from.id.0 as i64;
    let chat = ChatId(user_id);
    let Some(data) = q.data.as_deref() else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    info!("User {} pressed {}", user_id, data);

    match data {
        CB_SEND_CHECK => {
            bot.answer_callback_query(q.id.clone()).await?;
            bot.send_message(chat, messages::SEND_RECEIPT)
                .reply_markup(ForceReply::new())
                .await?;
        }

        CB_NOTIFICATIONS => {
            let text = toggle_notifications(&state, user_id).await;
            bot.answer_callback_query(q.id.clone()).await?;
            reply(&bot, chat, text).await?;
        }

        CB_REISSUE => {
            bot.answer_callback_query(q.id.clone())
                .text("Issuing a new key...")
                .await?;
            let text = match state.provisioning.reissue(user_id).await {
                Ok(sub) => messages::issued(&sub),
                Err(e) => provision_failure_text(user_id, &e).to_string(),
            };
            reply(&bot, chat, text).await?;
        }

        _ if data.starts_with(CB_PROTOCOL_PREFIX) => {
            bot.answer_callback_query(q.id.clone()).await?;
            let tag = &data[CB_PROTOCOL_PREFIX.len()..];
            let text = match tag.parse::<Protocol>() {
                Ok(protocol) => switch_protocol(&state, user_id, protocol).await,
                Err(e) => {
                    warn!("Bad protocol button from {}: {}", user_id, e);
                    return Ok(());
                }
            };
            reply(&bot, chat, text).await?;
        }

        _ if data.starts_with(CB_SERVER_PREFIX) => {
            bot.answer_callback_query(q.id.clone()).await?;
            let Ok(server_id) = data[CB_SERVER_PREFIX.len()..].parse::<i64>() else {
                warn!("Bad server button from {}: {}", user_id, data);
                return Ok(());
            };
            let text = switch_server(&state, user_id, server_id).await;
            reply(&bot, chat, text).await?;
        }

        _ => {
            bot.answer_callback_query(q.id.clone()).await?;
            warn!("Unknown callback {:?} from {}", data, user_id);
        }
    }
    Ok(())
}
