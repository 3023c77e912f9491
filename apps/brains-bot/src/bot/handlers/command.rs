use brains_db::models::Subscription;
use chrono::Utc;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::RequestError;
use tracing::{error, info, warn};

use crate::bot::handlers::{admin, callback, provision_failure_text};
use crate::bot::keyboards::{
    account_keyboard, main_menu, payment_keyboard, protocol_keyboard, servers_keyboard,
    BTN_ACCOUNT, BTN_KEY, BTN_PAY, BTN_PROTOCOL, BTN_REFERRAL, BTN_SERVERS, BTN_SUPPORT,
};
use crate::messages;
use crate::services::referral_service::{parse_referrer, referral_link, Profile};
use crate::AppState;

/// Splits `/cmd@bot args` into `("/cmd", "args")`.
pub(crate) fn split_command(text: &str) -> (&str, &str) {
    let text = text.trim();
    let (head, args) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let command = head.split('@').next().unwrap_or(head);
    (command, args.trim())
}

fn button_command(text: &str) -> Option<&'static str> {
    Some(match text {
        BTN_ACCOUNT => "/account",
        BTN_KEY => "/key",
        BTN_PAY => "/pay",
        BTN_PROTOCOL => "/protocol",
        BTN_SERVERS => "/servers",
        BTN_REFERRAL => "/referral",
        BTN_SUPPORT => "/support",
        _ => return None,
    })
}

pub(crate) async fn load_subscription(state: &AppState, user_id: i64) -> Option<Subscription> {
    match state.subscriptions.get_by_user(user_id).await {
        Ok(sub) => sub,
        Err(e) => {
            error!("Failed to load subscription of {}: {:#}", user_id, e);
            None
        }
    }
}

pub(crate) async fn reply(bot: &Bot, chat: ChatId, text: impl Into<String>) -> Result<(), RequestError> {
    bot.send_message(chat, text).parse_mode(ParseMode::Html).await?;
    Ok(())
}

pub async fn message_handler(bot: Bot, msg: Message, state: AppState) -> Result<(), RequestError> {
    let Some(from) = msg.from.clone() else {
        return Ok(());
    };
    let user_id = from.id.0 as i64;
    let chat = msg.chat.id;

    if msg.photo().is_some() || msg.document().is_some() {
        return forward_receipt(&bot, &msg, &state, user_id, from.full_name()).await;
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let (command, args) = match button_command(text.trim()) {
        Some(command) => (command, ""),
        None => split_command(text),
    };
    info!("User {} sent {}", user_id, command);

    if admin::handle(&bot, chat, &state, user_id, command, args).await? {
        return Ok(());
    }

    match command {
        "/start" => {
            let profile = Profile {
                id: user_id,
                first_name: from.first_name.clone(),
                last_name: from.last_name.clone().unwrap_or_default(),
                username: from.username.clone().unwrap_or_default(),
                language_code: from.language_code.clone().unwrap_or_default(),
            };
            if let Err(e) = state.referrals.onboard(&profile, parse_referrer(args)).await {
                error!("Failed to register user {}: {:#}", user_id, e);
                return reply(&bot, chat, messages::PROVISION_FAILED).await;
            }
            bot.send_message(chat, messages::welcome(&from.first_name))
                .parse_mode(ParseMode::Html)
                .reply_markup(main_menu())
                .await?;
        }

        "/account" | "/profile" => {
            let Some(sub) = load_subscription(&state, user_id).await else {
                return reply(&bot, chat, messages::NOT_REGISTERED).await;
            };
            let server = match sub.active_server_id {
                Some(id) => state.servers.get_by_id(id).await.ok().flatten(),
                None => None,
            };
            bot.send_message(chat, messages::account(&sub, server.as_ref(), Utc::now()))
                .parse_mode(ParseMode::Html)
                .reply_markup(account_keyboard(sub.is_notify))
                .await?;
        }

        "/key" => {
            let Some(sub) = load_subscription(&state, user_id).await else {
                return reply(&bot, chat, messages::NOT_REGISTERED).await;
            };
            if !sub.is_active || sub.is_expired_at(Utc::now()) {
                return reply(&bot, chat, messages::NEEDS_ACTIVE).await;
            }
            if let Some(key) = sub.live_key() {
                return reply(&bot, chat, messages::key(key)).await;
            }
            let text = match state.provisioning.issue(user_id).await {
                Ok(sub) => messages::issued(&sub),
                Err(e) => provision_failure_text(user_id, &e).to_string(),
            };
            reply(&bot, chat, text).await?;
        }

        "/pay" | "/price" => {
            let Some(sub) = load_subscription(&state, user_id).await else {
                return reply(&bot, chat, messages::NOT_REGISTERED).await;
            };
            let (price, full) = state.referrals.price_for(&sub).await.unwrap_or_else(|e| {
                warn!("Referral discount lookup for {} failed: {:#}", user_id, e);
                (sub.amount, sub.amount)
            });
            bot.send_message(chat, messages::payment(price, full, &state.config.payment_url))
                .parse_mode(ParseMode::Html)
                .reply_markup(payment_keyboard(&state.config.payment_url))
                .await?;
        }

        "/protocol" => {
            let current = load_subscription(&state, user_id)
                .await
                .and_then(|s| s.protocol().ok());
            bot.send_message(chat, "Choose a protocol:")
                .reply_markup(protocol_keyboard(current))
                .await?;
        }

        "/servers" => {
            let servers = state.servers.get_all().await.unwrap_or_else(|e| {
                error!("Failed to list servers: {:#}", e);
                Vec::new()
            });
            if servers.is_empty() {
                return reply(&bot, chat, messages::NO_SERVERS).await;
            }
            let current = load_subscription(&state, user_id)
                .await
                .and_then(|s| s.active_server_id);
            bot.send_message(chat, "Choose a server:")
                .reply_markup(servers_keyboard(&servers, current))
                .await?;
        }

        "/server" => {
            let Ok(server_id) = args.parse::<i64>() else {
                return reply(&bot, chat, "Usage: <code>/server &lt;id&gt;</code>, see /servers").await;
            };
            let text = callback::switch_server(&state, user_id, server_id).await;
            reply(&bot, chat, text).await?;
        }

        "/referral" => {
            let invited = state.referrals.invited(user_id).await.unwrap_or_default();
            let discount = state.referrals.discount_for(user_id).await.unwrap_or(0);
            let link = referral_link(state.bot_username(), user_id);
            reply(&bot, chat, messages::referrals(&link, &invited, discount)).await?;
        }

        "/notify" => {
            let text = callback::toggle_notifications(&state, user_id).await;
            reply(&bot, chat, text).await?;
        }

        "/support" => {
            if args.is_empty() {
                return reply(&bot, chat, messages::SUPPORT_USAGE).await;
            }
            let text = messages::support_for_admin(user_id, &from.full_name(), args);
            if let Err(e) = state.notifier.send(state.config.admin_id, &text, None).await {
                error!("Failed to relay support request of {}: {}", user_id, e);
                return reply(&bot, chat, messages::PROVISION_FAILED).await;
            }
            reply(&bot, chat, messages::SUPPORT_FORWARDED).await?;
        }

        _ => {
            bot.send_message(chat, messages::UNKNOWN_INPUT)
                .reply_markup(main_menu())
                .await?;
        }
    }
    Ok(())
}

/// Forwards a payment receipt to the admin for manual review.
async fn forward_receipt(
    bot: &Bot,
    msg: &Message,
    state: &AppState,
    user_id: i64,
    name: String,
) -> Result<(), RequestError> {
    let admin = ChatId(state.config.admin_id);
    bot.forward_message(admin, msg.chat.id, msg.id).await?;
    bot.send_message(admin, messages::receipt_for_admin(user_id, &name))
        .parse_mode(ParseMode::Html)
        .await?;
    info!("Forwarded receipt of user {} to admin", user_id);
    reply(bot, msg.chat.id, messages::RECEIPT_FORWARDED).await
}
