use chrono::Utc;
use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::{error, info, warn};

use crate::bot::handlers::command::reply;
use crate::messages;
use crate::services::notifier::NotifyError;
use crate::AppState;

const ADMIN_COMMANDS: [&str; 3] = ["/grant", "/broadcast", "/stats"];

/// Runs an operator command. Returns `false` when `command` is not one.
pub async fn handle(
    bot: &Bot,
    chat: ChatId,
    state: &AppState,
    user_id: i64,
    command: &str,
    args: &str,
) -> Result<bool, RequestError> {
    if !ADMIN_COMMANDS.iter().any(|c| *c == command) {
        return Ok(false);
    }
    if !state.is_admin(user_id) {
        warn!("User {} tried admin command {}", user_id, command);
        reply(bot, chat, messages::ADMIN_ONLY).await?;
        return Ok(true);
    }

    match command {
        "/grant" => grant(bot, chat, state, args).await?,
        "/broadcast" => broadcast(bot, chat, state, args).await?,
        _ => {
            let users = state.users.count().await.unwrap_or_default();
            let active = state.subscriptions.count_active().await.unwrap_or_default();
            reply(bot, chat, messages::stats(users, active)).await?;
        }
    }
    Ok(true)
}

async fn grant(bot: &Bot, chat: ChatId, state: &AppState, args: &str) -> Result<(), RequestError> {
    let Ok(target) = args.parse::<i64>() else {
        return reply(bot, chat, "Usage: <code>/grant &lt;user_id&gt;</code>").await;
    };

    let outcome = match state.provisioning.grant(target, Utc::now()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Grant for {} failed: {}", target, e);
            return reply(bot, chat, format!("❌ Grant failed: {}", messages::escape(&e.to_string()))).await;
        }
    };
    let provisioned = outcome.provision_error.is_none();
    reply(bot, chat, messages::grant_report(target, &outcome.subscription, provisioned)).await?;

    let notice = messages::renewed(&outcome.subscription);
    if let Err(e) = state.notifier.send(target, &notice, None).await {
        warn!("Could not tell user {} about the renewal: {}", target, e);
    }
    Ok(())
}

async fn broadcast(bot: &Bot, chat: ChatId, state: &AppState, text: &str) -> Result<(), RequestError> {
    if text.is_empty() {
        return reply(bot, chat, "Usage: <code>/broadcast &lt;text&gt;</code>").await;
    }
    let users = match state.users.get_all().await {
        Ok(users) => users,
        Err(e) => {
            error!("Failed to load users for broadcast: {:#}", e);
            return reply(bot, chat, messages::PROVISION_FAILED).await;
        }
    };

    let total = users.len();
    let mut sent = 0;
    for user in users {
        match state.notifier.send(user.id, text, None).await {
            Ok(()) => sent += 1,
            Err(NotifyError::UserUnreachable(_)) => {}
            Err(e) => warn!("Broadcast to {} failed: {}", user.id, e),
        }
    }
    info!("Broadcast delivered to {}/{} users", sent, total);
    reply(bot, chat, messages::broadcast_report(sent, total)).await
}
