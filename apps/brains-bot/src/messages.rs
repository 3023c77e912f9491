//! User-facing texts. All of them are sent with HTML parse mode.

use brains_db::models::{ReferralSummary, Server, Subscription};
use chrono::{DateTime, Utc};

pub const SUBSCRIPTION_EXPIRED: &str = "⌛️ <b>Your subscription has expired.</b>\n\n\
    Your VPN key has been disabled. Pay for a new period and send the receipt \
    with the button below to get access back.";

pub const NOT_REGISTERED: &str = "Please press /start first.";

pub const NEEDS_ACTIVE: &str = "🔒 This needs an active subscription. Open 💳 Pay to renew.";

pub const PROVISION_FAILED: &str = "❌ Could not prepare your VPN key right now. \
    Please try again in a few minutes or contact support.";

pub const NO_SERVERS: &str = "No servers are available at the moment.";

pub const SEND_RECEIPT: &str = "🧾 Send a screenshot or PDF of the payment receipt as a \
    reply to this message. An operator will confirm it shortly.";

pub const RECEIPT_FORWARDED: &str = "✅ Receipt received. You will get a message once \
    the payment is confirmed.";

pub const SUPPORT_USAGE: &str = "Write your question after the command, for example:\n\
    <code>/support the key does not connect</code>";

pub const SUPPORT_FORWARDED: &str = "✉️ Your message was sent to support.";

pub const ADMIN_ONLY: &str = "This command is for administrators.";

pub const UNKNOWN_INPUT: &str = "Use the menu below.";

pub fn welcome(first_name: &str) -> String {
    format!(
        "👋 <b>Welcome to Brains Secure, {}!</b>\n\n\
        Fast VPN with WireGuard (AmneziaWG) and VLESS REALITY.\n\
        Pay for a month, send the receipt and your key arrives right here.",
        escape(first_name)
    )
}

pub fn account(sub: &Subscription, server: Option<&Server>, now: DateTime<Utc>) -> String {
    let status = if sub.is_active && !sub.is_expired_at(now) {
        "🟢 active"
    } else {
        "🔴 inactive"
    };
    let mut text = format!("👤 <b>Your subscription</b>\n\nStatus: {status}\n");
    if let Some(end) = sub.end_date {
        text.push_str(&format!("Valid until: {}\n", end.format("%d.%m.%Y")));
        if let Some(days) = sub.days_left(now).filter(|d| *d >= 0) {
            text.push_str(&format!("Days left: {days}\n"));
        }
    }
    text.push_str(&format!("Protocol: {}\n", sub.active_protocol));
    if let Some(server) = server {
        text.push_str(&format!("Server: {}\n", escape(&server.location)));
    }
    text.push_str(&format!(
        "Notifications: {}",
        if sub.is_notify { "on" } else { "off" }
    ));
    text
}

pub fn key(key: &str) -> String {
    format!("🔑 <b>Your key</b>\n\n<pre>{}</pre>", escape(key))
}

pub fn payment(price: i32, full_price: i32, payment_url: &str) -> String {
    let mut text = format!("💳 <b>One month: {price} ₽</b>");
    if price < full_price {
        text.push_str(&format!(" (instead of {full_price} ₽, referral discount)"));
    }
    text.push_str("\n\n");
    if !payment_url.is_empty() {
        text.push_str("Pay with the button below, then send the receipt.");
    } else {
        text.push_str("Contact support for payment details, then send the receipt.");
    }
    text
}

pub fn referrals(link: &str, invited: &[ReferralSummary], discount: i64) -> String {
    let mut text = format!(
        "🎁 <b>Invite friends</b>\n\nEvery friend with an active subscription \
        takes 10% off your price.\n\nYour link:\n<code>{}</code>\n\n",
        escape(link)
    );
    if invited.is_empty() {
        text.push_str("Nobody has joined with your link yet.");
    } else {
        for r in invited {
            let mark = if r.is_active { "🟢" } else { "⚪️" };
            text.push_str(&format!("{mark} {}\n", escape(&r.first_name)));
        }
        text.push_str(&format!("\nCurrent discount: {discount}%"));
    }
    text
}

pub fn notifications(enabled: bool) -> String {
    if enabled {
        "🔔 Notifications are on.".to_string()
    } else {
        "🔕 Notifications are off.".to_string()
    }
}

pub fn issued(sub: &Subscription) -> String {
    match sub.live_key() {
        Some(k) => format!("✅ Done.\n\n{}", key(k)),
        None => "✅ Done.".to_string(),
    }
}

pub fn renewed(sub: &Subscription) -> String {
    let until = sub
        .end_date
        .map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_default();
    let mut text = format!("🎉 <b>Payment confirmed.</b>\nSubscription is active until {until}.");
    if let Some(k) = sub.live_key() {
        text.push_str("\n\n");
        text.push_str(&key(k));
    }
    text
}

pub fn receipt_for_admin(user_id: i64, name: &str) -> String {
    format!(
        "🧾 Receipt from {} (<code>{user_id}</code>).\nConfirm with <code>/grant {user_id}</code>",
        escape(name)
    )
}

pub fn support_for_admin(user_id: i64, name: &str, question: &str) -> String {
    format!(
        "✉️ Support request from {} (<code>{user_id}</code>):\n\n{}",
        escape(name),
        escape(question)
    )
}

pub fn grant_report(user_id: i64, sub: &Subscription, provisioned: bool) -> String {
    let until = sub
        .end_date
        .map(|d| d.format("%d.%m.%Y").to_string())
        .unwrap_or_default();
    if provisioned {
        format!("✅ User {user_id} renewed until {until}.")
    } else {
        format!("⚠️ User {user_id} renewed until {until}, but the key could not be issued. They can retry with /key.")
    }
}

pub fn broadcast_report(sent: usize, total: usize) -> String {
    format!("📣 Broadcast delivered to {sent} of {total} users.")
}

pub fn stats(users: i64, active: i64) -> String {
    format!("📊 Users: {users}\nActive subscriptions: {active}")
}

/// Escapes text for Telegram HTML.
pub fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use brains_db::models::DEFAULT_AMOUNT;
    use chrono::Duration;

    fn subscription() -> Subscription {
        let now = Utc::now();
        Subscription {
            id: 1,
            user_id: 7,
            is_notify: true,
            is_active: true,
            amount: DEFAULT_AMOUNT,
            end_date: Some(now + Duration::days(3)),
            active_protocol: "wireguard".to_string(),
            active_server_id: None,
            wg_key: Some("[Interface]\nAddress = 10.8.1.2/32".to_string()),
            wg_public_key: Some("pub".to_string()),
            wg_allowed_ip: None,
            xray_key: None,
            xray_uuid: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn account_shows_days_left() {
        let sub = subscription();
        let text = account(&sub, None, Utc::now());
        assert!(text.contains("active"));
        assert!(text.contains("Days left: 3"));
    }

    #[test]
    fn escapes_names() {
        assert_eq!(escape("<b>&"), "&lt;b&gt;&amp;");
        assert!(welcome("<script>").contains("&lt;script&gt;"));
    }

    #[test]
    fn payment_mentions_discount() {
        assert!(payment(200, 250, "").contains("instead of 250"));
        assert!(!payment(250, 250, "https://pay").contains("instead"));
    }
}
