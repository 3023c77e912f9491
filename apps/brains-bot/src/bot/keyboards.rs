use brains_db::models::{Protocol, Server};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub const BTN_ACCOUNT: &str = "👤 Account";
pub const BTN_KEY: &str = "🔑 My key";
pub const BTN_PAY: &str = "💳 Pay";
pub const BTN_PROTOCOL: &str = "🔀 Protocol";
pub const BTN_SERVERS: &str = "🌍 Servers";
pub const BTN_REFERRAL: &str = "🎁 Invite friends";
pub const BTN_SUPPORT: &str = "❓ Support";

pub const CB_SEND_CHECK: &str = "send_check";
pub const CB_NOTIFICATIONS: &str = "notifications";
pub const CB_REISSUE: &str = "reissue";
pub const CB_PROTOCOL_PREFIX: &str = "protocol_";
pub const CB_SERVER_PREFIX: &str = "server_";

pub fn main_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![KeyboardButton::new(BTN_ACCOUNT), KeyboardButton::new(BTN_KEY)],
        vec![KeyboardButton::new(BTN_PAY), KeyboardButton::new(BTN_PROTOCOL)],
        vec![KeyboardButton::new(BTN_SERVERS), KeyboardButton::new(BTN_REFERRAL)],
        vec![KeyboardButton::new(BTN_SUPPORT)],
    ])
    .resize_keyboard()
}

fn url_button(text: &str, url: &str) -> Option<InlineKeyboardButton> {
    url.parse().ok().map(|u| InlineKeyboardButton::url(text, u))
}

/// Attached to the expiry notice. The pay button is left out when no valid
/// payment URL is configured.
pub fn expired_keyboard(payment_url: &str) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if let Some(pay) = url_button("💳 Pay", payment_url) {
        rows.push(vec![pay]);
    }
    rows.push(vec![InlineKeyboardButton::callback("🧾 Send receipt", CB_SEND_CHECK)]);
    rows.push(vec![InlineKeyboardButton::callback(
        "🔕 Disable notifications",
        CB_NOTIFICATIONS,
    )]);
    InlineKeyboardMarkup::new(rows)
}

pub fn payment_keyboard(payment_url: &str) -> InlineKeyboardMarkup {
    let mut row = Vec::new();
    if let Some(pay) = url_button("💳 Pay", payment_url) {
        row.push(pay);
    }
    row.push(InlineKeyboardButton::callback("🧾 Send receipt", CB_SEND_CHECK));
    InlineKeyboardMarkup::new(vec![row])
}

pub fn account_keyboard(is_notify: bool) -> InlineKeyboardMarkup {
    let toggle = if is_notify {
        "🔕 Disable notifications"
    } else {
        "🔔 Enable notifications"
    };
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback(toggle, CB_NOTIFICATIONS)],
        vec![InlineKeyboardButton::callback("♻️ New key", CB_REISSUE)],
    ])
}

pub fn protocol_keyboard(current: Option<Protocol>) -> InlineKeyboardMarkup {
    let button = |protocol: Protocol, label: &str| {
        let text = if current == Some(protocol) {
            format!("✅ {label}")
        } else {
            label.to_string()
        };
        InlineKeyboardButton::callback(text, format!("{CB_PROTOCOL_PREFIX}{protocol}"))
    };
    InlineKeyboardMarkup::new(vec![vec![
        button(Protocol::WireGuard, "WireGuard"),
        button(Protocol::Xray, "VLESS"),
    ]])
}

pub fn servers_keyboard(servers: &[Server], current: Option<i64>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(servers.iter().map(|s| {
        let text = if current == Some(s.id) {
            format!("✅ {}", s.location)
        } else {
            s.location.clone()
        };
        vec![InlineKeyboardButton::callback(
            text,
            format!("{CB_SERVER_PREFIX}{}", s.id),
        )]
    }))
}
