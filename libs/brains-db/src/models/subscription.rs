use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const DEFAULT_AMOUNT: i32 = 250;
/// Discount in percent granted per referral with an active subscription.
pub const REFERRAL_DISCOUNT_PERCENT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    WireGuard,
    Xray,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::WireGuard => "wireguard",
            Protocol::Xray => "xray",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol tag: {0:?}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wireguard" | "wg" | "awg" | "amneziawg" => Ok(Protocol::WireGuard),
            "xray" | "vless" => Ok(Protocol::Xray),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// One subscription per user. Only the credential group selected by
/// `active_protocol` is live; the other group may hold stale values.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub is_notify: bool,
    pub is_active: bool,
    pub amount: i32,
    pub end_date: Option<DateTime<Utc>>,
    pub active_protocol: String,
    pub active_server_id: Option<i64>,
    pub wg_key: Option<String>,
    pub wg_public_key: Option<String>,
    pub wg_allowed_ip: Option<String>,
    pub xray_key: Option<String>,
    pub xray_uuid: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn protocol(&self) -> Result<Protocol, UnknownProtocol> {
        self.active_protocol.parse()
    }

    /// Identifier of the credential provisioned on the active gateway:
    /// the peer public key for WireGuard, the client UUID for Xray.
    pub fn live_credential_id(&self) -> Option<String> {
        match self.protocol().ok()? {
            Protocol::WireGuard => self
                .wg_public_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .map(str::to_string),
            Protocol::Xray => self.xray_uuid.map(|u| u.to_string()),
        }
    }

    /// Client-importable key text for the active protocol.
    pub fn live_key(&self) -> Option<&str> {
        let key = match self.protocol().ok()? {
            Protocol::WireGuard => self.wg_key.as_deref(),
            Protocol::Xray => self.xray_key.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    pub fn apply_wireguard(
        &mut self,
        server_id: i64,
        public_key: String,
        client_config: String,
        allowed_ip: String,
    ) {
        self.active_protocol = Protocol::WireGuard.to_string();
        self.active_server_id = Some(server_id);
        self.wg_public_key = Some(public_key);
        self.wg_key = Some(client_config);
        self.wg_allowed_ip = Some(allowed_ip);
    }

    pub fn apply_xray(&mut self, server_id: i64, client_uuid: Uuid, access_key: String) {
        self.active_protocol = Protocol::Xray.to_string();
        self.active_server_id = Some(server_id);
        self.xray_uuid = Some(client_uuid);
        self.xray_key = Some(access_key);
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| end < now)
    }

    pub fn days_left(&self, now: DateTime<Utc>) -> Option<i64> {
        self.end_date
            .map(|end| (end.date_naive() - now.date_naive()).num_days())
    }

    /// End date after a paid renewal of `days`. A lapsed subscription is
    /// extended from `now`, not from its stale end date.
    pub fn renewed_end_date(&self, now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        let base = match self.end_date {
            Some(end) if end > now => end,
            _ => now,
        };
        base + Duration::days(days)
    }

    pub fn price_with_referrals(&self, active_referrals: i64) -> i32 {
        let discount = (REFERRAL_DISCOUNT_PERCENT * active_referrals).clamp(0, 100);
        let price = i64::from(self.amount) * (100 - discount) / 100;
        i32::try_from(price).unwrap_or(self.amount)
    }
}
