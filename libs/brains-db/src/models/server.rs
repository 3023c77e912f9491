use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// A VPN gateway host. Operator-managed reference data; the bot only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: i64,
    pub host: String,
    /// Client-facing service port (the VLESS port for Xray, the WireGuard
    /// listen port when no explicit endpoint is configured).
    pub port: i32,
    pub location: String,
    pub admin_username: String,
    pub password: Option<String>,
    /// Protocol-specific parameters: `wg_public_key`, `wg_preshared_key`,
    /// `wg_endpoint`, `xray_public_key`, `xray_short_id`, `xray_sni`, `ssh_port`.
    pub additional_info: Json<BTreeMap<String, String>>,
}

impl Server {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.additional_info
            .0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn ssh_port(&self) -> u16 {
        self.param("ssh_port")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_SSH_PORT)
    }

    pub fn service_port(&self) -> u16 {
        u16::try_from(self.port).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_with(params: &[(&str, &str)]) -> Server {
        Server {
            id: 1,
            host: "203.0.113.10".to_string(),
            port: 443,
            location: "NL".to_string(),
            admin_username: "root".to_string(),
            password: Some("secret".to_string()),
            additional_info: Json(
                params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
        }
    }

    #[test]
    fn ssh_port_defaults_to_22() {
        assert_eq!(server_with(&[]).ssh_port(), 22);
        assert_eq!(server_with(&[("ssh_port", "2222")]).ssh_port(), 2222);
        assert_eq!(server_with(&[("ssh_port", "nope")]).ssh_port(), 22);
    }

    #[test]
    fn blank_params_are_missing() {
        let server = server_with(&[("xray_sni", "  ")]);
        assert_eq!(server.param("xray_sni"), None);
    }
}
