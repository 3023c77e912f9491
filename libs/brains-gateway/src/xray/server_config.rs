use serde_json::{Value, json};

use crate::error::{GatewayError, Result};

pub const VISION_FLOW: &str = "xtls-rprx-vision";

/// Xray's `server.json`. Only `inbounds[0].settings.clients` is touched; key
/// order everywhere else is kept as read.
#[derive(Debug, Clone, PartialEq)]
pub struct XrayServerConfig {
    doc: Value,
}

impl XrayServerConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(text).map_err(|e| GatewayError::malformed("xray server config", e))?;
        let config = Self { doc };
        config.clients()?;
        Ok(config)
    }

    fn clients(&self) -> Result<&Vec<Value>> {
        self.doc
            .pointer("/inbounds/0/settings/clients")
            .and_then(Value::as_array)
            .ok_or_else(Self::missing_clients)
    }

    fn clients_mut(&mut self) -> Result<&mut Vec<Value>> {
        self.doc
            .pointer_mut("/inbounds/0/settings/clients")
            .and_then(Value::as_array_mut)
            .ok_or_else(Self::missing_clients)
    }

    fn missing_clients() -> GatewayError {
        GatewayError::malformed("xray server config", "no inbounds[0].settings.clients array")
    }

    pub fn client_ids(&self) -> Vec<&str> {
        self.clients()
            .map(|clients| clients.iter().filter_map(|c| c.get("id")?.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.client_ids().contains(&id)
    }

    /// Returns `false` when the id is already a client.
    pub fn add_client(&mut self, id: &str) -> Result<bool> {
        if self.contains(id) {
            return Ok(false);
        }
        self.clients_mut()?.push(json!({ "id": id, "flow": VISION_FLOW }));
        Ok(true)
    }

    /// Drops every client with this id; returns whether any went.
    pub fn remove_client(&mut self, id: &str) -> Result<bool> {
        let clients = self.clients_mut()?;
        let before = clients.len();
        clients.retain(|c| c.get("id").and_then(Value::as_str) != Some(id));
        Ok(clients.len() != before)
    }

    pub fn render(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        serde::Serialize::serialize(&self.doc, &mut ser)
            .map_err(|e| GatewayError::malformed("xray server config", e))?;
        String::from_utf8(out).map_err(|e| GatewayError::malformed("xray server config", e))
    }
}
