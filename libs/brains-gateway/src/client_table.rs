//! The `clientsTable` metadata file kept next to each gateway's server
//! config. Management UIs read it to label clients; the bot keeps it in step
//! with the peers it adds and removes.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};

const CREATION_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: String,
    #[serde(default)]
    pub user_data: UserData,
    /// Fields written by other tools, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub creation_date: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClientRecord {
    pub fn new(client_id: impl Into<String>, client_name: impl Into<String>, created: DateTime<Local>) -> Self {
        Self {
            client_id: client_id.into(),
            user_data: UserData {
                client_name: client_name.into(),
                creation_date: created.format(CREATION_DATE_FORMAT).to_string(),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientTable {
    records: Vec<ClientRecord>,
}

impl ClientTable {
    /// An empty or whitespace-only file is an empty table.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let records = serde_json::from_str(text).map_err(|e| GatewayError::malformed("client table", e))?;
        Ok(Self { records })
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.records.iter().any(|r| r.client_id == client_id)
    }

    /// Returns `false` and leaves the table alone when the id is already listed.
    pub fn insert(&mut self, record: ClientRecord) -> bool {
        if self.contains(&record.client_id) {
            return false;
        }
        self.records.push(record);
        true
    }

    /// Drops every record with this id; returns how many went.
    pub fn remove(&mut self, client_id: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.client_id != client_id);
        before - self.records.len()
    }

    pub fn records(&self) -> &[ClientRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Pretty JSON with four-space indentation.
    pub fn render(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.records
            .serialize(&mut ser)
            .map_err(|e| GatewayError::malformed("client table", e))?;
        String::from_utf8(out).map_err(|e| GatewayError::malformed("client table", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TABLE: &str = r#"[
    {
        "clientId": "abc=",
        "userData": {
            "clientName": "alice",
            "creationDate": "Mon Mar 03 10:00:00 2025",
            "dataReceived": "1 MiB"
        },
        "note": 5
    }
]"#;

    #[test]
    fn empty_file_is_empty_table() {
        assert!(ClientTable::parse("").unwrap().is_empty());
        assert!(ClientTable::parse("  \n").unwrap().is_empty());
        assert_eq!(ClientTable::default().render().unwrap(), "[]");
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let table = ClientTable::parse(TABLE).unwrap();
        assert_eq!(table.render().unwrap(), TABLE);
    }

    #[test]
    fn insert_is_deduplicated_and_remove_filters() {
        let created = Local.with_ymd_and_hms(2025, 3, 4, 9, 5, 7).unwrap();
        let mut table = ClientTable::parse(TABLE).unwrap();

        assert!(table.insert(ClientRecord::new("def=", "bob", created)));
        assert!(!table.insert(ClientRecord::new("def=", "bob again", created)));
        assert_eq!(table.len(), 2);
        assert_eq!(table.records()[1].user_data.creation_date, "Tue Mar 04 09:05:07 2025");

        assert_eq!(table.remove("abc="), 1);
        assert_eq!(table.remove("abc="), 0);
        assert_eq!(table.records()[0].client_id, "def=");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            ClientTable::parse("{not json"),
            Err(GatewayError::MalformedConfig { .. })
        ));
    }
}
