use chrono::Local;
use tracing::{debug, info};
use uuid::Uuid;

use super::server_config::XrayServerConfig;
use super::templates::{ShareLinkParams, render_share_link};
use crate::client_table::{ClientRecord, ClientTable};
use crate::error::Result;
use crate::executor::RemoteExecutor;
use crate::shell::ContainerShell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrayLayout {
    pub container: String,
    pub server_config_path: String,
    pub clients_table_path: String,
}

impl Default for XrayLayout {
    fn default() -> Self {
        Self {
            container: "amnezia-xray".to_string(),
            server_config_path: "/opt/amnezia/xray/server.json".to_string(),
            clients_table_path: "/opt/amnezia/xray/clientsTable".to_string(),
        }
    }
}

/// REALITY parameters advertised in every share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XrayParams {
    pub host: String,
    pub port: u16,
    pub public_key: String,
    pub short_id: String,
    pub sni: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingXrayClient {
    pub client_id: Uuid,
    pub access_key: String,
    pub username: String,
}

pub struct XrayManager {
    shell: ContainerShell,
    layout: XrayLayout,
    params: XrayParams,
}

impl XrayManager {
    pub fn new(executor: Box<dyn RemoteExecutor>, layout: XrayLayout, params: XrayParams) -> Self {
        Self {
            shell: ContainerShell::new(executor, layout.container.clone()),
            layout,
            params,
        }
    }

    async fn read_server_config(&self) -> Result<XrayServerConfig> {
        let text = self.shell.read_file(&self.layout.server_config_path).await?;
        XrayServerConfig::parse(&text)
    }

    async fn read_client_table(&self) -> Result<ClientTable> {
        let text = self.shell.read_file(&self.layout.clients_table_path).await?;
        ClientTable::parse(&text)
    }

    /// Local only: a fresh client id and its share link.
    pub fn create_config(&self, username: &str) -> PendingXrayClient {
        let client_id = Uuid::new_v4();
        let access_key = render_share_link(&ShareLinkParams {
            client_id,
            host: &self.params.host,
            port: self.params.port,
            public_key: &self.params.public_key,
            short_id: &self.params.short_id,
            sni: &self.params.sni,
        });
        PendingXrayClient {
            client_id,
            access_key,
            username: username.to_string(),
        }
    }

    pub async fn add_user(&self, client: &PendingXrayClient) -> Result<()> {
        let id = client.client_id.to_string();
        let mut config = self.read_server_config().await?;
        if !config.add_client(&id)? {
            debug!("Xray client {} already present on {}", id, self.shell.host());
            return Ok(());
        }

        let mut table = self.read_client_table().await?;
        if table.insert(ClientRecord::new(&id, &client.username, Local::now())) {
            self.shell
                .write_file(&self.layout.clients_table_path, &table.render()?)
                .await?;
        }
        self.shell
            .write_file(&self.layout.server_config_path, &config.render()?)
            .await?;
        self.shell.restart().await?;

        info!("Added Xray client {} on {}", id, self.shell.host());
        Ok(())
    }

    pub async fn remove_user(&self, client_id: &str) -> Result<()> {
        let mut config = self.read_server_config().await?;
        let removed = config.remove_client(client_id)?;
        if removed {
            self.shell
                .write_file(&self.layout.server_config_path, &config.render()?)
                .await?;
        }

        let mut table = self.read_client_table().await?;
        let stripped = table.remove(client_id) > 0;
        if stripped {
            self.shell
                .write_file(&self.layout.clients_table_path, &table.render()?)
                .await?;
        }

        if removed || stripped {
            self.shell.restart().await?;
            info!("Removed Xray client {} from {}", client_id, self.shell.host());
        } else {
            debug!("Xray client {} not present on {}", client_id, self.shell.host());
        }
        Ok(())
    }

    pub async fn close(self) {
        self.shell.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGateway, XRAY_CONFIG, XRAY_TABLE};

    fn manager(gateway: &FakeGateway) -> XrayManager {
        XrayManager::new(
            Box::new(gateway.clone()),
            XrayLayout::default(),
            XrayParams {
                host: "203.0.113.20".to_string(),
                port: 443,
                public_key: "PBK".to_string(),
                short_id: "ab12".to_string(),
                sni: "www.microsoft.com".to_string(),
            },
        )
    }

    fn server(gateway: &FakeGateway) -> XrayServerConfig {
        XrayServerConfig::parse(&gateway.file("amnezia-xray", XRAY_CONFIG).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn create_is_local() {
        let gateway = FakeGateway::xray("gw");
        let xray = manager(&gateway);

        let client = xray.create_config("alice");
        assert!(client.access_key.starts_with(&format!("vless://{}@203.0.113.20:443?", client.client_id)));
        assert!(gateway.commands().is_empty());
    }

    #[tokio::test]
    async fn add_then_remove_round_trips() {
        let gateway = FakeGateway::xray("gw");
        let original = gateway.file("amnezia-xray", XRAY_CONFIG).unwrap();
        let xray = manager(&gateway);

        let client = xray.create_config("alice");
        xray.add_user(&client).await.unwrap();
        xray.add_user(&client).await.unwrap();

        let id = client.client_id.to_string();
        assert!(server(&gateway).contains(&id));
        assert_eq!(server(&gateway).client_ids().len(), 1);
        let table = ClientTable::parse(&gateway.file("amnezia-xray", XRAY_TABLE).unwrap()).unwrap();
        assert!(table.contains(&id));
        assert_eq!(gateway.count_commands("docker restart amnezia-xray"), 1);

        xray.remove_user(&id).await.unwrap();
        assert_eq!(gateway.file("amnezia-xray", XRAY_CONFIG).unwrap(), original);
        assert_eq!(gateway.count_commands("docker restart amnezia-xray"), 2);

        xray.remove_user(&id).await.unwrap();
        assert_eq!(gateway.count_commands("docker restart amnezia-xray"), 2);
    }
}
