use chrono::Local;
use tracing::{debug, info};

use super::ip_pool::AddressPool;
use super::peer_config::{PeerConfig, PeerEntry};
use super::templates::{ClientConfigParams, render_client_config};
use crate::client_table::{ClientRecord, ClientTable};
use crate::error::{GatewayError, Result};
use crate::executor::RemoteExecutor;
use crate::shell::{ContainerShell, quote};

/// Where AmneziaWG keeps its state inside the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireGuardLayout {
    pub container: String,
    pub interface: String,
    pub config_path: String,
    pub clients_table_path: String,
}

impl Default for WireGuardLayout {
    fn default() -> Self {
        Self {
            container: "amnezia-awg".to_string(),
            interface: "wg0".to_string(),
            config_path: "/opt/amnezia/awg/wg0.conf".to_string(),
            clients_table_path: "/opt/amnezia/awg/clientsTable".to_string(),
        }
    }
}

/// Per-gateway values that end up in every client config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireGuardParams {
    pub server_public_key: String,
    pub preshared_key: String,
    /// `host:port` clients dial.
    pub endpoint: String,
}

/// A generated but not yet registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPeer {
    pub public_key: String,
    pub client_config: String,
    pub allowed_ip: String,
    pub username: String,
}

pub struct WireGuardManager {
    shell: ContainerShell,
    layout: WireGuardLayout,
    params: WireGuardParams,
    pool: AddressPool,
}

impl WireGuardManager {
    pub fn new(
        executor: Box<dyn RemoteExecutor>,
        layout: WireGuardLayout,
        params: WireGuardParams,
        pool: AddressPool,
    ) -> Self {
        Self {
            shell: ContainerShell::new(executor, layout.container.clone()),
            layout,
            params,
            pool,
        }
    }

    async fn read_peer_config(&self) -> Result<PeerConfig> {
        let text = self.shell.read_file(&self.layout.config_path).await?;
        Ok(PeerConfig::parse(&text))
    }

    async fn read_client_table(&self) -> Result<ClientTable> {
        let text = self.shell.read_file(&self.layout.clients_table_path).await?;
        ClientTable::parse(&text)
    }

    async fn reload(&self) -> Result<()> {
        let script = format!(
            "wg syncconf {iface} <(wg-quick strip {path})",
            iface = self.layout.interface,
            path = self.layout.config_path,
        );
        self.shell.exec(&format!("bash -c {}", quote(&script))).await?;
        debug!("Reloaded {} on {}", self.layout.interface, self.shell.host());
        Ok(())
    }

    /// Lowest pool address not used by a peer on the gateway nor listed in
    /// `reserved`.
    pub async fn find_available_ip<S: AsRef<str>>(&self, reserved: &[S]) -> Result<String> {
        let config = self.read_peer_config().await?;
        self.pool.allocate(&config.used_addresses(), reserved)
    }

    /// Allocates an address and generates a key pair on the gateway. Nothing
    /// is registered yet.
    pub async fn create_config<S: AsRef<str>>(&self, username: &str, reserved: &[S]) -> Result<PendingPeer> {
        let allowed_ip = self.find_available_ip(reserved).await?;

        let private_key = self.shell.exec("wg genkey").await?;
        let public_key = self.shell.exec_with_input(&private_key, "wg pubkey").await?;
        if private_key.is_empty() || public_key.is_empty() {
            return Err(GatewayError::malformed("key pair", "wg returned an empty key"));
        }

        let client_config = render_client_config(&ClientConfigParams {
            address: &allowed_ip,
            private_key: &private_key,
            server_public_key: &self.params.server_public_key,
            preshared_key: &self.params.preshared_key,
            endpoint: &self.params.endpoint,
        });

        Ok(PendingPeer {
            public_key,
            client_config,
            allowed_ip,
            username: username.to_string(),
        })
    }

    /// Registers the peer and reloads the interface. A peer whose public key
    /// is already present is left alone.
    pub async fn add_user(&self, peer: &PendingPeer) -> Result<()> {
        let mut config = self.read_peer_config().await?;
        if config.contains_peer(&peer.public_key) {
            debug!("Peer {} already present on {}", peer.public_key, self.shell.host());
            return Ok(());
        }
        if let Some(addr) = super::parse_host(&peer.allowed_ip)
            && config.used_addresses().contains(&addr)
        {
            return Err(GatewayError::AddressInUse {
                address: peer.allowed_ip.clone(),
            });
        }

        let mut table = self.read_client_table().await?;
        if table.insert(ClientRecord::new(&peer.public_key, &peer.username, Local::now())) {
            self.shell
                .write_file(&self.layout.clients_table_path, &table.render()?)
                .await?;
        }

        config.append_peer(&PeerEntry {
            public_key: peer.public_key.clone(),
            preshared_key: self.params.preshared_key.clone(),
            allowed_ips: peer.allowed_ip.clone(),
        });
        self.shell
            .write_file(&self.layout.config_path, &config.render())
            .await?;
        self.reload().await?;

        info!("Added peer {} ({}) on {}", peer.public_key, peer.allowed_ip, self.shell.host());
        Ok(())
    }

    /// Removes the peer and its metadata. Calling it for an absent peer only
    /// cleans up stray metadata.
    /// Both files are rewritten before the reload, so a failed reload
    /// leaves nothing of the peer on disk.
    pub async fn remove_user(&self, public_key: &str) -> Result<()> {
        let mut config = self.read_peer_config().await?;
        let removed = config.remove_peer(public_key);
        if removed {
            self.shell
                .write_file(&self.layout.config_path, &config.render())
                .await?;
        } else {
            debug!("Peer {} not present on {}", public_key, self.shell.host());
        }

        let mut table = self.read_client_table().await?;
        if table.remove(public_key) > 0 {
            self.shell
                .write_file(&self.layout.clients_table_path, &table.render()?)
                .await?;
        }

        if removed {
            self.reload().await?;
            info!("Removed peer {} from {}", public_key, self.shell.host());
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
    use crate::testing::{FakeGateway, WG_CONFIG, WG_TABLE};

    fn manager(gateway: &FakeGateway) -> WireGuardManager {
        WireGuardManager::new(
            Box::new(gateway.clone()),
            WireGuardLayout::default(),
            WireGuardParams {
                server_public_key: "c2VydmVyLXB1Yg==".to_string(),
                preshared_key: "cHNr".to_string(),
                endpoint: "203.0.113.10:37642".to_string(),
            },
            AddressPool::default(),
        )
    }

    fn conf(gateway: &FakeGateway) -> String {
        gateway.file("amnezia-awg", WG_CONFIG).unwrap_or_default()
    }

    const TWO_PEERS: &str = "\
[Interface]
PrivateKey = c2VydmVy
Address = 10.8.1.1/24
ListenPort = 37642

[Peer]
PublicKey = A
PresharedKey = cHNr
AllowedIPs = 10.8.1.2/32

[Peer]
PublicKey = B
PresharedKey = cHNr
AllowedIPs = 10.8.1.3/32
";

    #[tokio::test]
    async fn allocation_skips_used_and_reserved() {
        let gateway = FakeGateway::wireguard("gw").with_file("amnezia-awg", WG_CONFIG, TWO_PEERS);
        let wg = manager(&gateway);

        let none: &[&str] = &[];
        assert_eq!(wg.find_available_ip(none).await.unwrap(), "10.8.1.4/32");
        assert_eq!(wg.find_available_ip(&["10.8.1.4/32"]).await.unwrap(), "10.8.1.5/32");
    }

    #[tokio::test]
    async fn create_and_add_registers_peer_and_metadata() {
        let gateway = FakeGateway::wireguard("gw").with_file("amnezia-awg", WG_CONFIG, TWO_PEERS);
        let wg = manager(&gateway);

        let peer = wg.create_config("alice", &["10.8.1.4/32"]).await.unwrap();
        assert_eq!(peer.allowed_ip, "10.8.1.5/32");
        assert!(peer.client_config.contains("Address = 10.8.1.5/32"));
        assert!(peer.client_config.contains("Endpoint = 203.0.113.10:37642"));
        assert!(!conf(&gateway).contains(&peer.public_key), "create must not register");

        wg.add_user(&peer).await.unwrap();

        let after = conf(&gateway);
        assert!(after.starts_with(TWO_PEERS.trim_end()));
        assert!(after.ends_with(&format!(
            "\n\n[Peer]\nPublicKey = {}\nPresharedKey = cHNr\nAllowedIPs = 10.8.1.5/32\n",
            peer.public_key
        )));

        let table = ClientTable::parse(&gateway.file("amnezia-awg", WG_TABLE).unwrap()).unwrap();
        assert!(table.contains(&peer.public_key));
        assert_eq!(table.records()[0].user_data.client_name, "alice");
        assert_eq!(gateway.count_commands("wg syncconf"), 1);

        // metadata goes out before the peer config
        let writes: Vec<_> = gateway
            .commands()
            .into_iter()
            .filter(|c| c.contains(" tee "))
            .collect();
        assert!(writes[0].ends_with("tee /opt/amnezia/awg/clientsTable > /dev/null"));
        assert!(writes[1].ends_with("tee /opt/amnezia/awg/wg0.conf > /dev/null"));
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let gateway = FakeGateway::wireguard("gw");
        let wg = manager(&gateway);

        let none: &[&str] = &[];
        let peer = wg.create_config("bob", none).await.unwrap();
        wg.add_user(&peer).await.unwrap();
        let once = conf(&gateway);

        wg.add_user(&peer).await.unwrap();
        assert_eq!(conf(&gateway), once);
        assert_eq!(gateway.count_commands("wg syncconf"), 1);
    }

    #[tokio::test]
    async fn add_refuses_a_taken_address() {
        let gateway = FakeGateway::wireguard("gw").with_file("amnezia-awg", WG_CONFIG, TWO_PEERS);
        let wg = manager(&gateway);

        let peer = PendingPeer {
            public_key: "C".to_string(),
            client_config: String::new(),
            allowed_ip: "10.8.1.3/32".to_string(),
            username: "carol".to_string(),
        };
        assert!(matches!(
            wg.add_user(&peer).await,
            Err(GatewayError::AddressInUse { .. })
        ));
        assert_eq!(conf(&gateway), TWO_PEERS);
    }

    #[tokio::test]
    async fn remove_reloads_once_and_second_remove_is_noop() {
        let gateway = FakeGateway::wireguard("gw").with_file("amnezia-awg", WG_CONFIG, TWO_PEERS);
        let wg = manager(&gateway);

        wg.remove_user("A").await.unwrap();
        let after = conf(&gateway);
        assert!(!after.contains("PublicKey = A"));
        assert!(after.contains(
            "ListenPort = 37642\n\n[Peer]\nPublicKey = B\nPresharedKey = cHNr\nAllowedIPs = 10.8.1.3/32"
        ));
        assert_eq!(gateway.count_commands("wg syncconf"), 1);

        let writes_before = gateway.count_commands(" tee ");
        wg.remove_user("A").await.unwrap();
        assert_eq!(conf(&gateway), after);
        assert_eq!(gateway.count_commands("wg syncconf"), 1);
        assert_eq!(gateway.count_commands(" tee "), writes_before);
    }

    #[tokio::test]
    async fn remove_strips_stray_metadata() {
        let gateway = FakeGateway::wireguard("gw").with_file(
            "amnezia-awg",
            WG_TABLE,
            r#"[{"clientId": "ghost", "userData": {"clientName": "x", "creationDate": ""}}]"#,
        );
        let wg = manager(&gateway);

        wg.remove_user("ghost").await.unwrap();
        let table = ClientTable::parse(&gateway.file("amnezia-awg", WG_TABLE).unwrap()).unwrap();
        assert!(table.is_empty());
        assert_eq!(gateway.count_commands("wg syncconf"), 0);
    }

    #[tokio::test]
    async fn failed_reload_surfaces_command_error() {
        let gateway = FakeGateway::wireguard("gw");
        gateway.fail_when("wg syncconf");
        let wg = manager(&gateway);

        let none: &[&str] = &[];
        let peer = wg.create_config("dave", none).await.unwrap();
        let err = wg.add_user(&peer).await.unwrap_err();
        assert!(matches!(err, GatewayError::CommandFailed { .. }));
        // written but never loaded: the caller has to take it back out
        assert!(conf(&gateway).contains(&peer.public_key));

        assert!(wg.remove_user(&peer.public_key).await.is_err());
        assert!(!conf(&gateway).contains(&peer.public_key));
        let table = ClientTable::parse(&gateway.file("amnezia-awg", WG_TABLE).unwrap()).unwrap();
        assert!(!table.contains(&peer.public_key));

        gateway.clear_failures();
        let reloads = gateway.count_commands("wg syncconf");
        wg.add_user(&peer).await.unwrap();
        assert_eq!(conf(&gateway).matches(&peer.public_key).count(), 1);
        assert_eq!(gateway.count_commands("wg syncconf"), reloads + 1);
    }
}
