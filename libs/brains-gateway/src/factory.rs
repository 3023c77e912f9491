use std::sync::Arc;

use brains_db::models::{Protocol, Server};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::executor::{Connector, SshTarget};
use crate::manager::ProtocolManager;
use crate::wireguard::{AddressPool, WireGuardLayout, WireGuardManager, WireGuardParams};
use crate::xray::{XrayLayout, XrayManager, XrayParams};

/// Everything needed to open a manager, resolved from a gateway row before
/// any connection is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerConfig {
    WireGuard {
        target: SshTarget,
        params: WireGuardParams,
    },
    Xray {
        target: SshTarget,
        params: XrayParams,
    },
}

impl ManagerConfig {
    pub fn protocol(&self) -> Protocol {
        match self {
            ManagerConfig::WireGuard { .. } => Protocol::WireGuard,
            ManagerConfig::Xray { .. } => Protocol::Xray,
        }
    }

    pub fn target(&self) -> &SshTarget {
        match self {
            ManagerConfig::WireGuard { target, .. } | ManagerConfig::Xray { target, .. } => target,
        }
    }
}

#[derive(Clone)]
pub struct ProtocolFactory {
    connector: Arc<dyn Connector>,
    pool: AddressPool,
    wireguard_layout: WireGuardLayout,
    xray_layout: XrayLayout,
}

impl ProtocolFactory {
    pub fn new(connector: Arc<dyn Connector>, pool: AddressPool) -> Self {
        Self {
            connector,
            pool,
            wireguard_layout: WireGuardLayout::default(),
            xray_layout: XrayLayout::default(),
        }
    }

    /// Picks the manager for `protocol_tag` and pulls its parameters out of
    /// the gateway row. Does not touch the network.
    pub fn create_manager(&self, protocol_tag: &str, server: &Server) -> Result<ManagerConfig> {
        let protocol: Protocol = protocol_tag
            .parse()
            .map_err(|_| GatewayError::UnsupportedProtocol(protocol_tag.to_string()))?;
        let target = SshTarget::from_server(server);
        let param = |key: &'static str| {
            server
                .param(key)
                .map(str::to_string)
                .ok_or(GatewayError::MissingParameter {
                    server_id: server.id,
                    key,
                })
        };

        Ok(match protocol {
            Protocol::WireGuard => ManagerConfig::WireGuard {
                params: WireGuardParams {
                    server_public_key: param("wg_public_key")?,
                    preshared_key: param("wg_preshared_key")?,
                    endpoint: server
                        .param("wg_endpoint")
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("{}:{}", server.host, server.service_port())),
                },
                target,
            },
            Protocol::Xray => ManagerConfig::Xray {
                params: XrayParams {
                    host: server.host.clone(),
                    port: server.service_port(),
                    public_key: param("xray_public_key")?,
                    short_id: param("xray_short_id")?,
                    sni: param("xray_sni")?,
                },
                target,
            },
        })
    }

    /// Resolves the manager and connects it.
    pub async fn open(&self, protocol_tag: &str, server: &Server) -> Result<ProtocolManager> {
        let config = self.create_manager(protocol_tag, server)?;
        self.connect(config).await
    }

    pub async fn connect(&self, config: ManagerConfig) -> Result<ProtocolManager> {
        let executor = self.connector.connect(config.target()).await?;
        debug!("Opened {} manager on {}", config.protocol(), executor.host());

        Ok(match config {
            ManagerConfig::WireGuard { params, .. } => ProtocolManager::WireGuard(WireGuardManager::new(
                executor,
                self.wireguard_layout.clone(),
                params,
                self.pool,
            )),
            ManagerConfig::Xray { params, .. } => {
                ProtocolManager::Xray(XrayManager::new(executor, self.xray_layout.clone(), params))
            }
        })
    }
}
