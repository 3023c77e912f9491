use brains_db::models::Protocol;

use crate::error::{GatewayError, Result};
use crate::wireguard::{PendingPeer, WireGuardManager};
use crate::xray::{PendingXrayClient, XrayManager};

/// A credential generated by [`ProtocolManager::create_config`] that has not
/// been registered on the gateway yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCredential {
    WireGuard(PendingPeer),
    Xray(PendingXrayClient),
}

impl PendingCredential {
    pub fn protocol(&self) -> Protocol {
        match self {
            PendingCredential::WireGuard(_) => Protocol::WireGuard,
            PendingCredential::Xray(_) => Protocol::Xray,
        }
    }

    /// What `remove_user` takes to revoke it again.
    pub fn credential_id(&self) -> String {
        match self {
            PendingCredential::WireGuard(peer) => peer.public_key.clone(),
            PendingCredential::Xray(client) => client.client_id.to_string(),
        }
    }

    /// The text handed to the user.
    pub fn access_key(&self) -> &str {
        match self {
            PendingCredential::WireGuard(peer) => &peer.client_config,
            PendingCredential::Xray(client) => &client.access_key,
        }
    }
}

/// A connected manager for one protocol on one gateway.
pub enum ProtocolManager {
    WireGuard(WireGuardManager),
    Xray(XrayManager),
}

impl ProtocolManager {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolManager::WireGuard(_) => Protocol::WireGuard,
            ProtocolManager::Xray(_) => Protocol::Xray,
        }
    }

    /// `reserved` lists addresses promised elsewhere that must not be handed
    /// out; Xray ignores it.
    pub async fn create_config<S: AsRef<str>>(&self, username: &str, reserved: &[S]) -> Result<PendingCredential> {
        match self {
            ProtocolManager::WireGuard(wg) => wg
                .create_config(username, reserved)
                .await
                .map(PendingCredential::WireGuard),
            ProtocolManager::Xray(xray) => Ok(PendingCredential::Xray(xray.create_config(username))),
        }
    }

    pub async fn add_user(&self, credential: &PendingCredential) -> Result<()> {
        match (self, credential) {
            (ProtocolManager::WireGuard(wg), PendingCredential::WireGuard(peer)) => wg.add_user(peer).await,
            (ProtocolManager::Xray(xray), PendingCredential::Xray(client)) => xray.add_user(client).await,
            _ => Err(GatewayError::CredentialMismatch {
                manager: self.protocol(),
                credential: credential.protocol(),
            }),
        }
    }

    pub async fn remove_user(&self, credential_id: &str) -> Result<()> {
        match self {
            ProtocolManager::WireGuard(wg) => wg.remove_user(credential_id).await,
            ProtocolManager::Xray(xray) => xray.remove_user(credential_id).await,
        }
    }

    pub async fn close(self) {
        match self {
            ProtocolManager::WireGuard(wg) => wg.close().await,
            ProtocolManager::Xray(xray) => xray.close().await,
        }
    }
}
