//! Provisioning of VPN credentials on remote gateways.
//!
//! A gateway is a host running AmneziaWG or Xray inside Docker, administered
//! over SSH. Managers read the gateway's config files, edit them locally and
//! write them back; there is no transaction across the SSH boundary, so every
//! mutation here is written to be idempotent.

pub mod client_table;
pub mod error;
pub mod executor;
pub mod factory;
pub mod locks;
pub mod manager;
pub mod shell;
pub mod ssh;
pub mod wireguard;
pub mod xray;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{GatewayError, Result};
pub use executor::{Connector, RemoteExecutor, SshTarget};
pub use factory::{ManagerConfig, ProtocolFactory};
pub use locks::GatewayLocks;
pub use manager::{PendingCredential, ProtocolManager};
pub use ssh::{SshConnector, SshSettings};
pub use wireguard::AddressPool;
