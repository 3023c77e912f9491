mod ip_pool;
mod manager;
mod peer_config;
pub mod templates;

pub use ip_pool::{AddressPool, parse_host};
pub use manager::{PendingPeer, WireGuardLayout, WireGuardManager, WireGuardParams};
pub use peer_config::{PeerConfig, PeerEntry};
