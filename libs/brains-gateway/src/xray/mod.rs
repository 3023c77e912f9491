mod manager;
mod server_config;
pub mod templates;

pub use manager::{PendingXrayClient, XrayLayout, XrayManager, XrayParams};
pub use server_config::{VISION_FLOW, XrayServerConfig};
