pub mod expiry_service;
pub mod notifier;
pub mod provisioning_service;
pub mod referral_service;
pub mod store;
