use std::sync::{Arc, OnceLock};

use brains_db::repositories::{ServerRepository, SubscriptionRepository, UserRepository};

use crate::config::BotConfig;
use crate::services::notifier::Notifier;
use crate::services::provisioning_service::ProvisioningService;
use crate::services::referral_service::ReferralService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BotConfig>,
    pub users: UserRepository,
    pub subscriptions: SubscriptionRepository,
    pub servers: ServerRepository,
    pub referrals: ReferralService,
    pub provisioning: ProvisioningService,
    pub notifier: Arc<dyn Notifier>,
    /// Filled in once the bot identity is known.
    pub bot_username: Arc<OnceLock<String>>,
}

impl AppState {
    pub fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.config.admin_id
    }

    pub fn bot_username(&self) -> &str {
        self.bot_username.get().map(String::as_str).unwrap_or("brains_secure_bot")
    }
}
