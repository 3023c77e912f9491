use anyhow::Result;
use brains_db::models::{REFERRAL_DISCOUNT_PERCENT, ReferralSummary, Subscription};
use brains_db::repositories::{ReferralRepository, SubscriptionRepository, UserRepository};
use brains_db::sqlx::PgPool;
use tracing::info;

const START_PREFIX: &str = "ref_";

/// Referrer id carried in a `/start ref_<id>` payload.
pub fn parse_referrer(payload: &str) -> Option<i64> {
    payload
        .trim()
        .strip_prefix(START_PREFIX)
        .and_then(|id| id.parse().ok())
        .filter(|id: &i64| *id > 0)
}

pub fn referral_link(bot_username: &str, user_id: i64) -> String {
    format!("https://t.me/{bot_username}?start={START_PREFIX}{user_id}")
}

pub fn discount_percent(active_referrals: i64) -> i64 {
    (REFERRAL_DISCOUNT_PERCENT * active_referrals).clamp(0, 100)
}

/// Telegram profile fields stored for a new user.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub language_code: String,
}

#[derive(Debug)]
pub struct Onboarding {
    pub is_new: bool,
    pub subscription: Subscription,
}

#[derive(Debug, Clone)]
pub struct ReferralService {
    users: UserRepository,
    subscriptions: SubscriptionRepository,
    referrals: ReferralRepository,
}

impl ReferralService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            referrals: ReferralRepository::new(pool),
        }
    }

    /// Registers the user and their subscription on first contact. The
    /// referral is only recorded for new users invited by someone else who
    /// is already registered.
    pub async fn onboard(&self, profile: &Profile, referrer: Option<i64>) -> Result<Onboarding> {
        let is_new = self
            .users
            .add_one(
                profile.id,
                &profile.first_name,
                &profile.last_name,
                &profile.username,
                &profile.language_code,
            )
            .await?;
        let subscription = self.subscriptions.add_one(profile.id).await?;

        if is_new {
            info!("New user {} ({})", profile.id, profile.first_name);
            if let Some(referrer) = referrer.filter(|r| *r != profile.id) {
                if self.users.get_by_id(referrer).await?.is_some()
                    && self.referrals.add_one(referrer, profile.id).await?.is_some()
                {
                    info!("User {} joined via referral of {}", profile.id, referrer);
                }
            }
        }
        Ok(Onboarding {
            is_new,
            subscription,
        })
    }

    pub async fn invited(&self, referrer_id: i64) -> Result<Vec<ReferralSummary>> {
        self.referrals.find_all(referrer_id).await
    }

    /// Price of the next period and the undiscounted amount.
    pub async fn price_for(&self, sub: &Subscription) -> Result<(i32, i32)> {
        let active = self.referrals.count_all_active(sub.user_id).await?;
        Ok((sub.price_with_referrals(active), sub.amount))
    }

    pub async fn discount_for(&self, user_id: i64) -> Result<i64> {
        Ok(discount_percent(self.referrals.count_all_active(user_id).await?))
    }
}
