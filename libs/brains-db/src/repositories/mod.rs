pub mod referral_repo;
pub mod server_repo;
pub mod subscription_repo;
pub mod user_repo;

pub use referral_repo::ReferralRepository;
pub use server_repo::ServerRepository;
pub use subscription_repo::SubscriptionRepository;
pub use user_repo::UserRepository;
