pub mod referral;
pub mod server;
pub mod subscription;
pub mod user;

pub use referral::{Referral, ReferralSummary};
pub use server::Server;
pub use subscription::{DEFAULT_AMOUNT, Protocol, REFERRAL_DISCOUNT_PERCENT, Subscription, UnknownProtocol};
pub use user::User;
