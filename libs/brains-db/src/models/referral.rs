use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Referral {
    pub id: i64,
    pub referrer_id: i64,
    pub referral_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One invited user as shown to the referrer.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralSummary {
    pub referral_id: i64,
    pub first_name: String,
    pub is_active: bool,
}
