use anyhow::Result;
use async_trait::async_trait;
use brains_db::models::{Server, Subscription, User};
use brains_db::repositories::{ServerRepository, SubscriptionRepository, UserRepository};
use brains_db::sqlx::PgPool;
use chrono::{DateTime, Utc};

/// What the provisioning saga and the expiry sweep need from persistence.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>>;

    async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>>;

    async fn get_server(&self, server_id: i64) -> Result<Option<Server>>;

    async fn list_servers(&self) -> Result<Vec<Server>>;

    /// Active, notify-enabled subscriptions whose end date is before `now`.
    async fn find_all_expired(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;

    /// WireGuard addresses held by active subscriptions on this gateway.
    async fn find_all_allocated_ips(&self, server_id: i64) -> Result<Vec<String>>;

    async fn edit_one(&self, subscription: &Subscription) -> Result<()>;

    /// Flags every listed subscription inactive in one transaction.
    async fn deactivate_many(&self, ids: &[i64]) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    users: UserRepository,
    subscriptions: SubscriptionRepository,
    servers: ServerRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            subscriptions: SubscriptionRepository::new(pool.clone()),
            servers: ServerRepository::new(pool),
        }
    }
}

#[async_trait]
impl SubscriptionStore for PgStore {
    async fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.users.get_by_id(user_id).await
    }

    async fn get_subscription(&self, user_id: i64) -> Result<Option<Subscription>> {
        self.subscriptions.get_by_user(user_id).await
    }

    async fn get_server(&self, server_id: i64) -> Result<Option<Server>> {
        self.servers.get_by_id(server_id).await
    }

    async fn list_servers(&self) -> Result<Vec<Server>> {
        self.servers.get_all().await
    }

    async fn find_all_expired(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        self.subscriptions.find_all_expired(now).await
    }

    async fn find_all_allocated_ips(&self, server_id: i64) -> Result<Vec<String>> {
        self.subscriptions.find_all_allocated_ips(server_id).await
    }

    async fn edit_one(&self, subscription: &Subscription) -> Result<()> {
        self.subscriptions.edit_one(subscription).await
    }

    async fn deactivate_many(&self, ids: &[i64]) -> Result<u64> {
        self.subscriptions.deactivate_many(ids).await
    }
}
