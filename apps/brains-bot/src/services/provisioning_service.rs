use std::sync::Arc;

use brains_db::models::{Protocol, Server, Subscription};
use brains_gateway::{GatewayError, GatewayLocks, PendingCredential, ProtocolFactory, ProtocolManager};
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::services::store::SubscriptionStore;

/// Days added by one manual payment.
pub const DAYS_PER_PAYMENT: i64 = 30;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("user {0} has no subscription")]
    NoSubscription(i64),
    #[error("subscription of user {0} is not active")]
    Inactive(i64),
    #[error("no gateway is configured")]
    NoGateway,
    #[error("gateway {0} does not exist")]
    GatewayNotFound(i64),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of an admin `/grant`.
#[derive(Debug)]
pub struct GrantOutcome {
    pub subscription: Subscription,
    /// Set when a fresh credential had to be issued and that failed; the
    /// renewal itself is already saved.
    pub provision_error: Option<ProvisionError>,
}

/// Issues and replaces VPN credentials.
///
/// Every change runs the same saga: lock the gateway, create and register
/// the new credential remotely, persist it, then revoke the previous one on
/// a best-effort basis. A failure before persisting leaves the database
/// untouched.
#[derive(Clone)]
pub struct ProvisioningService {
    store: Arc<dyn SubscriptionStore>,
    factory: ProtocolFactory,
    locks: GatewayLocks,
}

impl ProvisioningService {
    pub fn new(store: Arc<dyn SubscriptionStore>, factory: ProtocolFactory, locks: GatewayLocks) -> Self {
        Self { store, factory, locks }
    }

    async fn active_subscription(&self, user_id: i64) -> Result<Subscription, ProvisionError> {
        let sub = self
            .store
            .get_subscription(user_id)
            .await?
            .ok_or(ProvisionError::NoSubscription(user_id))?;
        if !sub.is_active {
            return Err(ProvisionError::Inactive(user_id));
        }
        Ok(sub)
    }

    async fn resolve_server(&self, server_id: Option<i64>) -> Result<Server, ProvisionError> {
        match server_id {
            Some(id) => self
                .store
                .get_server(id)
                .await?
                .ok_or(ProvisionError::GatewayNotFound(id)),
            None => self
                .store
                .list_servers()
                .await?
                .into_iter()
                .next()
                .ok_or(ProvisionError::NoGateway),
        }
    }

    fn current_protocol(sub: &Subscription) -> Result<Protocol, ProvisionError> {
        sub.protocol()
            .map_err(|_| GatewayError::UnsupportedProtocol(sub.active_protocol.clone()).into())
    }

    /// Issues a credential on the subscription's gateway and protocol, or on
    /// the first gateway when none was chosen yet.
    pub async fn issue(&self, user_id: i64) -> Result<Subscription, ProvisionError> {
        let sub = self.active_subscription(user_id).await?;
        let protocol = Self::current_protocol(&sub)?;
        let server = self.resolve_server(sub.active_server_id).await?;
        self.provision(sub, protocol, server).await
    }

    /// Replaces the live credential with a new one of the same kind.
    pub async fn reissue(&self, user_id: i64) -> Result<Subscription, ProvisionError> {
        self.issue(user_id).await
    }

    pub async fn switch_protocol(&self, user_id: i64, protocol: Protocol) -> Result<Subscription, ProvisionError> {
        let sub = self.active_subscription(user_id).await?;
        let server = self.resolve_server(sub.active_server_id).await?;
        self.provision(sub, protocol, server).await
    }

    pub async fn switch_server(&self, user_id: i64, server_id: i64) -> Result<Subscription, ProvisionError> {
        let sub = self.active_subscription(user_id).await?;
        let protocol = Self::current_protocol(&sub)?;
        let server = self.resolve_server(Some(server_id)).await?;
        self.provision(sub, protocol, server).await
    }

    /// Extends the subscription by one payment period and reactivates it.
    /// A subscription that was inactive lost its remote credential to the
    /// sweep, so a fresh one is issued.
    pub async fn grant(&self, user_id: i64, now: DateTime<Utc>) -> Result<GrantOutcome, ProvisionError> {
        let mut sub = self
            .store
            .get_subscription(user_id)
            .await?
            .ok_or(ProvisionError::NoSubscription(user_id))?;
        let needs_credential = !sub.is_active || sub.live_credential_id().is_none();

        sub.end_date = Some(sub.renewed_end_date(now, DAYS_PER_PAYMENT));
        sub.is_active = true;
        sub.is_notify = true;
        self.store.edit_one(&sub).await?;
        info!("Subscription of user {} extended to {:?}", user_id, sub.end_date);

        if !needs_credential {
            return Ok(GrantOutcome {
                subscription: sub,
                provision_error: None,
            });
        }
        match self.issue(user_id).await {
            Ok(subscription) => Ok(GrantOutcome {
                subscription,
                provision_error: None,
            }),
            Err(e) => {
                warn!("Renewed user {} but could not issue a credential: {}", user_id, e);
                Ok(GrantOutcome {
                    subscription: sub,
                    provision_error: Some(e),
                })
            }
        }
    }

    async fn display_name(&self, user_id: i64) -> String {
        match self.store.get_user(user_id).await {
            Ok(Some(user)) if !user.username.is_empty() => user.username,
            Ok(Some(user)) => user.display_name().to_string(),
            _ => user_id.to_string(),
        }
    }

    async fn provision(
        &self,
        mut sub: Subscription,
        protocol: Protocol,
        server: Server,
    ) -> Result<Subscription, ProvisionError> {
        let previous = sub
            .live_credential_id()
            .zip(sub.active_server_id)
            .map(|(credential, server_id)| (sub.active_protocol.clone(), server_id, credential));
        let username = self.display_name(sub.user_id).await;

        let credential = {
            let _guard = self.locks.acquire(server.id).await;
            let reserved = self.store.find_all_allocated_ips(server.id).await?;
            let manager = self.factory.open(protocol.as_str(), &server).await?;
            let registered = register(&manager, &username, reserved).await;
            manager.close().await;
            registered?
        };

        match &credential {
            PendingCredential::WireGuard(peer) => sub.apply_wireguard(
                server.id,
                peer.public_key.clone(),
                peer.client_config.clone(),
                peer.allowed_ip.clone(),
            ),
            PendingCredential::Xray(client) => {
                sub.apply_xray(server.id, client.client_id, client.access_key.clone())
            }
        }

        if let Err(e) = self.store.edit_one(&sub).await {
            error!(
                "Registered {} credential for user {} on {} but failed to save it: {:#}",
                protocol, sub.user_id, server.host, e
            );
            self.revoke(protocol.as_str(), server.id, &credential.credential_id())
                .await;
            return Err(e.into());
        }
        info!("Issued {} credential for user {} on {}", protocol, sub.user_id, server.host);

        if let Some((old_protocol, old_server, old_credential)) = previous {
            let replaced = old_server != server.id || old_credential != credential.credential_id();
            if replaced {
                self.revoke(&old_protocol, old_server, &old_credential).await;
            }
        }
        Ok(sub)
    }

    /// Best-effort removal; failures are logged and left for the operator.
    async fn revoke(&self, protocol_tag: &str, server_id: i64, credential_id: &str) {
        let server = match self.store.get_server(server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => {
                warn!("Gateway {} is gone, cannot revoke {}", server_id, credential_id);
                return;
            }
            Err(e) => {
                warn!("Failed to load gateway {}: {:#}", server_id, e);
                return;
            }
        };

        let _guard = self.locks.acquire(server.id).await;
        let result: Result<(), GatewayError> = async {
            let manager = self.factory.open(protocol_tag, &server).await?;
            let removed = manager.remove_user(credential_id).await;
            manager.close().await;
            removed
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to revoke {} credential on {}: {}", protocol_tag, server.host, e);
        }
    }
}

/// Creates and registers a credential. An address claimed by someone else
/// in the meantime is excluded and the allocation retried once.
async fn register(
    manager: &ProtocolManager,
    username: &str,
    mut reserved: Vec<String>,
) -> Result<PendingCredential, GatewayError> {
    let credential = manager.create_config(username, &reserved).await?;
    match add_or_take_back(manager, &credential).await {
        Err(GatewayError::AddressInUse { address }) => {
            warn!("Address {} was taken concurrently, allocating another", address);
            reserved.push(address);
            let retry = manager.create_config(username, &reserved).await?;
            add_or_take_back(manager, &retry).await?;
            Ok(retry)
        }
        Err(e) => Err(e),
        Ok(()) => Ok(credential),
    }
}

/// A failed add may already have written the credential to the gateway.
/// Nothing references it yet, so it is removed again before the error
/// is returned.
async fn add_or_take_back(manager: &ProtocolManager, credential: &PendingCredential) -> Result<(), GatewayError> {
    let err = match manager.add_user(credential).await {
        Ok(()) => return Ok(()),
        // raised before anything is written
        Err(e @ GatewayError::AddressInUse { .. }) => return Err(e),
        Err(e) => e,
    };
    let id = credential.credential_id();
    if let Err(cleanup) = manager.remove_user(&id).await {
        warn!("Could not take back half-added credential {}: {}", id, cleanup);
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use brains_gateway::AddressPool;
    use brains_gateway::testing::{FakeConnector, FakeGateway, WG_CONFIG, XRAY_CONFIG, XRAY_TABLE, server};
    use chrono::Duration;

    use super::*;
    use crate::services::store::memory::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        connector: FakeConnector,
        service: ProvisioningService,
    }

    fn harness() -> Harness {
        harness_with_pool(AddressPool::default())
    }

    fn harness_with_pool(pool: AddressPool) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let connector = FakeConnector::new();
        let service = ProvisioningService::new(
            store.clone(),
            ProtocolFactory::new(Arc::new(connector.clone()), pool),
            GatewayLocks::new(),
        );
        Harness {
            store,
            connector,
            service,
        }
    }

    impl Harness {
        fn gateway(&self, id: i64, host: &str) -> FakeGateway {
            let gw = FakeGateway::wireguard(host);
            let xray = FakeGateway::xray(host);
            for path in [XRAY_CONFIG, XRAY_TABLE] {
                gw.set_file("amnezia-xray", path, &xray.file("amnezia-xray", path).unwrap());
            }
            self.connector.add(gw.clone());
            self.store.add_server(server(id, host));
            gw
        }

        fn active_user(&self, user_id: i64) {
            let mut sub = self.store.add_subscription(user_id, user_id);
            sub.is_active = true;
            sub.end_date = Some(Utc::now() + Duration::days(10));
            self.store.put(sub);
            self.store.add_user(user_id, "alice");
        }
    }

    #[tokio::test]
    async fn issue_registers_and_persists() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);

        let sub = h.service.issue(7).await.unwrap();
        assert_eq!(sub.active_server_id, Some(1));
        assert_eq!(sub.wg_allowed_ip.as_deref(), Some("10.8.1.2/32"));
        let key = sub.wg_public_key.clone().unwrap();
        assert!(gw.file("amnezia-awg", WG_CONFIG).unwrap().contains(&key));
        assert_eq!(h.store.subscription(7).wg_public_key, Some(key));
        assert!(gw.is_closed());
    }

    #[tokio::test]
    async fn inactive_subscription_is_refused() {
        let h = harness();
        h.gateway(1, "gw-1");
        h.store.add_subscription(7, 7);

        assert!(matches!(h.service.issue(7).await, Err(ProvisionError::Inactive(7))));
        assert_eq!(h.connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn database_reservations_are_not_reused() {
        let h = harness();
        h.gateway(1, "gw-1");
        h.active_user(7);
        let mut other = h.store.add_subscription(8, 8);
        other.is_active = true;
        other.apply_wireguard(1, "pending".into(), String::new(), "10.8.1.2/32".into());
        h.store.put(other);

        let sub = h.service.issue(7).await.unwrap();
        assert_eq!(sub.wg_allowed_ip.as_deref(), Some("10.8.1.3/32"));
    }

    #[tokio::test]
    async fn failed_reload_takes_the_peer_back_out() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);
        gw.fail_when("wg syncconf");

        let err = h.service.issue(7).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Gateway(GatewayError::CommandFailed { .. })));
        assert!(!gw.file("amnezia-awg", WG_CONFIG).unwrap().contains("[Peer]"));
        assert_eq!(h.store.subscription(7).wg_public_key, None);
        assert!(gw.is_closed());
    }

    #[tokio::test]
    async fn swept_rows_release_their_addresses() {
        // a /29 has five client addresses: .2 through .6
        let h = harness_with_pool("10.8.1.0/29".parse().unwrap());
        h.gateway(1, "gw-1");
        for (id, host) in (100..105).zip(2..) {
            let mut swept = h.store.add_subscription(id, id);
            swept.apply_wireguard(1, format!("key-{id}"), String::new(), format!("10.8.1.{host}/32"));
            h.store.put(swept);
        }
        h.active_user(7);

        let sub = h.service.issue(7).await.unwrap();
        assert_eq!(sub.wg_allowed_ip.as_deref(), Some("10.8.1.2/32"));
    }

    #[tokio::test]
    async fn protocol_swap_revokes_previous_credential() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);
        let first = h.service.issue(7).await.unwrap();
        let old_key = first.wg_public_key.unwrap();

        let sub = h.service.switch_protocol(7, Protocol::Xray).await.unwrap();
        assert_eq!(sub.active_protocol, "xray");
        let id = sub.xray_uuid.unwrap().to_string();
        assert!(gw.file("amnezia-xray", XRAY_CONFIG).unwrap().contains(&id));
        assert!(!gw.file("amnezia-awg", WG_CONFIG).unwrap().contains(&old_key));
        assert!(sub.live_key().unwrap().starts_with("vless://"));
    }

    #[tokio::test]
    async fn server_swap_moves_the_peer() {
        let h = harness();
        let one = h.gateway(1, "gw-1");
        let two = h.gateway(2, "gw-2");
        h.active_user(7);
        let first = h.service.issue(7).await.unwrap();
        let old_key = first.wg_public_key.unwrap();

        let sub = h.service.switch_server(7, 2).await.unwrap();
        assert_eq!(sub.active_server_id, Some(2));
        assert!(!one.file("amnezia-awg", WG_CONFIG).unwrap().contains(&old_key));
        assert!(two.file("amnezia-awg", WG_CONFIG).unwrap().contains(&sub.wg_public_key.unwrap()));

        assert!(matches!(
            h.service.switch_server(7, 99).await,
            Err(ProvisionError::GatewayNotFound(99))
        ));
    }

    #[tokio::test]
    async fn remote_failure_leaves_database_untouched() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);
        gw.fail_when("wg genkey");

        assert!(matches!(
            h.service.issue(7).await,
            Err(ProvisionError::Gateway(GatewayError::CommandFailed { .. }))
        ));
        assert_eq!(h.store.subscription(7).wg_public_key, None);
        assert!(gw.is_closed(), "session is released on failure");
    }

    #[tokio::test]
    async fn failed_save_rolls_back_remote_peer() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);
        h.store.fail_edit(true);

        assert!(matches!(h.service.issue(7).await, Err(ProvisionError::Store(_))));
        assert!(!gw.file("amnezia-awg", WG_CONFIG).unwrap().contains("[Peer]"));
    }

    #[tokio::test]
    async fn grant_reissues_after_sweep() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);
        let issued = h.service.issue(7).await.unwrap();

        // what the sweep leaves behind: inactive, peer gone, stale fields kept
        let mut swept = issued.clone();
        swept.is_active = false;
        swept.end_date = Some(Utc::now() - Duration::days(40));
        h.store.put(swept);
        gw.set_file("amnezia-awg", WG_CONFIG, "[Interface]\nAddress = 10.8.1.1/24");

        let now = Utc::now();
        let outcome = h.service.grant(7, now).await.unwrap();
        assert!(outcome.provision_error.is_none());
        let sub = outcome.subscription;
        assert!(sub.is_active && sub.is_notify);
        assert_eq!(sub.end_date, Some(now + Duration::days(DAYS_PER_PAYMENT)));
        assert!(gw.file("amnezia-awg", WG_CONFIG).unwrap().contains(&sub.wg_public_key.unwrap()));
    }

    #[tokio::test]
    async fn grant_on_active_subscription_only_extends() {
        let h = harness();
        let gw = h.gateway(1, "gw-1");
        h.active_user(7);
        h.service.issue(7).await.unwrap();
        let before = h.store.subscription(7);
        let commands = gw.commands().len();

        let now = Utc::now();
        let outcome = h.service.grant(7, now).await.unwrap();
        assert_eq!(
            outcome.subscription.end_date,
            Some(before.end_date.unwrap() + Duration::days(DAYS_PER_PAYMENT))
        );
        assert_eq!(outcome.subscription.wg_public_key, before.wg_public_key);
        assert_eq!(gw.commands().len(), commands);
    }

    #[tokio::test]
    async fn grant_survives_unreachable_gateway() {
        let h = harness();
        h.gateway(1, "gw-1");
        h.store.add_subscription(7, 7);
        h.connector.set_unreachable("gw-1", true);

        let outcome = h.service.grant(7, Utc::now()).await.unwrap();
        assert!(matches!(
            outcome.provision_error,
            Some(ProvisionError::Gateway(GatewayError::GatewayUnreachable { .. }))
        ));
        assert!(h.store.subscription(7).is_active);
    }
}
