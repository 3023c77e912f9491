use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use brains_db::models::Subscription;
use brains_gateway::{GatewayError, GatewayLocks, ProtocolFactory};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bot::keyboards;
use crate::messages;
use crate::services::notifier::{NotifyError, Notifier};
use crate::services::store::SubscriptionStore;

/// Counters for one sweep cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub processed: usize,
    pub deactivated: u64,
    pub remote_removed: usize,
    pub remote_failed: usize,
    /// Left active because their gateway row is gone.
    pub skipped: usize,
    pub notified: usize,
    pub unreachable: usize,
}

enum Revocation {
    Removed,
    NothingToRemove,
    Failed,
    /// The gateway row is gone, or was never recorded for a live credential.
    GatewayMissing(Option<i64>),
}

/// Deactivates lapsed subscriptions and revokes their credentials.
pub struct ExpirySweeper {
    store: Arc<dyn SubscriptionStore>,
    factory: ProtocolFactory,
    locks: GatewayLocks,
    notifier: Arc<dyn Notifier>,
    payment_url: String,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        factory: ProtocolFactory,
        locks: GatewayLocks,
        notifier: Arc<dyn Notifier>,
        payment_url: String,
    ) -> Self {
        Self {
            store,
            factory,
            locks,
            notifier,
            payment_url,
        }
    }

    /// Runs a cycle immediately and then every `period` until `shutdown`
    /// fires. A cycle that has started is always finished.
    pub async fn run(&self, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!("Expiry sweeper started, interval {}s", period.as_secs());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle(Utc::now()).await {
                        error!("Expiry sweep failed: {:#}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Expiry sweeper received shutdown signal, stopping...");
                    break;
                }
            }
        }
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let expired = self.store.find_all_expired(now).await?;
        let mut report = SweepReport {
            processed: expired.len(),
            ..Default::default()
        };
        if expired.is_empty() {
            debug!("No expired subscriptions");
            return Ok(report);
        }
        info!("Found {} expired subscriptions", expired.len());

        let mut to_deactivate = Vec::with_capacity(expired.len());
        for sub in &expired {
            match self.revoke(sub).await {
                Revocation::GatewayMissing(Some(server_id)) => {
                    warn!(
                        "Gateway {} of subscription {} no longer exists, leaving it for the operator",
                        server_id, sub.id
                    );
                    report.skipped += 1;
                    continue;
                }
                Revocation::GatewayMissing(None) => {
                    warn!(
                        "Subscription {} holds a credential on an unknown gateway, leaving it for the operator",
                        sub.id
                    );
                    report.skipped += 1;
                    continue;
                }
                Revocation::Removed => report.remote_removed += 1,
                Revocation::Failed => report.remote_failed += 1,
                Revocation::NothingToRemove => {}
            }
            to_deactivate.push(sub);
        }

        let ids: Vec<i64> = to_deactivate.iter().map(|s| s.id).collect();
        report.deactivated = self.store.deactivate_many(&ids).await?;

        for sub in to_deactivate {
            self.notify_expired(sub, &mut report).await;
        }

        info!(
            processed = report.processed,
            deactivated = report.deactivated,
            remote_removed = report.remote_removed,
            remote_failed = report.remote_failed,
            skipped = report.skipped,
            notified = report.notified,
            unreachable = report.unreachable,
            "Expiry sweep finished"
        );
        Ok(report)
    }

    async fn revoke(&self, sub: &Subscription) -> Revocation {
        let Some(server_id) = sub.active_server_id else {
            if sub.live_credential_id().is_some() {
                return Revocation::GatewayMissing(None);
            }
            return Revocation::NothingToRemove;
        };
        let server = match self.store.get_server(server_id).await {
            Ok(Some(server)) => server,
            Ok(None) => return Revocation::GatewayMissing(Some(server_id)),
            Err(e) => {
                warn!("Failed to load gateway {} for subscription {}: {:#}", server_id, sub.id, e);
                return Revocation::Failed;
            }
        };
        let Some(credential_id) = sub.live_credential_id() else {
            debug!("Subscription {} has no live credential", sub.id);
            return Revocation::NothingToRemove;
        };

        let _guard = self.locks.acquire(server.id).await;
        let result: Result<(), GatewayError> = async {
            let manager = self.factory.open(&sub.active_protocol, &server).await?;
            let removed = manager.remove_user(&credential_id).await;
            manager.close().await;
            removed
        }
        .await;

        match result {
            Ok(()) => {
                info!("Revoked {} credential of subscription {} on {}", sub.active_protocol, sub.id, server.host);
                Revocation::Removed
            }
            Err(e) => {
                warn!(
                    "Failed to revoke credential of subscription {} on {}: {}",
                    sub.id, server.host, e
                );
                Revocation::Failed
            }
        }
    }

    async fn notify_expired(&self, sub: &Subscription, report: &mut SweepReport) {
        let user = match self.store.get_user(sub.user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("User {} not found, skipping expiry notice", sub.user_id);
                return;
            }
            Err(e) => {
                warn!("Failed to load user {}: {:#}", sub.user_id, e);
                return;
            }
        };

        let keyboard = keyboards::expired_keyboard(&self.payment_url);
        match self
            .notifier
            .send(user.id, messages::SUBSCRIPTION_EXPIRED, Some(keyboard))
            .await
        {
            Ok(()) => report.notified += 1,
            Err(NotifyError::UserUnreachable(id)) => {
                info!("User {} has blocked the bot", id);
                report.unreachable += 1;
            }
            Err(e) => warn!("{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use brains_db::models::Protocol;
    use brains_gateway::AddressPool;
    use brains_gateway::testing::{FakeConnector, FakeGateway, WG_CONFIG, XRAY_CONFIG, server};
    use chrono::Duration as ChronoDuration;
    use teloxide::types::InlineKeyboardMarkup;
    use uuid::Uuid;

    use super::*;
    use crate::services::store::memory::MemoryStore;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<i64>>,
        blocked: HashSet<i64>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, user_id: i64, _text: &str, _kb: Option<InlineKeyboardMarkup>) -> Result<(), NotifyError> {
            if self.blocked.contains(&user_id) {
                return Err(NotifyError::UserUnreachable(user_id));
            }
            self.sent.lock().unwrap().push(user_id);
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        connector: FakeConnector,
        notifier: Arc<RecordingNotifier>,
        sweeper: ExpirySweeper,
        now: DateTime<Utc>,
    }

    fn harness(blocked: &[i64]) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let connector = FakeConnector::new();
        let notifier = Arc::new(RecordingNotifier {
            blocked: blocked.iter().copied().collect(),
            ..Default::default()
        });
        let sweeper = ExpirySweeper::new(
            store.clone(),
            ProtocolFactory::new(Arc::new(connector.clone()), AddressPool::default()),
            GatewayLocks::new(),
            notifier.clone(),
            "https://pay.example".to_string(),
        );
        Harness {
            store,
            connector,
            notifier,
            sweeper,
            now: Utc::now(),
        }
    }

    const PEERS: &str = "\
[Interface]
Address = 10.8.1.1/24

[Peer]
PublicKey = key-a
PresharedKey = psk
AllowedIPs = 10.8.1.2/32

[Peer]
PublicKey = key-c
PresharedKey = psk
AllowedIPs = 10.8.1.3/32";

    impl Harness {
        fn expired_wireguard(&self, id: i64, user_id: i64, server_id: i64, key: &str) {
            let mut sub = self.store.add_subscription(id, user_id);
            sub.is_active = true;
            sub.end_date = Some(self.now - ChronoDuration::days(1));
            sub.apply_wireguard(server_id, key.to_string(), "[Interface]".into(), "10.8.1.2/32".into());
            self.store.put(sub);
            self.store.add_user(user_id, "user");
        }

        fn gateway(&self, id: i64, host: &str) -> FakeGateway {
            let gateway = FakeGateway::wireguard(host).with_file("amnezia-awg", WG_CONFIG, PEERS);
            self.connector.add(gateway.clone());
            self.store.add_server(server(id, host));
            gateway
        }

        fn sent(&self) -> Vec<i64> {
            self.notifier.sent.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn deleted_gateway_is_skipped_and_the_rest_proceed() {
        let h = harness(&[]);
        let gw = h.gateway(1, "gw-1");
        h.expired_wireguard(10, 100, 1, "key-a");
        h.expired_wireguard(11, 101, 2, "key-b");
        h.expired_wireguard(12, 102, 1, "key-c");

        let report = h.sweeper.run_cycle(h.now).await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.deactivated, 2);
        assert_eq!(report.remote_removed, 2);
        assert!(!h.store.subscription(100).is_active);
        assert!(h.store.subscription(101).is_active, "orphaned subscription stays for the operator");
        assert!(!h.store.subscription(102).is_active);

        let conf = gw.file("amnezia-awg", WG_CONFIG).unwrap();
        assert!(!conf.contains("key-a") && !conf.contains("key-c"));
        assert_eq!(h.sent(), [100, 102]);
        assert_eq!(h.store.commits(), 1);
    }

    #[tokio::test]
    async fn credential_without_gateway_is_skipped() {
        let h = harness(&[]);
        let gw = h.gateway(1, "gw-1");
        h.expired_wireguard(10, 100, 1, "key-a");
        h.expired_wireguard(11, 101, 1, "key-b");
        let mut orphan = h.store.subscription(101);
        orphan.active_server_id = None;
        h.store.put(orphan);

        let report = h.sweeper.run_cycle(h.now).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.deactivated, 1);
        assert!(h.store.subscription(101).is_active);
        assert!(!h.store.subscription(100).is_active);
        assert!(!gw.file("amnezia-awg", WG_CONFIG).unwrap().contains("key-a"));
        assert_eq!(h.sent(), [100]);
    }

    #[tokio::test]
    async fn second_cycle_is_a_noop() {
        let h = harness(&[]);
        let gw = h.gateway(1, "gw-1");
        h.expired_wireguard(10, 100, 1, "key-a");

        h.sweeper.run_cycle(h.now).await.unwrap();
        let commands = gw.commands().len();

        let again = h.sweeper.run_cycle(h.now).await.unwrap();
        assert_eq!(again, SweepReport::default());
        assert_eq!(gw.commands().len(), commands);
        assert_eq!(h.sent(), [100]);
    }

    #[tokio::test]
    async fn blocked_user_does_not_stop_the_batch() {
        let h = harness(&[100]);
        h.gateway(1, "gw-1");
        h.expired_wireguard(10, 100, 1, "key-a");
        h.expired_wireguard(12, 102, 1, "key-c");

        let report = h.sweeper.run_cycle(h.now).await.unwrap();
        assert_eq!(report.unreachable, 1);
        assert_eq!(report.notified, 1);
        assert_eq!(report.deactivated, 2);
        assert_eq!(h.sent(), [102]);
    }

    #[tokio::test]
    async fn unreachable_gateway_still_deactivates() {
        let h = harness(&[]);
        h.gateway(1, "gw-1");
        h.connector.set_unreachable("gw-1", true);
        h.expired_wireguard(10, 100, 1, "key-a");

        let report = h.sweeper.run_cycle(h.now).await.unwrap();
        assert_eq!(report.remote_failed, 1);
        assert_eq!(report.deactivated, 1);
        assert!(!h.store.subscription(100).is_active);
    }

    #[tokio::test]
    async fn subscription_without_credential_skips_remote_work() {
        let h = harness(&[]);
        h.gateway(1, "gw-1");
        let mut sub = h.store.add_subscription(10, 100);
        sub.is_active = true;
        sub.active_server_id = Some(1);
        sub.end_date = Some(h.now - ChronoDuration::hours(1));
        h.store.put(sub);

        let report = h.sweeper.run_cycle(h.now).await.unwrap();
        assert_eq!(report.deactivated, 1);
        assert_eq!(report.remote_removed, 0);
        assert_eq!(h.connector.connect_count(), 0);
        assert!(h.sent().is_empty(), "no user row, no notice");
    }

    #[tokio::test]
    async fn xray_credentials_are_revoked_with_restart() {
        let h = harness(&[]);
        let gw = FakeGateway::xray("gw-x");
        h.connector.add(gw.clone());
        h.store.add_server(server(3, "gw-x"));

        let id = Uuid::new_v4();
        let server_json = gw
            .file("amnezia-xray", XRAY_CONFIG)
            .unwrap()
            .replace(r#""clients": []"#, &format!(r#""clients": [{{"id": "{id}", "flow": "xtls-rprx-vision"}}]"#));
        gw.set_file("amnezia-xray", XRAY_CONFIG, &server_json);

        let mut sub = h.store.add_subscription(20, 200);
        sub.is_active = true;
        sub.end_date = Some(h.now - ChronoDuration::days(3));
        sub.apply_xray(3, id, "vless://".into());
        h.store.put(sub);
        assert_eq!(h.store.subscription(200).protocol().unwrap(), Protocol::Xray);

        let report = h.sweeper.run_cycle(h.now).await.unwrap();
        assert_eq!(report.remote_removed, 1);
        assert!(!gw.file("amnezia-xray", XRAY_CONFIG).unwrap().contains(&id.to_string()));
        assert_eq!(gw.count_commands("docker restart amnezia-xray"), 1);
    }

    #[tokio::test]
    async fn failed_commit_sends_no_notices() {
        let h = harness(&[]);
        h.gateway(1, "gw-1");
        h.expired_wireguard(10, 100, 1, "key-a");
        h.store.fail_commit(true);

        assert!(h.sweeper.run_cycle(h.now).await.is_err());
        assert!(h.store.subscription(100).is_active);
        assert!(h.sent().is_empty());

        h.store.fail_commit(false);
        let report = h.sweeper.run_cycle(h.now).await.unwrap();
        assert_eq!(report.deactivated, 1);
        assert_eq!(report.remote_removed, 1, "removal is repeated safely");
    }

    #[tokio::test]
    async fn loop_runs_first_cycle_immediately_and_stops_on_shutdown() {
        let h = harness(&[]);
        h.gateway(1, "gw-1");
        h.expired_wireguard(10, 100, 1, "key-a");

        let (tx, rx) = broadcast::channel(1);
        let sweeper = Arc::new(h.sweeper);
        let task = {
            let sweeper = sweeper.clone();
            tokio::spawn(async move { sweeper.run(Duration::from_secs(3600), rx).await })
        };

        for _ in 0..100 {
            if !h.store.subscription(100).is_active {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!h.store.subscription(100).is_active);

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
