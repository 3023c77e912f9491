use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per gateway id. Whoever reads, edits and writes back a
/// gateway's config files holds its guard for the whole sequence, so two
/// provisioning runs never allocate the same address.
#[derive(Debug, Clone, Default)]
pub struct GatewayLocks {
    inner: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl GatewayLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, server_id: i64) -> OwnedMutexGuard<()> {
        let lock = self.inner.lock().await.entry(server_id).or_default().clone();
        lock.lock_owned().await
    }
}
