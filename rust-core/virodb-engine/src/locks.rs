// SPDX-License-Identifier: PMPL-1.0-or-later
//! One writer per entity.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily created per-entity write locks. Writers of different entities
/// never wait on each other.
#[derive(Debug, Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `entity_id`. Released on drop.
    pub async fn lock(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on are dropped here.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(entity_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
