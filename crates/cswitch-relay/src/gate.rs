//! Per-family proxy enable flag with O(1) lookup. The flag map is
//! swapped wholesale on change; request counting happens off the request
//! path.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tracing::warn;

use cswitch_common::Family;
use cswitch_storage::{RelayStore, StorageError};

pub struct AppGate {
    flags: ArcSwap<HashMap<Family, bool>>,
    store: RelayStore,
}

impl AppGate {
    /// Seed missing rows, then load the flag map.
    pub async fn load(store: RelayStore) -> Result<Self, StorageError> {
        store.seed_proxy_control().await?;
        let flags: HashMap<Family, bool> =
            store.load_proxy_control().await?.into_iter().collect();
        Ok(Self {
            flags: ArcSwap::from_pointee(flags),
            store,
        })
    }

    /// Unknown families default to enabled; the four known rows are
    /// seeded at startup.
    pub fn allow(&self, family: Family) -> bool {
        self.flags.load().get(&family).copied().unwrap_or(true)
    }

    /// Stamp the counters without blocking the caller.
    pub fn note_request(&self, family: Family) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(err) = store
                .bump_proxy_counter(family, OffsetDateTime::now_utc())
                .await
            {
                warn!(event = "proxy_counter_failed", family = %family, error = %err);
            }
        });
    }

    pub async fn set_enabled(&self, family: Family, enabled: bool) -> Result<(), StorageError> {
        self.store.set_proxy_enabled(family, enabled).await?;
        let mut next: HashMap<Family, bool> = self.flags.load().as_ref().clone();
        next.insert(family, enabled);
        self.flags.store(Arc::new(next));
        Ok(())
    }

    pub fn flags(&self) -> HashMap<Family, bool> {
        self.flags.load().as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectOptions, Database};

    async fn gate() -> AppGate {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1);
        let db = Database::connect(options).await.unwrap();
        let store = RelayStore::from_connection(db);
        store.sync().await.unwrap();
        AppGate::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn all_families_start_enabled() {
        let gate = gate().await;
        for family in Family::ALL {
            assert!(gate.allow(family));
        }
    }

    #[tokio::test]
    async fn toggling_updates_lookup_and_store() {
        let gate = gate().await;
        gate.set_enabled(Family::Gemini, false).await.unwrap();
        assert!(!gate.allow(Family::Gemini));
        assert!(gate.allow(Family::Claude));

        gate.set_enabled(Family::Gemini, true).await.unwrap();
        assert!(gate.allow(Family::Gemini));
    }
}
