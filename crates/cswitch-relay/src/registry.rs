//! Provider registry: validated records persisted through storage, read
//! by everyone else as immutable priority-ordered snapshots.

use std::sync::Arc;

use arc_swap::ArcSwap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use cswitch_common::{Family, ProviderDraft, ProviderRecord, RelayError};
use cswitch_storage::{RelayStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Invalid(#[from] RelayError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Immutable for its lifetime; readers hold it across one request.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    providers: Vec<Arc<ProviderRecord>>,
}

impl RegistrySnapshot {
    pub(crate) fn from_records(mut records: Vec<ProviderRecord>) -> Self {
        records.sort_by_key(|record| (record.priority_level, record.id));
        Self {
            providers: records.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn all(&self) -> &[Arc<ProviderRecord>] {
        &self.providers
    }

    pub fn family(&self, family: Family) -> impl Iterator<Item = &Arc<ProviderRecord>> {
        self.providers
            .iter()
            .filter(move |record| record.platform == family)
    }

    pub fn get(&self, id: i64) -> Option<&Arc<ProviderRecord>> {
        self.providers.iter().find(|record| record.id == id)
    }
}

pub struct Registry {
    snapshot: ArcSwap<RegistrySnapshot>,
    store: RelayStore,
    write_lock: Mutex<()>,
}

impl Registry {
    pub async fn load(store: RelayStore) -> Result<Self, RegistryError> {
        let records = store.list_providers().await?;
        Ok(Self {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::from_records(records)),
            store,
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    pub fn get(&self, id: i64) -> Option<Arc<ProviderRecord>> {
        self.snapshot.load().get(id).cloned()
    }

    pub async fn create(&self, draft: ProviderDraft) -> Result<ProviderRecord, RegistryError> {
        draft.validate()?;
        let _guard = self.write_lock.lock().await;
        self.check_conflict(draft.platform, &draft.name, None)?;
        let mut record = draft.into_record(0, OffsetDateTime::now_utc());
        record.id = self.store.insert_provider(&record).await?;
        self.refresh().await?;
        Ok(record)
    }

    pub async fn update(
        &self,
        id: i64,
        draft: ProviderDraft,
    ) -> Result<ProviderRecord, RegistryError> {
        draft.validate()?;
        let _guard = self.write_lock.lock().await;
        let existing = self
            .get(id)
            .ok_or_else(|| RelayError::not_found(format!("provider {id} not found")))?;
        self.check_conflict(draft.platform, &draft.name, Some(id))?;
        let mut record = draft.into_record(id, existing.created_at);
        record.updated_at = OffsetDateTime::now_utc();
        self.store.update_provider(&record).await?;
        self.refresh().await?;
        Ok(record)
    }

    pub async fn delete(&self, id: i64) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        if self.get(id).is_none() {
            return Err(RelayError::not_found(format!("provider {id} not found")).into());
        }
        self.store.delete_provider(id).await?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn reload(&self) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().await;
        self.refresh().await
    }

    async fn refresh(&self) -> Result<(), RegistryError> {
        let records = self.store.list_providers().await?;
        self.snapshot
            .store(Arc::new(RegistrySnapshot::from_records(records)));
        Ok(())
    }

    fn check_conflict(
        &self,
        platform: Family,
        name: &str,
        exclude_id: Option<i64>,
    ) -> Result<(), RelayError> {
        let snapshot = self.snapshot.load();
        let duplicate = snapshot.family(platform).any(|record| {
            record.name == name && exclude_id.map(|id| record.id != id).unwrap_or(true)
        });
        if duplicate {
            Err(RelayError::conflict(format!(
                "provider {name:?} already exists for platform {platform}"
            )))
        } else {
            Ok(())
        }
    }
}
