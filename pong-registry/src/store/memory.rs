//! Store en mémoire : HashMap protégée par un RwLock, rien n'est persisté.

use super::{DemoteOutcome, HostCounts, HostStore, StoreError};
use crate::models::{HostRecord, HostUpsert};
use crate::state::{new_state, Shared};
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

pub type HostsMap = HashMap<String, HostRecord>;

#[derive(Clone)]
pub struct MemoryStore {
    hosts: Shared<HostsMap>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            hosts: new_state(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert(&self, upsert: HostUpsert) -> Result<HostRecord, StoreError> {
        let mut hosts = self.hosts.write();
        if let Some(existing) = hosts.get_mut(&upsert.host_id) {
            if let Some(location) = upsert.location {
                existing.location = location;
            }
            existing.is_active = upsert.is_active;
            existing.last_seen = upsert.last_seen;
            return Ok(existing.clone());
        }

        let Some(location) = upsert.location else {
            return Err(StoreError::IncompleteRecord(upsert.host_id));
        };
        let record = HostRecord {
            host_id: upsert.host_id.clone(),
            location,
            is_active: upsert.is_active,
            last_seen: upsert.last_seen,
        };
        hosts.insert(upsert.host_id, record.clone());
        Ok(record)
    }

    async fn get(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError> {
        Ok(self.hosts.read().get(host_id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self.hosts.read().values().filter(|r| r.is_active).cloned().collect())
    }

    async fn list_stale(&self, threshold: OffsetDateTime) -> Result<Vec<HostRecord>, StoreError> {
        Ok(self
            .hosts
            .read()
            .values()
            .filter(|r| r.is_active && r.last_seen < threshold)
            .cloned()
            .collect())
    }

    async fn set_active(&self, host_id: &str, active: bool) -> Result<bool, StoreError> {
        match self.hosts.write().get_mut(host_id) {
            Some(record) => {
                record.is_active = active;
                Ok(true)
            }
            None => {
                tracing::warn!("[store] set_active: host {} vanished", host_id);
                Ok(false)
            }
        }
    }

    async fn demote_if_unchanged(
        &self,
        host_id: &str,
        observed_last_seen: OffsetDateTime,
    ) -> Result<DemoteOutcome, StoreError> {
        let mut hosts = self.hosts.write();
        let Some(record) = hosts.get_mut(host_id) else {
            return Ok(DemoteOutcome::Vanished);
        };
        if record.is_active && record.last_seen == observed_last_seen {
            record.is_active = false;
            Ok(DemoteOutcome::Demoted)
        } else {
            Ok(DemoteOutcome::Refreshed)
        }
    }

    async fn count(&self) -> Result<HostCounts, StoreError> {
        let hosts = self.hosts.read();
        Ok(HostCounts {
            total: hosts.len() as u64,
            active: hosts.values().filter(|r| r.is_active).count() as u64,
        })
    }
}
