/**
 * REGISTRY - Opérations exposées aux pongers et aux pingers
 *
 * RÔLE : Traduit les requêtes externes (liste, heartbeat, enregistrement) en
 * décisions du LivenessPolicy puis en écritures dans le HostStore.
 *
 * IDENTITÉ : le host_id (adresse réseau du ponger) est un paramètre explicite ;
 * c'est au transport de l'extraire de la connexion.
 */

use crate::clock::Clock;
use crate::liveness::{LivenessError, LivenessPolicy, Transition};
use crate::models::{HostUpsert, HostView, Location};
use crate::store::{HostCounts, SharedStore, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown host {0}: register before sending heartbeats")]
    UnknownHost(String),
    #[error("host {0} is missing region, cluster or rack")]
    MissingFields(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl From<LivenessError> for RegistryError {
    fn from(err: LivenessError) -> Self {
        match err {
            LivenessError::UnknownHost(host) => RegistryError::UnknownHost(host),
        }
    }
}

/// Métadonnées envoyées par un ponger à l'enregistrement
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    pub region: Option<String>,
    pub cluster: Option<String>,
    pub rack: Option<String>,
}

impl Registration {
    pub fn new(region: &str, cluster: &str, rack: &str) -> Self {
        Self {
            region: Some(region.to_string()),
            cluster: Some(cluster.to_string()),
            rack: Some(rack.to_string()),
        }
    }

    /// Les trois champs doivent être présents et non blancs ; stockés tels qu'envoyés
    fn into_location(self) -> Option<Location> {
        fn field(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }
        Some(Location {
            region: field(self.region)?,
            cluster: field(self.cluster)?,
            rack: field(self.rack)?,
        })
    }
}

pub struct Registry {
    store: SharedStore,
    policy: LivenessPolicy,
    clock: Arc<dyn Clock>,
}

pub type SharedRegistry = Arc<Registry>;

impl Registry {
    pub fn new(store: SharedStore, policy: LivenessPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { store, policy, clock }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Cibles servies aux pingers
    pub async fn list_active_hosts(&self) -> Result<Vec<HostView>, RegistryError> {
        let hosts = self.store.list_active().await?;
        debug!("[registry] serving {} active hosts", hosts.len());
        Ok(hosts.iter().map(HostView::from).collect())
    }

    pub async fn get_host(&self, host_id: &str) -> Result<Option<HostView>, RegistryError> {
        Ok(self.store.get(host_id).await?.as_ref().map(HostView::from))
    }

    /// Keepalive d'un ponger ; `reported_active = false` = arrêt propre.
    /// Ne crée jamais d'enregistrement.
    pub async fn report_heartbeat(
        &self,
        host_id: &str,
        reported_active: bool,
    ) -> Result<HostView, RegistryError> {
        let now = self.clock.now();
        let existing = self.store.get(host_id).await?;
        let record = self
            .policy
            .on_heartbeat(host_id, existing.as_ref(), reported_active, now)
            .inspect_err(|_| warn!("[registry] heartbeat from unregistered host {}", host_id))?;

        let stored = self
            .store
            .upsert(HostUpsert::liveness(&record))
            .await
            .map_err(|e| match e {
                StoreError::IncompleteRecord(host) => RegistryError::UnknownHost(host),
                other => RegistryError::StoreUnavailable(other),
            })?;

        match Transition::between(existing.as_ref(), &stored) {
            Transition::Revived => info!("[registry] host {} is back", host_id),
            Transition::Retired => info!("[registry] host {} signed off", host_id),
            t => debug!("[registry] heartbeat from {} ({:?})", host_id, t),
        }
        Ok(HostView::from(&stored))
    }

    /// Enregistre un nouveau ponger ou rafraîchit ses métadonnées + sa vivacité
    pub async fn register_or_update(
        &self,
        host_id: &str,
        registration: Registration,
    ) -> Result<HostView, RegistryError> {
        let Some(location) = registration.into_location() else {
            warn!("[registry] {} missing geographic location info", host_id);
            return Err(RegistryError::MissingFields(host_id.to_string()));
        };

        let now = self.clock.now();
        let existing = self.store.get(host_id).await?;
        let record = self.policy.on_register(host_id, location, now);
        let stored = self.store.upsert(HostUpsert::full(&record)).await?;

        match Transition::between(existing.as_ref(), &stored) {
            Transition::Created => info!(
                "[registry] registered new host {} ({}/{}/{})",
                host_id, stored.location.region, stored.location.cluster, stored.location.rack
            ),
            _ => info!("[registry] refreshed host {}", host_id),
        }
        Ok(HostView::from(&stored))
    }

    pub async fn counts(&self) -> Result<HostCounts, RegistryError> {
        Ok(self.store.count().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::health::HealthTracker;
    use crate::models::format_http_date;
    use crate::store::{HostStore, MemoryStore, SqliteStore};
    use crate::sweeper::Sweeper;
    use time::macros::datetime;
    use time::{Duration, OffsetDateTime};

    const T0: OffsetDateTime = datetime!(2024-01-01 00:00 UTC);

    fn registry_with(store: SharedStore) -> (Registry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let registry = Registry::new(store, LivenessPolicy::new(Duration::minutes(30)), clock.clone());
        (registry, clock)
    }

    fn registry() -> (Registry, Arc<ManualClock>, SharedStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let (registry, clock) = registry_with(store.clone());
        (registry, clock, store)
    }

    fn hosts(views: &[HostView]) -> Vec<String> {
        let mut hosts: Vec<String> = views.iter().map(|v| v.host.clone()).collect();
        hosts.sort();
        hosts
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_host_never_creates_record() {
        let (registry, _, store) = registry();
        let err = registry.report_heartbeat("10.0.0.1", true).await.unwrap_err();
        assert!(matches!(err, RegistryError::UnknownHost(ref h) if h == "10.0.0.1"));
        assert!(store.get("10.0.0.1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_fields_do_not_mutate_existing_state() {
        let (registry, clock, store) = registry();
        registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();
        let before = store.get("10.0.0.1").await.unwrap();

        clock.advance(Duration::minutes(5));
        for partial in [
            Registration { region: None, ..Registration::new("R2", "C2", "RK2") },
            Registration { cluster: None, ..Registration::new("R2", "C2", "RK2") },
            Registration { rack: Some("   ".into()), ..Registration::new("R2", "C2", "RK2") },
        ] {
            let err = registry.register_or_update("10.0.0.1", partial).await.unwrap_err();
            assert!(matches!(err, RegistryError::MissingFields(_)));
        }
        assert_eq!(store.get("10.0.0.1").await.unwrap(), before);

        let err = registry.register_or_update("10.0.0.9", Registration::default()).await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingFields(_)));
        assert!(store.get("10.0.0.9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_location_is_stored_as_sent() {
        let (registry, _, store) = registry();
        let view = registry
            .register_or_update("10.0.0.1", Registration::new(" R1 ", "C1", "RK1\t"))
            .await
            .unwrap();
        assert_eq!(view.region, " R1 ");
        assert_eq!(view.rack, "RK1\t");
        let stored = store.get("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(stored.location, Location::new(" R1 ", "C1", "RK1\t"));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (registry, _, store) = registry();
        let first = registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();
        let stored_first = store.get("10.0.0.1").await.unwrap();
        let second = registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.get("10.0.0.1").await.unwrap(), stored_first);
        assert_eq!(store.count().await.unwrap(), HostCounts { total: 1, active: 1 });
    }

    #[tokio::test]
    async fn test_register_refreshes_metadata_and_revives() {
        let (registry, clock, _) = registry();
        registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();
        registry.report_heartbeat("10.0.0.1", false).await.unwrap();

        clock.advance(Duration::minutes(2));
        let view = registry.register_or_update("10.0.0.1", Registration::new("R9", "C9", "RK9")).await.unwrap();
        assert!(view.is_active);
        assert_eq!((view.region.as_str(), view.cluster.as_str(), view.rack.as_str()), ("R9", "C9", "RK9"));
        assert_eq!(view.updated_datetime, format_http_date(clock.now()));
    }

    #[tokio::test]
    async fn test_graceful_shutdown_is_immediately_unlisted() {
        let (registry, _, _) = registry();
        registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();
        registry.register_or_update("10.0.0.2", Registration::new("R1", "C1", "RK2")).await.unwrap();

        let view = registry.report_heartbeat("10.0.0.1", false).await.unwrap();
        assert!(!view.is_active);
        assert_eq!(hosts(&registry.list_active_hosts().await.unwrap()), vec!["10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_expiry_and_revival_scenario() {
        let (registry, clock, store) = registry();
        let sweeper = Sweeper::new(store.clone(), *registry.policy(), clock.clone(), HealthTracker::new());

        registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();
        let listed = registry.list_active_hosts().await.unwrap();
        assert_eq!(hosts(&listed), vec!["10.0.0.1"]);
        assert!(listed[0].is_active);

        clock.advance(Duration::minutes(31));
        sweeper.sweep_once().await.unwrap();
        assert!(registry.list_active_hosts().await.unwrap().is_empty());

        let view = registry.report_heartbeat("10.0.0.1", true).await.unwrap();
        assert_eq!(view.updated_datetime, format_http_date(clock.now()));
        let listed = registry.list_active_hosts().await.unwrap();
        assert_eq!(listed, vec![view.clone()]);
        assert_eq!((view.region.as_str(), view.cluster.as_str(), view.rack.as_str()), ("R1", "C1", "RK1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_heartbeats_for_distinct_hosts() {
        let store: SharedStore = Arc::new(MemoryStore::new());
        let policy = LivenessPolicy::new(Duration::minutes(30));
        let setup = Registry::new(store.clone(), policy, Arc::new(ManualClock::new(T0)));
        for i in 0..32 {
            setup
                .register_or_update(&format!("10.0.1.{i}"), Registration::new("R1", "C1", "RK1"))
                .await
                .unwrap();
        }

        // chaque host a sa propre horloge : son timestamp de requête est connu
        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let at = T0 + Duration::seconds(i * 7 + 1);
                let registry = Registry::new(store.clone(), policy, Arc::new(ManualClock::new(at)));
                tokio::spawn(async move {
                    registry.report_heartbeat(&format!("10.0.1.{i}"), true).await.map(|_| at)
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            let at = task.await.unwrap().unwrap();
            let record = store.get(&format!("10.0.1.{i}")).await.unwrap().unwrap();
            assert_eq!(record.last_seen, at);
            assert!(record.is_active);
        }
    }

    #[tokio::test]
    async fn test_scenario_on_sqlite_backend() {
        let sqlite = SqliteStore::connect("sqlite::memory:").await.unwrap();
        sqlite.init().await.unwrap();
        let store: SharedStore = Arc::new(sqlite);
        let (registry, clock) = registry_with(store.clone());
        let sweeper = Sweeper::new(store, *registry.policy(), clock.clone(), HealthTracker::new());

        registry.register_or_update("10.0.0.1", Registration::new("R1", "C1", "RK1")).await.unwrap();
        clock.advance(Duration::minutes(31));
        sweeper.sweep_once().await.unwrap();
        assert!(registry.list_active_hosts().await.unwrap().is_empty());

        let view = registry.report_heartbeat("10.0.0.1", true).await.unwrap();
        assert_eq!(view.region, "R1");
        assert_eq!(registry.list_active_hosts().await.unwrap(), vec![view]);
    }
}
