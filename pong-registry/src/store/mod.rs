/**
 * HOST RECORD STORE - Persistance des enregistrements de pongers
 *
 * RÔLE :
 * Un enregistrement par host_id. Le store est la seule ressource mutable
 * partagée entre les handlers HTTP et le sweeper.
 *
 * FONCTIONNEMENT :
 * - HostStore trait = contrat commun (upsert, lecture, scans, mises à jour ciblées)
 * - SqliteStore = table `pongs` via sqlx (backend par défaut, durable)
 * - MemoryStore = HashMap sous RwLock (tests, déploiements éphémères)
 *
 * CONCURRENCE :
 * Chaque mutation est atomique par enregistrement. La rétrogradation du
 * sweeper passe par `demote_if_unchanged` (compare-and-set sur last_seen)
 * pour ne jamais écraser un heartbeat arrivé entre le scan et l'écriture.
 */

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::models::{HostRecord, HostUpsert};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;

/// URL spéciale qui sélectionne le store en mémoire
pub const MEMORY_URL: &str = "memory";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("host {0} has no location on record and none was supplied")]
    IncompleteRecord(String),
    #[error("invalid timestamp stored for host {host}: {nanos}")]
    InvalidTimestamp { host: String, nanos: i64 },
}

/// Résultat d'une tentative de rétrogradation par le sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoteOutcome {
    /// is_active est passé à false
    Demoted,
    /// un heartbeat plus récent a modifié l'enregistrement depuis le scan
    Refreshed,
    /// l'enregistrement a disparu entre le scan et la mise à jour
    Vanished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HostCounts {
    pub total: u64,
    pub active: u64,
}

#[async_trait]
pub trait HostStore: Send + Sync {
    /// Création du schéma (idempotente)
    async fn init(&self) -> Result<(), StoreError>;

    /// Insère ou met à jour. is_active / last_seen sont toujours écrasés,
    /// la localisation seulement si elle est fournie.
    async fn upsert(&self, upsert: HostUpsert) -> Result<HostRecord, StoreError>;

    async fn get(&self, host_id: &str) -> Result<Option<HostRecord>, StoreError>;

    /// Hosts actifs, ordre non spécifié
    async fn list_active(&self) -> Result<Vec<HostRecord>, StoreError>;

    /// Hosts actifs avec `last_seen < threshold`
    async fn list_stale(&self, threshold: OffsetDateTime) -> Result<Vec<HostRecord>, StoreError>;

    /// Mise à jour ciblée de is_active. Retourne false si le host n'existe plus.
    async fn set_active(&self, host_id: &str, active: bool) -> Result<bool, StoreError>;

    /// Passe le host à inactif seulement s'il est encore actif avec le
    /// last_seen observé pendant le scan.
    async fn demote_if_unchanged(
        &self,
        host_id: &str,
        observed_last_seen: OffsetDateTime,
    ) -> Result<DemoteOutcome, StoreError>;

    async fn count(&self) -> Result<HostCounts, StoreError>;

    /// Libère les ressources (pool de connexions...)
    async fn close(&self) {}
}

pub type SharedStore = Arc<dyn HostStore>;

/// Ouvre le backend correspondant à l'URL configurée
pub async fn open_store(database_url: &str) -> Result<SharedStore, StoreError> {
    if database_url == MEMORY_URL {
        tracing::info!("[store] using in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(database_url).await?;
    tracing::info!("[store] connected to {}", database_url);
    Ok(Arc::new(store))
}
