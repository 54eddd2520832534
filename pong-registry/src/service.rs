/**
 * REGISTRY SERVICE - Objet de service construit une fois au démarrage
 *
 * RÔLE : Possède la config, le store, le registre et la tâche du sweeper.
 * Aucun état global : `shutdown` arrête le sweeper puis ferme le store.
 */

use crate::clock::{Clock, SystemClock};
use crate::config::RegistryConfig;
use crate::health::HealthTracker;
use crate::http::{build_router, AppState};
use crate::liveness::LivenessPolicy;
use crate::registry::{Registry, SharedRegistry};
use crate::store::{open_store, SharedStore, StoreError};
use crate::sweeper::{Sweeper, SweeperHandle};
use axum::Router;
use std::sync::Arc;
use tracing::info;

pub struct RegistryService {
    config: RegistryConfig,
    store: SharedStore,
    registry: SharedRegistry,
    sweeper: Arc<Sweeper>,
    sweeper_handle: Option<SweeperHandle>,
    health_tracker: HealthTracker,
}

impl RegistryService {
    /// Assemble le service sans lancer de tâche de fond
    pub fn new(config: RegistryConfig, store: SharedStore, clock: Arc<dyn Clock>) -> Self {
        let policy = LivenessPolicy::new(config.death_window());
        let health_tracker = HealthTracker::new();
        let registry = Arc::new(Registry::new(store.clone(), policy, clock.clone()));
        let sweeper = Arc::new(Sweeper::new(store.clone(), policy, clock, health_tracker.clone()));
        Self {
            config,
            store,
            registry,
            sweeper,
            sweeper_handle: None,
            health_tracker,
        }
    }

    /// Ouvre le store configuré, crée le schéma et démarre le sweeper
    pub async fn start(config: RegistryConfig) -> Result<Self, StoreError> {
        let store = open_store(&config.database_url).await?;
        store.init().await?;
        let mut service = Self::new(config, store, Arc::new(SystemClock));
        service.start_sweeper();
        Ok(service)
    }

    pub fn start_sweeper(&mut self) {
        if self.sweeper_handle.is_none() {
            let handle = self.sweeper.clone().spawn(self.config.sweep_interval());
            self.sweeper_handle = Some(handle);
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn sweeper(&self) -> Arc<Sweeper> {
        self.sweeper.clone()
    }

    pub fn router(&self) -> Router {
        build_router(AppState {
            registry: self.registry.clone(),
            health_tracker: self.health_tracker.clone(),
            trust_forwarded_for: self.config.trust_forwarded_for,
        })
    }

    /// Arrête le sweeper (après sa passe en cours) puis libère le store
    pub async fn shutdown(mut self) {
        if let Some(handle) = self.sweeper_handle.take() {
            handle.shutdown().await;
        }
        self.store.close().await;
        info!("[service] registry stopped");
    }
}

/// Commande `init-db` : création du schéma puis fermeture
pub async fn init_storage(config: &RegistryConfig) -> Result<(), StoreError> {
    let store = open_store(&config.database_url).await?;
    store.init().await?;
    store.close().await;
    info!("[service] database initialized");
    Ok(())
}
