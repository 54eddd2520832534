/**
 * PONG REGISTRY - Registre de vivacité pongers / pingers
 *
 * RÔLE : Les pongers s'enregistrent (region/cluster/rack) puis envoient des
 * heartbeats ; les pingers lisent la liste des cibles actives.
 *
 * ARCHITECTURE : API HTTP (axum) → Registry → LivenessPolicy → HostStore,
 * plus un Sweeper périodique qui désactive les hosts silencieux.
 */

pub mod cli;
pub mod clock;
pub mod config;
pub mod health;
pub mod http;
pub mod liveness;
pub mod models;
pub mod registry;
pub mod service;
pub mod state;
pub mod store;
pub mod sweeper;
