use crate::liveness::DEFAULT_DEATH_WINDOW;
use crate::sweeper::DEFAULT_SWEEP_INTERVAL;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tokio::fs;

/// Plafonds acceptés : au-delà, les calculs de dates débordent
pub const MAX_DEATH_WINDOW_MINUTES: u64 = 365 * 24 * 60;
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    pub bind_addr: String,
    pub database_url: String,       // "sqlite://app.sqlite" ou "memory"
    pub death_window_minutes: u64,  // silence toléré avant de déclarer un ponger mort
    pub sweep_interval_secs: u64,
    pub trust_forwarded_for: bool,  // derrière un reverse proxy : identité = X-Forwarded-For
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5001".into(),
            database_url: "sqlite://app.sqlite".into(),
            death_window_minutes: DEFAULT_DEATH_WINDOW.whole_minutes() as u64,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            trust_forwarded_for: false,
        }
    }
}

impl RegistryConfig {
    /// Surcharges depuis l'environnement (PONG_*)
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PONG_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("PONG_DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("PONG_DEATH_WINDOW_MINUTES") {
            self.death_window_minutes = parse_value("PONG_DEATH_WINDOW_MINUTES", v)?;
        }
        if let Some(v) = lookup("PONG_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_value("PONG_SWEEP_INTERVAL_SECS", v)?;
        }
        if let Some(v) = lookup("PONG_TRUST_FORWARDED_FOR") {
            self.trust_forwarded_for = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                _ => return Err(ConfigError::InvalidValue { key: "PONG_TRUST_FORWARDED_FOR", value: v }),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DEATH_WINDOW_MINUTES).contains(&self.death_window_minutes) {
            return Err(ConfigError::InvalidValue {
                key: "death_window_minutes",
                value: self.death_window_minutes.to_string(),
            });
        }
        if !(1..=MAX_SWEEP_INTERVAL_SECS).contains(&self.sweep_interval_secs) {
            return Err(ConfigError::InvalidValue {
                key: "sweep_interval_secs",
                value: self.sweep_interval_secs.to_string(),
            });
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr.parse().map_err(|_| ConfigError::InvalidValue {
            key: "bind_addr",
            value: self.bind_addr.clone(),
        })
    }

    /// Bornée au plafond même si `validate` n'a pas été appelée
    pub fn death_window(&self) -> time::Duration {
        i64::try_from(self.death_window_minutes.min(MAX_DEATH_WINDOW_MINUTES))
            .map_or(DEFAULT_DEATH_WINDOW, time::Duration::minutes)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.min(MAX_SWEEP_INTERVAL_SECS))
    }
}

fn parse_value(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

/// Lit le fichier YAML s'il existe (sinon config par défaut), applique
/// l'environnement puis valide.
pub async fn load_config(path: &Path) -> Result<RegistryConfig, ConfigError> {
    let mut cfg = if path.exists() {
        let txt = fs::read_to_string(path).await?;
        if txt.trim().is_empty() {
            RegistryConfig::default()
        } else {
            serde_yaml::from_str(&txt)?
        }
    } else {
        tracing::info!("[config] no {} found, using defaults", path.display());
        RegistryConfig::default()
    };
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
