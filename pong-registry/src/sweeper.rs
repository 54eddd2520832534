/**
 * EXPIRY SWEEPER - Désactivation périodique des pongers silencieux
 *
 * RÔLE :
 * Toutes les `sweep_interval`, scanne les hosts actifs dont le dernier
 * contact dépasse la death window et les passe à inactif. Un ponger
 * désactivé n'est plus servi aux pingers.
 *
 * FONCTIONNEMENT :
 * - Phases Idle → Scanning → Demoting → Idle, exposées via `phase()`
 * - Une seule passe à la fois : un tick qui tombe pendant une passe est ignoré
 * - Rétrogradation en compare-and-set sur le last_seen observé au scan
 * - Échec sur un host : loggé, on continue ; échec du scan : la passe
 *   s'arrête, le tick suivant repart normalement
 */

use crate::clock::Clock;
use crate::health::HealthTracker;
use crate::liveness::LivenessPolicy;
use crate::models::format_http_date;
use crate::store::{DemoteOutcome, SharedStore, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Intervalle par défaut entre deux passes
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SweepPhase {
    Idle = 0,
    Scanning = 1,
    Demoting = 2,
}

impl SweepPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SweepPhase::Scanning,
            2 => SweepPhase::Demoting,
            _ => SweepPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub demoted: usize,
    pub refreshed: usize,
    pub vanished: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// une passe était déjà en cours
    Skipped,
}

/// Remet la phase à Idle quelle que soit la sortie de la passe
struct PhaseGuard<'a>(&'a AtomicU8);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(SweepPhase::Idle as u8, Ordering::Release);
    }
}

pub struct Sweeper {
    store: SharedStore,
    policy: LivenessPolicy,
    clock: Arc<dyn Clock>,
    health: HealthTracker,
    phase: AtomicU8,
}

impl Sweeper {
    pub fn new(
        store: SharedStore,
        policy: LivenessPolicy,
        clock: Arc<dyn Clock>,
        health: HealthTracker,
    ) -> Self {
        Self {
            store,
            policy,
            clock,
            health,
            phase: AtomicU8::new(SweepPhase::Idle as u8),
        }
    }

    pub fn phase(&self) -> SweepPhase {
        SweepPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Exécute une passe complète, ou rien si une passe est déjà en cours
    pub async fn sweep_once(&self) -> Result<SweepOutcome, StoreError> {
        if self
            .phase
            .compare_exchange(
                SweepPhase::Idle as u8,
                SweepPhase::Scanning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            debug!("[sweeper] previous sweep still running, skipping tick");
            self.health.record_skipped();
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = PhaseGuard(&self.phase);

        let now = self.clock.now();
        let candidates = match self.store.list_stale(self.policy.stale_threshold(now)).await {
            Ok(candidates) => candidates,
            Err(e) => {
                self.health.record_failed();
                return Err(e);
            }
        };

        let mut report = SweepReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for record in candidates.iter().filter(|r| self.policy.is_stale(r, now)) {
            self.phase.store(SweepPhase::Demoting as u8, Ordering::Release);
            match self.store.demote_if_unchanged(&record.host_id, record.last_seen).await {
                Ok(DemoteOutcome::Demoted) => {
                    report.demoted += 1;
                    info!(
                        host = %record.host_id,
                        last_seen = %format_http_date(record.last_seen),
                        "[sweeper] disabling host"
                    );
                }
                Ok(DemoteOutcome::Refreshed) => {
                    report.refreshed += 1;
                    debug!(host = %record.host_id, "[sweeper] host refreshed since scan, kept");
                }
                Ok(DemoteOutcome::Vanished) => {
                    report.vanished += 1;
                    warn!(host = %record.host_id, "[sweeper] host vanished before demotion");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(host = %record.host_id, "[sweeper] failed to disable host: {}", e);
                }
            }
        }

        self.health.record_sweep(&report, format_http_date(self.clock.now()));
        Ok(SweepOutcome::Completed(report))
    }

    /// Lance la boucle périodique. Le premier passage a lieu après `period`.
    pub fn spawn(self: Arc<Self>, period: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        info!(
            "[sweeper] starting (interval: {:?}, death window: {})",
            period,
            self.policy.death_window()
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep_once().await {
                            Ok(SweepOutcome::Completed(report)) if report.demoted > 0 => {
                                info!("[sweeper] disabled {} of {} stale hosts", report.demoted, report.scanned);
                            }
                            Ok(_) => {}
                            Err(e) => error!("[sweeper] scan failed, retrying next tick: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("[sweeper] stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Poignée sur la tâche de fond ; `shutdown` attend la fin de la passe en cours
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("[sweeper] task ended abnormally: {}", e);
        }
    }
}
