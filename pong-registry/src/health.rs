use crate::state::{new_state, Shared};
use crate::store::HostCounts;
use crate::sweeper::SweepReport;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastSweep {
    pub finished_at: String,
    pub report: SweepReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: u64,
    pub hosts_active: u64,
    pub memory_usage_mb: f32,
    pub sweeps_completed: u64,
    pub sweeps_skipped: u64,
    pub sweeps_failed: u64,
    pub hosts_demoted: u64,
    pub last_sweep: Option<LastSweep>,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    sweeps_completed: Arc<AtomicU64>,
    sweeps_skipped: Arc<AtomicU64>,
    sweeps_failed: Arc<AtomicU64>,
    hosts_demoted: Arc<AtomicU64>,
    last_sweep: Shared<Option<LastSweep>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            sweeps_completed: Arc::new(AtomicU64::new(0)),
            sweeps_skipped: Arc::new(AtomicU64::new(0)),
            sweeps_failed: Arc::new(AtomicU64::new(0)),
            hosts_demoted: Arc::new(AtomicU64::new(0)),
            last_sweep: new_state(None),
        }
    }

    pub fn record_sweep(&self, report: &SweepReport, finished_at: String) {
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
        self.hosts_demoted.fetch_add(report.demoted as u64, Ordering::Relaxed);
        *self.last_sweep.write() = Some(LastSweep {
            finished_at,
            report: report.clone(),
        });
    }

    pub fn record_skipped(&self) {
        self.sweeps_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.sweeps_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_health(&self, counts: HostCounts) -> RegistryHealth {
        RegistryHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            hosts_tracked: counts.total,
            hosts_active: counts.active,
            memory_usage_mb: get_memory_usage_mb(),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            sweeps_skipped: self.sweeps_skipped.load(Ordering::Relaxed),
            sweeps_failed: self.sweeps_failed.load(Ordering::Relaxed),
            hosts_demoted: self.hosts_demoted.load(Ordering::Relaxed),
            last_sweep: self.last_sweep.read().clone(),
        }
    }
}

fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(Ok(kb)) = rest.split_whitespace().next().map(str::parse::<u64>) {
                        return (kb as f32) / 1024.0; // KB -> MB
                    }
                }
            }
        }
    }

    // inconnu hors Linux
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_counters_accumulate() {
        let tracker = HealthTracker::new();
        let report = SweepReport { scanned: 3, demoted: 2, refreshed: 1, ..Default::default() };

        tracker.record_sweep(&report, "Sun, 20 Aug 2017 14:53:01 GMT".into());
        tracker.record_sweep(&report, "Sun, 20 Aug 2017 14:54:01 GMT".into());
        tracker.record_skipped();
        tracker.record_failed();

        let health = tracker.get_health(HostCounts { total: 5, active: 1 });
        assert_eq!(health.sweeps_completed, 2);
        assert_eq!(health.sweeps_skipped, 1);
        assert_eq!(health.sweeps_failed, 1);
        assert_eq!(health.hosts_demoted, 4);
        assert_eq!(health.hosts_tracked, 5);
        assert_eq!(health.hosts_active, 1);
        assert_eq!(
            health.last_sweep.map(|s| s.finished_at),
            Some("Sun, 20 Aug 2017 14:54:01 GMT".to_string())
        );
    }
}
