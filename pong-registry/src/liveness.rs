/**
 * LIVENESS ENGINE - Décisions de vivacité, sans I/O
 *
 * RÔLE : Calcule le nouvel état d'un host à partir d'un heartbeat ou d'un
 * enregistrement, et juge si un host actif est devenu silencieux.
 *
 * RÈGLE : un host est périmé ssi il est actif et que
 * `now - last_seen > death_window`. Pas de jitter, pas de compteur de
 * heartbeats manqués : seul le temps écoulé depuis le dernier contact compte.
 */

use crate::models::{HostRecord, Location};
use time::{Duration, OffsetDateTime};

/// Silence toléré avant de considérer un ponger mort
pub const DEFAULT_DEATH_WINDOW: Duration = Duration::minutes(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LivenessError {
    #[error("unknown host {0}: a heartbeat cannot create a record without location")]
    UnknownHost(String),
}

/// Changement d'état produit par une décision, utilisé pour les logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Refreshed,
    Revived,
    Retired,
    StillInactive,
}

impl Transition {
    pub fn between(before: Option<&HostRecord>, after: &HostRecord) -> Self {
        match (before.map(|r| r.is_active), after.is_active) {
            (None, _) => Transition::Created,
            (Some(true), true) => Transition::Refreshed,
            (Some(false), true) => Transition::Revived,
            (Some(true), false) => Transition::Retired,
            (Some(false), false) => Transition::StillInactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    death_window: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_DEATH_WINDOW)
    }
}

impl LivenessPolicy {
    pub fn new(death_window: Duration) -> Self {
        Self { death_window }
    }

    pub fn death_window(&self) -> Duration {
        self.death_window
    }

    /// Heartbeat d'un ponger : is_active = ce qu'il rapporte, last_seen = now,
    /// localisation reprise de l'existant.
    pub fn on_heartbeat(
        &self,
        host_id: &str,
        existing: Option<&HostRecord>,
        reported_active: bool,
        now: OffsetDateTime,
    ) -> Result<HostRecord, LivenessError> {
        let existing = existing.ok_or_else(|| LivenessError::UnknownHost(host_id.to_string()))?;
        Ok(HostRecord {
            host_id: existing.host_id.clone(),
            location: existing.location.clone(),
            is_active: reported_active,
            last_seen: now,
        })
    }

    /// Enregistrement (ou rafraîchissement) : toujours actif, localisation remplacée
    pub fn on_register(&self, host_id: &str, location: Location, now: OffsetDateTime) -> HostRecord {
        HostRecord {
            host_id: host_id.to_string(),
            location,
            is_active: true,
            last_seen: now,
        }
    }

    pub fn is_stale(&self, record: &HostRecord, now: OffsetDateTime) -> bool {
        record.is_active && now - record.last_seen > self.death_window
    }

    /// Seuil de scan : `last_seen < seuil` <=> `is_stale` pour un host actif
    pub fn stale_threshold(&self, now: OffsetDateTime) -> OffsetDateTime {
        now.checked_sub(self.death_window)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(active: bool, last_seen: OffsetDateTime) -> HostRecord {
        HostRecord {
            host_id: "10.0.0.1".into(),
            location: Location::new("R1", "C1", "RK1"),
            is_active: active,
            last_seen,
        }
    }

    #[test]
    fn test_heartbeat_from_unknown_host_is_rejected() {
        let policy = LivenessPolicy::default();
        let err = policy
            .on_heartbeat("10.0.0.9", None, true, datetime!(2024-01-01 00:00 UTC))
            .unwrap_err();
        assert_eq!(err, LivenessError::UnknownHost("10.0.0.9".into()));
    }

    #[test]
    fn test_heartbeat_keeps_location_and_refreshes_last_seen() {
        let policy = LivenessPolicy::default();
        let before = record(false, datetime!(2024-01-01 00:00 UTC));
        let now = datetime!(2024-01-01 02:00 UTC);

        let after = policy.on_heartbeat("10.0.0.1", Some(&before), true, now).unwrap();
        assert!(after.is_active);
        assert_eq!(after.last_seen, now);
        assert_eq!(after.location, before.location);
        assert_eq!(Transition::between(Some(&before), &after), Transition::Revived);
    }

    #[test]
    fn test_graceful_shutdown_heartbeat_retires_host() {
        let policy = LivenessPolicy::default();
        let before = record(true, datetime!(2024-01-01 00:00 UTC));
        let after = policy
            .on_heartbeat("10.0.0.1", Some(&before), false, datetime!(2024-01-01 00:01 UTC))
            .unwrap();
        assert!(!after.is_active);
        assert_eq!(Transition::between(Some(&before), &after), Transition::Retired);
    }

    #[test]
    fn test_register_always_activates() {
        let policy = LivenessPolicy::default();
        let now = datetime!(2024-01-01 00:00 UTC);
        let rec = policy.on_register("10.0.0.2", Location::new("R2", "C2", "RK2"), now);
        assert!(rec.is_active);
        assert_eq!(rec.last_seen, now);
        assert_eq!(Transition::between(None, &rec), Transition::Created);
    }

    #[test]
    fn test_staleness_boundary() {
        let policy = LivenessPolicy::new(Duration::minutes(30));
        let seen = datetime!(2024-01-01 00:00 UTC);

        assert!(!policy.is_stale(&record(true, seen), seen + Duration::minutes(30)));
        assert!(policy.is_stale(&record(true, seen), seen + Duration::minutes(30) + Duration::seconds(1)));
        // un host déjà inactif n'est jamais "périmé"
        assert!(!policy.is_stale(&record(false, seen), seen + Duration::hours(5)));
    }

    #[test]
    fn test_threshold_agrees_with_is_stale() {
        let policy = LivenessPolicy::new(Duration::minutes(30));
        let now = datetime!(2024-01-01 12:00 UTC);
        let threshold = policy.stale_threshold(now);

        for offset in [-1, 0, 1] {
            let rec = record(true, threshold + Duration::seconds(offset));
            assert_eq!(rec.last_seen < threshold, policy.is_stale(&rec, now));
        }
    }

    #[test]
    fn test_threshold_saturates_for_huge_window() {
        let policy = LivenessPolicy::new(Duration::days(365 * 100_000));
        let now = datetime!(2024-01-01 12:00 UTC);
        assert_eq!(policy.stale_threshold(now), OffsetDateTime::UNIX_EPOCH);
        assert!(!policy.is_stale(&record(true, datetime!(2000-01-01 00:00 UTC)), now));
    }
}
