use serde::{Deserialize, Serialize};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};

/// Format HTTP-date attendu par les pingers (ex: "Sun, 20 Aug 2017 14:53:01 GMT")
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Emplacement physique d'un ponger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub region: String,   // ex: MAD, DC01.MADRID
    pub cluster: String,  // ex: CL10, CLUSTER1
    pub rack: String,     // ex: RS10AA, RACK01
}

impl Location {
    pub fn new(region: impl Into<String>, cluster: impl Into<String>, rack: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            cluster: cluster.into(),
            rack: rack.into(),
        }
    }
}

/// Un enregistrement par host (clé = adresse réseau du ponger)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub host_id: String,
    pub location: Location,
    pub is_active: bool,
    pub last_seen: OffsetDateTime,
}

/// Écriture vers le store.
/// `location = None` ne touche que is_active / last_seen (heartbeat pur).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUpsert {
    pub host_id: String,
    pub location: Option<Location>,
    pub is_active: bool,
    pub last_seen: OffsetDateTime,
}

impl HostUpsert {
    /// Enregistrement complet : métadonnées + vivacité
    pub fn full(record: &HostRecord) -> Self {
        Self {
            host_id: record.host_id.clone(),
            location: Some(record.location.clone()),
            is_active: record.is_active,
            last_seen: record.last_seen,
        }
    }

    /// Heartbeat : la localisation stockée est conservée
    pub fn liveness(record: &HostRecord) -> Self {
        Self {
            host_id: record.host_id.clone(),
            location: None,
            is_active: record.is_active,
            last_seen: record.last_seen,
        }
    }
}

/// Vue publique servie aux pingers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostView {
    pub host: String,
    pub rack: String,
    pub cluster: String,
    pub region: String,
    pub is_active: bool,
    pub updated_datetime: String,
}

impl From<&HostRecord> for HostView {
    fn from(record: &HostRecord) -> Self {
        Self {
            host: record.host_id.clone(),
            rack: record.location.rack.clone(),
            cluster: record.location.cluster.clone(),
            region: record.location.region.clone(),
            is_active: record.is_active,
            updated_datetime: format_http_date(record.last_seen),
        }
    }
}

pub fn format_http_date(ts: OffsetDateTime) -> String {
    ts.to_offset(UtcOffset::UTC).format(HTTP_DATE).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_http_date_format() {
        let ts = datetime!(2017-08-20 14:53:01 UTC);
        assert_eq!(format_http_date(ts), "Sun, 20 Aug 2017 14:53:01 GMT");
    }

    #[test]
    fn test_http_date_is_rendered_in_utc() {
        let ts = datetime!(2017-08-20 16:53:01 +02:00);
        assert_eq!(format_http_date(ts), "Sun, 20 Aug 2017 14:53:01 GMT");
    }

    #[test]
    fn test_liveness_upsert_drops_location() {
        let record = HostRecord {
            host_id: "10.0.0.1".into(),
            location: Location::new("R1", "C1", "RK1"),
            is_active: true,
            last_seen: datetime!(2024-01-01 00:00 UTC),
        };
        assert_eq!(HostUpsert::liveness(&record).location, None);
        assert_eq!(HostUpsert::full(&record).location, Some(record.location.clone()));
    }
}
