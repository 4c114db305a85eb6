//! # Vigil Enrich — GeoIP and threat-intel enrichment
//!
//! Consumes `events.raw.>` as a durable work-queue group, attaches GeoIP
//! context and a cached threat-intel verdict, applies the single monotone
//! severity-escalation rule, and republishes to `events.enriched.>`. The
//! source message is acknowledged only after the enriched copy is
//! accepted for publish, so a failed republish redelivers.

pub mod config;
pub mod geoip;
pub mod intel;
pub mod worker;

use vigil_core::types::{Event, EventStatus, Severity};

use crate::geoip::GeoLocation;
use crate::intel::Reputation;

/// Tag appended to events whose source IP has a malicious verdict.
pub const MALICIOUS_TAG: &str = "malicious_ip";

/// Fold lookup results into the event. Severity escalation is monotone:
/// a malicious verdict raises to critical, nothing here ever lowers.
pub fn apply_enrichment(evt: &mut Event, geo: Option<&GeoLocation>, rep: Option<&Reputation>) {
    if let Some(geo) = geo {
        evt.enrich("src_geo_country", geo.country.clone());
        evt.enrich("src_geo_city", geo.city.clone());
        evt.enrich("src_geo_iso", geo.iso.clone());
    }

    if let Some(rep) = rep {
        if rep.is_malicious {
            evt.enrich("threat_intel_score", rep.score as u64);
            evt.enrich("threat_intel_source", rep.source.clone());
            evt.escalate(Severity::Critical);
            evt.add_tag(MALICIOUS_TAG);
        }
    }

    evt.status = EventStatus::Enriched;
}
