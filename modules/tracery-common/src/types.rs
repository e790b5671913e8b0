use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    /// Both coordinates finite and inside the valid lat/lng ranges.
    /// Collectors occasionally emit NaN or swapped-axis garbage; such
    /// observations are excluded from the cycle rather than propagated.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Haversine great-circle distance between two lat/lng points in kilometers.
pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let lat1_r = lat1.to_radians();
    let lat2_r = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

// --- Observations (read-only, created by external collectors) ---

/// A geotagged field incident reported by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub location_name: Option<String>,
    pub description: String,
}

/// A timestamped short message published on a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub channel_id: String,
    pub posted_at: DateTime<Utc>,
    pub text: String,
    /// Aggregate reactions/forwards as reported by the collector.
    pub engagement: u32,
}

/// A publishing channel. Identity is the collector-assigned id
/// (e.g. `telegram:stadswacht020`); `handle` is the token other
/// channels use to reference it in message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub handle: String,
    pub display_name: String,
    pub platform: Option<String>,
}

// --- Entity References ---

/// Kind tag for the polymorphic `(kind, id)` entity reference.
/// `Vocabulary` is synthetic: content links bind a message to the
/// matched-term set rather than to another observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Incident,
    Message,
    Channel,
    Vocabulary,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Incident => write!(f, "incident"),
            EntityKind::Message => write!(f, "message"),
            EntityKind::Channel => write!(f, "channel"),
            EntityKind::Vocabulary => write!(f, "vocabulary"),
        }
    }
}

impl EntityKind {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "incident" => Self::Incident,
            "channel" => Self::Channel,
            "vocabulary" => Self::Vocabulary,
            _ => Self::Message,
        }
    }
}

/// Tagged union reference to any observation kind. No foreign-key
/// constraint across kinds; resolution happens through the store
/// dispatcher for whichever kind is named.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn incident(id: Uuid) -> Self {
        Self {
            kind: EntityKind::Incident,
            id: id.to_string(),
        }
    }

    pub fn message(id: Uuid) -> Self {
        Self {
            kind: EntityKind::Message,
            id: id.to_string(),
        }
    }

    pub fn channel(id: &str) -> Self {
        Self {
            kind: EntityKind::Channel,
            id: id.to_string(),
        }
    }

    /// Identity of a matched-term set: sorted, deduplicated, joined with `+`.
    /// The same term set always yields the same entity.
    pub fn vocabulary(terms: &[String]) -> Self {
        let mut sorted: Vec<&str> = terms.iter().map(|t| t.as_str()).collect();
        sorted.sort_unstable();
        sorted.dedup();
        Self {
            kind: EntityKind::Vocabulary,
            id: sorted.join("+"),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

// --- Links ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Temporal,
    Spatial,
    Social,
    Content,
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkType::Temporal => write!(f, "temporal"),
            LinkType::Spatial => write!(f, "spatial"),
            LinkType::Social => write!(f, "social"),
            LinkType::Content => write!(f, "content"),
        }
    }
}

impl LinkType {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "spatial" => Self::Spatial,
            "social" => Self::Social,
            "content" => Self::Content,
            _ => Self::Temporal,
        }
    }
}

/// Structured record of the inputs that produced a link. Required for
/// auditability and later false-positive review; one variant per link type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "evidence_type", rename_all = "snake_case")]
pub enum LinkEvidence {
    Temporal {
        time_delta_minutes: i64,
        window_hours: f64,
        /// None when baseline variance was zero and the absolute-count
        /// fallback gated the spike instead.
        z_score: Option<f64>,
        window_count: u64,
        baseline_mean: f64,
        baseline_stddev: f64,
        matched_keywords: Vec<String>,
    },
    Spatial {
        place_name: String,
        distance_km: f64,
        message_cell: String,
        incident_cell: String,
        corroborating_mentions: u32,
        matched_keywords: Vec<String>,
    },
    Social {
        mention_count: u64,
        edge_weight: f64,
        source_degree: f64,
        target_degree: f64,
    },
    Content {
        matched_terms: Vec<String>,
        density: f64,
        token_count: u32,
    },
}

/// A typed, scored relationship between two entities — the primary
/// output of the engine. Never physically deleted: discounted links are
/// flagged `false_positive` and retained as evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceLink {
    pub id: Uuid,
    pub entity_a: EntityRef,
    pub entity_b: EntityRef,
    pub link_type: LinkType,
    /// Proximity/closeness in [0,1], meaning specific to the link type.
    pub strength: f64,
    /// Strength combined with corroborating signals, in [0,1].
    pub confidence: f64,
    pub evidence: LinkEvidence,
    pub discovered_by: String,
    pub discovered_at: DateTime<Utc>,
    pub false_positive: bool,
}

impl IntelligenceLink {
    /// Canonical unordered identity of `(entity_a, entity_b, link_type)`.
    /// Endpoint order is normalized so rerunning a correlator maps onto
    /// the same key.
    pub fn pair_key(&self) -> String {
        pair_key(&self.entity_a, &self.entity_b, self.link_type)
    }
}

/// Canonical unordered key for a link pair. Shared by every store
/// implementation as the dedup key.
pub fn pair_key(a: &EntityRef, b: &EntityRef, link_type: LinkType) -> String {
    let ka = format!("{}:{}", a.kind, a.id);
    let kb = format!("{}:{}", b.kind, b.id);
    let (first, second) = if ka <= kb { (ka, kb) } else { (kb, ka) };
    format!("{first}|{second}|{link_type}")
}

// --- Channel Profiles ---

/// Monitoring frequency class. The ladder mirrors collection cadence:
/// a promoted channel is polled more often, a demoted one less.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Intensive,
    Standard,
    Reduced,
    Minimal,
}

impl Tier {
    /// Polling interval the external collection scheduler should apply.
    pub fn poll_interval_hours(&self) -> u32 {
        match self {
            Tier::Intensive => 6,
            Tier::Standard => 24,
            Tier::Reduced => 72,
            Tier::Minimal => 168,
        }
    }

    /// One step toward more frequent collection. Saturates at the top.
    pub fn promote(&self) -> Self {
        match self {
            Tier::Intensive | Tier::Standard => Tier::Intensive,
            Tier::Reduced => Tier::Standard,
            Tier::Minimal => Tier::Reduced,
        }
    }

    /// One step toward less frequent collection. Saturates at the bottom.
    pub fn demote(&self) -> Self {
        match self {
            Tier::Intensive => Tier::Standard,
            Tier::Standard => Tier::Reduced,
            Tier::Reduced | Tier::Minimal => Tier::Minimal,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Intensive => write!(f, "intensive"),
            Tier::Standard => write!(f, "standard"),
            Tier::Reduced => write!(f, "reduced"),
            Tier::Minimal => write!(f, "minimal"),
        }
    }
}

impl Tier {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "intensive" => Self::Intensive,
            "reduced" => Self::Reduced,
            "minimal" => Self::Minimal,
            _ => Self::Standard,
        }
    }
}

/// Per-channel utility snapshot, one row per channel per adaptive cycle.
/// Versioned rather than mutated in place: the collection scheduler reads
/// the latest complete cycle and never observes a half-updated state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelProfile {
    pub channel_id: String,
    pub cycle: u64,
    pub tier: Tier,
    pub utility_score: f64,
    pub hit_rate: f64,
    pub incidents_linked: u32,
    pub high_confidence_links: u32,
    pub total_messages: u32,
    pub false_positive_count: u32,
    /// Terms this channel's linked messages matched, with accumulated weight.
    pub vocabulary: BTreeMap<String, f64>,
    pub evaluated_at: DateTime<Utc>,
}

impl ChannelProfile {
    /// Starting profile for a channel seen for the first time.
    pub fn initial(channel_id: &str, cycle: u64, now: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            cycle,
            tier: Tier::Standard,
            utility_score: 0.0,
            hit_rate: 0.0,
            incidents_linked: 0,
            high_confidence_links: 0,
            total_messages: 0,
            false_positive_count: 0,
            vocabulary: BTreeMap::new(),
            evaluated_at: now,
        }
    }
}

/// A mined term that did not clear the auto-add corpus-frequency floor
/// and is queued for manual review instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabularyProposal {
    pub term: String,
    pub score: f64,
    /// Fraction of the full corpus containing the term.
    pub corpus_frequency: f64,
    pub auto_added: bool,
    pub proposed_at: DateTime<Utc>,
}
