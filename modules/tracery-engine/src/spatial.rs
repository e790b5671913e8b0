//! Spatial correlation: messages whose text names a place near an
//! incident's coordinates link to it. The rarest but highest-value link
//! type; anything unresolvable is excluded rather than forced.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use tracery_common::{
    haversine_km, CorrelationConfig, EntityRef, GeoPoint, Incident, IntelligenceLink,
    LinkEvidence, LinkType, Message,
};

use crate::content::{matched_terms, tokenize};

pub const DISCOVERED_BY: &str = "spatial_correlator";

/// Place-name → coordinates lookup. Names are matched case-insensitively
/// on word boundaries, longest name first so "den haag" beats "haag".
pub struct Gazetteer {
    entries: Vec<GazetteerEntry>,
}

#[derive(Debug, Clone)]
pub struct GazetteerEntry {
    pub name: String,
    pub point: GeoPoint,
}

#[derive(Debug, Clone)]
pub struct PlaceMention {
    pub name: String,
    pub point: GeoPoint,
}

impl Gazetteer {
    pub fn new(entries: Vec<(String, GeoPoint)>) -> Self {
        let mut entries: Vec<GazetteerEntry> = entries
            .into_iter()
            .filter(|(_, point)| point.is_valid())
            .map(|(name, point)| GazetteerEntry {
                name: name.to_lowercase(),
                point,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.name
                .len()
                .cmp(&a.name.len())
                .then_with(|| a.name.cmp(&b.name))
        });
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(&self, name: &str) -> Option<GeoPoint> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.point)
    }

    /// Distinct place mentions found in the text.
    pub fn find_mentions(&self, text: &str) -> Vec<PlaceMention> {
        let lower = text.to_lowercase();
        let bytes = lower.as_bytes();
        let mut mentions = Vec::new();
        for entry in &self.entries {
            if let Some(index) = lower.find(&entry.name) {
                if word_bounded(bytes, index, entry.name.len()) {
                    mentions.push(PlaceMention {
                        name: entry.name.clone(),
                        point: entry.point,
                    });
                }
            }
        }
        mentions
    }
}

/// "rotterdam" must not match inside "rotterdamse".
fn word_bounded(bytes: &[u8], index: usize, len: usize) -> bool {
    let before_ok = index == 0 || !bytes[index - 1].is_ascii_alphanumeric();
    let end = index + len;
    let after_ok = end >= bytes.len() || !bytes[end].is_ascii_alphanumeric();
    before_ok && after_ok
}

fn geohash_cell(point: GeoPoint, precision: usize) -> String {
    match geohash::encode(
        geohash::Coord {
            x: point.lng,
            y: point.lat,
        },
        precision,
    ) {
        Ok(cell) => cell,
        Err(e) => {
            warn!(lat = point.lat, lng = point.lng, error = %e, "Geohash encoding failed");
            String::new()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpatialSkip {
    /// Incident carries no resolvable coordinates.
    NoCoordinates,
}

#[derive(Debug)]
pub struct SpatialCorrelation {
    pub links: Vec<IntelligenceLink>,
    pub skip: Option<SpatialSkip>,
}

pub struct SpatialCorrelator<'a> {
    config: &'a CorrelationConfig,
    vocabulary: &'a BTreeMap<String, f64>,
    gazetteer: &'a Gazetteer,
}

impl<'a> SpatialCorrelator<'a> {
    pub fn new(
        config: &'a CorrelationConfig,
        vocabulary: &'a BTreeMap<String, f64>,
        gazetteer: &'a Gazetteer,
    ) -> Self {
        Self {
            config,
            vocabulary,
            gazetteer,
        }
    }

    /// Link candidate messages to an incident by resolved place mentions.
    /// Candidates are the cycle's time-bounded message slice; this
    /// correlator only looks at their text.
    pub fn correlate(
        &self,
        incident: &Incident,
        candidates: &[Message],
        now: DateTime<Utc>,
    ) -> SpatialCorrelation {
        let incident_point = match incident.location {
            Some(point) if point.is_valid() => point,
            _ => {
                return SpatialCorrelation {
                    links: Vec::new(),
                    skip: Some(SpatialSkip::NoCoordinates),
                }
            }
        };

        let incident_place = incident.location_name.as_deref().map(str::to_lowercase);
        let incident_cell = geohash_cell(incident_point, self.config.geohash_precision);

        let mut links = Vec::new();
        for message in candidates {
            let mentions = self.gazetteer.find_mentions(&message.text);
            if mentions.is_empty() {
                continue;
            }

            // A mention corroborates when it falls inside the radius or
            // names the incident's own place exactly.
            let matching: Vec<(PlaceMention, f64)> = mentions
                .into_iter()
                .map(|m| {
                    let distance = haversine_km(
                        m.point.lat,
                        m.point.lng,
                        incident_point.lat,
                        incident_point.lng,
                    );
                    (m, distance)
                })
                .filter(|(m, distance)| {
                    *distance <= self.config.radius_km
                        || incident_place.as_deref() == Some(m.name.as_str())
                })
                .collect();
            if matching.is_empty() {
                continue;
            }

            let tokens = tokenize(&message.text);
            let matched_keywords = matched_terms(&tokens, self.vocabulary);
            if matched_keywords.is_empty() {
                continue;
            }

            let corroborating = matching.len() as u32;
            let (nearest, nearest_distance) = match matching.iter().min_by(|a, b| a.1.total_cmp(&b.1))
            {
                Some((m, d)) => (m.clone(), *d),
                None => continue,
            };

            let strength = if corroborating >= 2 { 0.9 } else { 0.6 };
            let mut confidence: f64 = 0.3 + 0.4; // keyword presence is required here
            if nearest_distance < self.config.radius_km / 4.0 {
                confidence += 0.2;
            }
            if corroborating >= 2 {
                confidence += 0.1;
            }

            links.push(IntelligenceLink {
                id: Uuid::new_v4(),
                entity_a: EntityRef::incident(incident.id),
                entity_b: EntityRef::message(message.id),
                link_type: LinkType::Spatial,
                strength,
                confidence: confidence.min(1.0),
                evidence: LinkEvidence::Spatial {
                    place_name: nearest.name,
                    distance_km: nearest_distance,
                    message_cell: geohash_cell(nearest.point, self.config.geohash_precision),
                    incident_cell: incident_cell.clone(),
                    corroborating_mentions: corroborating,
                    matched_keywords,
                },
                discovered_by: DISCOVERED_BY.to_string(),
                discovered_at: now,
                false_positive: false,
            });
        }

        SpatialCorrelation { links, skip: None }
    }
}
