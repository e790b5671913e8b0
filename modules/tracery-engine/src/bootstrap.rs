//! Cold-start defaults: seed vocabulary and gazetteer for deployments
//! that have not supplied their own yet. Both are replaced over time —
//! the vocabulary by mining, the gazetteer by configuration.

use std::collections::BTreeMap;
use std::fs;

use anyhow::{Context, Result};

use tracery_common::GeoPoint;

use crate::spatial::Gazetteer;

/// Starting vocabulary for the incident-monitoring domain, weighted by
/// how specific each term is to reportable events.
pub fn seed_vocabulary() -> BTreeMap<String, f64> {
    [
        ("explosie", 1.0),
        ("schoten", 1.0),
        ("blokkade", 0.9),
        ("konvooi", 0.9),
        ("drone", 0.8),
        ("sirene", 0.7),
        ("ontruiming", 0.7),
        ("demonstratie", 0.6),
        ("haven", 0.5),
    ]
    .into_iter()
    .map(|(term, weight)| (term.to_string(), weight))
    .collect()
}

/// Built-in gazetteer covering the demo deployment's region.
pub fn default_gazetteer() -> Gazetteer {
    Gazetteer::new(
        [
            ("amsterdam", 52.3676, 4.9041),
            ("rotterdam", 51.9244, 4.4777),
            ("den haag", 52.0705, 4.3007),
            ("utrecht", 52.0907, 5.1214),
            ("eindhoven", 51.4416, 5.4697),
            ("groningen", 53.2194, 6.5665),
            ("schiedam", 51.9198, 4.3987),
            ("dordrecht", 51.8133, 4.6901),
        ]
        .into_iter()
        .map(|(name, lat, lng)| (name.to_string(), GeoPoint { lat, lng }))
        .collect(),
    )
}

/// Load a gazetteer from a JSON file of `{"place name": [lat, lng]}`.
pub fn gazetteer_from_json(path: &str) -> Result<Gazetteer> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading gazetteer {path}"))?;
    let entries: BTreeMap<String, [f64; 2]> =
        serde_json::from_str(&raw).with_context(|| format!("parsing gazetteer {path}"))?;
    Ok(Gazetteer::new(
        entries
            .into_iter()
            .map(|(name, [lat, lng])| (name, GeoPoint { lat, lng }))
            .collect(),
    ))
}
