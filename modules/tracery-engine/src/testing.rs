//! Shared fixtures for engine tests and the demo path. Deterministic
//! where it matters: ids are fresh, everything else is caller-supplied.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tracery_common::{Channel, GeoPoint, Incident, Message};

use crate::spatial::Gazetteer;

pub fn channel(id: &str, handle: &str) -> Channel {
    Channel {
        id: id.to_string(),
        handle: handle.to_string(),
        display_name: id.to_string(),
        platform: Some("telegram".to_string()),
    }
}

pub fn message(channel_id: &str, posted_at: DateTime<Utc>, text: &str) -> Message {
    Message {
        id: Uuid::new_v4(),
        channel_id: channel_id.to_string(),
        posted_at,
        text: text.to_string(),
        engagement: 0,
    }
}

pub fn message_with_engagement(
    channel_id: &str,
    posted_at: DateTime<Utc>,
    text: &str,
    engagement: u32,
) -> Message {
    Message {
        engagement,
        ..message(channel_id, posted_at, text)
    }
}

pub fn incident_at(
    occurred_at: DateTime<Utc>,
    lat: f64,
    lng: f64,
    location_name: &str,
    description: &str,
) -> Incident {
    Incident {
        id: Uuid::new_v4(),
        occurred_at,
        location: Some(GeoPoint { lat, lng }),
        location_name: Some(location_name.to_string()),
        description: description.to_string(),
    }
}

/// Starting vocabulary for the incident-monitoring domain.
pub fn seed_vocabulary() -> BTreeMap<String, f64> {
    crate::bootstrap::seed_vocabulary()
}

/// Small Dutch gazetteer used across the engine tests.
pub fn demo_gazetteer() -> Gazetteer {
    crate::bootstrap::default_gazetteer()
}
