//! Outcome evaluation: how much real-world utility each channel's
//! messages actually produced, and re-examination of aging
//! high-confidence links against a longer observation horizon.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use tracery_common::{
    CorrelationConfig, EntityKind, IntelligenceLink, LinkEvidence, LinkType, Message,
};
use tracery_store::{LinkStore, ObservationStore};

use crate::temporal::{assess_window, is_spike};

/// Per-channel evaluation result for one adaptive cycle.
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub incidents_linked: u32,
    pub high_confidence_links: u32,
    pub total_messages: u32,
    pub false_positive_count: u32,
    pub utility_score: f64,
    pub hit_rate: f64,
    /// Terms the channel's messages matched in content links, weighted
    /// by how often they recurred.
    pub vocabulary: BTreeMap<String, f64>,
}

/// `utility = 10·incidents + 5·high_confidence − penalty·false_positives`,
/// floored at zero. The penalty term is how repeated false positives
/// depress a channel in the next cycle.
pub fn utility_score(
    incidents_linked: u32,
    high_confidence_links: u32,
    false_positive_count: u32,
    config: &CorrelationConfig,
) -> f64 {
    let raw = 10.0 * incidents_linked as f64 + 5.0 * high_confidence_links as f64
        - config.false_positive_penalty * false_positive_count as f64;
    raw.max(0.0)
}

/// Evaluate every channel that produced messages in the period.
/// Channels with zero messages are absent from the result: absence of
/// data is not evidence of low value, so they are skipped, not scored.
pub fn evaluate_channels(
    messages: &[Message],
    links: &[IntelligenceLink],
    config: &CorrelationConfig,
) -> Vec<ChannelOutcome> {
    let message_channel: HashMap<String, &str> = messages
        .iter()
        .map(|m| (m.id.to_string(), m.channel_id.as_str()))
        .collect();

    let mut totals: BTreeMap<&str, u32> = BTreeMap::new();
    for message in messages {
        *totals.entry(message.channel_id.as_str()).or_insert(0) += 1;
    }

    let mut incidents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut high_confidence: BTreeMap<&str, u32> = BTreeMap::new();
    let mut false_positives: BTreeMap<&str, u32> = BTreeMap::new();
    let mut vocabularies: BTreeMap<&str, BTreeMap<String, f64>> = BTreeMap::new();

    for link in links {
        let message_endpoint = [&link.entity_a, &link.entity_b]
            .into_iter()
            .find(|e| e.kind == EntityKind::Message);
        let Some(message_ref) = message_endpoint else {
            continue; // channel-channel social links carry no message
        };
        let Some(channel) = message_channel.get(message_ref.id.as_str()).copied() else {
            continue; // message outside the evaluation period
        };

        if link.false_positive {
            *false_positives.entry(channel).or_insert(0) += 1;
            continue;
        }

        if matches!(link.link_type, LinkType::Temporal | LinkType::Spatial) {
            if let Some(incident_ref) = [&link.entity_a, &link.entity_b]
                .into_iter()
                .find(|e| e.kind == EntityKind::Incident)
            {
                incidents
                    .entry(channel)
                    .or_default()
                    .insert(incident_ref.id.as_str());
            }
        }

        if link.confidence >= config.high_confidence {
            *high_confidence.entry(channel).or_insert(0) += 1;
        }

        if let LinkEvidence::Content { matched_terms, .. } = &link.evidence {
            let vocab = vocabularies.entry(channel).or_default();
            for term in matched_terms {
                *vocab.entry(term.clone()).or_insert(0.0) += 1.0;
            }
        }
    }

    totals
        .into_iter()
        .map(|(channel, total_messages)| {
            let incidents_linked = incidents.get(channel).map_or(0, |s| s.len() as u32);
            let high_confidence_links = high_confidence.get(channel).copied().unwrap_or(0);
            let false_positive_count = false_positives.get(channel).copied().unwrap_or(0);
            ChannelOutcome {
                channel_id: channel.to_string(),
                incidents_linked,
                high_confidence_links,
                total_messages,
                false_positive_count,
                utility_score: utility_score(
                    incidents_linked,
                    high_confidence_links,
                    false_positive_count,
                    config,
                ),
                hit_rate: incidents_linked as f64 / total_messages as f64,
                vocabulary: vocabularies.get(channel).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

/// Re-examines previously high-confidence temporal links whose age has
/// crossed the review horizon. The original spike is recomputed against a
/// doubled baseline; a spike that reverts to baseline noise on the longer
/// horizon marks the link `false_positive` (retained, never deleted).
/// Links whose extended baseline is unusable are left untouched — the
/// review needs positive evidence to discount a link.
pub struct FalsePositiveReview<'a> {
    store: &'a dyn ObservationStore,
    config: &'a CorrelationConfig,
}

impl<'a> FalsePositiveReview<'a> {
    pub fn new(store: &'a dyn ObservationStore, config: &'a CorrelationConfig) -> Self {
        Self { store, config }
    }

    /// Returns the number of links newly marked false-positive.
    pub async fn review(
        &self,
        links: &[IntelligenceLink],
        link_store: &dyn LinkStore,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut marked = 0u64;
        for link in links {
            if link.link_type != LinkType::Temporal
                || link.false_positive
                || link.confidence < self.config.high_confidence
                || (now - link.discovered_at).num_days() < self.config.review_horizon_days
            {
                continue;
            }

            let Some(incident_ref) = [&link.entity_a, &link.entity_b]
                .into_iter()
                .find(|e| e.kind == EntityKind::Incident)
            else {
                continue;
            };
            let incident_id = match Uuid::parse_str(&incident_ref.id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(entity = %incident_ref, error = %e, "Unparseable incident id in link, skipping review");
                    continue;
                }
            };
            let Some(incident) = self.store.incident_by_id(incident_id).await? else {
                continue;
            };

            let extended = assess_window(
                self.store,
                &incident,
                self.config,
                self.config.baseline_days * 2,
            )
            .await?;
            let Some(assessment) = extended else {
                continue;
            };
            if assessment.baseline_span_days < self.config.min_baseline_days
                || assessment.z.is_none()
            {
                continue;
            }

            if !is_spike(&assessment, self.config) {
                if link_store.mark_false_positive(link.id).await? {
                    marked += 1;
                    info!(
                        link = %link.id,
                        z = assessment.z,
                        "Spike reverted to baseline on longer horizon, link marked false-positive"
                    );
                }
            }
        }
        Ok(marked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use chrono::Duration;
    use tracery_common::EntityRef;
    use tracery_store::{MemoryLinkStore, MemoryObservationStore, UpsertOutcome};

    fn temporal_link(
        incident: Uuid,
        message: Uuid,
        confidence: f64,
        discovered_at: DateTime<Utc>,
    ) -> IntelligenceLink {
        IntelligenceLink {
            id: Uuid::new_v4(),
            entity_a: EntityRef::incident(incident),
            entity_b: EntityRef::message(message),
            link_type: LinkType::Temporal,
            strength: 0.8,
            confidence,
            evidence: LinkEvidence::Temporal {
                time_delta_minutes: 30,
                window_hours: 6.0,
                z_score: Some(4.0),
                window_count: 20,
                baseline_mean: 5.0,
                baseline_stddev: 1.0,
                matched_keywords: vec![],
            },
            discovered_by: "temporal_correlator".to_string(),
            discovered_at,
            false_positive: false,
        }
    }

    /// Promotion/demotion arithmetic from the calibration dataset:
    /// 6 incidents and 2 high-confidence links score 70.
    #[test]
    fn utility_score_formula() {
        let cfg = CorrelationConfig::default();
        assert_eq!(utility_score(6, 2, 0, &cfg), 70.0);
        assert_eq!(utility_score(0, 0, 0, &cfg), 0.0);
        assert_eq!(utility_score(1, 0, 2, &cfg), 4.0);
        assert_eq!(utility_score(0, 0, 10, &cfg), 0.0, "floored at zero");
    }

    #[test]
    fn channels_without_messages_are_skipped() {
        let cfg = CorrelationConfig::default();
        let now = Utc::now();
        let messages = vec![testing::message("active", now, "konvooi blokkade hier")];
        let outcomes = evaluate_channels(&messages, &[], &cfg);
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].channel_id, "active");
    }

    #[test]
    fn incidents_count_distinct_and_high_confidence_counts_links() {
        let cfg = CorrelationConfig::default();
        let now = Utc::now();
        let message_a = testing::message("ch", now, "eerste melding");
        let message_b = testing::message("ch", now, "tweede melding");
        let incident = Uuid::new_v4();

        let links = vec![
            temporal_link(incident, message_a.id, 0.9, now),
            temporal_link(incident, message_b.id, 0.75, now),
        ];
        let outcomes = evaluate_channels(&[message_a, message_b], &links, &cfg);

        assert_eq!(outcomes.len(), 1);
        let outcome = &outcomes[0];
        assert_eq!(outcome.incidents_linked, 1, "same incident counted once");
        assert_eq!(outcome.high_confidence_links, 2);
        assert_eq!(outcome.utility_score, 20.0);
        assert!((outcome.hit_rate - 0.5).abs() < 1e-10);
    }

    #[test]
    fn false_positive_links_depress_utility_not_raise_it() {
        let cfg = CorrelationConfig::default();
        let now = Utc::now();
        let message = testing::message("ch", now, "melding");
        let incident = Uuid::new_v4();

        let mut fp = temporal_link(incident, message.id, 0.9, now);
        fp.false_positive = true;
        let outcomes = evaluate_channels(&[message], &[fp], &cfg);

        let outcome = &outcomes[0];
        assert_eq!(outcome.incidents_linked, 0);
        assert_eq!(outcome.high_confidence_links, 0);
        assert_eq!(outcome.false_positive_count, 1);
        assert_eq!(outcome.utility_score, 0.0);
    }

    #[tokio::test]
    async fn aged_link_whose_spike_dissolves_is_marked() {
        let cfg = CorrelationConfig::builder()
            .window_hours(3.0)
            .baseline_days(7)
            .review_horizon_days(14)
            .build();
        let store = MemoryObservationStore::new();
        let link_store = MemoryLinkStore::new();
        let now = Utc::now();

        // Incident three weeks ago. On the original 7-day baseline the
        // window looked like a spike; the doubled horizon reveals the
        // earlier weeks were just as loud, so z collapses.
        let incident_at = now - Duration::weeks(3);
        let incident =
            testing::incident_at(incident_at, 51.92, 4.47, "rotterdam", "vermeende explosie");
        store.push_incident(incident.clone());

        let window_start = incident_at - Duration::hours(3);
        let extended_start = window_start - Duration::days(14);
        // 56 six-hour buckets, alternating 11/13 messages: mean 12, stddev 1.
        for bucket in 0..56 {
            let count = if bucket % 2 == 0 { 11 } else { 13 };
            for i in 0..count {
                store.push_message(testing::message(
                    "telegram:havenwacht",
                    extended_start + Duration::hours(6 * bucket) + Duration::minutes(i as i64 * 5 + 1),
                    "druk zoals altijd",
                ));
            }
        }
        // Window: 13 messages — unremarkable against the true baseline.
        for i in 0..13 {
            store.push_message(testing::message(
                "telegram:havenwacht",
                window_start + Duration::minutes(20 * i as i64 + 3),
                "nog steeds druk",
            ));
        }

        let message_id = Uuid::new_v4();
        let link = temporal_link(incident.id, message_id, 0.9, incident_at);
        let link_id = link.id;
        assert_eq!(
            link_store.upsert(link.clone()).await.unwrap(),
            UpsertOutcome::Created
        );

        let review = FalsePositiveReview::new(&store, &cfg);
        let marked = review.review(&[link], &link_store, now).await.unwrap();
        assert_eq!(marked, 1);

        let stored = link_store.all_links().await.unwrap();
        assert_eq!(stored.len(), 1, "link retained, not deleted");
        assert!(stored[0].false_positive);
        assert_eq!(stored[0].id, link_id);
    }

    #[tokio::test]
    async fn young_links_are_not_reviewed() {
        let cfg = CorrelationConfig::default();
        let store = MemoryObservationStore::new();
        let link_store = MemoryLinkStore::new();
        let now = Utc::now();

        let link = temporal_link(Uuid::new_v4(), Uuid::new_v4(), 0.9, now - Duration::days(2));
        link_store.upsert(link.clone()).await.unwrap();

        let review = FalsePositiveReview::new(&store, &cfg);
        let marked = review.review(&[link], &link_store, now).await.unwrap();
        assert_eq!(marked, 0);
    }
}
