//! Temporal correlation: statistically anomalous message volume around an
//! incident's timestamp links the in-window messages to it.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;
use uuid::Uuid;

use tracery_common::{
    CorrelationConfig, EntityRef, Incident, IntelligenceLink, LinkEvidence, LinkType, Message,
};
use tracery_store::ObservationStore;

use crate::content::{matched_terms, tokenize};

pub const DISCOVERED_BY: &str = "temporal_correlator";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    pub stddev: f64,
    pub buckets: usize,
}

/// Mean and population standard deviation of per-bucket message counts.
/// Empty buckets count as zeros; a quiet baseline is still a baseline.
pub fn baseline_stats(counts: &[u64]) -> BaselineStats {
    if counts.is_empty() {
        return BaselineStats {
            mean: 0.0,
            stddev: 0.0,
            buckets: 0,
        };
    }
    let n = counts.len() as f64;
    let mean = counts.iter().sum::<u64>() as f64 / n;
    let variance = counts
        .iter()
        .map(|c| {
            let d = *c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    BaselineStats {
        mean,
        stddev: variance.sqrt(),
        buckets: counts.len(),
    }
}

/// None when the baseline has no variance; the caller falls back to the
/// absolute-count gate instead of dividing by zero.
pub fn z_score(observed: u64, baseline: &BaselineStats) -> Option<f64> {
    if baseline.stddev == 0.0 {
        return None;
    }
    Some((observed as f64 - baseline.mean) / baseline.stddev)
}

/// 1.0 at the incident timestamp, linearly down to 0.0 at the window edge.
pub fn time_strength(delta_minutes: i64, window_hours: f64) -> f64 {
    let window_minutes = window_hours * 60.0;
    if window_minutes <= 0.0 {
        return 0.0;
    }
    (1.0 - delta_minutes.abs() as f64 / window_minutes).max(0.0)
}

/// Base 0.3, +0.4 for a vocabulary hit, +0.2 for landing in the inner
/// quarter of the window, +0.1 for high engagement. Capped at 1.0.
pub fn candidate_confidence(has_keyword: bool, near_center: bool, high_engagement: bool) -> f64 {
    let mut confidence: f64 = 0.3;
    if has_keyword {
        confidence += 0.4;
    }
    if near_center {
        confidence += 0.2;
    }
    if high_engagement {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

/// Count messages into fixed-width buckets spanning `[start, end)`.
/// The bucket grid is anchored at `start`; messages outside the range
/// are ignored.
pub fn bucket_counts(
    messages: &[Message],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    bucket_minutes: i64,
) -> Vec<u64> {
    if bucket_minutes <= 0 || end <= start {
        return Vec::new();
    }
    let span_minutes = (end - start).num_minutes();
    let buckets = (span_minutes / bucket_minutes).max(0) as usize;
    if buckets == 0 {
        return Vec::new();
    }
    let mut counts = vec![0u64; buckets];
    for message in messages {
        if message.posted_at < start || message.posted_at >= end {
            continue;
        }
        let index = ((message.posted_at - start).num_minutes() / bucket_minutes) as usize;
        if index < buckets {
            counts[index] += 1;
        }
    }
    counts
}

/// Baseline statistics and observed window volume for one incident.
#[derive(Debug)]
pub struct SpikeAssessment {
    pub stats: BaselineStats,
    pub window_count: u64,
    pub z: Option<f64>,
    pub window_messages: Vec<Message>,
    /// Days of actual baseline coverage (first baseline message to
    /// window start).
    pub baseline_span_days: i64,
}

/// Fetch the baseline and observation window around an incident and
/// compute the spike statistics. Returns `None` when the baseline range
/// holds no messages at all. Shared by the correlator and by the
/// false-positive review, which reruns it over a longer horizon.
pub async fn assess_window(
    store: &dyn ObservationStore,
    incident: &Incident,
    config: &CorrelationConfig,
    baseline_days: i64,
) -> Result<Option<SpikeAssessment>> {
    let window = Duration::minutes((config.window_hours * 60.0) as i64);
    let window_start = incident.occurred_at - window;
    let window_end = incident.occurred_at + window;
    let baseline_start = window_start - Duration::days(baseline_days);

    let baseline_messages = store
        .messages_between(baseline_start, window_start, None)
        .await?;
    if baseline_messages.is_empty() {
        return Ok(None);
    }

    // Messages arrive sorted; the earliest bounds the actual coverage.
    let earliest = baseline_messages[0].posted_at;
    let baseline_span_days = (window_start - earliest).num_days();

    let bucket_minutes = (config.window_hours * 120.0) as i64;
    let counts = bucket_counts(&baseline_messages, baseline_start, window_start, bucket_minutes);
    let stats = baseline_stats(&counts);

    let window_messages = store
        .messages_between(window_start, window_end, None)
        .await?;
    let window_count = window_messages.len() as u64;
    let z = z_score(window_count, &stats);

    Ok(Some(SpikeAssessment {
        stats,
        window_count,
        z,
        window_messages,
        baseline_span_days,
    }))
}

/// z-gate with the absolute-count fallback for variance-free baselines.
pub fn is_spike(assessment: &SpikeAssessment, config: &CorrelationConfig) -> bool {
    match assessment.z {
        Some(z) => z >= config.z_threshold,
        None => assessment.window_count >= config.absolute_spike_threshold,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalSkip {
    /// Fewer than the minimum days of baseline coverage.
    InsufficientBaseline,
    /// Window volume did not clear the gate.
    NoSpike,
}

#[derive(Debug)]
pub struct TemporalCorrelation {
    pub links: Vec<IntelligenceLink>,
    pub skip: Option<TemporalSkip>,
    pub z: Option<f64>,
    pub window_count: u64,
}

impl TemporalCorrelation {
    fn skipped(skip: TemporalSkip, z: Option<f64>, window_count: u64) -> Self {
        Self {
            links: Vec::new(),
            skip: Some(skip),
            z,
            window_count,
        }
    }
}

pub struct TemporalCorrelator<'a> {
    store: &'a dyn ObservationStore,
    config: &'a CorrelationConfig,
    vocabulary: &'a BTreeMap<String, f64>,
}

impl<'a> TemporalCorrelator<'a> {
    pub fn new(
        store: &'a dyn ObservationStore,
        config: &'a CorrelationConfig,
        vocabulary: &'a BTreeMap<String, f64>,
    ) -> Self {
        Self {
            store,
            config,
            vocabulary,
        }
    }

    pub async fn correlate(
        &self,
        incident: &Incident,
        now: DateTime<Utc>,
    ) -> Result<TemporalCorrelation> {
        let assessment =
            match assess_window(self.store, incident, self.config, self.config.baseline_days)
                .await?
            {
                Some(a) => a,
                None => {
                    debug!(incident = %incident.id, "No baseline messages, skipping temporal correlation");
                    return Ok(TemporalCorrelation::skipped(
                        TemporalSkip::InsufficientBaseline,
                        None,
                        0,
                    ));
                }
            };

        if assessment.baseline_span_days < self.config.min_baseline_days {
            debug!(
                incident = %incident.id,
                span_days = assessment.baseline_span_days,
                "Baseline coverage below minimum, skipping temporal correlation"
            );
            return Ok(TemporalCorrelation::skipped(
                TemporalSkip::InsufficientBaseline,
                assessment.z,
                assessment.window_count,
            ));
        }

        if !is_spike(&assessment, self.config) {
            return Ok(TemporalCorrelation::skipped(
                TemporalSkip::NoSpike,
                assessment.z,
                assessment.window_count,
            ));
        }

        let window_minutes = (self.config.window_hours * 60.0) as i64;
        let links = assessment
            .window_messages
            .iter()
            .map(|message| {
                let delta_minutes = (message.posted_at - incident.occurred_at).num_minutes();
                let strength = time_strength(delta_minutes, self.config.window_hours);

                let tokens = tokenize(&message.text);
                let matched = matched_terms(&tokens, self.vocabulary);
                let near_center = delta_minutes.abs() < window_minutes / 4;
                let high_engagement = message.engagement >= self.config.high_engagement;
                let confidence =
                    candidate_confidence(!matched.is_empty(), near_center, high_engagement);

                IntelligenceLink {
                    id: Uuid::new_v4(),
                    entity_a: EntityRef::incident(incident.id),
                    entity_b: EntityRef::message(message.id),
                    link_type: LinkType::Temporal,
                    strength,
                    confidence,
                    evidence: LinkEvidence::Temporal {
                        time_delta_minutes: delta_minutes,
                        window_hours: self.config.window_hours,
                        z_score: assessment.z,
                        window_count: assessment.window_count,
                        baseline_mean: assessment.stats.mean,
                        baseline_stddev: assessment.stats.stddev,
                        matched_keywords: matched,
                    },
                    discovered_by: DISCOVERED_BY.to_string(),
                    discovered_at: now,
                    false_positive: false,
                }
            })
            .collect();

        Ok(TemporalCorrelation {
            links,
            skip: None,
            z: assessment.z,
            window_count: assessment.window_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use tracery_store::MemoryObservationStore;

    #[test]
    fn baseline_stats_mean_and_population_stddev() {
        let stats = baseline_stats(&[8, 12]);
        assert_eq!(stats.mean, 10.0);
        assert_eq!(stats.stddev, 2.0);
    }

    #[test]
    fn baseline_stats_of_empty_is_zero() {
        let stats = baseline_stats(&[]);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.stddev, 0.0);
        assert_eq!(stats.buckets, 0);
    }

    #[test]
    fn z_score_boundary_triggers_at_exactly_threshold() {
        let cfg = CorrelationConfig::default();
        let stats = baseline_stats(&[8, 12]); // mean 10, stddev 2

        let at_gate = z_score(15, &stats).unwrap();
        assert!((at_gate - 2.5).abs() < 1e-10);
        assert!(at_gate >= cfg.z_threshold, "z = 2.5 exactly must trigger");

        let below_gate = z_score(14, &stats).unwrap();
        assert!((below_gate - 2.0).abs() < 1e-10);
        assert!(below_gate < cfg.z_threshold, "z = 2.0 must not trigger");
    }

    #[test]
    fn zero_variance_baseline_disables_z_gating() {
        let stats = baseline_stats(&[5, 5, 5, 5]);
        assert_eq!(z_score(100, &stats), None);
    }

    #[test]
    fn strength_is_one_at_zero_delta_and_zero_at_boundary() {
        assert_eq!(time_strength(0, 6.0), 1.0);
        assert_eq!(time_strength(360, 6.0), 0.0);
        assert_eq!(time_strength(-360, 6.0), 0.0);
        assert_eq!(time_strength(500, 6.0), 0.0, "clamped past the boundary");
    }

    #[test]
    fn strength_decreases_monotonically_with_delta() {
        let deltas = [0i64, 30, 60, 120, 180, 240, 300, 360];
        let strengths: Vec<f64> = deltas.iter().map(|d| time_strength(*d, 6.0)).collect();
        for pair in strengths.windows(2) {
            assert!(pair[0] > pair[1] || (pair[0] == 0.0 && pair[1] == 0.0));
        }
    }

    #[test]
    fn confidence_caps_at_one() {
        assert_eq!(candidate_confidence(true, true, true), 1.0);
        assert_eq!(candidate_confidence(false, false, false), 0.3);
        assert!((candidate_confidence(true, false, false) - 0.7).abs() < 1e-10);
    }

    #[test]
    fn bucket_counts_include_empty_buckets() {
        let start = Utc::now();
        let end = start + Duration::hours(24);
        let messages = vec![
            testing::message("a", start + Duration::hours(1), "x y"),
            testing::message("a", start + Duration::hours(13), "x y"),
        ];
        let counts = bucket_counts(&messages, start, end, 360);
        assert_eq!(counts, vec![1, 0, 1, 0]);
    }

    /// Spike scenario: baseline mean 5 messages per 6h bucket, stddev 1;
    /// a window holding 12 messages yields z = 7 and every in-window
    /// message links, with the highest confidence nearest the incident.
    #[tokio::test]
    async fn spike_links_all_window_messages_nearest_first() {
        let store = MemoryObservationStore::new();
        let cfg = CorrelationConfig::builder()
            .window_hours(3.0)
            .baseline_days(7)
            .build();
        let vocab = testing::seed_vocabulary();
        let now = Utc::now();
        let incident = testing::incident_at(now, 51.9244, 4.4777, "rotterdam", "explosie haven");

        // Baseline: 7 days of 6h buckets before the window, alternating
        // 4 and 6 messages -> mean 5, population stddev 1.
        let window_start = now - Duration::hours(3);
        let baseline_start = window_start - Duration::days(7);
        for bucket in 0..28 {
            let bucket_base = baseline_start + Duration::hours(6 * bucket);
            let count = if bucket % 2 == 0 { 4 } else { 6 };
            for i in 0..count {
                store.push_message(testing::message(
                    "telegram:havenwacht",
                    bucket_base + Duration::minutes(10 * i as i64 + 1),
                    "rustige ochtend vandaag",
                ));
            }
        }

        // Window: 12 messages, one exactly at the incident timestamp.
        let nearest = testing::message_with_engagement(
            "telegram:havenwacht",
            now,
            "explosie gehoord bij de haven, konvooi gespot",
            40,
        );
        let nearest_id = nearest.id;
        store.push_message(nearest);
        for i in 1..12 {
            store.push_message(testing::message(
                "telegram:havenwacht",
                now - Duration::hours(3) + Duration::minutes(4 + i * 13),
                "explosie in de verte",
            ));
        }

        let correlator = TemporalCorrelator::new(&store, &cfg, &vocab);
        let result = correlator.correlate(&incident, now).await.unwrap();

        assert!(result.skip.is_none());
        assert_eq!(result.links.len(), 12);
        let z = result.z.unwrap();
        assert!((z - 7.0).abs() < 0.01, "expected z near 7, got {z}");

        let best = result
            .links
            .iter()
            .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
            .unwrap();
        assert_eq!(best.entity_b, EntityRef::message(nearest_id));
        assert_eq!(best.strength, 1.0);
    }

    #[tokio::test]
    async fn thin_baseline_skips_incident() {
        let store = MemoryObservationStore::new();
        let cfg = CorrelationConfig::default();
        let vocab = testing::seed_vocabulary();
        let now = Utc::now();
        let incident = testing::incident_at(now, 52.3676, 4.9041, "amsterdam", "sirene centrum");

        // One day of baseline data against a 3-day minimum.
        for i in 0..10 {
            store.push_message(testing::message(
                "telegram:stadswacht020",
                now - Duration::hours(20) + Duration::hours(i),
                "niets aan de hand",
            ));
        }

        let correlator = TemporalCorrelator::new(&store, &cfg, &vocab);
        let result = correlator.correlate(&incident, now).await.unwrap();
        assert_eq!(result.skip, Some(TemporalSkip::InsufficientBaseline));
        assert!(result.links.is_empty());
    }

    #[tokio::test]
    async fn quiet_window_is_no_spike_not_error() {
        let store = MemoryObservationStore::new();
        let cfg = CorrelationConfig::builder()
            .window_hours(3.0)
            .baseline_days(7)
            .build();
        let vocab = testing::seed_vocabulary();
        let now = Utc::now();
        let incident = testing::incident_at(now, 52.0907, 5.1214, "utrecht", "melding binnenstad");

        let window_start = now - Duration::hours(3);
        let baseline_start = window_start - Duration::days(7);
        for bucket in 0..28 {
            let count = if bucket % 2 == 0 { 4 } else { 6 };
            for i in 0..count {
                store.push_message(testing::message(
                    "telegram:domstad",
                    baseline_start + Duration::hours(6 * bucket) + Duration::minutes(i as i64 + 1),
                    "gewone dag",
                ));
            }
        }
        // Window volume right at the mean.
        for i in 0..5 {
            store.push_message(testing::message(
                "telegram:domstad",
                window_start + Duration::minutes(30 * i + 5),
                "nog steeds rustig",
            ));
        }

        let correlator = TemporalCorrelator::new(&store, &cfg, &vocab);
        let result = correlator.correlate(&incident, now).await.unwrap();
        assert_eq!(result.skip, Some(TemporalSkip::NoSpike));
        assert_eq!(result.window_count, 5);
    }
}
