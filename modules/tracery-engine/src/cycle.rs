//! One engine cycle: correlate, write, evaluate, adapt, commit.
//!
//! The four correlators are read-only and independent, so they run as
//! concurrent tasks; only the link-store writes are serialized behind
//! them. The cursor advances after everything else commits, so an
//! interrupted cycle reruns from the same position and deduplication
//! makes the replay a no-op.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use tracing::{info, warn};

use tracery_common::{CorrelationConfig, Incident, Message, TraceryError};
use tracery_store::{LinkStore, ObservationStore, ProfileStore, UpsertOutcome};

use crate::adapt::AdaptiveController;
use crate::content::{tokenize, ContentValueScorer};
use crate::evaluate::{evaluate_channels, FalsePositiveReview};
use crate::social::{social_links, SocialGraphBuilder};
use crate::spatial::{Gazetteer, SpatialCorrelator, SpatialSkip};
use crate::temporal::{TemporalCorrelator, TemporalSkip};
use crate::vocabulary::mine_terms;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleStats {
    pub cycle: u64,
    pub incidents_processed: u64,
    pub messages_processed: u64,
    pub malformed_observations: u64,
    pub incidents_skipped_no_baseline: u64,
    pub incidents_no_spike: u64,
    pub incidents_skipped_no_coordinates: u64,
    pub temporal_links: u64,
    pub spatial_links: u64,
    pub social_links: u64,
    pub content_links: u64,
    pub links_created: u64,
    pub links_updated: u64,
    pub links_unchanged: u64,
    pub false_positives_marked: u64,
    pub channels_evaluated: u64,
    pub promoted: u32,
    pub demoted: u32,
    pub carried_forward: u32,
    pub vocabulary_terms_added: u32,
    pub proposals_queued: u32,
}

pub struct CycleRunner {
    observations: Arc<dyn ObservationStore>,
    links: Arc<dyn LinkStore>,
    profiles: Arc<dyn ProfileStore>,
    config: CorrelationConfig,
    gazetteer: Gazetteer,
    cold_start_lookback_days: i64,
}

impl CycleRunner {
    pub fn new(
        observations: Arc<dyn ObservationStore>,
        links: Arc<dyn LinkStore>,
        profiles: Arc<dyn ProfileStore>,
        config: CorrelationConfig,
        gazetteer: Gazetteer,
        cold_start_lookback_days: i64,
    ) -> Self {
        Self {
            observations,
            links,
            profiles,
            config,
            gazetteer,
            cold_start_lookback_days,
        }
    }

    /// Run one full cycle over everything that arrived since the cursor.
    /// Individual bad observations are logged skips; only observation
    /// store unavailability aborts.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<CycleStats, TraceryError> {
        let mut stats = CycleStats::default();

        let cursor = self
            .profiles
            .cursor()
            .await
            .map_err(|e| TraceryError::Store(e.to_string()))?;
        let from =
            cursor.unwrap_or_else(|| now - Duration::days(self.cold_start_lookback_days));
        info!(from = %from, to = %now, "Cycle window");

        // --- Fetch ---

        let incidents = self
            .observations
            .incidents_between(from, now)
            .await
            .map_err(|e| TraceryError::StoreUnavailable(e.to_string()))?;
        let channels = self
            .observations
            .channels()
            .await
            .map_err(|e| TraceryError::StoreUnavailable(e.to_string()))?;
        let window = Duration::minutes((self.config.window_hours * 60.0) as i64);
        // Context reaches one window behind the cursor so incidents near
        // the cycle boundary still see their full candidate range.
        let context_messages = self
            .observations
            .messages_between(from - window, now, None)
            .await
            .map_err(|e| TraceryError::StoreUnavailable(e.to_string()))?;
        let new_messages: Vec<Message> = context_messages
            .iter()
            .filter(|m| m.posted_at >= from)
            .cloned()
            .collect();

        let incidents: Vec<Incident> = incidents
            .into_iter()
            .filter(|incident| match incident.location {
                Some(point) if !point.is_valid() => {
                    warn!(incident = %incident.id, "Non-finite coordinates, excluding observation from cycle");
                    stats.malformed_observations += 1;
                    false
                }
                _ => true,
            })
            .collect();

        stats.incidents_processed = incidents.len() as u64;
        stats.messages_processed = new_messages.len() as u64;

        let vocabulary = self
            .profiles
            .vocabulary()
            .await
            .map_err(|e| TraceryError::Store(e.to_string()))?;

        // --- Correlate (read-only, independent, concurrent) ---

        let temporal_task = async {
            let correlator = TemporalCorrelator::new(&*self.observations, &self.config, &vocabulary);
            let results = try_join_all(
                incidents
                    .iter()
                    .map(|incident| correlator.correlate(incident, now)),
            )
            .await?;
            let mut links = Vec::new();
            let mut no_baseline = 0u64;
            let mut no_spike = 0u64;
            for result in results {
                match result.skip {
                    Some(TemporalSkip::InsufficientBaseline) => no_baseline += 1,
                    Some(TemporalSkip::NoSpike) => no_spike += 1,
                    None => links.extend(result.links),
                }
            }
            Ok::<_, anyhow::Error>((links, no_baseline, no_spike))
        };

        let spatial_task = async {
            let correlator = SpatialCorrelator::new(&self.config, &vocabulary, &self.gazetteer);
            let mut links = Vec::new();
            let mut no_coordinates = 0u64;
            for incident in &incidents {
                let candidates: Vec<Message> = context_messages
                    .iter()
                    .filter(|m| {
                        m.posted_at >= incident.occurred_at - window
                            && m.posted_at < incident.occurred_at + window
                    })
                    .cloned()
                    .collect();
                let result = correlator.correlate(incident, &candidates, now);
                match result.skip {
                    Some(SpatialSkip::NoCoordinates) => no_coordinates += 1,
                    None => links.extend(result.links),
                }
            }
            (links, no_coordinates)
        };

        let social_task = async {
            let builder = SocialGraphBuilder::new(&self.config);
            let graph = builder.build(&new_messages, &channels);
            if !graph.edges.is_empty() {
                info!(
                    edges = graph.edges.len(),
                    hubs = graph.hubs.len(),
                    unresolved = graph.unresolved_mentions,
                    "Social graph built"
                );
            }
            social_links(&graph, &self.config, now)
        };

        let content_task = async {
            let scorer = ContentValueScorer::new(&self.config, &vocabulary);
            new_messages
                .iter()
                .filter_map(|m| scorer.score_message(m, now))
                .collect::<Vec<_>>()
        };

        let (temporal, (spatial, no_coordinates), social, content) =
            tokio::join!(temporal_task, spatial_task, social_task, content_task);
        let (temporal, no_baseline, no_spike) =
            temporal.map_err(|e| TraceryError::StoreUnavailable(e.to_string()))?;

        stats.incidents_skipped_no_baseline = no_baseline;
        stats.incidents_no_spike = no_spike;
        stats.incidents_skipped_no_coordinates = no_coordinates;
        stats.temporal_links = temporal.len() as u64;
        stats.spatial_links = spatial.len() as u64;
        stats.social_links = social.len() as u64;
        stats.content_links = content.len() as u64;

        // --- Write (serialized, dedup-on-conflict) ---

        for link in temporal
            .into_iter()
            .chain(spatial)
            .chain(social)
            .chain(content)
        {
            let outcome = self
                .links
                .upsert(link)
                .await
                .map_err(|e| TraceryError::Store(e.to_string()))?;
            match outcome {
                UpsertOutcome::Created => stats.links_created += 1,
                UpsertOutcome::Updated => stats.links_updated += 1,
                UpsertOutcome::Unchanged => stats.links_unchanged += 1,
            }
        }

        // --- Evaluate ---

        let all_links = self
            .links
            .all_links()
            .await
            .map_err(|e| TraceryError::Store(e.to_string()))?;

        let review = FalsePositiveReview::new(&*self.observations, &self.config);
        stats.false_positives_marked = review
            .review(&all_links, &*self.links, now)
            .await
            .map_err(|e| TraceryError::Store(e.to_string()))?;

        let all_links = if stats.false_positives_marked > 0 {
            self.links
                .all_links()
                .await
                .map_err(|e| TraceryError::Store(e.to_string()))?
        } else {
            all_links
        };

        let outcomes = evaluate_channels(&new_messages, &all_links, &self.config);
        stats.channels_evaluated = outcomes.len() as u64;

        // --- Adapt ---

        let high_confidence_messages: HashSet<&str> = all_links
            .iter()
            .filter(|l| l.confidence >= self.config.high_confidence && !l.false_positive)
            .flat_map(|l| [&l.entity_a, &l.entity_b])
            .filter(|e| e.kind == tracery_common::EntityKind::Message)
            .map(|e| e.id.as_str())
            .collect();
        let linked_docs: Vec<Vec<String>> = new_messages
            .iter()
            .filter(|m| high_confidence_messages.contains(m.id.to_string().as_str()))
            .map(|m| tokenize(&m.text))
            .collect();
        let corpus_docs: Vec<Vec<String>> =
            new_messages.iter().map(|m| tokenize(&m.text)).collect();
        let proposals = mine_terms(&linked_docs, &corpus_docs, &vocabulary, &self.config, now);

        let controller = AdaptiveController::new(&*self.profiles, &self.config);
        let summary = controller
            .apply(&outcomes, proposals, now)
            .await
            .map_err(|e| TraceryError::Store(e.to_string()))?;
        stats.cycle = summary.cycle;
        stats.promoted = summary.promoted;
        stats.demoted = summary.demoted;
        stats.carried_forward = summary.carried_forward;
        stats.vocabulary_terms_added = summary.terms_added;
        stats.proposals_queued = summary.proposals_queued;

        // --- Commit ---

        self.profiles
            .commit_cursor(now)
            .await
            .map_err(|e| TraceryError::Store(e.to_string()))?;

        info!(
            cycle = stats.cycle,
            incidents = stats.incidents_processed,
            messages = stats.messages_processed,
            created = stats.links_created,
            updated = stats.links_updated,
            unchanged = stats.links_unchanged,
            "Cycle committed"
        );
        Ok(stats)
    }
}
