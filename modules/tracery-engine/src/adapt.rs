//! Adaptive control: tier decisions from evaluated outcomes, vocabulary
//! evolution from mined proposals, published atomically as a new profile
//! cycle.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

use tracery_common::{ChannelProfile, CorrelationConfig, Tier, VocabularyProposal};
use tracery_store::ProfileStore;

use crate::evaluate::ChannelOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierDecision {
    Promote,
    Demote,
    Unchanged,
}

/// Promotion requires both sustained utility and an actual hit rate;
/// demotion requires enough messages to be confident the channel is
/// genuinely low-value rather than under-sampled. Threshold equality
/// favors no change.
pub fn decide_tier(outcome: &ChannelOutcome, config: &CorrelationConfig) -> TierDecision {
    if outcome.utility_score > config.promote_utility && outcome.hit_rate > config.promote_hit_rate
    {
        TierDecision::Promote
    } else if outcome.utility_score < config.demote_utility
        && outcome.total_messages > config.demote_min_messages
    {
        TierDecision::Demote
    } else {
        TierDecision::Unchanged
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdaptiveSummary {
    pub cycle: u64,
    pub promoted: u32,
    pub demoted: u32,
    pub unchanged: u32,
    /// Channels silent this period, republished with their prior state.
    pub carried_forward: u32,
    pub terms_added: u32,
    pub proposals_queued: u32,
}

pub struct AdaptiveController<'a> {
    profiles: &'a dyn ProfileStore,
    config: &'a CorrelationConfig,
}

impl<'a> AdaptiveController<'a> {
    pub fn new(profiles: &'a dyn ProfileStore, config: &'a CorrelationConfig) -> Self {
        Self { profiles, config }
    }

    /// Apply one adaptive cycle: retier evaluated channels, carry silent
    /// ones forward untouched, fold auto-added terms into the vocabulary,
    /// queue the rest, and publish the new cycle.
    pub async fn apply(
        &self,
        outcomes: &[ChannelOutcome],
        proposals: Vec<VocabularyProposal>,
        now: DateTime<Utc>,
    ) -> Result<AdaptiveSummary> {
        let cycle = self.profiles.latest_cycle().await?.map_or(1, |c| c + 1);
        let prior = self.profiles.latest_profiles().await?;

        let mut summary = AdaptiveSummary {
            cycle,
            ..AdaptiveSummary::default()
        };
        let mut published: Vec<ChannelProfile> = Vec::new();

        for outcome in outcomes {
            let prior_profile = prior.iter().find(|p| p.channel_id == outcome.channel_id);
            let prior_tier = prior_profile.map_or(Tier::Standard, |p| p.tier);
            let cumulative_false_positives = prior_profile
                .map_or(0, |p| p.false_positive_count)
                .max(outcome.false_positive_count);

            let decision = decide_tier(outcome, self.config);
            let tier = match decision {
                TierDecision::Promote => {
                    summary.promoted += 1;
                    prior_tier.promote()
                }
                TierDecision::Demote => {
                    summary.demoted += 1;
                    prior_tier.demote()
                }
                TierDecision::Unchanged => {
                    summary.unchanged += 1;
                    prior_tier
                }
            };
            if decision != TierDecision::Unchanged {
                info!(
                    channel = outcome.channel_id.as_str(),
                    utility = outcome.utility_score,
                    hit_rate = outcome.hit_rate,
                    from = %prior_tier,
                    to = %tier,
                    "Channel retiered"
                );
            }

            // Fold newly matched terms into the channel's running vocabulary.
            let mut vocabulary = prior_profile.map(|p| p.vocabulary.clone()).unwrap_or_default();
            for (term, weight) in &outcome.vocabulary {
                *vocabulary.entry(term.clone()).or_insert(0.0) += weight;
            }

            published.push(ChannelProfile {
                channel_id: outcome.channel_id.clone(),
                cycle,
                tier,
                utility_score: outcome.utility_score,
                hit_rate: outcome.hit_rate,
                incidents_linked: outcome.incidents_linked,
                high_confidence_links: outcome.high_confidence_links,
                total_messages: outcome.total_messages,
                false_positive_count: cumulative_false_positives,
                vocabulary,
                evaluated_at: now,
            });
        }

        // Channels with no messages this period keep their profile as-is:
        // absence of data is not evidence of low value.
        for profile in &prior {
            if published.iter().any(|p| p.channel_id == profile.channel_id) {
                continue;
            }
            let mut carried = profile.clone();
            carried.cycle = cycle;
            carried.evaluated_at = now;
            published.push(carried);
            summary.carried_forward += 1;
        }

        // Vocabulary evolution. Auto-added terms join immediately with
        // their mined score as weight; the rest queue for manual review.
        let mut vocabulary = self.profiles.vocabulary().await?;
        let mut queued: Vec<VocabularyProposal> = Vec::new();
        for proposal in proposals {
            if proposal.auto_added {
                vocabulary.entry(proposal.term.clone()).or_insert(proposal.score);
                summary.terms_added += 1;
            } else {
                queued.push(proposal);
            }
        }
        self.profiles.replace_vocabulary(vocabulary).await?;
        summary.proposals_queued = queued.len() as u32;
        if !queued.is_empty() {
            self.profiles.queue_proposals(queued).await?;
        }

        self.profiles.publish_cycle(cycle, published).await?;
        info!(
            cycle,
            promoted = summary.promoted,
            demoted = summary.demoted,
            carried_forward = summary.carried_forward,
            terms_added = summary.terms_added,
            "Adaptive cycle published"
        );
        Ok(summary)
    }
}
