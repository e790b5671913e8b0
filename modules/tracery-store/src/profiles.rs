use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tracery_common::{ChannelProfile, VocabularyProposal};

/// Versioned channel profiles, the shared vocabulary, and the cycle
/// cursor. Profiles are one row per channel per cycle: the adaptive
/// controller publishes a complete cycle atomically, so a scheduler
/// reading `latest_profiles` never observes a half-updated state.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Highest published cycle number, if any cycle has completed.
    async fn latest_cycle(&self) -> Result<Option<u64>>;

    /// All profiles of the latest published cycle.
    async fn latest_profiles(&self) -> Result<Vec<ChannelProfile>>;

    /// Every published version of one channel's profile, oldest first.
    async fn profile_history(&self, channel_id: &str) -> Result<Vec<ChannelProfile>>;

    /// Publish a complete cycle of profiles atomically.
    async fn publish_cycle(&self, cycle: u64, profiles: Vec<ChannelProfile>) -> Result<()>;

    /// Current weighted vocabulary read by the next cycle's scorer.
    async fn vocabulary(&self) -> Result<BTreeMap<String, f64>>;

    async fn replace_vocabulary(&self, terms: BTreeMap<String, f64>) -> Result<()>;

    /// Mined terms below the auto-add floor, awaiting manual review.
    async fn queue_proposals(&self, proposals: Vec<VocabularyProposal>) -> Result<()>;

    async fn pending_proposals(&self) -> Result<Vec<VocabularyProposal>>;

    /// Observation cursor of the last committed cycle.
    async fn cursor(&self) -> Result<Option<DateTime<Utc>>>;

    /// Advance the cursor. Called only after the whole cycle committed,
    /// so an interrupted cycle reruns from the same position.
    async fn commit_cursor(&self, cursor: DateTime<Utc>) -> Result<()>;
}

#[derive(Default)]
struct MemoryProfileState {
    cycles: BTreeMap<u64, Vec<ChannelProfile>>,
    vocabulary: BTreeMap<String, f64>,
    proposals: Vec<VocabularyProposal>,
    cursor: Option<DateTime<Utc>>,
}

/// In-memory profile store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryProfileStore {
    state: Mutex<MemoryProfileState>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the starting vocabulary (normally loaded by a migration).
    pub fn with_vocabulary(terms: BTreeMap<String, f64>) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().vocabulary = terms;
        store
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn latest_cycle(&self) -> Result<Option<u64>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .cycles
            .keys()
            .next_back()
            .copied())
    }

    async fn latest_profiles(&self) -> Result<Vec<ChannelProfile>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cycles
            .values()
            .next_back()
            .cloned()
            .unwrap_or_default())
    }

    async fn profile_history(&self, channel_id: &str) -> Result<Vec<ChannelProfile>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .cycles
            .values()
            .flatten()
            .filter(|p| p.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn publish_cycle(&self, cycle: u64, mut profiles: Vec<ChannelProfile>) -> Result<()> {
        profiles.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        self.state.lock().unwrap().cycles.insert(cycle, profiles);
        Ok(())
    }

    async fn vocabulary(&self) -> Result<BTreeMap<String, f64>> {
        Ok(self.state.lock().unwrap().vocabulary.clone())
    }

    async fn replace_vocabulary(&self, terms: BTreeMap<String, f64>) -> Result<()> {
        self.state.lock().unwrap().vocabulary = terms;
        Ok(())
    }

    async fn queue_proposals(&self, proposals: Vec<VocabularyProposal>) -> Result<()> {
        self.state.lock().unwrap().proposals.extend(proposals);
        Ok(())
    }

    async fn pending_proposals(&self) -> Result<Vec<VocabularyProposal>> {
        Ok(self.state.lock().unwrap().proposals.clone())
    }

    async fn cursor(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.lock().unwrap().cursor)
    }

    async fn commit_cursor(&self, cursor: DateTime<Utc>) -> Result<()> {
        self.state.lock().unwrap().cursor = Some(cursor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_profiles_follow_published_cycles() {
        let store = MemoryProfileStore::new();
        let now = Utc::now();

        store
            .publish_cycle(1, vec![ChannelProfile::initial("a", 1, now)])
            .await
            .unwrap();
        assert_eq!(store.latest_cycle().await.unwrap(), Some(1));

        let mut second = ChannelProfile::initial("a", 2, now);
        second.utility_score = 70.0;
        store
            .publish_cycle(
                2,
                vec![second, ChannelProfile::initial("b", 2, now)],
            )
            .await
            .unwrap();

        let latest = store.latest_profiles().await.unwrap();
        assert_eq!(store.latest_cycle().await.unwrap(), Some(2));
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].utility_score, 70.0);

        let history = store.profile_history("a").await.unwrap();
        assert_eq!(history.len(), 2, "old cycles remain readable");
    }

    #[tokio::test]
    async fn cursor_starts_empty_and_advances_on_commit() {
        let store = MemoryProfileStore::new();
        assert!(store.cursor().await.unwrap().is_none());

        let t = Utc::now();
        store.commit_cursor(t).await.unwrap();
        assert_eq!(store.cursor().await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn vocabulary_replacement_is_total() {
        let mut seed = BTreeMap::new();
        seed.insert("checkpoint".to_string(), 1.0);
        let store = MemoryProfileStore::with_vocabulary(seed);

        let mut next = store.vocabulary().await.unwrap();
        next.insert("konvooi".to_string(), 0.8);
        store.replace_vocabulary(next).await.unwrap();

        let vocab = store.vocabulary().await.unwrap();
        assert_eq!(vocab.len(), 2);
        assert_eq!(vocab.get("checkpoint"), Some(&1.0));
    }
}
