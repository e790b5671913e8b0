use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use tracery_common::{EntityKind, IntelligenceLink, LinkType};

/// What an upsert did. `Unchanged` means the stored link already carried
/// identical evidence and scores — the write was a no-op, which is what
/// makes a resumed or replayed cycle idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Append-only, deduplicated table of typed links. The dedup key is the
/// canonical unordered `(entity_a, entity_b, link_type)` pair; rerunning
/// a correlator revises the existing row instead of duplicating it.
/// Links are never physically deleted.
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn upsert(&self, link: IntelligenceLink) -> Result<UpsertOutcome>;

    /// Links touching the given entity, newest first, optionally filtered
    /// by link type and minimum confidence. The query surface consumed by
    /// downstream reports and visualizations.
    async fn links_for(
        &self,
        kind: EntityKind,
        id: &str,
        link_type: Option<LinkType>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<IntelligenceLink>>;

    async fn all_links(&self) -> Result<Vec<IntelligenceLink>>;

    /// Flag a link as not holding up under review. The row is retained
    /// for audit; returns false when the id is unknown.
    async fn mark_false_positive(&self, id: Uuid) -> Result<bool>;
}

/// In-memory link store keyed by `pair_key`.
#[derive(Default)]
pub struct MemoryLinkStore {
    links: Mutex<HashMap<String, IntelligenceLink>>,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Decide how an incoming link revises a stored one. Shared by both
/// store implementations so the idempotence semantics cannot drift.
pub(crate) fn merge_link(
    existing: &IntelligenceLink,
    incoming: &IntelligenceLink,
) -> Option<IntelligenceLink> {
    if existing.evidence == incoming.evidence
        && existing.strength == incoming.strength
        && existing.confidence == incoming.confidence
    {
        return None;
    }
    let mut revised = incoming.clone();
    // Identity and discovery time belong to the first observation of the
    // pair; the false-positive flag survives revision.
    revised.id = existing.id;
    revised.discovered_at = existing.discovered_at;
    revised.false_positive = existing.false_positive;
    Some(revised)
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn upsert(&self, link: IntelligenceLink) -> Result<UpsertOutcome> {
        let key = link.pair_key();
        let mut links = self.links.lock().unwrap();
        match links.get(&key) {
            None => {
                links.insert(key, link);
                Ok(UpsertOutcome::Created)
            }
            Some(existing) => match merge_link(existing, &link) {
                None => Ok(UpsertOutcome::Unchanged),
                Some(revised) => {
                    links.insert(key, revised);
                    Ok(UpsertOutcome::Updated)
                }
            },
        }
    }

    async fn links_for(
        &self,
        kind: EntityKind,
        id: &str,
        link_type: Option<LinkType>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<IntelligenceLink>> {
        let links = self.links.lock().unwrap();
        let mut hits: Vec<IntelligenceLink> = links
            .values()
            .filter(|l| {
                (l.entity_a.kind == kind && l.entity_a.id == id)
                    || (l.entity_b.kind == kind && l.entity_b.id == id)
            })
            .filter(|l| link_type.map_or(true, |t| l.link_type == t))
            .filter(|l| min_confidence.map_or(true, |c| l.confidence >= c))
            .cloned()
            .collect();
        hits.sort_by(|a, b| {
            b.discovered_at
                .cmp(&a.discovered_at)
                .then_with(|| a.pair_key().cmp(&b.pair_key()))
        });
        Ok(hits)
    }

    async fn all_links(&self) -> Result<Vec<IntelligenceLink>> {
        let links = self.links.lock().unwrap();
        let mut all: Vec<IntelligenceLink> = links.values().cloned().collect();
        all.sort_by(|a, b| {
            a.discovered_at
                .cmp(&b.discovered_at)
                .then_with(|| a.pair_key().cmp(&b.pair_key()))
        });
        Ok(all)
    }

    async fn mark_false_positive(&self, id: Uuid) -> Result<bool> {
        let mut links = self.links.lock().unwrap();
        for link in links.values_mut() {
            if link.id == id {
                link.false_positive = true;
                return Ok(true);
            }
        }
        Ok(false)
    }
}
