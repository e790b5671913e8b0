//! Postgres-backed link and profile stores.
//!
//! The schema is deliberately plain: the graph here is small enough for a
//! relational table with a canonical pair key, and `ON CONFLICT` gives the
//! dedup-on-conflict write semantics the cycle relies on. Queries are
//! runtime-checked; `migrate` is idempotent and runs at binary startup.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

use tracery_common::{
    Channel, ChannelProfile, EntityKind, EntityRef, GeoPoint, Incident, IntelligenceLink, LinkType,
    Message, Tier, VocabularyProposal,
};

use crate::links::{merge_link, LinkStore, UpsertOutcome};
use crate::observations::ObservationStore;
use crate::profiles::ProfileStore;

/// Create all engine tables if they do not exist yet.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS intelligence_links (
            pair_key TEXT PRIMARY KEY,
            id UUID NOT NULL,
            entity_a_kind TEXT NOT NULL,
            entity_a_id TEXT NOT NULL,
            entity_b_kind TEXT NOT NULL,
            entity_b_id TEXT NOT NULL,
            link_type TEXT NOT NULL,
            strength DOUBLE PRECISION NOT NULL,
            confidence DOUBLE PRECISION NOT NULL,
            evidence JSONB NOT NULL,
            discovered_by TEXT NOT NULL,
            discovered_at TIMESTAMPTZ NOT NULL,
            false_positive BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE INDEX IF NOT EXISTS idx_links_entity_a
            ON intelligence_links (entity_a_kind, entity_a_id)",
        "CREATE INDEX IF NOT EXISTS idx_links_entity_b
            ON intelligence_links (entity_b_kind, entity_b_id)",
        "CREATE TABLE IF NOT EXISTS channel_profiles (
            channel_id TEXT NOT NULL,
            cycle BIGINT NOT NULL,
            tier TEXT NOT NULL,
            utility_score DOUBLE PRECISION NOT NULL,
            hit_rate DOUBLE PRECISION NOT NULL,
            incidents_linked INTEGER NOT NULL,
            high_confidence_links INTEGER NOT NULL,
            total_messages INTEGER NOT NULL,
            false_positive_count INTEGER NOT NULL,
            vocabulary JSONB NOT NULL,
            evaluated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (channel_id, cycle)
        )",
        "CREATE TABLE IF NOT EXISTS vocabulary (
            term TEXT PRIMARY KEY,
            weight DOUBLE PRECISION NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS vocabulary_proposals (
            term TEXT PRIMARY KEY,
            score DOUBLE PRECISION NOT NULL,
            corpus_frequency DOUBLE PRECISION NOT NULL,
            auto_added BOOLEAN NOT NULL,
            proposed_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS cycle_cursor (
            singleton INTEGER PRIMARY KEY DEFAULT 1 CHECK (singleton = 1),
            cursor TIMESTAMPTZ NOT NULL,
            committed_at TIMESTAMPTZ NOT NULL
        )",
        // Observation tables are owned and populated by the collectors;
        // created here only so a fresh deployment starts without manual DDL.
        "CREATE TABLE IF NOT EXISTS incidents (
            id UUID PRIMARY KEY,
            occurred_at TIMESTAMPTZ NOT NULL,
            lat DOUBLE PRECISION,
            lng DOUBLE PRECISION,
            location_name TEXT,
            description TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS messages (
            id UUID PRIMARY KEY,
            channel_id TEXT NOT NULL,
            posted_at TIMESTAMPTZ NOT NULL,
            text TEXT NOT NULL,
            engagement INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_messages_posted_at ON messages (posted_at)",
        "CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            handle TEXT NOT NULL,
            display_name TEXT NOT NULL,
            platform TEXT
        )",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Store migration complete");
    Ok(())
}

/// Read-only adapter over the collector-owned observation tables.
pub struct PgObservationStore {
    pool: PgPool,
}

impl PgObservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn incident_from_row(row: &sqlx::postgres::PgRow) -> Result<Incident> {
    let lat: Option<f64> = row.try_get("lat")?;
    let lng: Option<f64> = row.try_get("lng")?;
    Ok(Incident {
        id: row.try_get("id")?,
        occurred_at: row.try_get("occurred_at")?,
        location: match (lat, lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint { lat, lng }),
            _ => None,
        },
        location_name: row.try_get("location_name")?,
        description: row.try_get("description")?,
    })
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> Result<Message> {
    Ok(Message {
        id: row.try_get("id")?,
        channel_id: row.try_get("channel_id")?,
        posted_at: row.try_get("posted_at")?,
        text: row.try_get("text")?,
        engagement: row.try_get::<i32, _>("engagement")?.max(0) as u32,
    })
}

#[async_trait]
impl ObservationStore for PgObservationStore {
    async fn incidents_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Incident>> {
        let rows = sqlx::query(
            "SELECT * FROM incidents
             WHERE occurred_at >= $1 AND occurred_at < $2
             ORDER BY occurred_at",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(incident_from_row).collect()
    }

    async fn messages_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        channel_id: Option<&str>,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT * FROM messages
             WHERE posted_at >= $1 AND posted_at < $2
               AND ($3::TEXT IS NULL OR channel_id = $3)
             ORDER BY posted_at",
        )
        .bind(from)
        .bind(to)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn channels(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query("SELECT * FROM channels ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(Channel {
                    id: row.try_get("id")?,
                    handle: row.try_get("handle")?,
                    display_name: row.try_get("display_name")?,
                    platform: row.try_get("platform")?,
                })
            })
            .collect()
    }

    async fn incident_by_id(&self, id: Uuid) -> Result<Option<Incident>> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(incident_from_row).transpose()
    }

    async fn message_by_id(&self, id: Uuid) -> Result<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }
}

pub struct PgLinkStore {
    pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn link_from_row(row: &sqlx::postgres::PgRow) -> Result<IntelligenceLink> {
    let evidence: serde_json::Value = row.try_get("evidence")?;
    Ok(IntelligenceLink {
        id: row.try_get("id")?,
        entity_a: EntityRef {
            kind: EntityKind::from_str_loose(row.try_get::<String, _>("entity_a_kind")?.as_str()),
            id: row.try_get("entity_a_id")?,
        },
        entity_b: EntityRef {
            kind: EntityKind::from_str_loose(row.try_get::<String, _>("entity_b_kind")?.as_str()),
            id: row.try_get("entity_b_id")?,
        },
        link_type: LinkType::from_str_loose(row.try_get::<String, _>("link_type")?.as_str()),
        strength: row.try_get("strength")?,
        confidence: row.try_get("confidence")?,
        evidence: serde_json::from_value(evidence).context("malformed evidence JSON")?,
        discovered_by: row.try_get("discovered_by")?,
        discovered_at: row.try_get("discovered_at")?,
        false_positive: row.try_get("false_positive")?,
    })
}

async fn write_link(pool: &PgPool, key: &str, link: &IntelligenceLink) -> Result<()> {
    sqlx::query(
        "INSERT INTO intelligence_links
            (pair_key, id, entity_a_kind, entity_a_id, entity_b_kind, entity_b_id,
             link_type, strength, confidence, evidence, discovered_by, discovered_at,
             false_positive)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (pair_key) DO UPDATE SET
            strength = EXCLUDED.strength,
            confidence = EXCLUDED.confidence,
            evidence = EXCLUDED.evidence,
            discovered_by = EXCLUDED.discovered_by",
    )
    .bind(key)
    .bind(link.id)
    .bind(link.entity_a.kind.to_string())
    .bind(&link.entity_a.id)
    .bind(link.entity_b.kind.to_string())
    .bind(&link.entity_b.id)
    .bind(link.link_type.to_string())
    .bind(link.strength)
    .bind(link.confidence)
    .bind(serde_json::to_value(&link.evidence)?)
    .bind(&link.discovered_by)
    .bind(link.discovered_at)
    .bind(link.false_positive)
    .execute(pool)
    .await?;
    Ok(())
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn upsert(&self, link: IntelligenceLink) -> Result<UpsertOutcome> {
        let key = link.pair_key();
        let existing = sqlx::query("SELECT * FROM intelligence_links WHERE pair_key = $1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;

        match existing {
            None => {
                write_link(&self.pool, &key, &link).await?;
                Ok(UpsertOutcome::Created)
            }
            Some(row) => {
                let stored = link_from_row(&row)?;
                match merge_link(&stored, &link) {
                    None => Ok(UpsertOutcome::Unchanged),
                    Some(revised) => {
                        write_link(&self.pool, &key, &revised).await?;
                        Ok(UpsertOutcome::Updated)
                    }
                }
            }
        }
    }

    async fn links_for(
        &self,
        kind: EntityKind,
        id: &str,
        link_type: Option<LinkType>,
        min_confidence: Option<f64>,
    ) -> Result<Vec<IntelligenceLink>> {
        let rows = sqlx::query(
            "SELECT * FROM intelligence_links
             WHERE ((entity_a_kind = $1 AND entity_a_id = $2)
                 OR (entity_b_kind = $1 AND entity_b_id = $2))
               AND ($3::TEXT IS NULL OR link_type = $3)
               AND ($4::DOUBLE PRECISION IS NULL OR confidence >= $4)
             ORDER BY discovered_at DESC, pair_key",
        )
        .bind(kind.to_string())
        .bind(id)
        .bind(link_type.map(|t| t.to_string()))
        .bind(min_confidence)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(link_from_row).collect()
    }

    async fn all_links(&self) -> Result<Vec<IntelligenceLink>> {
        let rows =
            sqlx::query("SELECT * FROM intelligence_links ORDER BY discovered_at, pair_key")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(link_from_row).collect()
    }

    async fn mark_false_positive(&self, id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("UPDATE intelligence_links SET false_positive = TRUE WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgProfileStore {
    pool: PgPool,
}

impl PgProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn profile_from_row(row: &sqlx::postgres::PgRow) -> Result<ChannelProfile> {
    let vocabulary: serde_json::Value = row.try_get("vocabulary")?;
    Ok(ChannelProfile {
        channel_id: row.try_get("channel_id")?,
        cycle: row.try_get::<i64, _>("cycle")? as u64,
        tier: Tier::from_str_loose(row.try_get::<String, _>("tier")?.as_str()),
        utility_score: row.try_get("utility_score")?,
        hit_rate: row.try_get("hit_rate")?,
        incidents_linked: row.try_get::<i32, _>("incidents_linked")? as u32,
        high_confidence_links: row.try_get::<i32, _>("high_confidence_links")? as u32,
        total_messages: row.try_get::<i32, _>("total_messages")? as u32,
        false_positive_count: row.try_get::<i32, _>("false_positive_count")? as u32,
        vocabulary: serde_json::from_value(vocabulary).context("malformed vocabulary JSON")?,
        evaluated_at: row.try_get("evaluated_at")?,
    })
}

#[async_trait]
impl ProfileStore for PgProfileStore {
    async fn latest_cycle(&self) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT MAX(cycle) AS cycle FROM channel_profiles")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<Option<i64>, _>("cycle")?.map(|c| c as u64))
    }

    async fn latest_profiles(&self) -> Result<Vec<ChannelProfile>> {
        let rows = sqlx::query(
            "SELECT * FROM channel_profiles
             WHERE cycle = (SELECT MAX(cycle) FROM channel_profiles)
             ORDER BY channel_id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn profile_history(&self, channel_id: &str) -> Result<Vec<ChannelProfile>> {
        let rows = sqlx::query(
            "SELECT * FROM channel_profiles WHERE channel_id = $1 ORDER BY cycle",
        )
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(profile_from_row).collect()
    }

    async fn publish_cycle(&self, cycle: u64, profiles: Vec<ChannelProfile>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for profile in &profiles {
            sqlx::query(
                "INSERT INTO channel_profiles
                    (channel_id, cycle, tier, utility_score, hit_rate, incidents_linked,
                     high_confidence_links, total_messages, false_positive_count,
                     vocabulary, evaluated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                 ON CONFLICT (channel_id, cycle) DO UPDATE SET
                    tier = EXCLUDED.tier,
                    utility_score = EXCLUDED.utility_score,
                    hit_rate = EXCLUDED.hit_rate,
                    incidents_linked = EXCLUDED.incidents_linked,
                    high_confidence_links = EXCLUDED.high_confidence_links,
                    total_messages = EXCLUDED.total_messages,
                    false_positive_count = EXCLUDED.false_positive_count,
                    vocabulary = EXCLUDED.vocabulary,
                    evaluated_at = EXCLUDED.evaluated_at",
            )
            .bind(&profile.channel_id)
            .bind(cycle as i64)
            .bind(profile.tier.to_string())
            .bind(profile.utility_score)
            .bind(profile.hit_rate)
            .bind(profile.incidents_linked as i32)
            .bind(profile.high_confidence_links as i32)
            .bind(profile.total_messages as i32)
            .bind(profile.false_positive_count as i32)
            .bind(serde_json::to_value(&profile.vocabulary)?)
            .bind(profile.evaluated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn vocabulary(&self) -> Result<BTreeMap<String, f64>> {
        let rows = sqlx::query("SELECT term, weight FROM vocabulary")
            .fetch_all(&self.pool)
            .await?;
        let mut terms = BTreeMap::new();
        for row in rows {
            terms.insert(row.try_get("term")?, row.try_get("weight")?);
        }
        Ok(terms)
    }

    async fn replace_vocabulary(&self, terms: BTreeMap<String, f64>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM vocabulary").execute(&mut *tx).await?;
        for (term, weight) in &terms {
            sqlx::query("INSERT INTO vocabulary (term, weight) VALUES ($1, $2)")
                .bind(term)
                .bind(weight)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn queue_proposals(&self, proposals: Vec<VocabularyProposal>) -> Result<()> {
        for proposal in &proposals {
            sqlx::query(
                "INSERT INTO vocabulary_proposals
                    (term, score, corpus_frequency, auto_added, proposed_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (term) DO UPDATE SET
                    score = EXCLUDED.score,
                    corpus_frequency = EXCLUDED.corpus_frequency,
                    proposed_at = EXCLUDED.proposed_at",
            )
            .bind(&proposal.term)
            .bind(proposal.score)
            .bind(proposal.corpus_frequency)
            .bind(proposal.auto_added)
            .bind(proposal.proposed_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn pending_proposals(&self) -> Result<Vec<VocabularyProposal>> {
        let rows = sqlx::query(
            "SELECT * FROM vocabulary_proposals WHERE NOT auto_added ORDER BY score DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(VocabularyProposal {
                    term: row.try_get("term")?,
                    score: row.try_get("score")?,
                    corpus_frequency: row.try_get("corpus_frequency")?,
                    auto_added: row.try_get("auto_added")?,
                    proposed_at: row.try_get("proposed_at")?,
                })
            })
            .collect()
    }

    async fn cursor(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT cursor FROM cycle_cursor WHERE singleton = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("cursor")?),
            None => None,
        })
    }

    async fn commit_cursor(&self, cursor: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO cycle_cursor (singleton, cursor, committed_at)
             VALUES (1, $1, $2)
             ON CONFLICT (singleton) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                committed_at = EXCLUDED.committed_at",
        )
        .bind(cursor)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
