//! Content value scoring: vocabulary-density flagging of individual
//! messages, independent of any incident. High-value messages become
//! candidates for temporal/spatial correlation before an incident exists.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use tracery_common::{
    CorrelationConfig, EntityRef, IntelligenceLink, LinkEvidence, LinkType, Message,
};

pub const DISCOVERED_BY: &str = "content_value_scorer";

/// Lowercased word tokens. Single characters are dropped; they are
/// punctuation residue, not content.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// Distinct vocabulary terms present in the token set, in sorted order.
/// Vocabulary terms are single tokens.
pub fn matched_terms(tokens: &[String], vocabulary: &BTreeMap<String, f64>) -> Vec<String> {
    let present: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
    vocabulary
        .keys()
        .filter(|term| present.contains(term.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct ContentScore {
    pub is_high_value: bool,
    pub density: f64,
    pub matched: Vec<String>,
    pub token_count: u32,
}

/// Score a message against the current vocabulary. High value requires
/// both enough distinct terms and enough density; a short message with
/// one hot word does not qualify, nor does a long message that happens
/// to brush two terms.
pub fn score_content(text: &str, vocabulary: &BTreeMap<String, f64>, config: &CorrelationConfig) -> ContentScore {
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return ContentScore {
            is_high_value: false,
            density: 0.0,
            matched: Vec::new(),
            token_count: 0,
        };
    }

    let matched = matched_terms(&tokens, vocabulary);
    let density = matched.len() as f64 / tokens.len() as f64;
    let is_high_value =
        matched.len() >= config.min_distinct_terms && density > config.density_threshold;

    ContentScore {
        is_high_value,
        density,
        matched,
        token_count: tokens.len() as u32,
    }
}

/// Flags high-value messages and records them as `content` links between
/// the message and the matched-term set.
pub struct ContentValueScorer<'a> {
    config: &'a CorrelationConfig,
    vocabulary: &'a BTreeMap<String, f64>,
}

impl<'a> ContentValueScorer<'a> {
    pub fn new(config: &'a CorrelationConfig, vocabulary: &'a BTreeMap<String, f64>) -> Self {
        Self { config, vocabulary }
    }

    pub fn score_message(
        &self,
        message: &Message,
        now: DateTime<Utc>,
    ) -> Option<IntelligenceLink> {
        let score = score_content(&message.text, self.vocabulary, self.config);
        if !score.is_high_value {
            return None;
        }

        // Density is the closeness measure; confidence grows with the
        // number of distinct corroborating terms.
        let confidence = (0.4 + 0.1 * score.matched.len() as f64).min(0.9);

        Some(IntelligenceLink {
            id: Uuid::new_v4(),
            entity_a: EntityRef::message(message.id),
            entity_b: EntityRef::vocabulary(&score.matched),
            link_type: LinkType::Content,
            strength: score.density.min(1.0),
            confidence,
            evidence: LinkEvidence::Content {
                matched_terms: score.matched,
                density: score.density,
                token_count: score.token_count,
            },
            discovered_by: DISCOVERED_BY.to_string(),
            discovered_at: now,
            false_positive: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn vocabulary() -> BTreeMap<String, f64> {
        let mut vocab = BTreeMap::new();
        vocab.insert("konvooi".to_string(), 1.0);
        vocab.insert("blokkade".to_string(), 1.0);
        vocab.insert("drone".to_string(), 0.8);
        vocab
    }

    #[test]
    fn tokenize_strips_punctuation_and_case() {
        let tokens = tokenize("Konvooi gespot bij de A12, richting Utrecht!");
        assert!(tokens.contains(&"konvooi".to_string()));
        assert!(tokens.contains(&"a12".to_string()));
        assert!(tokens.contains(&"utrecht".to_string()));
        assert!(!tokens.iter().any(|t| t.contains(',')));
    }

    #[test]
    fn density_counts_distinct_hits_over_total_tokens() {
        let cfg = CorrelationConfig::default();
        // 10 tokens, 2 distinct vocabulary hits ("konvooi" counted once).
        let score = score_content(
            "konvooi konvooi blokkade op de brug gezien vanmorgen richting haven",
            &vocabulary(),
            &cfg,
        );
        assert_eq!(score.token_count, 10);
        assert_eq!(score.matched, vec!["blokkade", "konvooi"]);
        assert!((score.density - 0.2).abs() < 1e-10);
        assert!(score.is_high_value);
    }

    #[test]
    fn one_term_is_not_high_value() {
        let cfg = CorrelationConfig::default();
        let score = score_content("konvooi gespot", &vocabulary(), &cfg);
        assert_eq!(score.matched.len(), 1);
        assert!(!score.is_high_value);
    }

    #[test]
    fn low_density_is_not_high_value_despite_two_terms() {
        let cfg = CorrelationConfig::builder().density_threshold(0.2).build();
        let text = "konvooi en blokkade genoemd in een verder heel lang verhaal \
                    over van alles en nog wat zonder enige verdere inhoud vandaag";
        let score = score_content(text, &vocabulary(), &cfg);
        assert_eq!(score.matched.len(), 2);
        assert!(!score.is_high_value);
    }

    #[test]
    fn empty_text_scores_zero() {
        let cfg = CorrelationConfig::default();
        let score = score_content("   ...   ", &vocabulary(), &cfg);
        assert!(!score.is_high_value);
        assert_eq!(score.density, 0.0);
        assert_eq!(score.token_count, 0);
    }

    #[test]
    fn high_value_message_produces_canonical_content_link() {
        let cfg = CorrelationConfig::default();
        let vocab = vocabulary();
        let scorer = ContentValueScorer::new(&cfg, &vocab);
        let now = Utc::now();

        let message = testing::message(
            "telegram:havenwacht",
            now,
            "drone boven het konvooi bij de blokkade",
        );
        let link = scorer.score_message(&message, now).expect("high value");

        assert_eq!(link.link_type, LinkType::Content);
        assert_eq!(link.entity_b.id, "blokkade+drone+konvooi");
        assert!(link.strength > 0.0 && link.strength <= 1.0);
        match &link.evidence {
            LinkEvidence::Content { matched_terms, .. } => {
                assert_eq!(matched_terms.len(), 3);
            }
            other => panic!("expected content evidence, got {other:?}"),
        }
    }

    #[test]
    fn low_value_message_produces_no_link() {
        let cfg = CorrelationConfig::default();
        let vocab = vocabulary();
        let scorer = ContentValueScorer::new(&cfg, &vocab);
        let now = Utc::now();

        let message = testing::message("telegram:havenwacht", now, "mooie dag vandaag");
        assert!(scorer.score_message(&message, now).is_none());
    }
}
