//! Vocabulary mining: TF-IDF ranking of the linked-message corpus against
//! the full corpus. Terms that score high among messages that produced
//! high-confidence links, but are rare overall, are the words worth
//! watching for next cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use tracery_common::{CorrelationConfig, VocabularyProposal};

/// Tokens shorter than this never become vocabulary candidates; two-letter
/// fragments are function words in every language this runs against.
const MIN_TERM_LEN: usize = 3;

/// Rank candidate terms from the linked corpus and propose the top N not
/// already in the vocabulary. Terms clearing the corpus-frequency floor
/// are flagged for automatic addition; the rest queue for manual review.
///
/// Empty corpora yield no proposals — mining is skipped for the cycle,
/// never an error.
pub fn mine_terms(
    linked_docs: &[Vec<String>],
    corpus_docs: &[Vec<String>],
    vocabulary: &BTreeMap<String, f64>,
    config: &CorrelationConfig,
    now: DateTime<Utc>,
) -> Vec<VocabularyProposal> {
    if linked_docs.is_empty() || corpus_docs.is_empty() {
        return Vec::new();
    }

    // Document frequency over the linked corpus.
    let mut linked_df: HashMap<&str, usize> = HashMap::new();
    for doc in linked_docs {
        let distinct: BTreeSet<&str> = doc
            .iter()
            .map(|t| t.as_str())
            .filter(|t| t.len() >= MIN_TERM_LEN)
            .collect();
        for term in distinct {
            *linked_df.entry(term).or_insert(0) += 1;
        }
    }

    // Document frequency over the full corpus.
    let mut corpus_df: HashMap<&str, usize> = HashMap::new();
    for doc in corpus_docs {
        let distinct: HashSet<&str> = doc.iter().map(|t| t.as_str()).collect();
        for term in distinct {
            *corpus_df.entry(term).or_insert(0) += 1;
        }
    }

    let linked_total = linked_docs.len() as f64;
    let corpus_total = corpus_docs.len() as f64;

    let mut scored: Vec<(String, f64, f64)> = linked_df
        .into_iter()
        .filter(|(term, _)| !vocabulary.contains_key(*term))
        .map(|(term, df)| {
            let tf = df as f64 / linked_total;
            let in_corpus = corpus_df.get(term).copied().unwrap_or(0) as f64;
            let idf = (corpus_total / (1.0 + in_corpus)).ln();
            let corpus_frequency = in_corpus / corpus_total;
            (term.to_string(), tf * idf, corpus_frequency)
        })
        .filter(|(_, score, _)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    scored
        .into_iter()
        .take(config.vocabulary_top_n)
        .map(|(term, score, corpus_frequency)| VocabularyProposal {
            term,
            score,
            corpus_frequency,
            auto_added: corpus_frequency >= config.min_corpus_frequency,
            proposed_at: now,
        })
        .collect()
}
