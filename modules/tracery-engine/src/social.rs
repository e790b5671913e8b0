//! Social graph: channel-to-channel mention edges extracted from message
//! text, degree centrality with hub flagging, and label-propagation
//! communities. Everything here is deterministic — ties break on lowest
//! channel id so reruns reproduce the same hub set and partition.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use tracery_common::{
    Channel, CorrelationConfig, EntityRef, IntelligenceLink, LinkEvidence, LinkType, Message,
};

pub const DISCOVERED_BY: &str = "social_graph_builder";

static MENTION_RE: OnceLock<Regex> = OnceLock::new();

fn mention_regex() -> &'static Regex {
    MENTION_RE.get_or_init(|| Regex::new(r"@([A-Za-z0-9_]{2,32})").expect("valid mention pattern"))
}

/// All `@handle` tokens in the text, lowercased, repeats preserved —
/// repeated mentions weigh the edge.
pub fn extract_mentions(text: &str) -> Vec<String> {
    mention_regex()
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .collect()
}

/// Mention graph over channels with centrality and community results.
#[derive(Debug, Default)]
pub struct SocialGraph {
    /// Directed edge weights, `(source_channel, referenced_channel)` → count.
    pub edges: BTreeMap<(String, String), f64>,
    /// Degree centrality: sum of in+out edge weights per channel.
    pub centrality: BTreeMap<String, f64>,
    /// Channels at or above the configured degree percentile,
    /// highest degree first.
    pub hubs: Vec<String>,
    /// Channel → community label; labels are member channel ids.
    pub communities: BTreeMap<String, String>,
    /// Mentions of handles no known channel owns.
    pub unresolved_mentions: u64,
}

pub struct SocialGraphBuilder<'a> {
    config: &'a CorrelationConfig,
}

impl<'a> SocialGraphBuilder<'a> {
    pub fn new(config: &'a CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, messages: &[Message], channels: &[Channel]) -> SocialGraph {
        let registry: BTreeMap<String, String> = channels
            .iter()
            .map(|c| (c.handle.to_lowercase(), c.id.clone()))
            .collect();

        let mut graph = SocialGraph::default();
        for message in messages {
            for handle in extract_mentions(&message.text) {
                match registry.get(&handle) {
                    Some(referenced) if *referenced != message.channel_id => {
                        *graph
                            .edges
                            .entry((message.channel_id.clone(), referenced.clone()))
                            .or_insert(0.0) += 1.0;
                    }
                    Some(_) => {} // self-mention
                    None => graph.unresolved_mentions += 1,
                }
            }
        }

        graph.centrality = degrees(&graph.edges);
        graph.hubs = hubs(&graph.centrality, self.config.hub_percentile);
        graph.communities = communities(&graph.edges, self.config.label_max_iterations);
        graph
    }
}

/// Sum of in+out edge weights per channel.
fn degrees(edges: &BTreeMap<(String, String), f64>) -> BTreeMap<String, f64> {
    let mut degrees: BTreeMap<String, f64> = BTreeMap::new();
    for ((source, target), weight) in edges {
        *degrees.entry(source.clone()).or_insert(0.0) += weight;
        *degrees.entry(target.clone()).or_insert(0.0) += weight;
    }
    degrees
}

/// Channels whose degree reaches the given percentile of all degrees,
/// ordered by degree descending, then id.
fn hubs(centrality: &BTreeMap<String, f64>, percentile: f64) -> Vec<String> {
    if centrality.is_empty() {
        return Vec::new();
    }
    let mut values: Vec<f64> = centrality.values().copied().collect();
    values.sort_by(f64::total_cmp);
    let rank = ((percentile * values.len() as f64).ceil() as usize).max(1);
    let threshold = values[(rank - 1).min(values.len() - 1)];

    let mut hubs: Vec<(String, f64)> = centrality
        .iter()
        .filter(|(_, degree)| **degree >= threshold)
        .map(|(id, degree)| (id.clone(), *degree))
        .collect();
    hubs.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    hubs.into_iter().map(|(id, _)| id).collect()
}

/// Iterative label propagation over the undirected view of the graph.
/// Each node adopts the neighbor label with the highest summed edge
/// weight; ties break on the lowest label. Stops when stable or at the
/// iteration bound.
fn communities(
    edges: &BTreeMap<(String, String), f64>,
    max_iterations: u32,
) -> BTreeMap<String, String> {
    let mut neighbors: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for ((source, target), weight) in edges {
        neighbors
            .entry(source.as_str())
            .or_default()
            .push((target.as_str(), *weight));
        neighbors
            .entry(target.as_str())
            .or_default()
            .push((source.as_str(), *weight));
    }

    let mut labels: BTreeMap<String, String> = neighbors
        .keys()
        .map(|id| (id.to_string(), id.to_string()))
        .collect();

    for _ in 0..max_iterations {
        let mut changed = false;
        // BTreeMap iteration = sorted node order, part of the determinism
        // contract.
        let nodes: Vec<String> = labels.keys().cloned().collect();
        for node in nodes {
            let Some(adjacent) = neighbors.get(node.as_str()) else {
                continue;
            };
            let mut tally: BTreeMap<String, f64> = BTreeMap::new();
            for (neighbor, weight) in adjacent {
                let label = labels
                    .get(*neighbor)
                    .cloned()
                    .unwrap_or_else(|| (*neighbor).to_string());
                *tally.entry(label).or_insert(0.0) += *weight;
            }
            let Some(best) = best_label(&tally) else {
                continue;
            };
            if labels.get(&node) != Some(&best) {
                labels.insert(node, best);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    labels
}

/// Highest-weight label; ties go to the lexicographically smallest.
/// Sorted tally iteration plus a strictly-greater compare gives that
/// without a second pass.
fn best_label(tally: &BTreeMap<String, f64>) -> Option<String> {
    let mut best: Option<(&String, f64)> = None;
    for (label, weight) in tally {
        match &best {
            Some((_, best_weight)) if *weight <= *best_weight => {}
            _ => best = Some((label, *weight)),
        }
    }
    best.map(|(label, _)| label.clone())
}

/// Persist the mention graph as `social` links between channel pairs.
/// Reciprocal directed edges collapse into one link per unordered pair
/// (matching the link store's dedup key); strength is the combined edge
/// weight normalized by the larger endpoint degree. Confidence is fixed
/// high since mentions are literal extractions, not inferences.
pub fn social_links(
    graph: &SocialGraph,
    config: &CorrelationConfig,
    now: DateTime<Utc>,
) -> Vec<IntelligenceLink> {
    let mut pairs: BTreeMap<(String, String), f64> = BTreeMap::new();
    for ((source, target), weight) in &graph.edges {
        let key = if source <= target {
            (source.clone(), target.clone())
        } else {
            (target.clone(), source.clone())
        };
        *pairs.entry(key).or_insert(0.0) += *weight;
    }

    pairs
        .into_iter()
        .map(|((a, b), weight)| {
            let degree_a = graph.centrality.get(&a).copied().unwrap_or(weight);
            let degree_b = graph.centrality.get(&b).copied().unwrap_or(weight);
            let denominator = degree_a.max(degree_b).max(1.0);

            IntelligenceLink {
                id: Uuid::new_v4(),
                entity_a: EntityRef::channel(&a),
                entity_b: EntityRef::channel(&b),
                link_type: LinkType::Social,
                strength: (weight / denominator).min(1.0),
                confidence: config.social_confidence,
                evidence: LinkEvidence::Social {
                    mention_count: weight as u64,
                    edge_weight: weight,
                    source_degree: degree_a,
                    target_degree: degree_b,
                },
                discovered_by: DISCOVERED_BY.to_string(),
                discovered_at: now,
                false_positive: false,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    fn channels(ids: &[&str]) -> Vec<Channel> {
        ids.iter().map(|id| testing::channel(id, id)).collect()
    }

    fn mention_message(from: &str, text: &str) -> Message {
        testing::message(from, Utc::now(), text)
    }

    #[test]
    fn extracts_handles_case_insensitively() {
        let mentions = extract_mentions("kijk bij @HavenWacht en @domstad, @HavenWacht weet meer");
        assert_eq!(mentions, vec!["havenwacht", "domstad", "havenwacht"]);
    }

    #[test]
    fn ignores_bare_at_and_short_handles() {
        assert!(extract_mentions("mail @ x").is_empty());
        assert_eq!(extract_mentions("@ab is genoeg").len(), 1);
    }

    #[test]
    fn unresolved_and_self_mentions_do_not_create_edges() {
        let cfg = CorrelationConfig::default();
        let builder = SocialGraphBuilder::new(&cfg);
        let messages = vec![
            mention_message("a", "@a praat over zichzelf"),
            mention_message("a", "@spookkanaal bestaat niet"),
        ];
        let graph = builder.build(&messages, &channels(&["a", "b"]));
        assert!(graph.edges.is_empty());
        assert_eq!(graph.unresolved_mentions, 1);
    }

    #[test]
    fn degree_centrality_sums_in_and_out_weights() {
        let cfg = CorrelationConfig::default();
        let builder = SocialGraphBuilder::new(&cfg);
        let messages = vec![
            mention_message("a", "zie @b"),
            mention_message("a", "nogmaals @b"),
            mention_message("b", "terug naar @a"),
            mention_message("c", "volg @a"),
        ];
        let graph = builder.build(&messages, &channels(&["a", "b", "c"]));

        assert_eq!(graph.edges.get(&("a".into(), "b".into())), Some(&2.0));
        assert_eq!(graph.centrality.get("a"), Some(&4.0));
        assert_eq!(graph.centrality.get("b"), Some(&3.0));
        assert_eq!(graph.centrality.get("c"), Some(&1.0));
    }

    #[test]
    fn hub_set_and_communities_are_stable_across_reruns() {
        let cfg = CorrelationConfig::default();
        let builder = SocialGraphBuilder::new(&cfg);
        let messages: Vec<Message> = vec![
            mention_message("a", "@b @c"),
            mention_message("b", "@a"),
            mention_message("c", "@a"),
            mention_message("d", "@e"),
            mention_message("e", "@d @d"),
        ];
        let all = channels(&["a", "b", "c", "d", "e"]);

        let first = builder.build(&messages, &all);
        let second = builder.build(&messages, &all);
        assert_eq!(first.hubs, second.hubs);
        assert_eq!(first.communities, second.communities);
        assert_eq!(first.edges, second.edges);
    }

    #[test]
    fn label_propagation_splits_disconnected_clusters() {
        let cfg = CorrelationConfig::default();
        let builder = SocialGraphBuilder::new(&cfg);
        // Two clusters: {a, b, c} densely mentioning, {x, y} apart.
        let messages = vec![
            mention_message("a", "@b @c"),
            mention_message("b", "@a @c"),
            mention_message("c", "@a @b"),
            mention_message("x", "@y"),
            mention_message("y", "@x"),
        ];
        let graph = builder.build(&messages, &channels(&["a", "b", "c", "x", "y"]));

        let cluster_one: Vec<&String> =
            ["a", "b", "c"].iter().map(|n| &graph.communities[*n]).collect();
        assert!(
            cluster_one.iter().all(|l| **l == *cluster_one[0]),
            "first cluster shares a label"
        );
        assert_ne!(graph.communities["a"], graph.communities["x"]);
        assert_eq!(graph.communities["x"], graph.communities["y"]);
        // Labels are cluster members, so the partition is self-describing.
        assert!(["x", "y"].contains(&graph.communities["x"].as_str()));
    }

    #[test]
    fn hubs_respect_percentile() {
        let centrality: BTreeMap<String, f64> = (0..10)
            .map(|i| (format!("ch{i:02}"), i as f64))
            .collect();
        let top = hubs(&centrality, 0.9);
        assert_eq!(top, vec!["ch09".to_string(), "ch08".to_string()]);
    }

    #[test]
    fn social_link_strength_is_normalized_by_larger_degree() {
        let cfg = CorrelationConfig::default();
        let builder = SocialGraphBuilder::new(&cfg);
        let messages = vec![
            mention_message("a", "@b"),
            mention_message("a", "@b"),
            mention_message("c", "@a"),
        ];
        let graph = builder.build(&messages, &channels(&["a", "b", "c"]));
        let links = social_links(&graph, &cfg, Utc::now());

        assert_eq!(links.len(), 2);
        for link in &links {
            assert!(link.strength > 0.0 && link.strength <= 1.0);
            assert_eq!(link.confidence, 0.85);
            assert_eq!(link.link_type, LinkType::Social);
        }
        // a→b weight 2, deg(a)=3, deg(b)=2 → 2/3.
        let ab = links
            .iter()
            .find(|l| l.entity_a.id == "a" && l.entity_b.id == "b")
            .unwrap();
        assert!((ab.strength - 2.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn reciprocal_mentions_collapse_into_one_pair_link() {
        let cfg = CorrelationConfig::default();
        let builder = SocialGraphBuilder::new(&cfg);
        let messages = vec![mention_message("a", "@b"), mention_message("b", "@a")];
        let graph = builder.build(&messages, &channels(&["a", "b"]));
        let links = social_links(&graph, &cfg, Utc::now());

        assert_eq!(links.len(), 1, "both directions share one pair link");
        match &links[0].evidence {
            LinkEvidence::Social {
                mention_count,
                edge_weight,
                ..
            } => {
                assert_eq!(*mention_count, 2);
                assert_eq!(*edge_weight, 2.0);
            }
            other => panic!("expected social evidence, got {other:?}"),
        }
        // Combined weight 2 over shared degree 2.
        assert_eq!(links[0].strength, 1.0);
    }
}
