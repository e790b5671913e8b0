use std::env;

use typed_builder::TypedBuilder;

/// Numeric thresholds for the correlators and the adaptive cycle.
///
/// None of these are derived from first principles; they were calibrated
/// against a single small labeled dataset and should be recalibrated
/// against a larger corpus before operational use. Tests override
/// individual fields through the builder.
#[derive(Debug, Clone, TypedBuilder)]
pub struct CorrelationConfig {
    // Temporal
    /// Half-width of the observation window around an incident.
    #[builder(default = 6.0)]
    pub window_hours: f64,
    /// Length of the baseline period preceding the window.
    #[builder(default = 7)]
    pub baseline_days: i64,
    /// Below this many days of baseline data, temporal correlation is
    /// skipped for the incident.
    #[builder(default = 3)]
    pub min_baseline_days: i64,
    /// z-score gate for message-volume spikes.
    #[builder(default = 2.5)]
    pub z_threshold: f64,
    /// Fallback gate when baseline variance is zero.
    #[builder(default = 10)]
    pub absolute_spike_threshold: u64,
    /// Engagement at or above this counts as the volume bonus.
    #[builder(default = 25)]
    pub high_engagement: u32,

    // Spatial
    /// Maximum distance between a resolved place mention and the incident.
    #[builder(default = 25.0)]
    pub radius_km: f64,
    /// Geohash precision recorded in spatial evidence cells.
    #[builder(default = 5)]
    pub geohash_precision: usize,

    // Social
    /// Channels at or above this degree percentile are flagged as hubs.
    #[builder(default = 0.90)]
    pub hub_percentile: f64,
    /// Iteration bound for label propagation.
    #[builder(default = 20)]
    pub label_max_iterations: u32,
    /// Fixed confidence for mention edges (literal extractions).
    #[builder(default = 0.85)]
    pub social_confidence: f64,

    // Content
    /// Minimum distinct vocabulary terms for a high-value message.
    #[builder(default = 2)]
    pub min_distinct_terms: usize,
    /// Minimum vocabulary-hit density for a high-value message.
    #[builder(default = 0.08)]
    pub density_threshold: f64,

    // Evaluation and adaptation
    /// Links at or above this confidence count as high-confidence.
    #[builder(default = 0.7)]
    pub high_confidence: f64,
    #[builder(default = 50.0)]
    pub promote_utility: f64,
    #[builder(default = 0.05)]
    pub promote_hit_rate: f64,
    #[builder(default = 5.0)]
    pub demote_utility: f64,
    /// Demotion requires at least this many messages in the period.
    #[builder(default = 50)]
    pub demote_min_messages: u32,
    /// Utility deduction per recorded false positive.
    #[builder(default = 3.0)]
    pub false_positive_penalty: f64,
    /// Number of top-ranked TF-IDF terms proposed per cycle.
    #[builder(default = 10)]
    pub vocabulary_top_n: usize,
    /// Corpus-frequency floor for automatic vocabulary additions; terms
    /// below it are queued for manual review instead.
    #[builder(default = 0.01)]
    pub min_corpus_frequency: f64,
    /// Age at which high-confidence temporal links are re-examined.
    #[builder(default = 14)]
    pub review_horizon_days: i64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Postgres connection string for the link/profile stores. When unset
    /// the engine runs against the in-memory stores.
    pub database_url: Option<String>,
    /// How far back the first cycle reaches when no cursor exists yet.
    pub cold_start_lookback_days: i64,
    pub correlation: CorrelationConfig,
}

impl EngineConfig {
    /// Load configuration from environment variables. Numeric thresholds
    /// fall back to their calibrated defaults when unset.
    pub fn from_env() -> Self {
        let correlation = CorrelationConfig::builder()
            .window_hours(env_f64("TRACERY_WINDOW_HOURS", 6.0))
            .baseline_days(env_i64("TRACERY_BASELINE_DAYS", 7))
            .z_threshold(env_f64("TRACERY_Z_THRESHOLD", 2.5))
            .radius_km(env_f64("TRACERY_RADIUS_KM", 25.0))
            .hub_percentile(env_f64("TRACERY_HUB_PERCENTILE", 0.90))
            .density_threshold(env_f64("TRACERY_DENSITY_THRESHOLD", 0.08))
            .high_confidence(env_f64("TRACERY_HIGH_CONFIDENCE", 0.7))
            .promote_utility(env_f64("TRACERY_PROMOTE_UTILITY", 50.0))
            .promote_hit_rate(env_f64("TRACERY_PROMOTE_HIT_RATE", 0.05))
            .demote_utility(env_f64("TRACERY_DEMOTE_UTILITY", 5.0))
            .review_horizon_days(env_i64("TRACERY_REVIEW_HORIZON_DAYS", 14))
            .build();

        Self {
            database_url: env::var("DATABASE_URL").ok(),
            cold_start_lookback_days: env_i64("TRACERY_COLD_START_LOOKBACK_DAYS", 14),
            correlation,
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .map(|v| {
            v.parse()
                .unwrap_or_else(|_| panic!("{key} must be a number"))
        })
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .map(|v| {
            v.parse()
                .unwrap_or_else(|_| panic!("{key} must be an integer"))
        })
        .unwrap_or(default)
}
