use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// BM25 defaults — fixed per index build (§4.1).
pub const DEFAULT_BM25_K1: f32 = 1.5;
pub const DEFAULT_BM25_B: f32 = 0.75;
pub const DEFAULT_MAX_VOCABULARY_SIZE: usize = 500_000;
pub const DEFAULT_MAX_INPUT_BYTES: usize = 100 * 1024; // 100 KB floor per §4.1.

pub const DEFAULT_DENSE_WEIGHT: f32 = 0.7;
pub const DEFAULT_SPARSE_WEIGHT: f32 = 0.3;
pub const DEFAULT_RESET_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

pub const DEFAULT_HISTORY_TURNS: usize = 5;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 8_000;

pub const DEFAULT_CLAIM_TTL_SECS: i64 = 30 * 60;
pub const DEFAULT_FOLLOWUP_TTL_SECS: u64 = 120;
pub const MIN_FOLLOWUP_TTL_SECS: u64 = 30;

pub const DEFAULT_PLUGIN_START_TIMEOUT_MS: u64 = 10_000;

/// Top-level config (concord.toml + CONCORD_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConcordConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub followup: FollowupConfig,
    #[serde(default)]
    pub gateway: GatewayRuntimeConfig,
}

impl ConcordConfig {
    /// Load config from a TOML file with CONCORD_* env var overrides,
    /// following the teacher's figment-based `SkynetConfig::load`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("CONCORD_").split("__"));

        figment
            .extract()
            .map_err(|e| crate::error::ConcordError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f32,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f32,
    #[serde(default = "default_max_vocab")]
    pub max_vocabulary_size: usize,
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
    #[serde(default = "default_dense_weight")]
    pub dense_weight: f32,
    #[serde(default = "default_sparse_weight")]
    pub sparse_weight: f32,
    #[serde(default = "default_reset_interval")]
    pub reset_interval_secs: u64,
    #[serde(default = "default_embed_batch")]
    pub embed_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_k1: DEFAULT_BM25_K1,
            bm25_b: DEFAULT_BM25_B,
            max_vocabulary_size: DEFAULT_MAX_VOCABULARY_SIZE,
            max_input_bytes: DEFAULT_MAX_INPUT_BYTES,
            dense_weight: DEFAULT_DENSE_WEIGHT,
            sparse_weight: DEFAULT_SPARSE_WEIGHT,
            reset_interval_secs: DEFAULT_RESET_INTERVAL_SECS,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            history_turns: DEFAULT_HISTORY_TURNS,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    #[serde(default = "default_claim_ttl")]
    pub claim_ttl_secs: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self { claim_ttl_secs: DEFAULT_CLAIM_TTL_SECS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowupConfig {
    #[serde(default = "default_followup_ttl")]
    pub ttl_secs: u64,
}

impl Default for FollowupConfig {
    fn default() -> Self {
        Self { ttl_secs: DEFAULT_FOLLOWUP_TTL_SECS }
    }
}

impl FollowupConfig {
    /// Clamp to the spec's floor of 30 seconds (§5 Timeouts).
    pub fn effective_ttl_secs(&self) -> u64 {
        self.ttl_secs.max(MIN_FOLLOWUP_TTL_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRuntimeConfig {
    #[serde(default = "default_plugin_start_timeout_ms")]
    pub plugin_start_timeout_ms: u64,
}

impl Default for GatewayRuntimeConfig {
    fn default() -> Self {
        Self { plugin_start_timeout_ms: DEFAULT_PLUGIN_START_TIMEOUT_MS }
    }
}

fn default_bm25_k1() -> f32 {
    DEFAULT_BM25_K1
}
fn default_bm25_b() -> f32 {
    DEFAULT_BM25_B
}
fn default_max_vocab() -> usize {
    DEFAULT_MAX_VOCABULARY_SIZE
}
fn default_max_input_bytes() -> usize {
    DEFAULT_MAX_INPUT_BYTES
}
fn default_dense_weight() -> f32 {
    DEFAULT_DENSE_WEIGHT
}
fn default_sparse_weight() -> f32 {
    DEFAULT_SPARSE_WEIGHT
}
fn default_reset_interval() -> u64 {
    DEFAULT_RESET_INTERVAL_SECS
}
fn default_embed_batch() -> usize {
    DEFAULT_EMBED_BATCH_SIZE
}
fn default_history_turns() -> usize {
    DEFAULT_HISTORY_TURNS
}
fn default_max_context_chars() -> usize {
    DEFAULT_MAX_CONTEXT_CHARS
}
fn default_claim_ttl() -> i64 {
    DEFAULT_CLAIM_TTL_SECS
}
fn default_followup_ttl() -> u64 {
    DEFAULT_FOLLOWUP_TTL_SECS
}
fn default_plugin_start_timeout_ms() -> u64 {
    DEFAULT_PLUGIN_START_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = ConcordConfig::default();
        assert_eq!(cfg.retrieval.bm25_k1, 1.5);
        assert_eq!(cfg.retrieval.bm25_b, 0.75);
        assert_eq!(cfg.retrieval.dense_weight, 0.7);
        assert_eq!(cfg.retrieval.sparse_weight, 0.3);
        assert_eq!(cfg.escalation.claim_ttl_secs, 30 * 60);
        assert_eq!(cfg.rag.history_turns, 5);
    }

    #[test]
    fn followup_ttl_floors_at_30_seconds() {
        let cfg = FollowupConfig { ttl_secs: 5 };
        assert_eq!(cfg.effective_ttl_secs(), 30);
        let cfg = FollowupConfig { ttl_secs: 120 };
        assert_eq!(cfg.effective_ttl_secs(), 120);
    }
}
