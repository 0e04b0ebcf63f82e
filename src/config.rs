//! Orchestrator configuration: a fluent builder plus `from_env()`
//! (SPEC_FULL.md §6, §A.3), grounded on `rlm-core`'s `ClientConfig`/
//! `OrchestratorConfig` builder pattern.

use crate::search::SearchDepth;

/// Tunables for one orchestrator instance. Construct with
/// [`OrchestratorConfig::builder`] or [`OrchestratorConfig::from_env`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_research_rounds: u32,
    pub max_sources_per_run: u32,
    pub max_cost_usd: f64,
    pub max_search_results: u32,
    pub max_summary_tokens: u32,
    pub top_k_summaries: usize,
    pub fetch_timeout_seconds: f64,
    pub log_dir: String,

    /// Supplemented from `config.py`'s `search_depth`.
    pub search_depth: SearchDepth,
    /// Supplemented from `config.py`'s `max_fetch_retries`.
    pub max_fetch_retries: u32,
    /// Supplemented from `config.py`, consumed upstream by a dashboard that
    /// stays out of scope here; recorded onto the persisted trace instead.
    pub slow_run_threshold_seconds: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_research_rounds: 3,
            max_sources_per_run: 50,
            max_cost_usd: 2.0,
            max_search_results: 10,
            max_summary_tokens: 300,
            top_k_summaries: 20,
            fetch_timeout_seconds: 15.0,
            log_dir: "./logs".to_string(),
            search_depth: SearchDepth::Basic,
            max_fetch_retries: 2,
            slow_run_threshold_seconds: 120.0,
        }
    }
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }

    /// Read `RESEARCH_AGENT_*` environment variables, falling back to
    /// [`OrchestratorConfig::default`] for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_research_rounds: env_u32("RESEARCH_AGENT_MAX_RESEARCH_ROUNDS", defaults.max_research_rounds),
            max_sources_per_run: env_u32("RESEARCH_AGENT_MAX_SOURCES_PER_RUN", defaults.max_sources_per_run),
            max_cost_usd: env_f64("RESEARCH_AGENT_MAX_COST_USD", defaults.max_cost_usd),
            max_search_results: env_u32("RESEARCH_AGENT_MAX_SEARCH_RESULTS", defaults.max_search_results),
            max_summary_tokens: env_u32("RESEARCH_AGENT_MAX_SUMMARY_TOKENS", defaults.max_summary_tokens),
            top_k_summaries: env_usize("RESEARCH_AGENT_TOP_K_SUMMARIES", defaults.top_k_summaries),
            fetch_timeout_seconds: env_f64("RESEARCH_AGENT_FETCH_TIMEOUT_SECONDS", defaults.fetch_timeout_seconds),
            log_dir: std::env::var("RESEARCH_AGENT_LOG_DIR").unwrap_or(defaults.log_dir),
            search_depth: match std::env::var("RESEARCH_AGENT_SEARCH_DEPTH").as_deref() {
                Ok("advanced") => SearchDepth::Advanced,
                Ok("basic") => SearchDepth::Basic,
                _ => defaults.search_depth,
            },
            max_fetch_retries: env_u32("RESEARCH_AGENT_MAX_FETCH_RETRIES", defaults.max_fetch_retries),
            slow_run_threshold_seconds: env_f64(
                "RESEARCH_AGENT_SLOW_RUN_THRESHOLD_SECONDS",
                defaults.slow_run_threshold_seconds,
            ),
        }
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Fluent builder for [`OrchestratorConfig`]. Unset fields keep their
/// [`Default`] value.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfigOverrides,
}

#[derive(Debug, Clone, Default)]
struct OrchestratorConfigOverrides {
    max_research_rounds: Option<u32>,
    max_sources_per_run: Option<u32>,
    max_cost_usd: Option<f64>,
    max_search_results: Option<u32>,
    max_summary_tokens: Option<u32>,
    top_k_summaries: Option<usize>,
    fetch_timeout_seconds: Option<f64>,
    log_dir: Option<String>,
    search_depth: Option<SearchDepth>,
    max_fetch_retries: Option<u32>,
    slow_run_threshold_seconds: Option<f64>,
}

macro_rules! builder_field {
    ($name:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.config.$name = Some(value);
            self
        }
    };
}

impl OrchestratorConfigBuilder {
    builder_field!(max_research_rounds, u32);
    builder_field!(max_sources_per_run, u32);
    builder_field!(max_cost_usd, f64);
    builder_field!(max_search_results, u32);
    builder_field!(max_summary_tokens, u32);
    builder_field!(top_k_summaries, usize);
    builder_field!(fetch_timeout_seconds, f64);
    builder_field!(search_depth, SearchDepth);
    builder_field!(max_fetch_retries, u32);
    builder_field!(slow_run_threshold_seconds, f64);

    pub fn log_dir(mut self, value: impl Into<String>) -> Self {
        self.config.log_dir = Some(value.into());
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        let defaults = OrchestratorConfig::default();
        let overrides = self.config;
        OrchestratorConfig {
            max_research_rounds: overrides.max_research_rounds.unwrap_or(defaults.max_research_rounds),
            max_sources_per_run: overrides.max_sources_per_run.unwrap_or(defaults.max_sources_per_run),
            max_cost_usd: overrides.max_cost_usd.unwrap_or(defaults.max_cost_usd),
            max_search_results: overrides.max_search_results.unwrap_or(defaults.max_search_results),
            max_summary_tokens: overrides.max_summary_tokens.unwrap_or(defaults.max_summary_tokens),
            top_k_summaries: overrides.top_k_summaries.unwrap_or(defaults.top_k_summaries),
            fetch_timeout_seconds: overrides.fetch_timeout_seconds.unwrap_or(defaults.fetch_timeout_seconds),
            log_dir: overrides.log_dir.unwrap_or(defaults.log_dir),
            search_depth: overrides.search_depth.unwrap_or(defaults.search_depth),
            max_fetch_retries: overrides.max_fetch_retries.unwrap_or(defaults.max_fetch_retries),
            slow_run_threshold_seconds: overrides
                .slow_run_threshold_seconds
                .unwrap_or(defaults.slow_run_threshold_seconds),
        }
    }
}
