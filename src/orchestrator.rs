//! The control loop: plan, research in rounds, reflect, synthesize
//! (SPEC_FULL.md §4.1), grounded on `rlm-core`'s `FallbackLoop`/orchestrator
//! shape generalized to this pipeline's stop conditions.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;

use crate::config::OrchestratorConfig;
use crate::fetch::FetchClient;
use crate::guardrails::validate_query;
use crate::llm::LlmClient;
use crate::search::SearchClient;
use crate::stages::{Planner, Reflector, Researcher, Synthesizer};
use crate::state::RunState;
use crate::tracer::Tracer;

/// Optional, synchronous progress callback. Its own panics are swallowed —
/// a broken UI callback must never take down a research run.
pub type ProgressCallback<'a> = dyn Fn(&str) + Send + Sync + 'a;

fn notify(on_progress: Option<&ProgressCallback<'_>>, message: &str) {
    let Some(callback) = on_progress else { return };
    let _ = catch_unwind(AssertUnwindSafe(|| callback(message)));
}

/// Best-effort extraction of a human-readable message from a caught panic
/// payload. `panic!("...")` and `panic!("{}", x)` yield `&str` or `String`;
/// anything else falls back to a generic label.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Drives one research run end to end. Owns the configuration and the
/// collaborator clients; `run` is the single entrypoint (SPEC_FULL.md §6).
pub struct Orchestrator {
    config: OrchestratorConfig,
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    fetch: Arc<dyn FetchClient>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        fetch: Arc<dyn FetchClient>,
    ) -> Self {
        Self { config, llm, search, fetch }
    }

    /// Run the full pipeline for `query`. Never panics on a collaborator or
    /// stage failure — every path returns a `RunState` with a terminal
    /// status (SPEC_FULL.md §7).
    pub async fn run(&self, query: &str, on_progress: Option<&ProgressCallback<'_>>) -> RunState {
        let validated = match validate_query(query) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(error = %e, "query rejected by guardrails");
                let mut state = RunState::new(query.to_string());
                state.errors.push(e.as_error_line());
                state.record_failure(e.to_string());
                return state;
            }
        };

        let mut state = RunState::new(validated.clone());
        let tracer = Tracer::new(validated.clone());
        let span = tracing::info_span!("research_run", run_id = %tracer.run_id());
        let _entered = span.enter();

        // A stage's own defensive fallback logic can itself have a bug (not
        // just a collaborator failure) and panic; catch_unwind here is the
        // outer try/finally that still guarantees a terminal RunState
        // (SPEC_FULL.md §7) instead of unwinding out of `run`.
        let pipeline = AssertUnwindSafe(self.run_pipeline(&validated, &mut state, &tracer, on_progress));
        if let Err(payload) = pipeline.catch_unwind().await {
            let message = panic_message(&*payload);
            tracing::error!(error = %message, "pipeline panicked, converting to a failed run");
            state.errors.push(format!("internal error: pipeline panicked: {message}"));
            state.record_failure(format!("internal error: {message}"));
        }

        let trace = tracer.finish(&state, self.config.slow_run_threshold_seconds);
        if let Err(e) = trace.save(Path::new(&self.config.log_dir)) {
            state.errors.push(format!("trace persistence error: {e}"));
        }

        state
    }

    async fn run_pipeline(
        &self,
        query: &str,
        state: &mut RunState,
        tracer: &Tracer,
        on_progress: Option<&ProgressCallback<'_>>,
    ) {
        notify(on_progress, "planning: decomposing question into search queries");
        tracing::info!("planning: decomposing question into search queries");
        let planner_span = tracer.span("planner");
        let planner = Planner::new(self.llm.clone());
        let subqueries = planner.decompose(query, None).await;
        planner_span.set_metadata("subqueries", &subqueries);
        planner_span.finish_ok();
        state.subqueries = subqueries;
        tracing::info!(n_subqueries = state.subqueries.len(), "planning done");
        notify(on_progress, &format!("planning done: {} subqueries", state.subqueries.len()));

        let mut current_queries = state.subqueries.clone();
        let researcher = Researcher::new(
            self.llm.clone(),
            self.search.clone(),
            self.fetch.clone(),
            self.config.max_search_results,
            self.config.search_depth,
            self.config.max_summary_tokens,
        );
        let reflector = Reflector::new(self.llm.clone());

        for round in 1..=self.config.max_research_rounds {
            notify(on_progress, &format!("round {round} starting"));
            tracing::info!(round, "research round starting");

            for subquery in current_queries.clone() {
                self.llm.update_state_cost(state);
                if state.estimated_cost_usd >= self.config.max_cost_usd {
                    tracing::warn!(cost = state.estimated_cost_usd, round, "cost cap reached, stopping");
                    state.record_partial(
                        String::new(),
                        state.page_summaries.iter().map(|s| s.url.clone()).collect(),
                        format!("cost cap reached after round {}", round - 1),
                    );
                    return;
                }

                if state.total_sources() >= self.config.max_sources_per_run as usize {
                    tracing::info!(sources = state.total_sources(), "source cap reached, moving to synthesis");
                    break;
                }

                notify(on_progress, &format!("round {round}: researching \"{subquery}\""));
                tracing::debug!(round, %subquery, "researching subquery");
                let before = state.total_sources();
                let researcher_span = tracer.span("researcher");
                let summaries = researcher.research(&subquery, &state_visited(state), round).await;
                let added = summaries.len();
                for summary in summaries {
                    state.add_summary(summary);
                }
                researcher_span.set_metadata("subquery", &subquery);
                researcher_span.set_metadata("new_sources", added);
                researcher_span.finish_ok();
                notify(
                    on_progress,
                    &format!(
                        "round {round}: +{} new sources (total {})",
                        state.total_sources() - before,
                        state.total_sources()
                    ),
                );
            }

            state.rounds_completed = round;

            if round == self.config.max_research_rounds {
                tracing::info!(round, "max rounds reached");
                break;
            }

            let reflector_span = tracer.span("reflector");
            let outcome = reflector.reflect(query, &state.page_summaries, state.rounds_completed).await;
            reflector_span.set_metadata("has_gap", outcome.has_gap);
            reflector_span.finish_ok();
            tracing::info!(round, has_gap = outcome.has_gap, "reflector verdict");

            if outcome.has_gap {
                if let Some(follow_up) = &outcome.follow_up_query {
                    state.add_gap(follow_up.clone());
                }
                notify(on_progress, &format!("round {round}: reflector found a gap, continuing"));
                current_queries = match &outcome.follow_up_query {
                    Some(q) if !q.trim().is_empty() => vec![q.clone()],
                    _ => vec![state.subqueries.first().cloned().unwrap_or_else(|| query.to_string())],
                };
            } else {
                notify(on_progress, &format!("round {round}: reflector satisfied, coverage sufficient"));
                break;
            }
        }

        if state.is_running() {
            notify(on_progress, "synthesizing final report");
            tracing::info!("synthesizing final report");
            let synthesizer_span = tracer.span("synthesizer");
            let synthesizer = Synthesizer::new(self.llm.clone(), self.config.top_k_summaries);
            synthesizer.synthesize(state).await;
            synthesizer_span.set_metadata("status", state.status.to_string());
            synthesizer_span.finish_ok();
            tracing::info!(status = %state.status, "synthesis done");
            notify(on_progress, "synthesis done");
        }
    }
}

fn state_visited(state: &RunState) -> std::collections::HashSet<String> {
    state.page_summaries.iter().map(|s| s.url.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_double::ScriptedFetchClient;
    use crate::llm::ScriptedLlmClient;
    use crate::search::test_double::{result, ScriptedSearchClient};
    use crate::state::RunStatus;

    fn long_content(words: usize) -> String {
        "word ".repeat(words)
    }

    fn config_with_log_dir(dir: &std::path::Path) -> OrchestratorConfig {
        OrchestratorConfig::builder().log_dir(dir.to_string_lossy().to_string()).build()
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_any_collaborator_call() {
        let llm = Arc::new(ScriptedLlmClient::new());
        let search = Arc::new(ScriptedSearchClient::new());
        let fetch = Arc::new(ScriptedFetchClient::new());
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(config_with_log_dir(dir.path()), llm, search, fetch);

        let state = orchestrator.run("", None).await;
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.errors.iter().any(|e| e.to_lowercase().contains("empty")));
    }

    #[tokio::test]
    async fn happy_path_reaches_success_with_reflector_stopping_after_round_one() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_generate_ok(r#"{"queries": ["battery breakthroughs 2025"]}"#);
        llm.push_cheap_ok("a fine summary of breakthroughs in battery chemistry research");
        llm.push_generate_ok(r#"{"knowledge_gap": "", "follow_up_query": null}"#);
        llm.push_generate_ok(r#"{"sections": ["Overview"]}"#);
        llm.push_generate_ok("x".repeat(150) + " citing [1] for support");

        let search = Arc::new(ScriptedSearchClient::new());
        search.push(vec![result("https://a.example", "A", &long_content(150), "", 0.9)]);
        let fetch = Arc::new(ScriptedFetchClient::new());

        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::builder()
            .log_dir(dir.path().to_string_lossy().to_string())
            .max_research_rounds(3)
            .build();
        let orchestrator = Orchestrator::new(config, llm, search, fetch);

        let state = orchestrator.run("what caused the battery revolution of 2025", None).await;
        assert_eq!(state.status, RunStatus::Success);
        assert_eq!(state.rounds_completed, 1);
        assert!(state.has_report());
        assert!(state.final_report.contains("## References"));
    }

    #[tokio::test]
    async fn cost_cap_hit_mid_round_stops_with_partial_status() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_generate_ok(r#"{"queries": ["q1", "q2"]}"#);
        llm.set_fixed_cost_usd(0.02);

        let search = Arc::new(ScriptedSearchClient::new());
        let fetch = Arc::new(ScriptedFetchClient::new());

        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::builder()
            .log_dir(dir.path().to_string_lossy().to_string())
            .max_cost_usd(0.01)
            .build();
        let orchestrator = Orchestrator::new(config, llm, search, fetch);

        let state = orchestrator.run("what caused the battery revolution of 2025", None).await;
        assert_eq!(state.status, RunStatus::Partial);
        assert!(state.stop_reason.as_deref().unwrap_or_default().to_lowercase().contains("cost cap"));
        assert_eq!(state.final_report, "");
    }

    #[tokio::test]
    async fn max_rounds_reached_still_synthesizes() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_generate_ok(r#"{"queries": ["q1"]}"#);
        for _ in 0..2 {
            llm.push_cheap_ok("a fine summary covering one specific research angle found");
            llm.push_generate_ok(r#"{"knowledge_gap": "always more", "follow_up_query": "q1"}"#);
        }
        llm.push_cheap_ok("final round summary covering the remaining research angle");
        llm.push_generate_ok(r#"{"sections": ["Overview"]}"#);
        llm.push_generate_ok("y".repeat(150) + " citing [1] for support");

        let search = Arc::new(ScriptedSearchClient::new());
        for _ in 0..3 {
            search.push(vec![result("https://a.example", "A", &long_content(150), "", 0.9)]);
        }
        let fetch = Arc::new(ScriptedFetchClient::new());

        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::builder()
            .log_dir(dir.path().to_string_lossy().to_string())
            .max_research_rounds(2)
            .build();
        let orchestrator = Orchestrator::new(config, llm, search, fetch);

        let state = orchestrator.run("what caused the battery revolution of 2025", None).await;
        assert_eq!(state.rounds_completed, 2);
        assert_eq!(state.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn progress_callback_panics_are_swallowed() {
        let llm = Arc::new(ScriptedLlmClient::new());
        llm.push_generate_ok(r#"{"queries": ["q1"]}"#);
        llm.push_generate_ok(r#"{"knowledge_gap": "", "follow_up_query": null}"#);
        llm.push_generate_ok(r#"{"sections": ["Overview"]}"#);
        llm.push_generate_ok("z".repeat(150) + " citing [1]");

        let search = Arc::new(ScriptedSearchClient::new());
        search.push(vec![]);
        let fetch = Arc::new(ScriptedFetchClient::new());

        let dir = tempfile::tempdir().unwrap();
        let config = config_with_log_dir(dir.path());
        let orchestrator = Orchestrator::new(config, llm, search, fetch);

        let panicking_callback: &ProgressCallback<'_> = &|_msg: &str| panic!("boom");
        let state = orchestrator
            .run("what caused the battery revolution of 2025", Some(panicking_callback))
            .await;
        assert_ne!(state.status, RunStatus::Running);
    }

    struct PanickingLlmClient;

    #[async_trait::async_trait]
    impl LlmClient for PanickingLlmClient {
        async fn generate(
            &self,
            _messages: &[crate::llm::ChatMessage],
        ) -> crate::error::Result<crate::llm::CompletionResponse> {
            panic!("planner collaborator panicked unexpectedly");
        }

        async fn generate_cheap(
            &self,
            _prompt: &str,
            _max_tokens: u32,
        ) -> crate::error::Result<crate::llm::CompletionResponse> {
            panic!("planner collaborator panicked unexpectedly");
        }

        fn cost_tracker(&self) -> crate::llm::CostTracker {
            crate::llm::CostTracker::default()
        }
    }

    #[tokio::test]
    async fn a_panic_inside_a_stage_is_contained_as_a_failed_run() {
        let llm = Arc::new(PanickingLlmClient);
        let search = Arc::new(ScriptedSearchClient::new());
        let fetch = Arc::new(ScriptedFetchClient::new());

        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(config_with_log_dir(dir.path()), llm, search, fetch);

        let state = orchestrator.run("what caused the battery revolution of 2025", None).await;
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.final_report, "");
        assert!(state.errors.iter().any(|e| e.contains("panicked")));
    }
}
