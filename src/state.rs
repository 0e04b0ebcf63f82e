//! The state object every stage reads and mutates (SPEC_FULL.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where the content that was ultimately summarized for a [`PageSummary`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// The search collaborator's own full-page extract was used directly.
    Tavily,
    /// The fetch collaborator's Jina Reader tier produced the content.
    Jina,
    /// The fetch collaborator's local-extraction tier produced the content.
    Trafilatura,
}

impl std::fmt::Display for ContentSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tavily => write!(f, "tavily"),
            Self::Jina => write!(f, "jina"),
            Self::Trafilatura => write!(f, "trafilatura"),
        }
    }
}

/// One summarized URL, anchored to the subquery and round that surfaced it.
///
/// Immutable once constructed: the researcher builds a complete `PageSummary`
/// and hands it to [`RunState::add_summary`], it is never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub summary: String,
    pub subquery: String,
    pub round_number: u32,
    pub word_count: usize,
    pub source: ContentSource,
}

impl PageSummary {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        subquery: impl Into<String>,
        round_number: u32,
        source: ContentSource,
    ) -> Self {
        let summary = summary.into();
        let word_count = summary.split_whitespace().count();
        Self {
            url: url.into(),
            title: title.into(),
            summary,
            subquery: subquery.into(),
            round_number,
            word_count,
            source,
        }
    }
}

/// The outcome of one reflector pass (SPEC_FULL.md §4.4.3). `has_gap = true`
/// means a follow-up search query is available; `has_gap = false` means
/// coverage is sufficient and the loop should proceed to synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionOutcome {
    pub has_gap: bool,
    pub follow_up_query: Option<String>,
    pub gap_description: String,
}

/// Terminal (or initial) status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The initial state; never returned from `Orchestrator::run`.
    Running,
    /// A report was produced and the run completed without a hard stop.
    Success,
    /// A report may have been produced, but a budget hard-stop fired first.
    Partial,
    /// No report; an unexpected condition terminated the run.
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Single mutable record carried through the pipeline (SPEC_FULL.md §3).
///
/// Owned exclusively by the orchestrator for the duration of a run; stages
/// receive `&mut RunState` and never retain it beyond their own call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub subqueries: Vec<String>,

    pub page_summaries: Vec<PageSummary>,
    #[serde(skip)]
    visited_urls: HashSet<String>,
    pub rounds_completed: u32,

    pub knowledge_gaps: Vec<String>,

    pub outline: Vec<String>,
    pub final_report: String,
    pub sources: Vec<String>,

    pub status: RunStatus,
    pub stop_reason: Option<String>,
    pub errors: Vec<String>,

    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl RunState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            started_at: Utc::now(),
            completed_at: None,
            subqueries: Vec::new(),
            page_summaries: Vec::new(),
            visited_urls: HashSet::new(),
            rounds_completed: 0,
            knowledge_gaps: Vec::new(),
            outline: Vec::new(),
            final_report: String::new(),
            sources: Vec::new(),
            status: RunStatus::Running,
            stop_reason: None,
            errors: Vec::new(),
            total_input_tokens: 0,
            total_output_tokens: 0,
            estimated_cost_usd: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    pub fn has_report(&self) -> bool {
        !self.final_report.is_empty()
    }

    pub fn total_sources(&self) -> usize {
        self.page_summaries.len()
    }

    pub fn is_visited(&self, url: &str) -> bool {
        self.visited_urls.contains(url)
    }

    pub fn latest_gap(&self) -> Option<&str> {
        self.knowledge_gaps.last().map(String::as_str)
    }

    /// Append a summary and mark its URL visited. Maintains invariant 1
    /// (`visited_urls == { s.url : s in page_summaries }`). Returns `false`
    /// without mutating anything if the URL is already visited.
    pub fn add_summary(&mut self, summary: PageSummary) -> bool {
        if self.visited_urls.contains(&summary.url) {
            return false;
        }
        self.visited_urls.insert(summary.url.clone());
        self.page_summaries.push(summary);
        true
    }

    /// Append a knowledge gap (reflector's follow-up query).
    pub fn add_gap(&mut self, follow_up_query: impl Into<String>) {
        self.knowledge_gaps.push(follow_up_query.into());
    }

    /// Copy the LLM client's running totals into state. Cost accounting
    /// itself lives with the client (SPEC_FULL.md §9); this only ever moves
    /// the telemetry forward, preserving invariant 5.
    pub fn update_cost(&mut self, total_input_tokens: u64, total_output_tokens: u64, estimated_cost_usd: f64) {
        self.total_input_tokens = self.total_input_tokens.max(total_input_tokens);
        self.total_output_tokens = self.total_output_tokens.max(total_output_tokens);
        self.estimated_cost_usd = self.estimated_cost_usd.max(estimated_cost_usd);
    }

    fn finish(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    /// Terminal transition: a complete report was produced.
    pub fn record_success(&mut self, report: String, sources: Vec<String>) {
        self.final_report = report;
        self.sources = sources;
        self.status = RunStatus::Success;
        self.finish();
    }

    /// Terminal transition: a budget hard-stop fired before synthesis ran
    /// (or synthesis never completed). `report` may be empty.
    pub fn record_partial(&mut self, report: String, sources: Vec<String>, reason: impl Into<String>) {
        self.final_report = report;
        self.sources = sources;
        self.status = RunStatus::Partial;
        self.stop_reason = Some(reason.into());
        self.finish();
    }

    /// Terminal transition: an unexpected condition ended the run.
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.final_report.clear();
        self.status = RunStatus::Failed;
        self.stop_reason = Some(reason.into());
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(url: &str) -> PageSummary {
        PageSummary::new(url, "title", "a summary body", "subquery", 1, ContentSource::Tavily)
    }

    #[test]
    fn add_summary_marks_url_visited() {
        let mut state = RunState::new("q");
        assert!(state.add_summary(summary("https://a.example")));
        assert!(state.is_visited("https://a.example"));
        assert_eq!(state.total_sources(), 1);
    }

    #[test]
    fn add_summary_rejects_duplicate_url() {
        let mut state = RunState::new("q");
        assert!(state.add_summary(summary("https://a.example")));
        assert!(!state.add_summary(summary("https://a.example")));
        assert_eq!(state.total_sources(), 1);
    }

    #[test]
    fn visited_urls_invariant_holds_after_several_adds() {
        let mut state = RunState::new("q");
        for url in ["https://a.example", "https://b.example", "https://c.example"] {
            state.add_summary(summary(url));
        }
        let from_summaries: HashSet<_> = state.page_summaries.iter().map(|s| s.url.clone()).collect();
        for url in &from_summaries {
            assert!(state.is_visited(url));
        }
        assert_eq!(from_summaries.len(), state.page_summaries.len());
    }

    #[test]
    fn update_cost_never_decreases() {
        let mut state = RunState::new("q");
        state.update_cost(100, 50, 0.02);
        state.update_cost(10, 5, 0.01);
        assert_eq!(state.estimated_cost_usd, 0.02);
        assert_eq!(state.total_input_tokens, 100);
    }

    #[test]
    fn record_partial_sets_stop_reason_once() {
        let mut state = RunState::new("q");
        state.record_partial(String::new(), vec![], "cost cap reached");
        assert_eq!(state.status, RunStatus::Partial);
        assert_eq!(state.stop_reason.as_deref(), Some("cost cap reached"));
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn record_success_requires_caller_to_supply_nonempty_report() {
        let mut state = RunState::new("q");
        state.record_success("# Report\n[1]\n".to_string(), vec!["https://a.example".to_string()]);
        assert!(state.has_report());
        assert_eq!(state.status, RunStatus::Success);
    }
}
