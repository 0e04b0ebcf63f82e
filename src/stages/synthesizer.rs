//! Turns collected page summaries into a final cited Markdown report
//! (grounded on `agent/synthesizer.py`).

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::guardrails::check_citation_bounds;
use crate::llm::{ChatMessage, LlmClient};
use crate::state::{PageSummary, RunState};

const MIN_REPORT_CHARS: usize = 100;
const SUMMARY_PREVIEW_CHARS_OUTLINE: usize = 300;
const SUMMARY_PREVIEW_CHARS_REPORT: usize = 500;

fn fence_open() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"```(?:json)?\s*").expect("fence-open pattern is valid"))
}

fn fence_close() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"```\s*$").expect("fence-close pattern is valid"))
}

fn strip_code_fences(text: &str) -> String {
    let text = fence_open().replace_all(text.trim(), "");
    fence_close().replace_all(text.trim(), "").trim().to_string()
}

fn parse_outline(text: &str) -> Vec<String> {
    let cleaned = strip_code_fences(text);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned) else {
        return Vec::new();
    };
    let Some(sections) = value.get("sections").and_then(|s| s.as_array()) else {
        return Vec::new();
    };
    sections
        .iter()
        .filter_map(|s| s.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn title_or_url(s: &PageSummary) -> &str {
    if s.title.is_empty() { s.url.as_str() } else { s.title.as_str() }
}

fn format_summaries_for_outline(summaries: &[PageSummary]) -> String {
    let mut lines = Vec::new();
    for (i, s) in summaries.iter().enumerate() {
        lines.push(format!("[{}] {}", i + 1, title_or_url(s)));
        lines.push(preview(&s.summary, SUMMARY_PREVIEW_CHARS_OUTLINE));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn format_sources_for_report(summaries: &[PageSummary]) -> String {
    let mut lines = Vec::new();
    for (i, s) in summaries.iter().enumerate() {
        lines.push(format!("[{}] {} ({})", i + 1, title_or_url(s), s.url));
        lines.push(preview(&s.summary, SUMMARY_PREVIEW_CHARS_REPORT));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn build_references(summaries: &[PageSummary]) -> String {
    let mut lines = vec!["## References".to_string(), String::new()];
    for (i, s) in summaries.iter().enumerate() {
        let title = if s.title.is_empty() { "Untitled" } else { s.title.as_str() };
        lines.push(format!("[{}] {title}  ", i + 1));
        lines.push(format!("    {}", s.url));
        lines.push(String::new());
    }
    lines.join("\n")
}

fn fallback_report(query: &str, summaries: &[PageSummary]) -> String {
    let mut lines = vec![format!("# Research: {query}"), String::new()];
    lines.push("*Note: full synthesis unavailable. Raw findings below.*".to_string());
    lines.push(String::new());
    for (i, s) in summaries.iter().enumerate() {
        lines.push(format!("### [{}] {}", i + 1, title_or_url(s)));
        lines.push(s.summary.clone());
        lines.push(String::new());
    }
    lines.join("\n")
}

fn outline_prompt(question: &str, n_summaries: usize, summaries_text: &str) -> String {
    format!(
        "Given {n_summaries} collected sources on: {question}\n\n\
         {summaries_text}\n\n\
         Propose 4-7 section headings for a research report covering this material. \
         Respond with JSON only: {{\"sections\": [\"...\", \"...\"]}}"
    )
}

fn report_prompt(question: &str, sections_text: &str, sources_text: &str) -> String {
    format!(
        "Write a research report answering: {question}\n\n\
         Use these sections, in order:\n{sections_text}\n\n\
         Sources (cite inline using [N] matching the numbers below):\n{sources_text}\n\n\
         Write the full report body in Markdown, with inline [N] citations for every \
         claim drawn from a source."
    )
}

/// Converts `RunState::page_summaries` into a final Markdown report. Two
/// smart-LLM calls: outline, then report body. Never raises — falls back
/// to a generic outline and a bullet-list report rather than failing the run.
pub struct Synthesizer {
    client: Arc<dyn LlmClient>,
    top_k_summaries: usize,
}

impl Synthesizer {
    pub fn new(client: Arc<dyn LlmClient>, top_k_summaries: usize) -> Self {
        Self { client, top_k_summaries }
    }

    /// Synthesize the final report into `state` in place. Terminal: always
    /// leaves `state.status` as `Success` or `Partial`.
    pub async fn synthesize(&self, state: &mut RunState) {
        if state.page_summaries.is_empty() {
            state.record_partial(
                "No sources were collected. Cannot generate a report.".to_string(),
                Vec::new(),
                "no page summaries available for synthesis",
            );
            return;
        }

        let summaries: Vec<PageSummary> = state
            .page_summaries
            .iter()
            .take(self.top_k_summaries)
            .cloned()
            .collect();
        let sources: Vec<String> = summaries.iter().map(|s| s.url.clone()).collect();

        let sections = self.generate_outline(&state.query, &summaries).await;
        state.outline = sections.clone();

        let report_body = self.generate_report(&state.query, &sections, &summaries).await;

        let references = build_references(&summaries);
        let final_report = format!("{}\n\n{references}", report_body.trim());

        let bad_citations = check_citation_bounds(&final_report, sources.len() as i64);
        if !bad_citations.is_empty() {
            state.errors.push(format!(
                "out-of-bounds citations in report: {bad_citations:?} (only {} sources available)",
                sources.len()
            ));
        }

        state.record_success(final_report, sources);
    }

    async fn generate_outline(&self, query: &str, summaries: &[PageSummary]) -> Vec<String> {
        let prompt = outline_prompt(query, summaries.len(), &format_summaries_for_outline(summaries));
        if let Ok(response) = self.client.generate(&[ChatMessage::user(prompt)]).await {
            let sections = parse_outline(&response.text);
            if !sections.is_empty() {
                return sections;
            }
        }
        vec![format!("Research Findings: {query}")]
    }

    async fn generate_report(&self, query: &str, sections: &[String], summaries: &[PageSummary]) -> String {
        let sections_text = sections
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {s}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let sources_text = format_sources_for_report(summaries);
        let prompt = report_prompt(query, &sections_text, &sources_text);

        if let Ok(response) = self.client.generate(&[ChatMessage::user(prompt)]).await {
            let text = response.text.trim().to_string();
            if text.len() > MIN_REPORT_CHARS {
                return text;
            }
        }
        fallback_report(query, summaries)
    }
}
