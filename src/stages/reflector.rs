//! Gap detection: should the agent search again, or is coverage sufficient?
//! (grounded on `agent/reflector.py`).

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::llm::{ChatMessage, LlmClient};
use crate::state::{PageSummary, ReflectionOutcome};

const MAX_SUMMARIES_SHOWN: usize = 30;
const MAX_SUMMARY_CHARS_SHOWN: usize = 500;

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

fn no_gap(description: impl Into<String>) -> ReflectionOutcome {
    ReflectionOutcome {
        has_gap: false,
        follow_up_query: None,
        gap_description: description.into(),
    }
}

fn format_summaries(summaries: &[PageSummary]) -> String {
    let mut lines = Vec::new();
    for (i, s) in summaries.iter().take(MAX_SUMMARIES_SHOWN).enumerate() {
        let title = if s.title.is_empty() { s.url.as_str() } else { s.title.as_str() };
        lines.push(format!("[{}] Round {} — {title}", i + 1, s.round_number));
        let capped: String = s.summary.chars().take(MAX_SUMMARY_CHARS_SHOWN).collect();
        lines.push(capped);
        lines.push(String::new());
    }
    lines.join("\n")
}

fn reflect_prompt(question: &str, n_summaries: usize, n_rounds: u32, summaries_text: &str) -> String {
    format!(
        "You are evaluating research coverage for: {question}\n\n\
         {n_summaries} sources have been collected across {n_rounds} research rounds:\n\n\
         {summaries_text}\n\n\
         Identify one specific, actionable gap in coverage — a concrete missing angle, \
         not \"more detail needed\". If coverage is sufficient, say so.\n\n\
         Respond with JSON only: \
         {{\"knowledge_gap\": \"...\", \"follow_up_query\": \"...\" or null}}"
    )
}

fn is_blank_marker(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "null" | "none" | "")
}

fn parse_reflection(text: &str) -> ReflectionOutcome {
    let cleaned = strip_code_fences(text);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned) else {
        return no_gap("could not parse reflection response");
    };

    let gap_description = value
        .get("knowledge_gap")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let follow_up = value.get("follow_up_query").and_then(|v| v.as_str());
    match follow_up {
        Some(q) if !is_blank_marker(q) => ReflectionOutcome {
            has_gap: true,
            follow_up_query: Some(q.trim().to_string()),
            gap_description,
        },
        _ => {
            let description = if gap_description.is_empty() {
                "coverage sufficient".to_string()
            } else {
                gap_description
            };
            no_gap(description)
        }
    }
}

/// Evaluates research coverage after each round and decides whether to
/// continue searching.
pub struct Reflector {
    client: Arc<dyn LlmClient>,
}

impl Reflector {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// One smart-LLM call per invocation. Falls back to `has_gap = false` on
    /// any failure — stop the loop rather than searching forever.
    pub async fn reflect(&self, query: &str, summaries: &[PageSummary], rounds_completed: u32) -> ReflectionOutcome {
        if summaries.is_empty() {
            return ReflectionOutcome {
                has_gap: true,
                follow_up_query: Some(query.to_string()),
                gap_description: "no summaries collected yet".to_string(),
            };
        }

        let prompt = reflect_prompt(query, summaries.len(), rounds_completed, &format_summaries(summaries));

        match self.client.generate(&[ChatMessage::user(prompt)]).await {
            Ok(response) => parse_reflection(&response.text),
            Err(_) => no_gap("reflection failed — stopping to synthesize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::state::ContentSource;

    fn summary(url: &str) -> PageSummary {
        PageSummary::new(url, "title", "summary text", "subquery", 1, ContentSource::Tavily)
    }

    #[tokio::test]
    async fn reflect_with_no_summaries_assumes_a_gap() {
        let client = Arc::new(ScriptedLlmClient::new());
        let reflector = Reflector::new(client);
        let result = reflector.reflect("original question", &[], 0).await;
        assert!(result.has_gap);
        assert_eq!(result.follow_up_query.as_deref(), Some("original question"));
    }

    #[tokio::test]
    async fn reflect_parses_gap_with_follow_up_query() {
        let client = Arc::new(ScriptedLlmClient::new());
        client.push_generate_ok(
            r#"{"knowledge_gap": "missing cost data", "follow_up_query": "cost comparison 2025"}"#,
        );
        let reflector = Reflector::new(client);
        let result = reflector.reflect("q", &[summary("https://a.example")], 1).await;
        assert!(result.has_gap);
        assert_eq!(result.follow_up_query.as_deref(), Some("cost comparison 2025"));
    }

    #[tokio::test]
    async fn reflect_treats_null_follow_up_as_no_gap() {
        let client = Arc::new(ScriptedLlmClient::new());
        client.push_generate_ok(r#"{"knowledge_gap": "", "follow_up_query": null}"#);
        let reflector = Reflector::new(client);
        let result = reflector.reflect("q", &[summary("https://a.example")], 1).await;
        assert!(!result.has_gap);
        assert!(result.follow_up_query.is_none());
    }

    #[tokio::test]
    async fn reflect_treats_string_none_as_no_gap_case_insensitive() {
        let client = Arc::new(ScriptedLlmClient::new());
        client.push_generate_ok(r#"{"knowledge_gap": "n/a", "follow_up_query": "None"}"#);
        let reflector = Reflector::new(client);
        let result = reflector.reflect("q", &[summary("https://a.example")], 1).await;
        assert!(!result.has_gap);
    }

    #[tokio::test]
    async fn reflect_on_llm_failure_stops_instead_of_looping() {
        let client = Arc::new(ScriptedLlmClient::new());
        client.push_generate_err("provider unavailable");
        let reflector = Reflector::new(client);
        let result = reflector.reflect("q", &[summary("https://a.example")], 1).await;
        assert!(!result.has_gap);
    }

    #[tokio::test]
    async fn reflect_on_unparseable_output_stops() {
        let client = Arc::new(ScriptedLlmClient::new());
        client.push_generate_ok("not json");
        let reflector = Reflector::new(client);
        let result = reflector.reflect("q", &[summary("https://a.example")], 1).await;
        assert!(!result.has_gap);
    }
}
