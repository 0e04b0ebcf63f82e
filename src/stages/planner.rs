//! Query decomposition: one question becomes N targeted search queries
//! (grounded on `agent/planner.py`).

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::guardrails::deduplicate_queries;
use crate::llm::{ChatMessage, LlmClient};

const DEFAULT_SUBQUERY_COUNT: u32 = 4;

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

fn parse_queries(text: &str) -> Vec<String> {
    let cleaned = strip_code_fences(text);
    let Ok(value) = serde_json::from_str::<serde_json::Value>(&cleaned) else {
        return Vec::new();
    };
    let Some(queries) = value.get("queries").and_then(|q| q.as_array()) else {
        return Vec::new();
    };
    queries
        .iter()
        .filter_map(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

fn decompose_prompt(question: &str, n: u32) -> String {
    format!(
        "You are planning a research investigation. Break the following question \
         into {n} distinct, targeted search engine queries that together cover the \
         question comprehensively. Each query should stand on its own as something \
         you could type into a search engine.\n\n\
         Question: {question}\n\n\
         Respond with JSON only, shaped exactly like: {{\"queries\": [\"...\", \"...\"]}}"
    )
}

/// Decomposes a research question into targeted search queries.
///
/// One smart-LLM call. Falls back to `[original_query]` on any failure —
/// the research loop always gets something to work with.
pub struct Planner {
    client: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    /// Break `query` into up to `n` targeted search queries (default 4).
    /// Never empty: falls back to `[query]`.
    pub async fn decompose(&self, query: &str, n: Option<u32>) -> Vec<String> {
        let n = n.unwrap_or(DEFAULT_SUBQUERY_COUNT);
        let prompt = decompose_prompt(query, n);

        let response = self
            .client
            .generate(&[ChatMessage::user(prompt)])
            .await
            .ok();

        if let Some(response) = response {
            let queries = parse_queries(&response.text);
            if !queries.is_empty() {
                return deduplicate_queries(&queries);
            }
        }

        vec![query.to_string()]
    }
}
