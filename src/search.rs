//! The web-search collaborator (SPEC_FULL.md §6), grounded on `tools/search.py`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One result from a web search. `content` is always present; `raw_content`
/// is the richer full-page extract when the collaborator could produce one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    pub content: String,
    pub raw_content: String,
    pub score: f64,
    pub query: String,
    pub fetched_at: DateTime<Utc>,
}

impl SearchResult {
    /// The richest available content: `raw_content` when it's substantial
    /// (> 200 chars — shorter usually means the collaborator hit a
    /// JavaScript-only page and couldn't extract the body), else `content`.
    pub fn best_content(&self) -> &str {
        if self.raw_content.len() > 200 {
            &self.raw_content
        } else {
            &self.content
        }
    }

    pub fn word_count(&self) -> usize {
        self.best_content().split_whitespace().count()
    }
}

/// Search depth, passed through to the collaborator (supplemented from
/// `config.py`'s `search_depth`; `tools/search.py` sends it verbatim in the
/// Tavily request payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

/// The narrow search collaborator interface. Implementations must never
/// raise — an empty vector on failure is the documented contract (§6).
/// Results should already be sorted by descending relevance score; the
/// Researcher stage does not re-sort.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, max_results: u32, depth: SearchDepth) -> Vec<SearchResult>;
}

/// Reference implementation against the Tavily search API.
pub struct TavilySearchClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl TavilySearchClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.tavily.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            http: reqwest::Client::new(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: u32,
    search_depth: &'static str,
    include_raw_content: bool,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResultItem>,
}

#[derive(Debug, Deserialize)]
struct TavilyResultItem {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    raw_content: Option<String>,
    #[serde(default)]
    score: f64,
}

#[async_trait]
impl SearchClient for TavilySearchClient {
    async fn search(&self, query: &str, max_results: u32, depth: SearchDepth) -> Vec<SearchResult> {
        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results,
            search_depth: match depth {
                SearchDepth::Basic => "basic",
                SearchDepth::Advanced => "advanced",
            },
            include_raw_content: true,
            include_answer: false,
        };

        let response = match self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&request)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, %query, "tavily search request failed");
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), %query, "tavily search returned non-2xx");
            return Vec::new();
        }

        let parsed: TavilyResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, %query, "tavily search returned unparseable body");
                return Vec::new();
            }
        };

        let now = Utc::now();
        let mut results: Vec<SearchResult> = parsed
            .results
            .into_iter()
            .map(|item| SearchResult {
                url: item.url,
                title: item.title,
                content: item.content,
                raw_content: item.raw_content.unwrap_or_default(),
                score: item.score,
                query: query.to_string(),
                fetched_at: now,
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_content_prefers_raw_when_substantial() {
        let r = test_double::result("u", "t", "short", &"word ".repeat(100), 0.5);
        assert_eq!(r.best_content(), r.raw_content);
    }

    #[test]
    fn best_content_falls_back_to_snippet_when_raw_is_tiny() {
        let r = test_double::result("u", "t", "the short extract", "tiny", 0.5);
        assert_eq!(r.best_content(), "the short extract");
    }

    #[test]
    fn word_count_counts_best_content() {
        let r = test_double::result("u", "t", "one two three", "", 0.5);
        assert_eq!(r.word_count(), 3);
    }
}
