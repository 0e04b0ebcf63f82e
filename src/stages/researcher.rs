//! Search + fetch + summarize for one subquery (grounded on
//! `agent/researcher.py`, with page truncation grounded on
//! `tools/extract.py::truncate_to_tokens`).

use std::collections::HashSet;
use std::sync::Arc;

use crate::fetch::FetchClient;
use crate::llm::LlmClient;
use crate::search::{SearchClient, SearchDepth, SearchResult};
use crate::state::{ContentSource, PageSummary};

const MAX_SUMMARY_INPUT_WORDS: usize = 2000;
const MIN_USABLE_WORDS: usize = 30;
const MIN_CONTENT_WORDS_BEFORE_FETCH: usize = 100;
const MIN_SUMMARY_CHARS: usize = 20;

/// Truncate `text` to approximately `max_words` words, a proxy for a token
/// budget (roughly 0.75 words per token).
fn truncate_to_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    format!("{} [truncated]", words[..max_words].join(" "))
}

fn summarize_prompt(query: &str, title: &str, url: &str, content: &str, max_words: u32) -> String {
    format!(
        "Extract facts relevant to: {query}\n\n\
         Source: {title} ({url})\n\n\
         {content}\n\n\
         Write up to {max_words} words of bullet points covering only facts \
         relevant to the query above. Do not add commentary or caveats."
    )
}

/// Executes one research subquery: search, deduplicate, summarize.
///
/// Never raises — returns whatever summaries it was able to produce, even
/// if that is an empty vector.
pub struct Researcher {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    fetch: Arc<dyn FetchClient>,
    max_search_results: u32,
    search_depth: SearchDepth,
    max_summary_words: u32,
}

impl Researcher {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        fetch: Arc<dyn FetchClient>,
        max_search_results: u32,
        search_depth: SearchDepth,
        max_summary_words: u32,
    ) -> Self {
        Self {
            llm,
            search,
            fetch,
            max_search_results,
            search_depth,
            max_summary_words,
        }
    }

    /// Search for `subquery`, skipping `visited_urls`, and summarize every
    /// new result. `round_number` is stamped onto each produced summary.
    pub async fn research(
        &self,
        subquery: &str,
        visited_urls: &HashSet<String>,
        round_number: u32,
    ) -> Vec<PageSummary> {
        let results = self
            .search
            .search(subquery, self.max_search_results, self.search_depth)
            .await;
        if results.is_empty() {
            return Vec::new();
        }

        let mut seen_in_batch: HashSet<String> = HashSet::new();
        let new_results: Vec<SearchResult> = results
            .into_iter()
            .filter(|r| !visited_urls.contains(&r.url) && seen_in_batch.insert(r.url.clone()))
            .collect();
        if new_results.is_empty() {
            return Vec::new();
        }

        let mut summaries = Vec::with_capacity(new_results.len());
        for result in new_results {
            if let Some(summary) = self.summarize_result(&result, subquery, round_number).await {
                summaries.push(summary);
            }
        }
        summaries
    }

    async fn summarize_result(
        &self,
        result: &SearchResult,
        subquery: &str,
        round_number: u32,
    ) -> Option<PageSummary> {
        let mut content = result.best_content().to_string();
        let mut source = ContentSource::Tavily;

        if content.split_whitespace().count() < MIN_CONTENT_WORDS_BEFORE_FETCH {
            let fetched = self.fetch.fetch_page(&result.url).await;
            if fetched.success {
                content = fetched.content;
                source = match fetched.source {
                    crate::fetch::FetchSource::Jina => ContentSource::Jina,
                    crate::fetch::FetchSource::Trafilatura => ContentSource::Trafilatura,
                    crate::fetch::FetchSource::Failed => ContentSource::Tavily,
                };
            }
        }

        if content.is_empty() || content.split_whitespace().count() < MIN_USABLE_WORDS {
            return None;
        }

        let content = truncate_to_words(&content, MAX_SUMMARY_INPUT_WORDS);
        let title = if result.title.is_empty() { result.url.as_str() } else { result.title.as_str() };
        let prompt = summarize_prompt(subquery, title, &result.url, &content, self.max_summary_words);

        let response = self.llm.generate_cheap(&prompt, self.max_summary_words * 2).await.ok()?;
        let summary_text = response.text.trim().to_string();
        if summary_text.len() < MIN_SUMMARY_CHARS {
            return None;
        }

        Some(PageSummary::new(
            result.url.clone(),
            result.title.clone(),
            summary_text,
            subquery.to_string(),
            round_number,
            source,
        ))
    }
}
