//! The page-fetch collaborator (SPEC_FULL.md §6), grounded on `tools/fetch.py`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::guardrails::is_safe_url;

/// Provenance of a successful fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Jina,
    Trafilatura,
    Failed,
}

/// The outcome of fetching one URL. Never constructed to signal a panic —
/// `success = false` with a populated `error` is the failure contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub content: String,
    pub title: String,
    pub success: bool,
    pub source: FetchSource,
    pub error: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchResult {
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }

    fn failed(url: &str, error: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            content: String::new(),
            title: String::new(),
            success: false,
            source: FetchSource::Failed,
            error: Some(error.into()),
            fetched_at: Utc::now(),
        }
    }
}

/// The narrow fetch collaborator interface. Implementations must never
/// raise; callers must have already screened `url` with [`is_safe_url`].
#[async_trait]
pub trait FetchClient: Send + Sync {
    async fn fetch_page(&self, url: &str) -> FetchResult;
}

/// Reference two-tier implementation: Jina Reader first, a direct GET plus
/// naive boilerplate stripping as the local-extraction fallback.
pub struct JinaFetchClient {
    http: reqwest::Client,
    timeout: std::time::Duration,
    max_retries: u32,
}

impl JinaFetchClient {
    pub fn new(timeout_secs: f64, max_retries: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: std::time::Duration::from_secs_f64(timeout_secs),
            max_retries,
        }
    }

    fn extract_title_from_markdown(text: &str) -> String {
        for line in text.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("# ") {
                return rest.trim().to_string();
            }
        }
        String::new()
    }

    async fn fetch_via_jina(&self, url: &str) -> FetchResult {
        let jina_url = format!("https://r.jina.ai/{url}");
        let response = match self
            .http
            .get(&jina_url)
            .header("Accept", "text/plain")
            .header("X-No-Cache", "false")
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return FetchResult::failed(url, format!("jina error: {e}")),
        };

        if response.status().as_u16() == 429 {
            return FetchResult::failed(url, "jina rate limit (429) — falling back");
        }
        if !response.status().is_success() {
            return FetchResult::failed(url, format!("jina returned HTTP {}", response.status()));
        }

        let content = match response.text().await {
            Ok(t) => t.trim().to_string(),
            Err(e) => return FetchResult::failed(url, format!("jina body error: {e}")),
        };

        if content.len() < 200 {
            return FetchResult::failed(url, format!("jina returned too little content ({} chars)", content.len()));
        }

        FetchResult {
            url: url.to_string(),
            title: Self::extract_title_from_markdown(&content),
            content,
            success: true,
            source: FetchSource::Jina,
            error: None,
            fetched_at: Utc::now(),
        }
    }

    /// Tier 2: fetch raw HTML and strip obvious boilerplate. This is a
    /// naive stand-in for `trafilatura`'s extraction — it does not handle
    /// JavaScript-rendered content, matching the original tier's limits.
    async fn fetch_via_local_extraction(&self, url: &str) -> FetchResult {
        let mut last_error = String::new();
        for attempt in 0..=self.max_retries {
            match self.try_local_extraction(url).await {
                Ok(result) => return result,
                Err(e) => {
                    last_error = e;
                    if attempt < self.max_retries {
                        continue;
                    }
                }
            }
        }
        FetchResult::failed(url, last_error)
    }

    async fn try_local_extraction(&self, url: &str) -> std::result::Result<FetchResult, String> {
        let response = self
            .http
            .get(url)
            .header(
                "User-Agent",
                "Mozilla/5.0 (compatible; ResearchAgent/1.0; +https://example.invalid)",
            )
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("fetch error: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let html = response.text().await.map_err(|e| format!("body error: {e}"))?;
        let content = strip_html_boilerplate(&html);

        if content.len() < 200 {
            return Err("local extraction returned empty/insufficient content (likely JS-rendered)".to_string());
        }

        let title = extract_html_title(&html);

        Ok(FetchResult {
            url: url.to_string(),
            title,
            content,
            success: true,
            source: FetchSource::Trafilatura,
            error: None,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl FetchClient for JinaFetchClient {
    async fn fetch_page(&self, url: &str) -> FetchResult {
        if !is_safe_url(url) {
            return FetchResult::failed(url, "url failed safety screen");
        }

        let jina = self.fetch_via_jina(url).await;
        if jina.success {
            return jina;
        }
        self.fetch_via_local_extraction(url).await
    }
}

/// ASCII case-insensitive substring search, returning a byte offset valid in
/// `haystack` itself. A plain `str::find` on a separately-lowercased copy of
/// `haystack` can desync: some characters' lowercase form has a different
/// UTF-8 byte length than the original (e.g. `ẞ` U+1E9E → `ß`), so offsets
/// found in the lowercase copy can land off a char boundary — or past the
/// end — of `haystack`. Tag names are ASCII, so matching is restricted to
/// ASCII bytes here; a match can only start on a single `<`, `/`, letter, or
/// similar low-ASCII byte, which is always a valid char boundary.
fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let hb = haystack.as_bytes();
    let nb = needle.as_bytes();
    if nb.is_empty() || hb.len() < nb.len() {
        return None;
    }
    hb.windows(nb.len()).position(|w| w.eq_ignore_ascii_case(nb))
}

fn starts_with_ci(haystack: &str, prefix: &str) -> bool {
    haystack.len() >= prefix.len() && haystack.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Strip `<script>`/`<style>` blocks and tags, collapsing whitespace. A
/// deliberately simple stand-in for `trafilatura`'s extraction — good
/// enough for plain server-rendered HTML, not for JS-rendered pages.
fn strip_html_boilerplate(html: &str) -> String {
    let mut without_blocks = String::with_capacity(html.len());
    let mut i = 0;
    while i < html.len() {
        let rest = &html[i..];
        if starts_with_ci(rest, "<script") {
            i += find_ci(rest, "</script>").map(|end| end + "</script>".len()).unwrap_or(rest.len());
            continue;
        }
        if starts_with_ci(rest, "<style") {
            i += find_ci(rest, "</style>").map(|end| end + "</style>".len()).unwrap_or(rest.len());
            continue;
        }
        let ch = rest.chars().next().expect("i < html.len() implies a char remains at i");
        without_blocks.push(ch);
        i += ch.len_utf8();
    }

    let mut out = String::with_capacity(without_blocks.len());
    let mut in_tag = false;
    for c in without_blocks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_html_title(html: &str) -> String {
    let Some(start) = find_ci(html, "<title>") else {
        return String::new();
    };
    let after_open = start + "<title>".len();
    let Some(end_rel) = find_ci(&html[after_open..], "</title>") else {
        return String::new();
    };
    html[after_open..after_open + end_rel].trim().to_string()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_whitespace() {
        let html = "<html><head><title>T</title></head><body><p>Hello   world</p><script>evil()</script></body></html>";
        let text = strip_html_boilerplate(html);
        assert_eq!(text, "Hello world");
    }

    #[test]
    fn extracts_title_from_html() {
        let html = "<html><head><title> My Page </title></head><body></body></html>";
        assert_eq!(extract_html_title(html), "My Page");
    }

    #[test]
    fn extracts_title_from_markdown_heading() {
        let md = "# The Real Title\n\nBody text here.";
        assert_eq!(JinaFetchClient::extract_title_from_markdown(md), "The Real Title");
    }

    #[test]
    fn strip_boilerplate_does_not_panic_on_case_folding_unicode() {
        // "ẞ" (U+1E9E, 3 bytes) lowercases to "ß" (2 bytes) and "İ" (2 bytes)
        // lowercases to "i̇" (3 bytes) — a lowercase copy of this string has a
        // different byte length than the original at these positions, so any
        // offset computed against the lowercase copy would land off a char
        // boundary (or out of range) when applied back to the original.
        let html = "<html><body><p>Straße İstanbul</p><script>evil()</script></body></html>";
        let text = strip_html_boilerplate(html);
        assert_eq!(text, "Straße İstanbul");
    }

    #[test]
    fn extract_title_does_not_panic_on_case_folding_unicode() {
        let html = "<html><head><title>Straße İstanbul</title></head><body></body></html>";
        assert_eq!(extract_html_title(html), "Straße İstanbul");
    }

    #[test]
    fn strip_boilerplate_handles_unterminated_script_block() {
        let html = "<p>before</p><script>no closing tag here";
        assert_eq!(strip_html_boilerplate(html), "before");
    }

    #[test]
    fn word_count_counts_content_words() {
        let result = FetchResult {
            url: "u".into(),
            content: "one two three four".into(),
            title: String::new(),
            success: true,
            source: FetchSource::Jina,
            error: None,
            fetched_at: Utc::now(),
        };
        assert_eq!(result.word_count(), 4);
    }
}
