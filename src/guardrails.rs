//! Pure validation and screening functions (SPEC_FULL.md §4.2).
//!
//! Every function here is pure: no I/O, no shared state, same input always
//! produces the same output.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

pub const MIN_QUERY_LENGTH: usize = 10;
pub const MAX_QUERY_LENGTH: usize = 500;

fn blocked_host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(localhost|127\.\d+\.\d+\.\d+|0\.0\.0\.0|10\.\d+\.\d+\.\d+|172\.(1[6-9]|2\d|3[01])\.\d+\.\d+|192\.168\.\d+\.\d+|::1)$",
        )
        .expect("blocked-host pattern is a valid regex")
    })
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("citation pattern is a valid regex"))
}

/// Reject non-empty-after-trim, too-short, or too-long queries; return the
/// trimmed query on success.
pub fn validate_query(q: &str) -> Result<String> {
    let trimmed = q.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_query("query is empty"));
    }
    let char_len = trimmed.chars().count();
    if char_len < MIN_QUERY_LENGTH {
        return Err(Error::invalid_query(format!(
            "query is too short ({char_len} chars, minimum {MIN_QUERY_LENGTH})"
        )));
    }
    if char_len > MAX_QUERY_LENGTH {
        return Err(Error::invalid_query(format!(
            "query is too long ({char_len} chars, maximum {MAX_QUERY_LENGTH})"
        )));
    }
    Ok(trimmed.to_string())
}

/// Extract the host component of a `scheme://host[:port][/path]` URL.
fn extract_host(url: &str) -> Option<&str> {
    let after_scheme = url.split_once("://")?.1;
    let up_to_path = after_scheme.split('/').next().unwrap_or(after_scheme);
    let host = up_to_path.split(':').next().unwrap_or(up_to_path);
    Some(host)
}

/// SSRF pre-filter. Requires an `http(s)://` scheme and a non-blocked host.
///
/// This is a structural fast pre-filter, not exhaustive: production
/// deployments should additionally resolve the hostname and check the
/// resolved IP. That is a known follow-up, not a reason to widen this check.
pub fn is_safe_url(url: &str) -> bool {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return false;
    }
    let Some(host) = extract_host(url) else {
        return false;
    };
    if host.is_empty() {
        return false;
    }
    !blocked_host_pattern().is_match(&host.to_lowercase())
}

/// Scan `report` for `[n]` citations and return the sorted, deduplicated set
/// of values outside `1..=n_sources`.
pub fn check_citation_bounds(report: &str, n_sources: i64) -> Vec<i64> {
    if report.is_empty() || n_sources <= 0 {
        return Vec::new();
    }
    let mut out_of_range: Vec<i64> = citation_pattern()
        .captures_iter(report)
        .filter_map(|c| c.get(1)?.as_str().parse::<i64>().ok())
        .filter(|n| *n < 1 || *n > n_sources)
        .collect();
    out_of_range.sort_unstable();
    out_of_range.dedup();
    out_of_range
}

/// Deduplicate queries, preserving order of first occurrence. Normalization
/// is whitespace-trimmed, lowercased equality.
pub fn deduplicate_queries(queries: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(queries.len());
    for q in queries {
        let key = q.trim().to_lowercase();
        if seen.insert(key) {
            out.push(q.clone());
        }
    }
    out
}
