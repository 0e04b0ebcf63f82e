//! LLM request/response/cost types (grounded on rlm-core's `llm::types`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Role in a conversation passed to the smart LLM collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Token usage for one completion call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Result of a smart-LLM `generate` call (SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Per-1k-token cost rates for one model tier, grounded on `config.py`'s
/// `smart_input_cost_per_1k` / `smart_output_cost_per_1k` /
/// `cheap_input_cost_per_1k` / `cheap_output_cost_per_1k`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CostRates {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

impl CostRates {
    pub fn cost_for(&self, usage: TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// Running cost across both the smart and cheap model tiers. Lives with the
/// LLM client, not `RunState` — see SPEC_FULL.md §9.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostTracker {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub by_model: HashMap<String, f64>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, model: &str, usage: TokenUsage, rates: CostRates) {
        let cost = rates.cost_for(usage);
        self.total_input_tokens += usage.input_tokens;
        self.total_output_tokens += usage.output_tokens;
        self.total_cost_usd += cost;
        *self.by_model.entry(model.to_string()).or_default() += cost;
    }
}
