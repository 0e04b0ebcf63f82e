//! The LLM collaborator: a narrow smart/cheap generation interface plus a
//! reference Anthropic implementation (SPEC_FULL.md §6, §A.5).

mod client;
mod types;

pub use client::{AnthropicClientConfig, AnthropicLlmClient, LlmClient};
#[cfg(test)]
pub use client::test_double::ScriptedLlmClient;
pub use types::{ChatMessage, ChatRole, CompletionResponse, CostRates, CostTracker, TokenUsage};
