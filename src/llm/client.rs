//! The LLM collaborator trait and a reference Anthropic implementation.
//!
//! SPEC_FULL.md §6 defines the contract the core actually consumes:
//! `generate` (smart model, message list in → text+usage out),
//! `generate_cheap` (cheap model, prompt in → bounded text out), and
//! `update_state_cost` (copy the client's running cost into `RunState`).
//! Everything below the trait is the reference implementation; stages are
//! written against the trait only.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::state::RunState;

use super::types::{ChatMessage, ChatRole, CompletionResponse, CostRates, CostTracker, TokenUsage};

/// The narrow LLM collaborator interface the orchestrator and stages depend on.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One smart-model call: a list of role-tagged messages in, text+usage out.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<CompletionResponse>;

    /// One cheap-model call: a single prompt in, bounded text out.
    async fn generate_cheap(&self, prompt: &str, max_tokens: u32) -> Result<CompletionResponse>;

    /// Copy this client's running cost totals into `state`
    /// (SPEC_FULL.md §9: cost accounting lives with the client, not `RunState`).
    fn update_state_cost(&self, state: &mut RunState) {
        let tracker = self.cost_tracker();
        state.update_cost(
            tracker.total_input_tokens,
            tracker.total_output_tokens,
            tracker.total_cost_usd,
        );
    }

    fn cost_tracker(&self) -> CostTracker;
}

fn build_http_client(timeout_secs: u64) -> Client {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed environments can panic during proxy auto-detection in
    // reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => client,
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .expect("failed to build fallback HTTP client"),
    }
}

/// Configuration for the reference Anthropic client.
#[derive(Debug, Clone)]
pub struct AnthropicClientConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub smart_model: String,
    pub cheap_model: String,
    pub timeout_secs: u64,
    pub smart_rates: CostRates,
    pub cheap_rates: CostRates,
}

impl AnthropicClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            smart_model: "claude-3-5-sonnet-20241022".to_string(),
            cheap_model: "claude-3-5-haiku-20241022".to_string(),
            timeout_secs: 120,
            smart_rates: CostRates {
                input_cost_per_1k: 0.005,
                output_cost_per_1k: 0.015,
            },
            cheap_rates: CostRates {
                input_cost_per_1k: 0.00015,
                output_cost_per_1k: 0.0006,
            },
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequestMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicRequestMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
    #[serde(default)]
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// Reference implementation of [`LlmClient`] against the Anthropic Messages API.
pub struct AnthropicLlmClient {
    config: AnthropicClientConfig,
    http: Client,
    cost: Mutex<CostTracker>,
}

impl AnthropicLlmClient {
    const DEFAULT_BASE_URL: &'static str = "https://api.anthropic.com";
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(config: AnthropicClientConfig) -> Self {
        let http = build_http_client(config.timeout_secs);
        Self {
            config,
            http,
            cost: Mutex::new(CostTracker::new()),
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(Self::DEFAULT_BASE_URL)
    }

    async fn call(&self, model: &str, system: Option<String>, user_content: String, max_tokens: u32, rates: CostRates) -> Result<CompletionResponse> {
        let request = AnthropicRequest {
            model: model.to_string(),
            max_tokens,
            messages: vec![AnthropicRequestMessage {
                role: "user",
                content: user_content,
            }],
            system,
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", Self::API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::llm("anthropic", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AnthropicErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(Error::llm("anthropic", format!("HTTP {status}: {message}")));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| Error::llm("anthropic", format!("malformed response body: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        };

        {
            let mut cost = self.cost.lock().expect("cost tracker mutex poisoned");
            cost.record(model, usage, rates);
        }

        Ok(CompletionResponse { text, usage })
    }
}

#[async_trait]
impl LlmClient for AnthropicLlmClient {
    async fn generate(&self, messages: &[ChatMessage]) -> Result<CompletionResponse> {
        let system = messages
            .iter()
            .find(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone());
        let user_content = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        self.call(&self.config.smart_model.clone(), system, user_content, 4096, self.config.smart_rates)
            .await
    }

    async fn generate_cheap(&self, prompt: &str, max_tokens: u32) -> Result<CompletionResponse> {
        self.call(&self.config.cheap_model.clone(), None, prompt.to_string(), max_tokens, self.config.cheap_rates)
            .await
    }

    fn cost_tracker(&self) -> CostTracker {
        self.cost.lock().expect("cost tracker mutex poisoned").clone()
    }
}

#[cfg(test)]
pub mod test_double {
    //! An in-memory, scripted [`LlmClient`] for stage/orchestrator tests.
    use super::*;
    use std::sync::Mutex as StdMutex;

    pub struct ScriptedLlmClient {
        generate_responses: StdMutex<std::collections::VecDeque<Result<CompletionResponse>>>,
        cheap_responses: StdMutex<std::collections::VecDeque<Result<CompletionResponse>>>,
        cost: StdMutex<CostTracker>,
        fixed_cost_usd: StdMutex<Option<f64>>,
    }

    impl ScriptedLlmClient {
        pub fn new() -> Self {
            Self {
                generate_responses: StdMutex::new(std::collections::VecDeque::new()),
                cheap_responses: StdMutex::new(std::collections::VecDeque::new()),
                cost: StdMutex::new(CostTracker::new()),
                fixed_cost_usd: StdMutex::new(None),
            }
        }

        pub fn push_generate_ok(&self, text: impl Into<String>) {
            self.generate_responses.lock().unwrap().push_back(Ok(CompletionResponse {
                text: text.into(),
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                },
            }));
        }

        pub fn push_generate_err(&self, message: impl Into<String>) {
            self.generate_responses
                .lock()
                .unwrap()
                .push_back(Err(Error::llm("test", message.into())));
        }

        pub fn push_cheap_ok(&self, text: impl Into<String>) {
            self.cheap_responses.lock().unwrap().push_back(Ok(CompletionResponse {
                text: text.into(),
                usage: TokenUsage {
                    input_tokens: 50,
                    output_tokens: 20,
                },
            }));
        }

        pub fn push_cheap_err(&self, message: impl Into<String>) {
            self.cheap_responses
                .lock()
                .unwrap()
                .push_back(Err(Error::llm("test", message.into())));
        }

        /// Force `cost_tracker().total_cost_usd` to report a fixed value,
        /// for exercising budget-cap stop conditions deterministically.
        pub fn set_fixed_cost_usd(&self, cost: f64) {
            *self.fixed_cost_usd.lock().unwrap() = Some(cost);
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<CompletionResponse> {
            let next = self.generate_responses.lock().unwrap().pop_front();
            let result = next.unwrap_or_else(|| Err(Error::llm("test", "no scripted response left")));
            if let Ok(resp) = &result {
                self.cost.lock().unwrap().record(
                    "smart-test",
                    resp.usage,
                    CostRates {
                        input_cost_per_1k: 0.005,
                        output_cost_per_1k: 0.015,
                    },
                );
            }
            result
        }

        async fn generate_cheap(&self, _prompt: &str, _max_tokens: u32) -> Result<CompletionResponse> {
            let next = self.cheap_responses.lock().unwrap().pop_front();
            let result = next.unwrap_or_else(|| Err(Error::llm("test", "no scripted response left")));
            if let Ok(resp) = &result {
                self.cost.lock().unwrap().record(
                    "cheap-test",
                    resp.usage,
                    CostRates {
                        input_cost_per_1k: 0.00015,
                        output_cost_per_1k: 0.0006,
                    },
                );
            }
            result
        }

        fn cost_tracker(&self) -> CostTracker {
            let mut tracker = self.cost.lock().unwrap().clone();
            if let Some(fixed) = *self.fixed_cost_usd.lock().unwrap() {
                tracker.total_cost_usd = fixed;
            }
            tracker
        }
    }
}
