//! # research-agent-core
//!
//! An iterative research agent: given one natural-language question, it
//! orchestrates a language model and a web-search backend to produce a
//! cited Markdown report. The control loop decomposes the question,
//! schedules bounded search/summarize work, reflects on coverage, enforces
//! multi-dimensional budgets, and produces a full report, a partial report,
//! or a structured failure — never an uncaught exception.
//!
//! ## Core components
//!
//! - **[`state`]**: the mutable record ([`state::RunState`]) carried through
//!   one run, with its invariants.
//! - **[`tracer`]**: timed, named spans and the persisted per-run trace
//!   document.
//! - **[`guardrails`]**: pure validation — query bounds, SSRF screening,
//!   citation bounds, query deduplication.
//! - **[`stages`]**: Planner, Researcher, Reflector, Synthesizer.
//! - **[`orchestrator`]**: drives the pipeline and owns every stop
//!   condition.
//! - **[`config`]**: [`config::OrchestratorConfig`], builder and
//!   environment-variable loading.
//! - **[`llm`]**, **[`search`]**, **[`fetch`]**: the narrow collaborator
//!   traits plus reference HTTP implementations.
//!
//! ## Example
//!
//! ```rust,ignore
//! use research_agent_core::{Orchestrator, OrchestratorConfig};
//! use research_agent_core::llm::{AnthropicClientConfig, AnthropicLlmClient};
//! use research_agent_core::search::TavilySearchClient;
//! use research_agent_core::fetch::JinaFetchClient;
//! use std::sync::Arc;
//!
//! # async fn run() {
//! let llm = Arc::new(AnthropicLlmClient::new(AnthropicClientConfig::new("sk-...")));
//! let search = Arc::new(TavilySearchClient::new("tvly-..."));
//! let fetch = Arc::new(JinaFetchClient::new(15.0, 2));
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default(), llm, search, fetch);
//! let state = orchestrator.run("What caused the 2008 financial crisis?", None).await;
//! println!("{}", state.final_report);
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod guardrails;
pub mod llm;
pub mod orchestrator;
pub mod search;
pub mod stages;
pub mod state;
pub mod tracer;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, ProgressCallback};
pub use state::{ContentSource, PageSummary, ReflectionOutcome, RunState, RunStatus};
pub use tracer::{Span, SpanStatus, Trace, Tracer};
