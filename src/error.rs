//! Error types for research-agent-core.

use thiserror::Error;

/// Result type alias using this crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running or configuring a research run.
///
/// Stages are expected to absorb collaborator failures into their own
/// documented fallback behavior (see `stages::*`) rather than letting these
/// variants escape to the orchestrator. The orchestrator's `run` is the one
/// place a propagated `Error` is allowed to surface, where it is converted
/// into `RunStatus::Failed`.
#[derive(Error, Debug)]
pub enum Error {
    /// The input query failed a guardrail check before any collaborator was called.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An LLM call failed (network error, non-2xx response, provider error body).
    #[error("LLM error ({provider}): {message}")]
    Llm { provider: String, message: String },

    /// Model output could not be parsed into the expected JSON shape.
    #[error("failed to parse model output: {0}")]
    ParseFailure(String),

    /// A configured budget was exceeded; carries the human-readable stop reason.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Trace persistence failed (I/O or serialization).
    #[error("trace persistence error: {0}")]
    TracePersistence(#[from] std::io::Error),

    /// Serialization/deserialization error outside of model-output parsing.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is invalid (out-of-range value, missing credential).
    #[error("configuration error: {0}")]
    Config(String),

    /// A span was asked to finish twice or closed out of order.
    #[error("tracer misuse: {0}")]
    TracerMisuse(String),

    /// Anything else unexpected; carries the failing component's name.
    #[error("unexpected failure in {component}: {message}")]
    Unexpected { component: String, message: String },
}

impl Error {
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }

    pub fn llm(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Llm {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn parse_failure(message: impl Into<String>) -> Self {
        Self::ParseFailure(message.into())
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::BudgetExceeded(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn unexpected(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unexpected {
            component: component.into(),
            message: message.into(),
        }
    }

    /// The `<kind>: <message>` form recorded into `RunState.errors` (§7, kind 5).
    pub fn as_error_line(&self) -> String {
        match self {
            Self::InvalidQuery(m) => format!("InvalidQuery: {m}"),
            Self::Llm { provider, message } => format!("LlmError({provider}): {message}"),
            Self::ParseFailure(m) => format!("ParseFailure: {m}"),
            Self::BudgetExceeded(m) => format!("BudgetExceeded: {m}"),
            Self::TracePersistence(e) => format!("TracePersistence: {e}"),
            Self::Serialization(e) => format!("Serialization: {e}"),
            Self::Config(m) => format!("Config: {m}"),
            Self::TracerMisuse(m) => format!("TracerMisuse: {m}"),
            Self::Unexpected { component, message } => {
                format!("Unexpected({component}): {message}")
            }
        }
    }
}
