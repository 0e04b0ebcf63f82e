//! The four pipeline stages the orchestrator drives each round
//! (SPEC_FULL.md §4.4), grounded on `agent/planner.py`, `agent/researcher.py`,
//! `agent/reflector.py`, `agent/synthesizer.py`.
//!
//! Every stage follows the same contract: never propagate a collaborator
//! error upward, fall back to a conservative default instead, and record
//! what happened onto `RunState` directly.

mod planner;
mod reflector;
mod researcher;
mod synthesizer;

pub use planner::Planner;
pub use reflector::Reflector;
pub use researcher::Researcher;
pub use synthesizer::Synthesizer;
