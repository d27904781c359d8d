//! Test fixtures for integration testing
//!
//! [`SweepTestContext`] wires in-memory table and log services, a temporary
//! backup root and fast retry policies into an orchestrator.

mod prompt;
mod sweep_context;

pub use prompt::CountingPrompt;
pub use sweep_context::SweepTestContext;
