//! Step sequencing for datasweep runs: pre-flight plans, confirmation gates
//! and the run report.

pub mod clients;
pub mod confirm;
pub mod orchestrator;
pub mod plan;
pub mod report;

pub use clients::{Services, load_sdk_config};
pub use confirm::{Confirmer, Prompt, StdinPrompt};
pub use orchestrator::Orchestrator;
pub use plan::{PlanEntry, StepKind, StepPlan};
pub use report::{REPORT_FILE, RunReport, StepReport, StepStatus};
