//! Multi-step re-engagement sequences: due-step scheduling with smart
//! suppression, sequence authoring, and outcome reconciliation.

pub mod plan;
pub mod scheduler;

pub use plan::{create_sequence, StepDraft};
pub use scheduler::{SchedulerReport, SequenceScheduler, StepOutcome};
