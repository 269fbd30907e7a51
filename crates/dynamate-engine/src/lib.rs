//! # dynamate-engine
//!
//! The agent control loop. An [`AgentSession`] owns one conversation: it compacts the
//! history when it outgrows the context budget, calls the model, and dispatches any
//! requested tools one at a time through a [`Dispatcher`] bound to a [`ToolRegistry`].
//!
//! Two agents sit on top of it. [`PlanningAgent`] locates the input structure and
//! settles the simulation parameters, producing a [`Plan`](dynamate_core::plan::Plan);
//! [`ExecutionAgent`] hands that plan to the model and runs tools until it answers
//! without calling any. [`Pipeline`] runs them back to back in a fresh sandbox and
//! records every run in the JSONL [`RunLog`].

#![deny(unsafe_code)]

pub mod agents;
pub mod compactor;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod prompts;
pub mod registry;
pub mod run_log;
pub mod session;
pub mod tokens;
pub mod truncate;

pub use agents::{AgentDeps, ExecutionAgent, ExecutionReport, PlanningAgent, PlanningRequest, ToolStats};
pub use compactor::{Compaction, Compactor};
pub use dispatch::{AcceptAll, Dispatcher, FailureMarkers, OutputCheck};
pub use error::EngineError;
pub use pipeline::{Pipeline, PipelineOutcome};
pub use registry::ToolRegistry;
pub use run_log::{FinalRecord, RunLog, RunLogError, RunRecord};
pub use session::{AgentSession, SessionConfig, SessionState, TurnOutcome};
