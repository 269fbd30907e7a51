//! Shared types for the DynaMate agents: conversation messages, tool invocations,
//! the model-call boundary, gateway errors, and the simulation plan.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod plan;
pub mod provider;
pub mod tokens;
pub mod tools;
