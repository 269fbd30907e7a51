use std::path::PathBuf;

use dynamate_core::errors::GatewayError;
use dynamate_core::plan::InvalidLigandCode;
use dynamate_tools::ToolFault;

use crate::run_log::RunLogError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unrecoverable input: {0}")]
    UnrecoverableInput(String),

    #[error("{what} still missing after {attempts} attempts")]
    PreconditionUnmet { what: String, attempts: u32 },

    #[error("malformed plan: {0}")]
    MalformedPlan(String),

    #[error("max turns exceeded: {0}")]
    MaxTurnsExceeded(u32),

    #[error("invalid session state: {0}")]
    InvalidState(String),

    #[error("tool fault: {0}")]
    Tool(#[from] ToolFault),

    #[error("run log error: {0}")]
    RunLog(#[from] RunLogError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    /// Short classification string for logs and run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gateway(e) => e.error_kind(),
            Self::UnknownTool(_) => "unknown_tool",
            Self::UnrecoverableInput(_) => "unrecoverable_input",
            Self::PreconditionUnmet { .. } => "precondition_unmet",
            Self::MalformedPlan(_) => "malformed_plan",
            Self::MaxTurnsExceeded(_) => "max_turns_exceeded",
            Self::InvalidState(_) => "invalid_state",
            Self::Tool(_) => "tool_fault",
            Self::RunLog(_) => "run_log",
            Self::Io { .. } => "io",
        }
    }
}

impl From<InvalidLigandCode> for EngineError {
    fn from(e: InvalidLigandCode) -> Self {
        Self::UnrecoverableInput(e.to_string())
    }
}
