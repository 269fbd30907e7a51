//! The two agents layered on [`AgentSession`](crate::session::AgentSession):
//! planning resolves the structure and parameters, execution drives the tools.

pub mod execution;
pub mod planning;

use std::sync::Arc;

use dynamate_core::provider::LlmProvider;
use dynamate_settings::{AgentSettings, DynamateSettings};
use dynamate_tools::ToolExecutor;

use crate::run_log::RunLog;
use crate::session::SessionConfig;

pub use execution::{ExecutionAgent, ExecutionReport, ToolStats};
pub use planning::{PlanningAgent, PlanningRequest};

/// Everything an agent needs besides its own inputs.
#[derive(Clone)]
pub struct AgentDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub executor: Arc<dyn ToolExecutor>,
    pub run_log: RunLog,
    pub session: SessionConfig,
    pub limits: AgentSettings,
}

impl AgentDeps {
    pub fn new(
        settings: &DynamateSettings,
        provider: Arc<dyn LlmProvider>,
        executor: Arc<dyn ToolExecutor>,
        run_log: RunLog,
    ) -> Self {
        Self {
            provider,
            executor,
            run_log,
            session: SessionConfig::from_settings("agent", settings),
            limits: settings.agent.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::path::Path;

    use dynamate_llm::MockProvider;

    use crate::dispatch::testing::FakeExecutor;

    pub fn deps(
        provider: &Arc<MockProvider>,
        executor: &Arc<FakeExecutor>,
        log_dir: &Path,
        limits: AgentSettings,
    ) -> AgentDeps {
        let mut settings = DynamateSettings::default();
        settings.agent = limits;
        AgentDeps::new(
            &settings,
            provider.clone(),
            executor.clone(),
            RunLog::new(log_dir.join("agent_runs.jsonl")),
        )
    }

    /// Non-empty lines of the run log, parsed.
    pub fn log_lines(log_dir: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(log_dir.join("agent_runs.jsonl"))
            .unwrap_or_default()
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}
