use serde::{Deserialize, Serialize};

/// Loop caps and parameter fallbacks for the planning and execution agents.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Model turns spent trying to get a structure file into the sandbox.
    pub max_structure_attempts: u32,
    /// Model turns spent on each of temperature and duration.
    pub max_parameter_attempts: u32,
    /// Model calls the execution agent may make before the run fails.
    pub max_execution_turns: u32,
    pub default_temperature_k: f64,
    pub default_duration_ns: f64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_structure_attempts: 10,
            max_parameter_attempts: 5,
            max_execution_turns: 200,
            default_temperature_k: 310.0,
            default_duration_ns: 0.01,
        }
    }
}
