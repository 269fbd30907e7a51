//! Prompt text for both agents. The long system prompts live in `prompts/`.

use dynamate_core::plan::Plan;

const PLANNING_SYSTEM: &str = include_str!("../prompts/planning.txt");
const EXECUTION_SYSTEM: &str = include_str!("../prompts/execution.txt");

pub const TEMPERATURE_QUESTION: &str = "Please pick a suitable temperature (in Kelvin) for running the \
molecular dynamics simulation. Also explain why you selected this temperature.";

pub const DURATION_QUESTION: &str = "Please pick a suitable simulation duration (in nanoseconds) for \
running a short molecular dynamics simulation of this system. Also explain why you selected this \
duration. A 10 ns simulation takes about an hour to complete, so keep the experiment brief (less \
than 1 ns).";

pub fn planning_system(sandbox_dir: &str) -> String {
    PLANNING_SYSTEM.replace("{sandbox_dir}", sandbox_dir)
}

pub fn structure_request(pdb_id: &str) -> String {
    format!(
        "I would like to run molecular dynamics for the system {pdb_id}. If a PDB file has not been \
         uploaded, use the tools available to fetch and prepare the PDB for {pdb_id}."
    )
}

/// Numbered step list, one `name: description` per line.
fn render_steps(plan: &Plan) -> String {
    plan.plan
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}: {}", i + 1, s.step, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn execution_system(plan: &Plan) -> String {
    let ligand = plan
        .ligand
        .as_ref()
        .map(|l| l.as_str().to_string())
        .unwrap_or_else(|| "none (protein only)".to_string());
    EXECUTION_SYSTEM
        .replace("{sandbox_dir}", &plan.sandbox_dir.display().to_string())
        .replace("{pdb_path}", &plan.pdb_file_path.display().to_string())
        .replace("{pdb_id}", &plan.pdb_id())
        .replace("{ligand}", &ligand)
        .replace("{temperature_k}", &plan.parameters.temperature_k.to_string())
        .replace("{duration_ns}", &plan.parameters.duration_ns.to_string())
        .replace("{steps}", &render_steps(plan))
}

/// First user turn of the execution phase: the plan itself, as JSON.
pub fn execution_kickoff(plan_json: &str) -> String {
    format!("Run the molecular dynamics pipeline described by this plan:\n{plan_json}")
}
