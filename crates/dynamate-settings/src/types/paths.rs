use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filesystem locations. Relative paths resolve against the process working directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSettings {
    /// Parent of the per-run `run_<timestamp>` sandboxes.
    pub sandbox_root: PathBuf,
    pub agent_logs: PathBuf,
    /// JSONL run log, inside `agent_logs`.
    pub run_log_file: String,
    /// Shell scripts for tleap, GROMACS and Amber conversion.
    pub scripts_dir: PathBuf,
    /// MDP templates copied into each sandbox.
    pub mdp_dir: PathBuf,
    /// Literature indexed by `search_papers`.
    pub paper_dir: PathBuf,
    /// Dotenv file read at startup and updated with a prompted API key.
    pub env_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            sandbox_root: PathBuf::from("sandbox"),
            agent_logs: PathBuf::from("agent_logs"),
            run_log_file: "agent_runs.jsonl".to_string(),
            scripts_dir: PathBuf::from("scripts"),
            mdp_dir: PathBuf::from("scripts/mdp_files"),
            paper_dir: PathBuf::from("my_papers"),
            env_file: PathBuf::from(".env"),
        }
    }
}

impl PathSettings {
    pub fn run_log_path(&self) -> PathBuf {
        self.agent_logs.join(&self.run_log_file)
    }

    /// Resolve every relative path against `base`.
    pub fn rooted_at(&self, base: &Path) -> Self {
        let root = |p: &PathBuf| if p.is_absolute() { p.clone() } else { base.join(p) };
        Self {
            sandbox_root: root(&self.sandbox_root),
            agent_logs: root(&self.agent_logs),
            run_log_file: self.run_log_file.clone(),
            scripts_dir: root(&self.scripts_dir),
            mdp_dir: root(&self.mdp_dir),
            paper_dir: root(&self.paper_dir),
            env_file: root(&self.env_file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_path_joins_logs_dir() {
        let p = PathSettings::default();
        assert_eq!(p.run_log_path(), PathBuf::from("agent_logs/agent_runs.jsonl"));
    }

    #[test]
    fn rooted_at_keeps_absolute_paths() {
        let p = PathSettings {
            paper_dir: PathBuf::from("/data/papers"),
            ..PathSettings::default()
        };
        let rooted = p.rooted_at(Path::new("/opt/dynamate"));
        assert_eq!(rooted.paper_dir, PathBuf::from("/data/papers"));
        assert_eq!(rooted.sandbox_root, PathBuf::from("/opt/dynamate/sandbox"));
        assert_eq!(rooted.mdp_dir, PathBuf::from("/opt/dynamate/scripts/mdp_files"));
    }
}
