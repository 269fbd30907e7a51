use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::ToolFault;

/// Captured result of one external program run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// Stderr then stdout, skipping empty streams.
    pub fn combined(&self) -> String {
        [self.stderr.trim_end(), self.stdout.trim_end()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn code_text(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none (terminated by signal)".to_string())
    }
}

/// Run `program` with `args` in `cwd` and wait for it. A non-zero exit is returned as
/// data; only a failure to start the program is a fault.
pub async fn run_program<I, S>(program: &str, args: I, cwd: &Path) -> Result<ProcessOutput, ToolFault>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    debug!(program, ?args, cwd = %cwd.display(), "running program");
    let start = Instant::now();

    let output = Command::new(program)
        .args(&args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|source| ToolFault::Spawn {
            program: program.to_string(),
            source,
        })?;

    let result = ProcessOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if result.success {
        debug!(program, elapsed_ms = start.elapsed().as_millis() as u64, "program finished");
    } else {
        warn!(
            program,
            code = result.code_text(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "program exited with failure"
        );
    }
    Ok(result)
}

/// Runs the pipeline's shell scripts (`run_tleap.sh`, `equil_Gromacs.sh`, ...) from
/// one scripts directory through a configured shell.
#[derive(Clone, Debug)]
pub struct ScriptRunner {
    shell: String,
    dir: PathBuf,
}

impl ScriptRunner {
    pub fn new(shell: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            dir: dir.into(),
        }
    }

    pub fn script_path(&self, script: &str) -> PathBuf {
        self.dir.join(script)
    }

    pub async fn run<I, S>(&self, script: &str, args: I, cwd: &Path) -> Result<ProcessOutput, ToolFault>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut full: Vec<OsString> = vec![self.script_path(script).into_os_string()];
        full.extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        run_program(&self.shell, full, cwd).await
    }
}
