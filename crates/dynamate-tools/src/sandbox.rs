use std::fmt;
use std::path::{Component, Path, PathBuf};

use dynamate_core::plan::SimulationParameters;

/// Per-session context handed to every tool call.
#[derive(Clone, Debug)]
pub struct ToolContext {
    /// Run directory owned by the session. Every tool reads and writes inside it.
    pub sandbox: PathBuf,
    /// Resolved simulation parameters, once planning has produced them. Used when
    /// the model omits temperature or duration.
    pub parameters: Option<SimulationParameters>,
}

/// A path argument that points outside the sandbox.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathRefusal {
    pub requested: String,
    pub sandbox: PathBuf,
}

impl fmt::Display for PathRefusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Refusing to access {}: path is outside the sandbox {}",
            self.requested,
            self.sandbox.display()
        )
    }
}

impl ToolContext {
    pub fn new(sandbox: impl Into<PathBuf>) -> Self {
        Self {
            sandbox: sandbox.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: SimulationParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Resolve a model-supplied path. Relative paths are taken from the sandbox;
    /// absolute paths must already lie inside it.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, PathRefusal> {
        let refusal = || PathRefusal {
            requested: raw.to_string(),
            sandbox: self.sandbox.clone(),
        };
        let sandbox = normalize(&self.sandbox).ok_or_else(refusal)?;
        let requested = Path::new(raw.trim());
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            sandbox.join(requested)
        };
        let resolved = normalize(&joined).ok_or_else(refusal)?;
        if resolved.starts_with(&sandbox) {
            Ok(resolved)
        } else {
            Err(refusal())
        }
    }

    /// Path of a file the tool itself names (never model-controlled).
    pub fn file(&self, name: &str) -> PathBuf {
        self.sandbox.join(name)
    }
}

/// Lexically resolve `.` and `..`. `None` when `..` climbs past the root.
fn normalize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    Some(out)
}
