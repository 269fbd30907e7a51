use std::path::PathBuf;

/// Infrastructure faults raised by tool implementations.
///
/// Expected domain failures (missing inputs, non-zero exits, bad arguments) are not
/// faults: they are narrated back to the model as the tool's text output.
#[derive(Debug, thiserror::Error)]
pub enum ToolFault {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client setup failed: {0}")]
    Http(String),
}

impl ToolFault {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
