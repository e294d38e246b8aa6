use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    /// Bad profile, unknown model, missing input. Raised before anything is spawned.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("could not launch '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read alignment '{path}': {message}")]
    Fasta { path: String, message: String },
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl BatchError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("Could not {action} '{}'", path.display()), source)
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl From<String> for BatchError {
    fn from(err: String) -> Self {
        BatchError::Message(err)
    }
}
