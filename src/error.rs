use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the pipeline-generation core.
///
/// The CLI maps these to distinct exit codes; everything that is not fatal
/// (unresolved state keys, unknown dependency targets, per-file parse
/// failures) travels as a `Diagnostic` instead and never aborts a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("discovery failed for {path}: {message}")]
    Discovery { path: PathBuf, message: String },

    #[error("dependency graph contains {} cycle(s):\n{}", .cycles.len(), format_cycles(.cycles))]
    Cycle { cycles: Vec<Vec<String>> },

    #[error("graph error: {message}")]
    Graph { message: String },

    #[error("change source failed: {message}")]
    ChangeSource { message: String },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Error::Graph {
            message: message.into(),
        }
    }

    /// Exit code the CLI should use for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => 2,
            Error::Cycle { .. } => 3,
            Error::Discovery { .. } => 4,
            Error::Graph { .. } | Error::ChangeSource { .. } => 1,
        }
    }
}

fn format_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| format!("  {}", c.join(" -> ")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, Error>;
