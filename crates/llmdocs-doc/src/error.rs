use std::io;
use std::path::PathBuf;

use llmdocs_ai::LlmError;
use thiserror::Error;

/// Errors surfaced by document operations.
#[derive(Debug, Error)]
pub enum DocError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid frontmatter: {0}")]
    Frontmatter(String),

    #[error("No connection found for model \"{model}\"")]
    NoConnection { model: String },

    #[error("A completion is already running for {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("No free document name left in {}", .0.display())]
    NoFreeDocPath(PathBuf),

    #[error(transparent)]
    Completion(#[from] LlmError),
}
