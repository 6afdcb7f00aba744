//! Error taxonomy of the execution core.
//!
//! Every variant renders as exactly one diagnostic line, ready to be printed on stderr.

use thiserror::Error;

/// Problems found while checking or expanding a line. Nothing has been spawned yet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// A single or double quote was opened and never closed.
    #[error("mysh: syntax error: unterminated quote")]
    UnterminatedQuote,
    /// A pipeline stage contained nothing but whitespace (`a | | b`).
    #[error("mysh: syntax error: expected command after pipe")]
    EmptyStage,
    /// `${...}` enclosed something that is not a variable name.
    #[error("mysh: syntax error: invalid characters for variable {0}")]
    InvalidVariable(String),
}

/// A stage's command could not be turned into something runnable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("mysh: command not found: {0}")]
    NotFound(String),
    #[error("mysh: permission denied: {0}")]
    PermissionDenied(String),
}

/// Anything that aborts the execution of a line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("mysh: error: {0}")]
    Os(#[from] nix::Error),
    #[error("mysh: error: {0}")]
    Io(#[from] std::io::Error),
}
