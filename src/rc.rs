//! Startup configuration: the `.myshrc` resource file and the guaranteed defaults.
//!
//! The file holds a single JSON object mapping variable names to string values:
//!
//! ```json
//! { "PROMPT": "mysh$ ", "PATH": "$HOME/bin:${PATH}" }
//! ```
//!
//! Values may refer to variables already in the store (including ones set by earlier
//! entries of the same file) as `$NAME` or `${NAME}`. Unknown references stay as written.
//! Problems with single entries are reported and the entry is skipped; loading goes on.

use crate::env::{Environment, is_valid_name};
use regex::{Captures, Regex};
use serde_json::Value;
use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

pub const DEFAULT_PROMPT: &str = ">> ";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_PATH: &str = "/bin:/usr/bin";

const RC_FILE: &str = ".myshrc";

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$(\w+|\{[^}]*\})").expect("constant pattern"));

#[derive(Debug, Error)]
pub enum RcError {
    #[error("mysh: .myshrc: {0}: invalid characters for variable name")]
    InvalidName(String),
    #[error("mysh: .myshrc: {0}: not a string")]
    NotAString(String),
    #[error("mysh: invalid JSON format for .myshrc")]
    InvalidJson,
    #[error("mysh: .myshrc: {0}")]
    Io(#[from] io::Error),
}

/// `$MYSHDOTDIR/.myshrc`, or `$HOME/.myshrc` when `MYSHDOTDIR` is unset.
pub fn rc_path(env: &Environment) -> PathBuf {
    let dir = match env.get_var("MYSHDOTDIR") {
        Some(dir) => dir.to_string(),
        None => env.home(),
    };
    PathBuf::from(dir).join(RC_FILE)
}

/// Reads the resource file (if there is one) into `env`, then fills in the defaults.
///
/// Returns every problem found; none of them is fatal.
pub fn load(env: &mut Environment) -> Vec<RcError> {
    let path = rc_path(env);
    let mut problems = match std::fs::read_to_string(&path) {
        Ok(text) => {
            tracing::debug!(path = %path.display(), "loading resource file");
            apply(env, &text)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => vec![e.into()],
    };
    problems.extend(apply_defaults(env));
    problems
}

/// Assigns every valid entry of the JSON object in `text`.
pub fn apply(env: &mut Environment, text: &str) -> Vec<RcError> {
    let entries = match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(entries)) => entries,
        Ok(_) | Err(_) => return vec![RcError::InvalidJson],
    };

    let mut problems = Vec::new();
    for (key, value) in entries {
        if !is_valid_name(&key) {
            problems.push(RcError::InvalidName(key));
            continue;
        }
        let Value::String(value) = value else {
            problems.push(RcError::NotAString(key));
            continue;
        };
        let value = expand_references(&value, env);
        if let Err(e) = env.set_var(key, value) {
            problems.push(RcError::InvalidName(e.0));
        }
    }
    problems
}

/// Makes sure the prompt, version and search path exist.
pub fn apply_defaults(env: &mut Environment) -> Vec<RcError> {
    [
        ("PROMPT", DEFAULT_PROMPT),
        ("MYSH_VERSION", DEFAULT_VERSION),
        ("PATH", DEFAULT_PATH),
    ]
    .into_iter()
    .filter_map(|(key, value)| env.set_default(key, value).err())
    .map(|e| RcError::InvalidName(e.0))
    .collect()
}

fn expand_references(value: &str, env: &Environment) -> String {
    REFERENCE
        .replace_all(value, |caps: &Captures| {
            let name = caps[1].trim_start_matches('{').trim_end_matches('}');
            match env.get_var(name) {
                Some(found) => found.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}
