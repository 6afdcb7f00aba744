use crate::command::ExitCode;
use regex::Regex;
use std::collections::HashMap;
use std::env as stdenv;
use std::ffi::CString;
use std::path::PathBuf;
use std::sync::LazyLock;
use thiserror::Error;

static VARIABLE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("constant pattern"));

/// Returns true if `name` can be used as a shell variable name.
pub fn is_valid_name(name: &str) -> bool {
    VARIABLE_NAME.is_match(name)
}

/// Rejected assignment to a name outside `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid characters for variable {0}")]
pub struct InvalidName(pub String);

/// The shell's variable store.
///
/// The store contains:
/// - `vars`: every variable, all of them exported to spawned programs.
/// - `exit_request`: set by the `exit` built-in; an interactive loop checks it after each line.
///
/// All writes go through [`Environment::set_var`], which validates the name. Children get
/// a copy of the map through [`Environment::exports`] and can never write back.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    vars: HashMap<String, String>,
    /// When set, the interactive loop should terminate with this status.
    pub exit_request: Option<ExitCode>,
}

impl Environment {
    /// An empty store. Mostly useful for tests and embedding.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the current process environment into a new store.
    ///
    /// Entries whose names are not valid shell variable names are skipped.
    pub fn from_process() -> Self {
        let mut env = Self::new();
        for (k, v) in stdenv::vars() {
            if is_valid_name(&k) {
                env.vars.insert(k, v);
            }
        }
        env
    }

    /// Get the value of a variable.
    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a variable.
    pub fn set_var(
        &mut self,
        key: impl Into<String>,
        val: impl Into<String>,
    ) -> Result<(), InvalidName> {
        let key = key.into();
        if !is_valid_name(&key) {
            return Err(InvalidName(key));
        }
        tracing::trace!(name = %key, "variable assigned");
        self.vars.insert(key, val.into());
        Ok(())
    }

    pub fn remove_var(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    /// Assign `val` only when `key` has no value yet.
    pub fn set_default(&mut self, key: &str, val: &str) -> Result<(), InvalidName> {
        if self.vars.contains_key(key) {
            return Ok(());
        }
        self.set_var(key, val)
    }

    /// The user's home directory, used for `~` and a bare `cd`.
    pub fn home(&self) -> String {
        self.get_var("HOME").unwrap_or("/home").to_string()
    }

    /// The logical working directory: `PWD` if set, else what the kernel reports.
    pub fn pwd(&self) -> PathBuf {
        match self.get_var("PWD") {
            Some(pwd) if !pwd.is_empty() => PathBuf::from(pwd),
            _ => stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }

    /// `NAME=value` strings for `execve`. Values with interior NUL bytes cannot be exported
    /// and are left out.
    pub fn exports(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
