use crate::builtin::is_builtin;
use crate::env::Environment;
use crate::error::ResolveError;
use nix::unistd::{AccessFlags, access};
use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Where a command name leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Implemented inside the shell.
    BuiltIn,
    /// An existing file the user may execute.
    Found(PathBuf),
    /// Nothing with that name exists on the search path or as a literal path.
    NotFound,
    /// The path exists but lacks execute permission (or is not a regular file).
    NotExecutable(PathBuf),
}

impl Resolution {
    /// Converts the two failure kinds into errors naming the command.
    pub fn into_result(self, name: &str) -> Result<Target, ResolveError> {
        match self {
            Resolution::BuiltIn => Ok(Target::BuiltIn),
            Resolution::Found(path) => Ok(Target::External(path)),
            Resolution::NotFound => Err(ResolveError::NotFound(name.to_string())),
            Resolution::NotExecutable(_) => Err(ResolveError::PermissionDenied(name.to_string())),
        }
    }
}

/// A command that passed resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    BuiltIn,
    External(PathBuf),
}

/// Resolve a command name the way the shell runs it.
///
/// Built-in names win over everything. Otherwise each directory of `PATH` is tried in
/// order and the first existing candidate is taken; failing that the name is used as a
/// literal path, absolute or relative to the working directory. Whether the result may
/// be executed is checked only after a candidate was found.
pub fn resolve(name: &str, env: &Environment) -> Resolution {
    if is_builtin(name) {
        return Resolution::BuiltIn;
    }
    let search_paths = env.get_var("PATH").unwrap_or_default();
    let resolution = match find_command_path(OsStr::new(search_paths), Path::new(name)) {
        None => Resolution::NotFound,
        Some(path) if is_executable(&path) => Resolution::Found(path),
        Some(path) => Resolution::NotExecutable(path),
    };
    tracing::trace!(name, ?resolution, "resolved command");
    resolution
}

/// Find the first existing candidate for `path`.
///
/// - Empty path: `None`.
/// - Single component: every directory of `search_paths`, then the current directory.
/// - Anything containing a separator: taken as is.
pub fn find_command_path(search_paths: &OsStr, path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }

    let mut components = path.components();
    if let (Some(first), None) = (components.next(), components.next()) {
        if !path.is_absolute() {
            if let Some(found) = find_in_path(search_paths, first.as_os_str()) {
                return Some(found);
            }
        }
    }

    find_by_path(path).map(Path::to_path_buf)
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.exists())
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

fn is_executable(path: &Path) -> bool {
    path.is_file() && access(path, AccessFlags::X_OK).is_ok()
}

/// Everything `execve` needs, converted before forking so that a NUL byte in an
/// argument is reported by the shell rather than by a half-started child.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    pub path: CString,
    pub argv: Vec<CString>,
}

impl ExternalCommand {
    /// Returns `None` if the path or an argument contains a NUL byte.
    pub fn new(path: &Path, words: &[String]) -> Option<Self> {
        let path = CString::new(path.as_os_str().as_bytes()).ok()?;
        let argv = words
            .iter()
            .map(|w| CString::new(w.as_bytes()).ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { path, argv })
    }
}
