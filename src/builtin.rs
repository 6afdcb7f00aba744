use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::env::Environment;
use crate::external::{Resolution, resolve};
use crate::interpreter::{Factory, Interpreter};
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use nix::errno::Errno;
use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

/// Names handled inside the shell, checked before any filesystem lookup.
pub const BUILTIN_NAMES: [&str; 5] = ["exit", "pwd", "cd", "var", "which"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "var" or "cd".
    fn name() -> &'static str;

    /// Executes the command.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    /// An `Err` is reported on stderr as a single line and turned into status 1.
    fn execute(self, stdout: &mut dyn Write, shell: &mut Interpreter) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        shell: &mut Interpreter,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdout, shell) {
            Ok(x) => Ok(x),
            Err(e) => {
                eprintln!("{e:#}");
                Ok(1)
            }
        }
    }
}

/// Usage errors and `--help` output produced by argh.
struct InvalidArgs {
    command: &'static str,
    output: String,
    is_error: bool,
}

impl InvalidArgs {
    /// Usage errors name the built-in that rejected its arguments.
    fn diagnostic(&self) -> String {
        format!("{}: {}", self.command, self.output.trim_end())
    }
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        stdout: &mut dyn Write,
        _shell: &mut Interpreter,
    ) -> Result<ExitCode> {
        if self.is_error {
            eprintln!("{}", self.diagnostic());
            Ok(1)
        } else {
            writeln!(stdout, "{}", self.output.trim_end())?;
            Ok(0)
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn try_create(
        &self,
        _env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    command: T::name(),
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

#[derive(FromArgs)]
/// Exit the shell.
pub struct Exit {
    #[argh(positional, greedy)]
    /// exit status; defaults to 0.
    pub args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _stdout: &mut dyn Write, shell: &mut Interpreter) -> Result<ExitCode> {
        let code = match self.args.as_slice() {
            [] => 0,
            [code] => code
                .parse::<ExitCode>()
                .map_err(|_| anyhow!("exit: non-integer exit code provided: {code}"))?,
            _ => bail!("exit: too many arguments"),
        };
        tracing::debug!(code, "exit requested");
        shell.env_mut().exit_request = Some(code);
        Ok(code)
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {
    #[argh(switch, short = 'P')]
    /// print the physical directory, with symbolic links resolved.
    pub physical: bool,
}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, stdout: &mut dyn Write, shell: &mut Interpreter) -> Result<ExitCode> {
        let pwd = shell.env().pwd();
        let shown = if self.physical {
            fs::canonicalize(&pwd).with_context(|| format!("pwd: {}", pwd.display()))?
        } else {
            pwd
        };
        writeln!(stdout, "{}", shown.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME variable.
pub struct Cd {
    #[argh(switch, short = 'P')]
    /// record the physical directory in PWD instead of the logical one.
    pub physical: bool,

    #[argh(positional, greedy)]
    /// directory to switch to; absolute or relative to the current directory.
    pub targets: Vec<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _stdout: &mut dyn Write, shell: &mut Interpreter) -> Result<ExitCode> {
        // `cd dir -P` is accepted as well as `cd -P dir`
        let physical = self.physical || self.targets.iter().any(|t| t == "-P");
        let targets: Vec<&String> = self.targets.iter().filter(|t| *t != "-P").collect();
        if targets.len() > 1 {
            bail!("cd: too many arguments");
        }

        let env = shell.env_mut();
        let old_pwd = env.pwd();
        let (dir, logical) = match targets.first() {
            None => {
                let home = PathBuf::from(env.home());
                (home.clone(), home)
            }
            Some(t) if t.as_str() == ".." => {
                let parent = old_pwd.parent().map(Path::to_path_buf);
                (PathBuf::from(".."), parent.unwrap_or(old_pwd))
            }
            Some(t) => {
                let target = PathBuf::from(t.as_str());
                let logical = if target.is_absolute() {
                    target.clone()
                } else {
                    normalize_lexically(&old_pwd.join(&target))
                };
                (target, logical)
            }
        };

        std::env::set_current_dir(&dir).map_err(|e| cd_error(&dir, e))?;
        let new_pwd = if physical {
            std::env::current_dir().context("cd: cannot determine current directory")?
        } else {
            logical
        };
        tracing::debug!(pwd = %new_pwd.display(), "changed directory");
        env.set_var("PWD", new_pwd.to_string_lossy())?;
        Ok(0)
    }
}

fn cd_error(dir: &Path, e: io::Error) -> anyhow::Error {
    let dir = dir.display();
    match e.raw_os_error().map(Errno::from_raw) {
        Some(Errno::ENOENT) => anyhow!("cd: no such file or directory: {dir}"),
        Some(Errno::ENOTDIR) => anyhow!("cd: not a directory: {dir}"),
        Some(Errno::EACCES) => anyhow!("cd: permission denied: {dir}"),
        _ => anyhow!("cd: {dir}: {e}"),
    }
}

/// Resolves `.` and `..` components without touching the filesystem.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

#[derive(FromArgs)]
/// Assign a shell variable: `var NAME VALUE`, or `var -s NAME COMMAND` to store the
/// output of COMMAND.
pub struct Var {
    #[argh(switch, short = 's')]
    /// run the value as a command line and store its output.
    pub substitute: bool,

    #[argh(switch, short = 'r')]
    /// with -s, keep trailing whitespace of the output.
    pub raw: bool,

    #[argh(positional, greedy)]
    /// NAME followed by VALUE or COMMAND.
    pub args: Vec<String>,
}

impl BuiltinCommand for Var {
    fn name() -> &'static str {
        "var"
    }

    fn execute(self, _stdout: &mut dyn Write, shell: &mut Interpreter) -> Result<ExitCode> {
        let (name, value) = match (self.substitute, self.args.as_slice()) {
            (true, [name, command]) => {
                check_name(name)?;
                let output = shell.capture(command, !self.raw)?;
                (name, output)
            }
            (true, args) => bail!(
                "var: expected 3 arguments with -s, got {}",
                args.len() + 1
            ),
            (false, [name, value]) => {
                check_name(name)?;
                (name, value.clone())
            }
            (false, args) => bail!("var: expected 2 arguments, got {}", args.len()),
        };
        shell.env_mut().set_var(name.as_str(), value)?;
        Ok(0)
    }
}

fn check_name(name: &str) -> Result<()> {
    if !crate::env::is_valid_name(name) {
        bail!("var: invalid characters for variable {name}");
    }
    Ok(())
}

#[derive(FromArgs)]
/// Show how each command name would be run.
pub struct Which {
    #[argh(positional, greedy)]
    /// command names to look up.
    pub commands: Vec<String>,
}

impl BuiltinCommand for Which {
    fn name() -> &'static str {
        "which"
    }

    fn execute(self, stdout: &mut dyn Write, shell: &mut Interpreter) -> Result<ExitCode> {
        if self.commands.is_empty() {
            bail!("usage: which command ...");
        }
        let mut status = 0;
        for cmd in &self.commands {
            match resolve(cmd, shell.env()) {
                Resolution::BuiltIn => writeln!(stdout, "{cmd}: shell built-in command")?,
                Resolution::Found(path) => writeln!(stdout, "{}", path.display())?,
                Resolution::NotFound | Resolution::NotExecutable(_) => {
                    writeln!(stdout, "{cmd} not found")?;
                    status = 1;
                }
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::env as stdenv;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::{Mutex, MutexGuard, OnceLock};

    fn lock_current_dir() -> MutexGuard<'static, ()> {
        static MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
        MUTEX
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Restores the process working directory when dropped.
    struct CwdGuard(PathBuf);

    impl Drop for CwdGuard {
        fn drop(&mut self) {
            let _ = stdenv::set_current_dir(&self.0);
        }
    }

    fn shell() -> Interpreter {
        let mut env = Environment::new();
        env.set_var("PATH", "/bin:/usr/bin").unwrap();
        env.set_var("HOME", "/").unwrap();
        Interpreter::with_builtins(env)
    }

    fn run(shell: &mut Interpreter, name: &str, args: &[&str]) -> (Option<ExitCode>, String) {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let status = shell.dispatch(name, &args, &mut out);
        (status, String::from_utf8(out).unwrap())
    }

    #[test]
    fn unknown_names_are_not_handled() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "ls", &[]), (None, String::new()));
        assert!(is_builtin("cd"));
        assert!(!is_builtin("echo"));
    }

    #[test]
    fn test_pwd_prints_logical_dir() {
        let mut sh = shell();
        sh.env_mut().set_var("PWD", "/some/logical/dir").unwrap();
        assert_eq!(
            run(&mut sh, "pwd", &[]),
            (Some(0), "/some/logical/dir\n".to_string())
        );
    }

    #[test]
    fn test_pwd_physical_resolves_links() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut sh = shell();
        sh.env_mut().set_var("PWD", link.to_string_lossy()).unwrap();
        let expected = format!("{}\n", fs::canonicalize(&real).unwrap().display());
        assert_eq!(run(&mut sh, "pwd", &["-P"]), (Some(0), expected));
    }

    #[test]
    fn test_pwd_rejects_unknown_flags() {
        let mut sh = shell();
        let (status, out) = run(&mut sh, "pwd", &["-x"]);
        assert_eq!(status, Some(1));
        assert_eq!(out, "");
    }

    #[test]
    fn test_usage_errors_name_the_builtin() {
        let early = match Pwd::from_args(&["pwd"], &["-x"]) {
            Ok(_) => panic!("-x must be rejected"),
            Err(early) => early,
        };
        let invalid = InvalidArgs {
            command: Pwd::name(),
            output: early.output,
            is_error: early.status.is_err(),
        };
        assert!(invalid.is_error);
        let message = invalid.diagnostic();
        assert!(message.starts_with("pwd: "), "{message}");
        assert!(message.contains("-x"), "{message}");
    }

    #[test]
    fn test_exit_codes() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "exit", &["abc"]).0, Some(1));
        assert_eq!(sh.env().exit_request, None);
        assert_eq!(run(&mut sh, "exit", &["1", "2"]).0, Some(1));
        assert_eq!(sh.env().exit_request, None);

        assert_eq!(run(&mut sh, "exit", &["3"]).0, Some(3));
        assert_eq!(sh.env().exit_request, Some(3));

        let mut sh = shell();
        run(&mut sh, "exit", &[]);
        assert_eq!(sh.env().exit_request, Some(0));
    }

    #[test]
    fn test_var_assigns() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "var", &["GREETING", "hi there"]).0, Some(0));
        assert_eq!(sh.env().get_var("GREETING"), Some("hi there"));
    }

    #[test]
    fn test_var_argument_errors() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "var", &["ONLY"]).0, Some(1));
        assert_eq!(run(&mut sh, "var", &["A", "b", "c"]).0, Some(1));
        assert_eq!(run(&mut sh, "var", &["1BAD", "x"]).0, Some(1));
        assert_eq!(run(&mut sh, "var", &["-s", "X"]).0, Some(1));
        assert_eq!(run(&mut sh, "var", &["-q", "X", "y"]).0, Some(1));
        assert_eq!(sh.env().get_var("ONLY"), None);
        assert_eq!(sh.env().get_var("A"), None);
        assert_eq!(sh.env().get_var("X"), None);
    }

    #[test]
    fn test_var_substitution_captures_output() {
        let mut sh = shell();
        assert_eq!(run(&mut sh, "var", &["-s", "OUT", "echo 42"]).0, Some(0));
        assert_eq!(sh.env().get_var("OUT"), Some("42"));

        assert_eq!(run(&mut sh, "var", &["-s", "-r", "RAW", "echo 42"]).0, Some(0));
        assert_eq!(sh.env().get_var("RAW"), Some("42\n"));
    }

    #[test]
    fn test_var_substitution_failure_leaves_variable_untouched() {
        let mut sh = shell();
        sh.env_mut().set_var("OUT", "before").unwrap();
        assert_eq!(
            run(&mut sh, "var", &["-s", "OUT", "nonexistent_binary_xyz"]).0,
            Some(1)
        );
        assert_eq!(sh.env().get_var("OUT"), Some("before"));
    }

    #[test]
    fn test_which_reports_each_kind() {
        let mut sh = shell();
        let (status, out) = run(&mut sh, "which", &["cd", "sh", "nonexistent_binary_xyz"]);
        assert_eq!(status, Some(1));
        assert_eq!(
            out,
            "cd: shell built-in command\n/bin/sh\nnonexistent_binary_xyz not found\n"
        );
        assert_eq!(run(&mut sh, "which", &[]).0, Some(1));
    }

    #[test]
    fn test_which_skips_non_executable_files() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        fs::write(&plain, "data").unwrap();
        fs::set_permissions(&plain, fs::Permissions::from_mode(0o644)).unwrap();

        let mut sh = shell();
        sh.env_mut()
            .set_var("PATH", dir.path().to_string_lossy())
            .unwrap();
        assert_eq!(
            run(&mut sh, "which", &["plain"]),
            (Some(1), "plain not found\n".to_string())
        );
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("/a/../..")), PathBuf::from("/"));
    }

    #[test]
    fn test_cd_to_absolute_path() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();

        let mut sh = shell();
        let target = canonical_temp.to_string_lossy().to_string();
        assert_eq!(run(&mut sh, "cd", &[target.as_str()]).0, Some(0));

        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), canonical_temp);
        assert_eq!(sh.env().get_var("PWD"), Some(target.as_str()));
    }

    #[test]
    fn test_cd_to_home_when_none() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();

        let mut sh = shell();
        sh.env_mut()
            .set_var("HOME", canonical_temp.to_string_lossy())
            .unwrap();
        assert_eq!(run(&mut sh, "cd", &[]).0, Some(0));

        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), canonical_temp);
        assert_eq!(sh.env().pwd(), canonical_temp);
    }

    #[test]
    fn test_cd_relative_updates_logical_pwd() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let temp = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(temp.path()).unwrap();
        fs::create_dir_all(base.join("a/b")).unwrap();
        std::os::unix::fs::symlink(base.join("a/b"), base.join("shortcut")).unwrap();
        stdenv::set_current_dir(&base).unwrap();

        let mut sh = shell();
        sh.env_mut().set_var("PWD", base.to_string_lossy()).unwrap();
        assert_eq!(run(&mut sh, "cd", &["shortcut"]).0, Some(0));
        assert_eq!(sh.env().pwd(), base.join("shortcut"));

        assert_eq!(run(&mut sh, "cd", &["."]).0, Some(0));
        assert_eq!(sh.env().pwd(), base.join("shortcut"));

        assert_eq!(run(&mut sh, "cd", &["-P", "."]).0, Some(0));
        assert_eq!(sh.env().pwd(), base.join("a/b"));
    }

    #[test]
    fn test_cd_dotdot_uses_stored_pwd() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let temp = tempfile::tempdir().unwrap();
        let base = fs::canonicalize(temp.path()).unwrap();
        fs::create_dir_all(base.join("x")).unwrap();
        stdenv::set_current_dir(base.join("x")).unwrap();

        let mut sh = shell();
        sh.env_mut()
            .set_var("PWD", "/not/what/the/kernel/says")
            .unwrap();
        assert_eq!(run(&mut sh, "cd", &[".."]).0, Some(0));
        assert_eq!(sh.env().get_var("PWD"), Some("/not/what/the"));
        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), base);
    }

    #[test]
    fn test_cd_errors_keep_state() {
        let _lock = lock_current_dir();
        let _restore = CwdGuard(stdenv::current_dir().unwrap());
        let orig = stdenv::current_dir().unwrap();
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("file");
        fs::write(&file, "").unwrap();

        let mut sh = shell();
        sh.env_mut().set_var("PWD", "/unchanged").unwrap();
        let missing = temp.path().join("missing").to_string_lossy().to_string();
        let not_dir = file.to_string_lossy().to_string();
        assert_eq!(run(&mut sh, "cd", &[missing.as_str()]).0, Some(1));
        assert_eq!(run(&mut sh, "cd", &[not_dir.as_str()]).0, Some(1));
        assert_eq!(run(&mut sh, "cd", &["a", "b"]).0, Some(1));

        assert_eq!(sh.env().get_var("PWD"), Some("/unchanged"));
        assert_eq!(stdenv::current_dir().unwrap(), orig);
    }

    #[test]
    fn test_cd_error_messages() {
        let enoent = io::Error::from_raw_os_error(Errno::ENOENT as i32);
        let enotdir = io::Error::from_raw_os_error(Errno::ENOTDIR as i32);
        let eacces = io::Error::from_raw_os_error(Errno::EACCES as i32);
        let dir = Path::new("/x");
        assert_eq!(cd_error(dir, enoent).to_string(), "cd: no such file or directory: /x");
        assert_eq!(cd_error(dir, enotdir).to_string(), "cd: not a directory: /x");
        assert_eq!(cd_error(dir, eacces).to_string(), "cd: permission denied: /x");
    }
}
