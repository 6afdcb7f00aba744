use crate::env::Environment;
use crate::interpreter::Interpreter;
use anyhow::Result;
use std::io::Write;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// Children killed by a signal report `128 + signal`, as POSIX shells do.
pub type ExitCode = i32;

/// Object-safe trait for a command that runs inside the shell process.
pub trait ExecutableCommand {
    /// Executes the command, writing its regular output to `stdout`.
    ///
    /// The command gets the whole interpreter so it can change variables or run
    /// another command line (as `var -s` does).
    fn execute(self: Box<Self>, stdout: &mut dyn Write, shell: &mut Interpreter)
    -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`, which tells the
/// caller the command was not handled here.
pub trait CommandFactory {
    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(
        &self,
        env: &Environment,
        name: &str,
        args: &[&str],
    ) -> Option<Box<dyn ExecutableCommand>>;
}
