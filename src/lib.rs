//! `mysh`: a small interactive POSIX-style shell.
//!
//! A line goes through three stages before anything runs:
//!
//! 1. [`lexer`] splits it at unquoted pipes and into words, rejecting unbalanced quotes;
//! 2. [`expand`] substitutes `${NAME}` and a leading `~`, and removes quoting;
//! 3. [`parser`] assembles the result into a validated [`Pipeline`].
//!
//! The [`Interpreter`] then resolves every stage, forks one process per stage connected
//! by pipes, and either leaves the output on the terminal or captures it for
//! `var -s NAME COMMAND`. Five commands (`exit pwd cd var which`) are built in; see
//! [`BUILTIN_NAMES`]. [`job_control`] keeps Ctrl-C and the terminal pointed at whatever is
//! running in the foreground.

mod builtin;
pub mod command;
pub mod env;
pub mod error;
pub mod expand;
pub mod external;
mod interpreter;
pub mod job_control;
pub mod lexer;
pub mod parser;
mod process;
pub mod rc;

pub use builtin::{BUILTIN_NAMES, is_builtin};
pub use env::Environment;
pub use error::{ResolveError, ShellError, SyntaxError};
pub use interpreter::{Execution, Interpreter, Mode};
pub use parser::{Pipeline, Stage, parse_line};
