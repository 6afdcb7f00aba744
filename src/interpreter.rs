use crate::builtin::{Cd, Exit, Pwd, Var, Which};
use crate::command::{CommandFactory, ExitCode};
use crate::env::Environment;
use crate::error::{ResolveError, ShellError};
use crate::external::{ExternalCommand, Target, resolve};
use crate::job_control::JobControl;
use crate::parser::{Pipeline, Stage, parse_line};
use crate::process::{
    ChildSetup, cloexec_pipe, exec_external, fork_stage, read_to_end, wait_all, wait_for,
    write_stdout,
};
use crate::rc::DEFAULT_PROMPT;
use nix::unistd::Pid;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::ffi::CString;
use std::io::{self, Write};
use std::os::fd::{AsRawFd, OwnedFd};

/// Factory allows creating instances of built-in commands.
///
/// Only supports the built-in commands defined in this crate.
pub(crate) struct Factory<T> {
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: std::marker::PhantomData,
        }
    }
}

/// How the output of a pipeline is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// The last stage writes to the shell's own standard output.
    Interactive,
    /// The last stage writes into a pipe that the shell drains into a string.
    Capturing {
        /// Drop trailing whitespace from the captured text.
        strip_trailing: bool,
    },
}

/// The outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Exit status of the last stage.
    pub status: ExitCode,
    /// Captured output; `Some` exactly in [`Mode::Capturing`].
    pub output: Option<String>,
    /// Number of child processes forked and reaped.
    pub reaped: usize,
}

/// A stage that passed resolution and is ready to be forked.
enum Program {
    BuiltIn(Vec<String>),
    External(ExternalCommand),
}

/// The shell: a variable store, the built-in commands and the pipeline engine.
///
/// ```no_run
/// use mysh::{Environment, Interpreter};
/// let mut sh = Interpreter::with_builtins(Environment::from_process());
/// let out = sh.capture("echo hello | tr a-z A-Z", true).unwrap();
/// assert_eq!(out, "HELLO");
/// ```
pub struct Interpreter {
    env: Environment,
    commands: Vec<Box<dyn CommandFactory>>,
    jobs: JobControl,
}

impl Interpreter {
    /// Create a new interpreter with a custom set of command factories.
    pub fn new(env: Environment, commands: Vec<Box<dyn CommandFactory>>) -> Self {
        Self {
            env,
            commands,
            jobs: JobControl::detached(),
        }
    }

    /// An interpreter with every built-in command of the shell.
    pub fn with_builtins(env: Environment) -> Self {
        Self::new(
            env,
            vec![
                Box::new(Factory::<Exit>::default()),
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Var>::default()),
                Box::new(Factory::<Which>::default()),
            ],
        )
    }

    /// Take over signal handling and the controlling terminal, as an interactive shell
    /// does. Without this call running commands leaves process-wide state alone.
    pub fn enable_job_control(&mut self) {
        self.jobs = JobControl::interactive();
    }

    pub fn jobs(&self) -> &JobControl {
        &self.jobs
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Runs the built-in `name` with `stdout` as its output.
    ///
    /// Returns `None` if no factory knows the name.
    pub fn dispatch(
        &mut self,
        name: &str,
        args: &[String],
        stdout: &mut dyn Write,
    ) -> Option<ExitCode> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = self
            .commands
            .iter()
            .find_map(|factory| factory.try_create(&self.env, name, &args))?;
        let status = command.execute(stdout, self).unwrap_or_else(|e| {
            eprintln!("{e:#}");
            1
        });
        Some(status)
    }

    /// Parses and runs one line with the output going to the terminal.
    pub fn execute_line(&mut self, line: &str) -> Result<ExitCode, ShellError> {
        let pipeline = parse_line(line, &self.env)?;
        Ok(self.run_pipeline(&pipeline, Mode::Interactive)?.status)
    }

    /// Parses and runs one line, returning what its last stage wrote.
    pub fn capture(&mut self, line: &str, strip_trailing: bool) -> Result<String, ShellError> {
        let pipeline = parse_line(line, &self.env)?;
        let execution = self.run_pipeline(&pipeline, Mode::Capturing { strip_trailing })?;
        Ok(execution.output.unwrap_or_default())
    }

    /// Runs a parsed pipeline.
    ///
    /// Every stage is resolved before anything is forked, so a missing command anywhere
    /// in the line means nothing runs. A lone built-in runs inside the shell process so
    /// that it can change the shell's state; in a longer pipeline built-ins run in forked
    /// children like any other stage.
    pub fn run_pipeline(&mut self, pipeline: &Pipeline, mode: Mode) -> Result<Execution, ShellError> {
        let targets = pipeline
            .stages()
            .iter()
            .map(|stage| resolve(stage.name(), &self.env).into_result(stage.name()))
            .collect::<Result<Vec<_>, ResolveError>>()?;

        if let ([stage], [Target::BuiltIn]) = (pipeline.stages(), targets.as_slice()) {
            return Ok(self.run_builtin(stage, mode));
        }

        let programs = pipeline
            .stages()
            .iter()
            .zip(targets)
            .map(|(stage, target)| program_for(stage, target))
            .collect::<Result<Vec<_>, ShellError>>()?;
        let envp = self.env.exports();

        match (mode, programs.as_slice()) {
            (Mode::Interactive, [Program::External(cmd)]) => self.run_foreground(cmd, &envp),
            (Mode::Interactive, _) => {
                self.jobs.enter_piped();
                let result = self.run_group(&programs, &envp, None);
                self.jobs.enter_idle();
                result
            }
            (Mode::Capturing { strip_trailing }, _) => {
                self.jobs.enter_piped();
                let result = self.run_group(&programs, &envp, Some(strip_trailing));
                self.jobs.enter_idle();
                result
            }
        }
    }

    fn run_builtin(&mut self, stage: &Stage, mode: Mode) -> Execution {
        tracing::debug!(name = stage.name(), "running built-in in the shell process");
        match mode {
            Mode::Interactive => {
                let mut stdout = io::stdout();
                let status = self.dispatch_or_missing(&stage.words, &mut stdout);
                let _ = stdout.flush();
                Execution {
                    status,
                    output: None,
                    reaped: 0,
                }
            }
            Mode::Capturing { strip_trailing } => {
                let mut buf = Vec::new();
                let status = self.dispatch_or_missing(&stage.words, &mut buf);
                Execution {
                    status,
                    output: Some(finish_capture(buf, strip_trailing)),
                    reaped: 0,
                }
            }
        }
    }

    fn dispatch_or_missing(&mut self, words: &[String], stdout: &mut dyn Write) -> ExitCode {
        let (name, args) = (&words[0], &words[1..]);
        self.dispatch(name, args, stdout).unwrap_or_else(|| {
            eprintln!("{}", ResolveError::NotFound(name.clone()));
            127
        })
    }

    /// A single external command owning the terminal.
    fn run_foreground(&mut self, cmd: &ExternalCommand, envp: &[CString]) -> Result<Execution, ShellError> {
        let setup = ChildSetup {
            terminal: self.jobs.terminal_fd(),
            ..ChildSetup::default()
        };
        let pid = fork_stage(&setup, || exec_external(cmd, envp))?;
        self.jobs.enter_single(pid);
        let status = wait_for(pid);
        self.jobs.enter_idle();
        Ok(Execution {
            status: status?,
            output: None,
            reaped: 1,
        })
    }

    /// Forks every stage into one process group, connected by pipes. With `capture` set
    /// the last stage writes into a pipe as well and its contents are returned.
    fn run_group(
        &mut self,
        programs: &[Program],
        envp: &[CString],
        capture: Option<bool>,
    ) -> Result<Execution, ShellError> {
        let mut pids = Vec::with_capacity(programs.len());
        let spawned = self.spawn_all(programs, envp, capture.is_some(), &mut pids);

        // the capture pipe must be drained before waiting, or a chatty last stage blocks
        let captured = match spawned {
            Ok(Some(reader)) => read_to_end(reader).map(Some).map_err(ShellError::from),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        let status = wait_all(&pids);
        tracing::debug!(stages = programs.len(), reaped = pids.len(), "pipeline finished");

        let output = captured?.map(|bytes| finish_capture(bytes, capture.unwrap_or(false)));
        Ok(Execution {
            status: status?,
            output,
            reaped: pids.len(),
        })
    }

    /// Returns the read end of the capture pipe when `capturing`.
    fn spawn_all(
        &mut self,
        programs: &[Program],
        envp: &[CString],
        capturing: bool,
        pids: &mut Vec<Pid>,
    ) -> Result<Option<OwnedFd>, ShellError> {
        let last = programs.len() - 1;
        let mut upstream: Option<OwnedFd> = None;
        let mut pgid: Option<Pid> = None;

        for (i, program) in programs.iter().enumerate() {
            let (reader, writer) = if i < last || capturing {
                let (r, w) = cloexec_pipe()?;
                (Some(r), Some(w))
            } else {
                (None, None)
            };
            let raw = |fd: &Option<OwnedFd>| fd.as_ref().map(AsRawFd::as_raw_fd);
            let setup = ChildSetup {
                pgid,
                stdin: raw(&upstream),
                stdout: raw(&writer),
                terminal: None,
                close: [raw(&upstream), raw(&reader), raw(&writer)],
            };

            let pid = fork_stage(&setup, || self.run_in_child(program, envp))?;
            pids.push(pid);
            if pgid.is_none() {
                pgid = Some(pid);
                self.jobs.track_group(pid);
            }

            // the child holds its own copies now
            drop(writer);
            upstream = reader;
        }
        Ok(upstream)
    }

    /// Runs on the child side of the fork.
    fn run_in_child(&mut self, program: &Program, envp: &[CString]) -> ExitCode {
        match program {
            Program::External(cmd) => exec_external(cmd, envp),
            Program::BuiltIn(words) => {
                let mut buf = Vec::new();
                let status = self.dispatch_or_missing(words, &mut buf);
                match write_stdout(&buf) {
                    Ok(()) => status,
                    Err(_) => 1,
                }
            }
        }
    }

    /// The interactive loop: prompt, read, run, until `exit` or end of input.
    ///
    /// Ctrl-C abandons the current line. Ctrl-D ends the session with status 0.
    pub fn repl(&mut self) -> rustyline::Result<ExitCode> {
        let mut rl = DefaultEditor::new()?;

        loop {
            let prompt = self.env.get_var("PROMPT").unwrap_or(DEFAULT_PROMPT).to_string();
            match rl.readline(&prompt) {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    rl.add_history_entry(line.as_str())?;
                    if let Err(e) = self.execute_line(&line) {
                        eprintln!("{e}");
                    }
                    if let Some(code) = self.env.exit_request {
                        return Ok(code);
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => {
                    println!();
                    return Ok(0);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::with_builtins(Environment::from_process())
    }
}

fn program_for(stage: &Stage, target: Target) -> Result<Program, ShellError> {
    match target {
        Target::BuiltIn => Ok(Program::BuiltIn(stage.words.clone())),
        Target::External(path) => ExternalCommand::new(&path, &stage.words)
            .map(Program::External)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{}: argument contains a NUL byte", stage.name()),
                )
                .into()
            }),
    }
}

fn finish_capture(bytes: Vec<u8>, strip_trailing: bool) -> String {
    let text = String::from_utf8_lossy(&bytes);
    if strip_trailing {
        text.trim_end().to_string()
    } else {
        text.into_owned()
    }
}
