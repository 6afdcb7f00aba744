//! Low-level process plumbing for pipelines: pipes, forking a stage and reaping it.
//!
//! The argument and environment strings of a child are converted by the caller before
//! [`fork_stage`], so a failure to build them never happens after the fork.

use crate::command::ExitCode;
use crate::external::ExternalCommand;
use crate::job_control::reset_child_signals;
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, dup2, execve, fork, getpid, setpgid, tcsetpgrp};
use std::ffi::CString;
use std::io::{self, Read};
use std::os::fd::{BorrowedFd, OwnedFd, RawFd};

/// Creates a pipe whose ends are closed on exec, so that a child spawned concurrently
/// never keeps a stray write end open.
pub(crate) fn cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        use nix::fcntl::{F_SETFD, FdFlag, fcntl};
        use std::os::fd::AsRawFd;
        let (reader, writer) = nix::unistd::pipe()?;
        for fd in [&reader, &writer] {
            fcntl(fd.as_raw_fd(), F_SETFD(FdFlag::FD_CLOEXEC))?;
        }
        Ok((reader, writer))
    }
}

/// How a forked child is wired up before it runs its program.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ChildSetup {
    /// Process group to join; `None` makes the child the leader of a new group.
    pub pgid: Option<Pid>,
    /// Becomes the child's standard input.
    pub stdin: Option<RawFd>,
    /// Becomes the child's standard output.
    pub stdout: Option<RawFd>,
    /// Controlling terminal to take over before default signal handling is restored.
    /// Only a lone foreground command gets one.
    pub terminal: Option<RawFd>,
    /// Pipe descriptors held by the shell; all of them are closed in the child once the
    /// standard streams are in place.
    pub close: [Option<RawFd>; 3],
}

impl ChildSetup {
    fn apply(&self) -> nix::Result<()> {
        setpgid(Pid::from_raw(0), self.pgid.unwrap_or(Pid::from_raw(0)))?;
        if let Some(tty) = self.terminal {
            // SAFETY: the shell keeps the terminal open while the child runs. SIGTTOU is
            // still ignored at this point, so the call works from the new group.
            let tty = unsafe { BorrowedFd::borrow_raw(tty) };
            let _ = tcsetpgrp(tty, getpid());
        }
        reset_child_signals(self.terminal.is_some());
        if let Some(fd) = self.stdin {
            redirect(fd, nix::libc::STDIN_FILENO)?;
        }
        if let Some(fd) = self.stdout {
            redirect(fd, nix::libc::STDOUT_FILENO)?;
        }
        for fd in self.close.into_iter().flatten() {
            if fd > nix::libc::STDERR_FILENO {
                let _ = nix::unistd::close(fd);
            }
        }
        Ok(())
    }
}

fn redirect(fd: RawFd, target: RawFd) -> nix::Result<()> {
    if fd == target {
        // already in place; only the close-on-exec flag has to go
        use nix::fcntl::{F_SETFD, FdFlag, fcntl};
        fcntl(fd, F_SETFD(FdFlag::empty()))?;
        return Ok(());
    }
    dup2(fd, target).map(drop)
}

/// Forks a child that applies `setup` and then runs `body`, exiting with its status.
///
/// The parent also places the child in its process group so that both orders of
/// scheduling agree; the child may already have exec'd or exited, which is not an error.
pub(crate) fn fork_stage(setup: &ChildSetup, body: impl FnOnce() -> ExitCode) -> nix::Result<Pid> {
    // SAFETY: the child either runs `body` (exec, or a built-in that only touches this
    // process's own copy of the shell) and then leaves through `_exit`.
    match unsafe { fork() }? {
        ForkResult::Child => {
            let status = match setup.apply() {
                Ok(()) => body(),
                Err(errno) => {
                    write_stderr(&[b"mysh: error: ", errno.desc().as_bytes(), b"\n"]);
                    1
                }
            };
            // SAFETY: terminating the forked child without running the parent's atexit
            // handlers or flushing its inherited buffers twice.
            unsafe { nix::libc::_exit(status) }
        }
        ForkResult::Parent { child } => {
            let pgid = setup.pgid.unwrap_or(child);
            match setpgid(child, pgid) {
                Ok(()) | Err(Errno::EACCES) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(%child, %pgid, "setpgid failed: {e}"),
            }
            tracing::trace!(%child, %pgid, "forked stage");
            Ok(child)
        }
    }
}

/// Replaces the current (child) process with `cmd`; only returns on failure, with the
/// status the child should exit with.
pub(crate) fn exec_external(cmd: &ExternalCommand, envp: &[CString]) -> ExitCode {
    let errno = match execve(&cmd.path, &cmd.argv, envp) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    let name = cmd.argv.first().map_or(cmd.path.as_bytes(), |a| a.as_bytes());
    match errno {
        Errno::EACCES => {
            write_stderr(&[b"mysh: permission denied: ", name, b"\n"]);
            126
        }
        Errno::ENOENT => {
            write_stderr(&[b"mysh: command not found: ", name, b"\n"]);
            127
        }
        other => {
            write_stderr(&[b"mysh: error: ", name, b": ", other.desc().as_bytes(), b"\n"]);
            126
        }
    }
}

/// Writes straight to descriptor 2, bypassing Rust's buffered stderr.
pub(crate) fn write_stderr(parts: &[&[u8]]) {
    for part in parts {
        let _ = nix::unistd::write(io::stderr(), part);
    }
}

/// Writes all of `bytes` to descriptor 1 without going through Rust's locked stdout,
/// which another thread of the parent may have held at the time of the fork.
pub(crate) fn write_stdout(mut bytes: &[u8]) -> nix::Result<()> {
    while !bytes.is_empty() {
        match nix::unistd::write(io::stdout(), bytes) {
            Ok(n) => bytes = &bytes[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Blocks until `pid` terminates. A child killed by a signal reports `128 + signal`.
pub(crate) fn wait_for(pid: Pid) -> nix::Result<ExitCode> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as ExitCode),
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Waits for every child in order and returns the status of the last one.
///
/// All children are waited for even if waiting on one of them fails.
pub(crate) fn wait_all(pids: &[Pid]) -> nix::Result<ExitCode> {
    let mut last = Ok(0);
    for &pid in pids {
        last = wait_for(pid);
        if let Err(e) = &last {
            tracing::warn!(%pid, "waitpid failed: {e}");
        }
    }
    last
}

/// Drains the read end of a capture pipe.
pub(crate) fn read_to_end(fd: OwnedFd) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    std::fs::File::from(fd).read_to_end(&mut buf)?;
    Ok(buf)
}
