//! Signal disposition of the shell process and ownership of the controlling terminal.
//!
//! The shell is always in one of three [`SignalMode`]s:
//!
//! - [`SignalMode::Idle`]: nothing runs. `SIGINT`, `SIGTTIN` and `SIGTTOU` are ignored, so
//!   Ctrl-C at the prompt cannot kill the shell and reclaiming the terminal from the
//!   background is allowed.
//! - [`SignalMode::PipedForeground`]: a pipeline runs in its own process group that does
//!   not own the terminal. `SIGINT` received by the shell is forwarded to that group.
//!   The stages keep ignoring terminal stop signals, so reading the terminal fails
//!   instead of stopping them.
//! - [`SignalMode::SingleForeground`]: one external command runs and its process group
//!   owns the terminal, so the kernel delivers Ctrl-C to it directly.
//!
//! Transitions are explicit calls made by the interpreter when a pipeline starts and ends.
//! Built-ins never cause a transition.

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, killpg, sigaction};
use nix::unistd::{Pid, getpgrp, tcsetpgrp};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicI32, Ordering};

/// Signals whose disposition the shell changes while idle.
pub(crate) const SHELL_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTTIN, Signal::SIGTTOU];

/// Process group that receives forwarded interrupts; 0 when there is none.
static FOREGROUND_GROUP: AtomicI32 = AtomicI32::new(0);

extern "C" fn forward_interrupt(_: nix::libc::c_int) {
    let pgid = FOREGROUND_GROUP.load(Ordering::SeqCst);
    if pgid > 0 {
        let _ = killpg(Pid::from_raw(pgid), Signal::SIGINT);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMode {
    Idle,
    PipedForeground,
    SingleForeground,
}

/// Coordinates signal handling and terminal ownership.
///
/// A detached coordinator only tracks the mode. It is what non-interactive embeddings
/// and tests use, so that running a command never touches the process-wide signal
/// table or the terminal.
#[derive(Debug)]
pub struct JobControl {
    mode: SignalMode,
    managed: bool,
    terminal: Option<File>,
}

impl JobControl {
    /// A coordinator that never changes process state.
    pub fn detached() -> Self {
        Self {
            mode: SignalMode::Idle,
            managed: false,
            terminal: None,
        }
    }

    /// A coordinator for an interactive session: opens the controlling terminal (if
    /// there is one) and puts the shell into [`SignalMode::Idle`].
    pub fn interactive() -> Self {
        let terminal = match OpenOptions::new().read(true).write(true).open("/dev/tty") {
            Ok(tty) => Some(tty),
            Err(e) => {
                tracing::warn!("no controlling terminal, foreground handoff disabled: {e}");
                None
            }
        };
        let mut jobs = Self {
            mode: SignalMode::Idle,
            managed: true,
            terminal,
        };
        jobs.enter_idle();
        jobs
    }

    pub fn mode(&self) -> SignalMode {
        self.mode
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    /// Back to the prompt: ignore interrupts and terminal stop signals.
    ///
    /// Leaving [`SignalMode::SingleForeground`] hands the terminal back to the shell's own
    /// process group first.
    pub fn enter_idle(&mut self) {
        if self.mode == SignalMode::SingleForeground {
            self.hand_terminal_to(getpgrp());
        }
        FOREGROUND_GROUP.store(0, Ordering::SeqCst);
        if self.managed {
            for signal in SHELL_SIGNALS {
                set_disposition(signal, SigHandler::SigIgn);
            }
        }
        self.transition(SignalMode::Idle);
    }

    /// A multi-stage (or capturing) pipeline is about to be forked.
    ///
    /// Interrupts are forwarded once [`JobControl::track_group`] names the group.
    pub fn enter_piped(&mut self) {
        FOREGROUND_GROUP.store(0, Ordering::SeqCst);
        if self.managed {
            set_disposition(Signal::SIGINT, SigHandler::Handler(forward_interrupt));
        }
        self.transition(SignalMode::PipedForeground);
    }

    /// Names the process group of the running pipeline.
    pub fn track_group(&self, pgid: Pid) {
        if self.mode == SignalMode::PipedForeground {
            FOREGROUND_GROUP.store(pgid.as_raw(), Ordering::SeqCst);
        }
    }

    /// A single external command was forked into group `pgid`; give it the terminal.
    pub fn enter_single(&mut self, pgid: Pid) {
        self.hand_terminal_to(pgid);
        self.transition(SignalMode::SingleForeground);
    }

    /// The controlling terminal, for a child that takes it over itself.
    pub(crate) fn terminal_fd(&self) -> Option<RawFd> {
        self.terminal.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn hand_terminal_to(&self, pgid: Pid) {
        let Some(tty) = &self.terminal else {
            return;
        };
        match tcsetpgrp(tty, pgid) {
            Ok(()) => tracing::trace!(%pgid, "terminal foreground group changed"),
            Err(e) => tracing::warn!(%pgid, "cannot hand over the terminal: {e}"),
        }
    }

    fn transition(&mut self, to: SignalMode) {
        if self.mode != to {
            tracing::debug!(from = ?self.mode, ?to, "signal mode");
        }
        self.mode = to;
    }
}

fn set_disposition(signal: Signal, handler: SigHandler) {
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: the only handler installed is `forward_interrupt`, which performs an atomic
    // load and a `killpg` call, both async-signal-safe.
    if let Err(e) = unsafe { sigaction(signal, &action) } {
        tracing::warn!(?signal, "cannot change signal disposition: {e}");
    }
}

/// Restores default signal handling in a forked child before it runs its program.
///
/// Only a child that owns the terminal gets `SIGTTIN` and `SIGTTOU` back. Pipeline stages
/// run in a background group and keep ignoring them, so a stray terminal read fails with
/// `EIO` instead of stopping a process the shell is waiting for.
pub(crate) fn reset_child_signals(owns_terminal: bool) {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let reset: &[Signal] = if owns_terminal {
        &SHELL_SIGNALS[..]
    } else {
        &[Signal::SIGINT][..]
    };
    for &signal in reset {
        // SAFETY: installing the default disposition.
        let _ = unsafe { sigaction(signal, &action) };
    }
}

/// Current disposition of `signal`, read by swapping it out and back in.
#[cfg(test)]
pub(crate) fn disposition(signal: Signal) -> SigHandler {
    let swap = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    // SAFETY: the previous action is reinstalled right away.
    unsafe {
        let old = sigaction(signal, &swap).expect("sigaction");
        sigaction(signal, &old).expect("sigaction");
        old.handler()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn detached_coordinator_follows_the_state_machine() {
        let mut jobs = JobControl::detached();
        assert!(!jobs.is_managed());
        assert_eq!(jobs.mode(), SignalMode::Idle);

        jobs.enter_piped();
        assert_eq!(jobs.mode(), SignalMode::PipedForeground);
        jobs.enter_idle();
        assert_eq!(jobs.mode(), SignalMode::Idle);

        jobs.enter_single(getpgrp());
        assert_eq!(jobs.mode(), SignalMode::SingleForeground);
        jobs.enter_idle();
        assert_eq!(jobs.mode(), SignalMode::Idle);
    }

    /// Runs `check` in a forked child so that the test process keeps its own signal table.
    fn in_child(check: impl FnOnce() -> bool) -> bool {
        use crate::process::{ChildSetup, fork_stage, wait_for};
        let pid = fork_stage(&ChildSetup::default(), || if check() { 0 } else { 1 }).unwrap();
        wait_for(pid).unwrap() == 0
    }

    #[test]
    fn interactive_coordinator_ignores_signals_while_idle() {
        assert!(in_child(|| {
            let mut jobs = JobControl::interactive();
            let idle = jobs.is_managed()
                && SHELL_SIGNALS
                    .iter()
                    .all(|&s| disposition(s) == SigHandler::SigIgn);

            jobs.enter_piped();
            let piped = matches!(disposition(Signal::SIGINT), SigHandler::Handler(_))
                && disposition(Signal::SIGTTIN) == SigHandler::SigIgn;

            jobs.enter_idle();
            let back = disposition(Signal::SIGINT) == SigHandler::SigIgn;
            idle && piped && back
        }));
    }

    #[test]
    fn pipeline_children_keep_ignoring_terminal_stops() {
        assert!(in_child(|| {
            let _jobs = JobControl::interactive();
            // a stage of a background pipeline
            in_child(|| {
                disposition(Signal::SIGINT) == SigHandler::SigDfl
                    && disposition(Signal::SIGTTIN) == SigHandler::SigIgn
                    && disposition(Signal::SIGTTOU) == SigHandler::SigIgn
            })
        }));
    }

    #[test]
    fn terminal_owning_child_gets_default_stops() {
        assert!(in_child(|| {
            for signal in SHELL_SIGNALS {
                let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
                let _ = unsafe { sigaction(signal, &ignore) };
            }
            reset_child_signals(true);
            SHELL_SIGNALS
                .iter()
                .all(|&s| disposition(s) == SigHandler::SigDfl)
        }));
    }
}
