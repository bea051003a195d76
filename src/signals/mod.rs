// src/signals/mod.rs

//! Signal routing.
//!
//! Handlers never make decisions that need more than a handful of atomics:
//! they record what happened in [`SignalState`] and poke the reactor through
//! a self-pipe. All the real work (talking to the bus, scrubbing files,
//! moving the shutdown phase along) happens in the reactor.
//!
//! | class     | signals                  | effect                                   |
//! |-----------|--------------------------|------------------------------------------|
//! | graceful  | `SIGCHLD`                | mark the child as exited                 |
//! | urgent    | `SIGTERM`                | start the urgent grace period            |
//! | ignorable | `SIGUSR1 SIGUSR2 SIGHUP` | stop lingering once the child goes away  |
//! | panic     | `SIGINT`                 | tell the caller we failed, then exit     |
//!
//! `SIGQUIT` keeps its default disposition so a core dump still happens.
//!
//! The decision logic lives on [`SignalState`] so it can be unit tested
//! without delivering real signals; [`handlers`] only maps the returned
//! [`HandlerAction`] onto `_exit`/scrub/wake.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use nix::sys::signal::Signal;

use crate::types::ShutdownPhase;

pub mod handlers;

pub use handlers::{install, reset_in_child, routed_sigset, SignalRouter};

/// Every signal whose disposition the supervisor customizes.
pub const ROUTED_SIGNALS: [Signal; 6] = [
    Signal::SIGCHLD,
    Signal::SIGTERM,
    Signal::SIGINT,
    Signal::SIGUSR1,
    Signal::SIGUSR2,
    Signal::SIGHUP,
];

/// Process-wide discovery flags shared between handlers and the reactor.
pub static SIGNALS: SignalState = SignalState::new();

/// What a non-blocking wait on any child reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildWait {
    /// A child exited or was killed.
    Terminated,
    /// A child was stopped or continued; not a termination.
    Stopped,
    /// Children exist but none changed state.
    StillRunning,
    /// `ECHILD`: nothing left to wait for.
    NoChildren,
    /// Any other wait failure.
    Failed,
}

/// What a handler must do after updating the flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Wake the reactor and return.
    Continue,
    /// `_exit(0)` immediately.
    Exit,
    /// chmod + unlink the registered temp files, then `_exit(0)`.
    ScrubAndExit,
}

/// Handler-writable state. Only atomics; safe to touch from signal context.
#[derive(Debug)]
pub struct SignalState {
    child_exited: AtomicBool,
    urgent: AtomicBool,
    force_transient: AtomicBool,
    panic: AtomicBool,
    session_attached: AtomicBool,
    phase: AtomicU8,
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalState {
    pub const fn new() -> Self {
        Self {
            child_exited: AtomicBool::new(false),
            urgent: AtomicBool::new(false),
            force_transient: AtomicBool::new(false),
            panic: AtomicBool::new(false),
            session_attached: AtomicBool::new(false),
            phase: AtomicU8::new(ShutdownPhase::Starting as u8),
        }
    }

    pub fn child_exited(&self) -> bool {
        self.child_exited.load(Ordering::SeqCst)
    }

    /// Used when there is no command to run: the child is "already done".
    pub fn mark_child_exited(&self) {
        self.child_exited.store(true, Ordering::SeqCst);
    }

    pub fn urgent(&self) -> bool {
        self.urgent.load(Ordering::SeqCst)
    }

    /// Used when the launch failed: treat it like an external kill.
    pub fn raise_urgent(&self) {
        self.urgent.store(true, Ordering::SeqCst);
    }

    pub fn clear_urgent(&self) {
        self.urgent.store(false, Ordering::SeqCst);
    }

    /// True once any urgent or ignorable signal asked us not to linger.
    pub fn force_transient(&self) -> bool {
        self.force_transient.load(Ordering::SeqCst)
    }

    pub fn panic_requested(&self) -> bool {
        self.panic.load(Ordering::SeqCst)
    }

    pub fn session_attached(&self) -> bool {
        self.session_attached.load(Ordering::SeqCst)
    }

    pub fn set_session_attached(&self, attached: bool) {
        self.session_attached.store(attached, Ordering::SeqCst);
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
            .unwrap_or(ShutdownPhase::Starting)
    }

    /// Publish the reactor's phase so handlers can tell whether we linger.
    pub fn publish_phase(&self, phase: ShutdownPhase) {
        self.phase.store(phase.as_u8(), Ordering::SeqCst);
    }

    /// `SIGCHLD`.
    pub fn on_graceful(&self, wait: ChildWait) -> HandlerAction {
        match wait {
            ChildWait::Terminated | ChildWait::NoChildren => {
                self.child_exited.store(true, Ordering::SeqCst);
            }
            ChildWait::Stopped | ChildWait::StillRunning | ChildWait::Failed => {}
        }
        HandlerAction::Continue
    }

    /// `SIGTERM`.
    pub fn on_urgent(&self) -> HandlerAction {
        self.urgent.store(true, Ordering::SeqCst);
        self.degrade_to_transient()
    }

    /// `SIGUSR1`, `SIGUSR2`, `SIGHUP`. Never forces shutdown by itself.
    pub fn on_ignorable(&self) -> HandlerAction {
        self.degrade_to_transient()
    }

    /// `SIGINT`.
    pub fn on_panic(&self) -> HandlerAction {
        if !self.session_attached() {
            return HandlerAction::ScrubAndExit;
        }
        if self.phase() == ShutdownPhase::FinalLinger {
            // Done was already sent and answered; nothing left to report.
            return HandlerAction::Exit;
        }
        self.panic.store(true, Ordering::SeqCst);
        HandlerAction::Continue
    }

    fn degrade_to_transient(&self) -> HandlerAction {
        if self.child_exited() && self.phase() == ShutdownPhase::FinalLinger {
            return HandlerAction::Exit;
        }
        self.force_transient.store(true, Ordering::SeqCst);
        HandlerAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graceful_marks_exit_only_for_real_terminations() {
        let s = SignalState::new();
        s.on_graceful(ChildWait::Stopped);
        s.on_graceful(ChildWait::StillRunning);
        s.on_graceful(ChildWait::Failed);
        assert!(!s.child_exited());

        s.on_graceful(ChildWait::Terminated);
        assert!(s.child_exited());

        let s = SignalState::new();
        s.on_graceful(ChildWait::NoChildren);
        assert!(s.child_exited());
    }

    #[test]
    fn urgent_sets_flag_and_degrades_policy() {
        let s = SignalState::new();
        assert_eq!(s.on_urgent(), HandlerAction::Continue);
        assert!(s.urgent());
        assert!(s.force_transient());
    }

    #[test]
    fn ignorable_degrades_policy_without_urgency() {
        let s = SignalState::new();
        assert_eq!(s.on_ignorable(), HandlerAction::Continue);
        assert!(!s.urgent());
        assert!(s.force_transient());
    }

    #[test]
    fn urgent_and_ignorable_exit_while_lingering() {
        let s = SignalState::new();
        s.mark_child_exited();
        s.publish_phase(ShutdownPhase::FinalLinger);

        assert_eq!(s.on_urgent(), HandlerAction::Exit);
        assert_eq!(s.on_ignorable(), HandlerAction::Exit);
    }

    #[test]
    fn urgent_during_shutdown_keeps_going() {
        let s = SignalState::new();
        s.mark_child_exited();
        s.publish_phase(ShutdownPhase::ReplyWait);

        assert_eq!(s.on_urgent(), HandlerAction::Continue);
        assert!(s.force_transient());
    }

    #[test]
    fn panic_without_session_scrubs_in_handler() {
        let s = SignalState::new();
        assert_eq!(s.on_panic(), HandlerAction::ScrubAndExit);
        assert!(!s.panic_requested());
    }

    #[test]
    fn panic_with_session_defers_to_reactor() {
        let s = SignalState::new();
        s.set_session_attached(true);
        assert_eq!(s.on_panic(), HandlerAction::Continue);
        assert!(s.panic_requested());

        s.publish_phase(ShutdownPhase::FinalLinger);
        assert_eq!(s.on_panic(), HandlerAction::Exit);
    }
}
