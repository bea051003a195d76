// src/engine/core.rs

//! Pure shutdown state machine.
//!
//! This module contains a synchronous, deterministic core that consumes
//! [`CoreEvent`]s and produces:
//! - an updated shutdown phase and tick counters
//! - a list of commands describing what the reactor should do next
//!
//! The async/IO-heavy reactor (`engine::runtime::Reactor`) is responsible
//! for polling descriptors, reading the signal flags, talking to the bus and
//! touching the filesystem. The core can be unit tested without any Tokio,
//! sockets, signals or processes.

use crate::config::Tunables;
use crate::engine::event_handlers::{
    handle_done_failed, handle_done_replied, handle_tick, CoreStep, PhaseState,
};
use crate::engine::CoreEvent;
use crate::types::ShutdownPhase;

/// Pure core state.
///
/// It has **no** descriptors, no Tokio types, and does not perform any IO.
#[derive(Debug, Clone)]
pub struct ShutdownCore {
    state: PhaseState,
}

impl ShutdownCore {
    pub fn new(urgent_limit: u32, reply_limit: u32) -> Self {
        Self {
            state: PhaseState {
                phase: ShutdownPhase::Starting,
                urgent_ticks: 0,
                reply_ticks: 0,
                linger_skipped: false,
                urgent_limit,
                reply_limit,
            },
        }
    }

    pub fn from_tunables(tunables: &Tunables) -> Self {
        Self::new(tunables.urgent_ticks(), tunables.reply_ticks())
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.state.phase
    }

    /// Handle a single event, updating the phase and returning the resulting
    /// commands for the reactor.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        match event {
            CoreEvent::Tick(obs) => handle_tick(&mut self.state, obs),
            CoreEvent::DoneReplied => handle_done_replied(&mut self.state),
            CoreEvent::DoneFailed => handle_done_failed(&mut self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CoreCommand, Observation};
    use crate::types::ChildStatus;

    fn tick(core: &mut ShutdownCore, child_exited: bool, urgent: bool, session: bool) -> CoreStep {
        core.step(CoreEvent::Tick(Observation {
            child_exited,
            urgent,
            session_attached: session,
        }))
    }

    #[test]
    fn idle_ticks_do_nothing() {
        let mut core = ShutdownCore::new(3, 3);
        let step = tick(&mut core, false, false, true);
        assert!(step.keep_running);
        assert!(step.commands.is_empty());
        assert_eq!(core.phase(), ShutdownPhase::Starting);
    }

    #[test]
    fn standalone_exit_cascades_to_linger_after_one_skip() {
        let mut core = ShutdownCore::new(3, 3);

        let first = tick(&mut core, true, false, false);
        assert_eq!(first.commands, vec![CoreCommand::ScrubTempFiles]);
        assert!(first.keep_running);
        assert_eq!(core.phase(), ShutdownPhase::FinalLinger);

        let second = tick(&mut core, true, false, false);
        assert_eq!(second.commands, vec![CoreCommand::FinalLinger]);
        assert!(!second.keep_running);
    }

    #[test]
    fn session_exit_waits_for_reply() {
        let mut core = ShutdownCore::new(3, 3);

        let step = tick(&mut core, true, false, true);
        assert_eq!(step.commands, vec![CoreCommand::SendDone(ChildStatus::Done)]);
        assert_eq!(core.phase(), ShutdownPhase::ReplyWait);

        core.step(CoreEvent::DoneReplied);
        assert_eq!(core.phase(), ShutdownPhase::Replied);

        let step = tick(&mut core, true, false, true);
        assert!(step.commands.is_empty());
        assert_eq!(core.phase(), ShutdownPhase::FinalLinger);

        let step = tick(&mut core, true, false, true);
        assert_eq!(step.commands, vec![CoreCommand::FinalLinger]);
    }

    #[test]
    fn reply_timeout_detaches_and_scrubs() {
        let mut core = ShutdownCore::new(3, 2);
        tick(&mut core, true, false, true); // Starting -> ReplyWait, tick 1
        tick(&mut core, true, false, true); // tick 2
        let step = tick(&mut core, true, false, true); // tick 3 > 2

        assert_eq!(
            step.commands,
            vec![CoreCommand::DetachSession, CoreCommand::ScrubTempFiles]
        );
        assert_eq!(core.phase(), ShutdownPhase::FinalLinger);
    }

    #[test]
    fn lost_session_during_reply_wait_moves_on() {
        let mut core = ShutdownCore::new(3, 100);
        tick(&mut core, true, false, true);
        let step = tick(&mut core, true, false, false);
        assert_eq!(step.commands, vec![CoreCommand::ScrubTempFiles]);
    }

    #[test]
    fn failed_done_jumps_to_cleanup() {
        let mut core = ShutdownCore::new(3, 100);
        tick(&mut core, true, false, true);
        core.step(CoreEvent::DoneFailed);
        assert_eq!(core.phase(), ShutdownPhase::PanicCleanup);

        let step = tick(&mut core, true, false, false);
        assert_eq!(step.commands, vec![CoreCommand::ScrubTempFiles]);
    }

    #[test]
    fn late_reply_never_rewinds() {
        let mut core = ShutdownCore::new(3, 100);
        tick(&mut core, true, false, false);
        assert_eq!(core.phase(), ShutdownPhase::FinalLinger);

        core.step(CoreEvent::DoneReplied);
        assert_eq!(core.phase(), ShutdownPhase::FinalLinger);
    }

    #[test]
    fn urgent_without_exit_panics_after_grace() {
        let mut core = ShutdownCore::new(2, 100);
        assert!(tick(&mut core, false, true, true).keep_running);
        assert!(tick(&mut core, false, true, true).keep_running);

        let step = tick(&mut core, false, true, true);
        assert_eq!(step.commands, vec![CoreCommand::Panic]);
        assert!(!step.keep_running);
    }

    #[test]
    fn urgent_stands_down_once_child_exits() {
        let mut core = ShutdownCore::new(2, 100);
        tick(&mut core, false, true, false);
        let step = tick(&mut core, true, true, false);
        assert_eq!(
            step.commands,
            vec![CoreCommand::ClearUrgent, CoreCommand::ScrubTempFiles]
        );
    }
}
