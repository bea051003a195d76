// src/engine/event_handlers.rs

//! Event handling logic for the shutdown core.

use tracing::{debug, info, warn};

use crate::engine::Observation;
use crate::types::{ChildStatus, ShutdownPhase};

/// Command produced by the pure core, to be executed by the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreCommand {
    /// Send the (one and only) Done request to the launcher.
    SendDone(ChildStatus),
    /// Give up on the messaging session.
    DetachSession,
    /// chmod + unlink every registered temp file.
    ScrubTempFiles,
    /// The urgent signal has been overtaken by the child exiting.
    ClearUrgent,
    /// The child ignored an urgent signal for too long; abort.
    Panic,
    /// Shutdown is complete; hand over to the final-linger policy.
    FinalLinger,
}

/// Decision returned by the core after handling a single `CoreEvent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreStep {
    /// Commands the reactor should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the reactor loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    pub(crate) fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }

    pub(crate) fn stop(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: false,
        }
    }
}

/// Mutable state of the shutdown machine.
#[derive(Debug, Clone)]
pub struct PhaseState {
    pub phase: ShutdownPhase,
    pub urgent_ticks: u32,
    pub reply_ticks: u32,
    pub linger_skipped: bool,
    pub urgent_limit: u32,
    pub reply_limit: u32,
}

impl PhaseState {
    /// Move forward to `next`. Requests to move backwards are ignored.
    pub fn advance_to(&mut self, next: ShutdownPhase) {
        if next > self.phase {
            debug!(from = %self.phase, to = %next, "shutdown phase advanced");
            self.phase = next;
        } else if next < self.phase {
            debug!(current = %self.phase, requested = %next, "ignoring phase rewind");
        }
    }
}

/// Handle one reactor iteration's worth of rediscovery.
///
/// Urgent handling runs first; the child-exit cascade may then walk several
/// phases in the same tick, exactly in phase order.
pub fn handle_tick(state: &mut PhaseState, obs: Observation) -> CoreStep {
    let mut commands = Vec::new();

    if obs.urgent {
        if obs.child_exited {
            // The graceful path owns the shutdown from here.
            state.urgent_ticks = 0;
            commands.push(CoreCommand::ClearUrgent);
        } else {
            state.urgent_ticks = state.urgent_ticks.saturating_add(1);
            if state.urgent_ticks > state.urgent_limit {
                warn!(ticks = state.urgent_ticks, "child ignored urgent signal; panicking");
                commands.push(CoreCommand::Panic);
                return CoreStep::stop(commands);
            }
        }
    }

    if !obs.child_exited {
        return CoreStep::running(commands);
    }

    let mut session = obs.session_attached;

    if state.phase == ShutdownPhase::Starting {
        if session {
            commands.push(CoreCommand::SendDone(ChildStatus::Done));
            state.advance_to(ShutdownPhase::ReplyWait);
        } else {
            state.advance_to(ShutdownPhase::PanicCleanup);
        }
    }

    if state.phase == ShutdownPhase::ReplyWait {
        state.reply_ticks = state.reply_ticks.saturating_add(1);
        if state.reply_ticks > state.reply_limit {
            warn!(ticks = state.reply_ticks, "no reply to done request; giving up");
            if session {
                commands.push(CoreCommand::DetachSession);
                session = false;
            }
            state.advance_to(ShutdownPhase::PanicCleanup);
        } else if !session {
            state.advance_to(ShutdownPhase::PanicCleanup);
        }
    }

    if state.phase == ShutdownPhase::Replied {
        if session {
            state.advance_to(ShutdownPhase::FinalLinger);
        } else {
            state.advance_to(ShutdownPhase::PanicCleanup);
        }
    }

    if state.phase == ShutdownPhase::PanicCleanup {
        commands.push(CoreCommand::ScrubTempFiles);
        state.advance_to(ShutdownPhase::FinalLinger);
    }

    if state.phase == ShutdownPhase::FinalLinger {
        if !state.linger_skipped {
            // One more pass so late stderr output is not lost.
            state.linger_skipped = true;
        } else {
            info!("shutdown complete");
            commands.push(CoreCommand::FinalLinger);
            return CoreStep::stop(commands);
        }
    }

    CoreStep::running(commands)
}

/// The launcher acknowledged our Done request.
pub fn handle_done_replied(state: &mut PhaseState) -> CoreStep {
    state.advance_to(ShutdownPhase::Replied);
    CoreStep::running(Vec::new())
}

/// The Done request failed; the bridge has already detached.
pub fn handle_done_failed(state: &mut PhaseState) -> CoreStep {
    state.advance_to(ShutdownPhase::PanicCleanup);
    CoreStep::running(Vec::new())
}
