// src/engine/mod.rs

//! Event loop and shutdown state machine.
//!
//! This module ties together:
//! - the signal flags set by the handlers
//! - replies arriving on the messaging bus
//! - the child's stderr pipe
//! - the one-shot icon-cache notice
//!
//! The pure core state machine lives in [`core`] (with the per-event logic
//! in [`event_handlers`]); the async/IO shell is implemented in [`runtime`].
//! What happens once the loop ends is decided in [`linger`].

/// Flags rediscovered at the top of every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Observation {
    pub child_exited: bool,
    pub urgent: bool,
    pub session_attached: bool,
}

/// Events flowing into the core from the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    /// One pass of the reactor loop.
    Tick(Observation),
    /// The launcher handled our Done request.
    DoneReplied,
    /// The launcher failed our Done request.
    DoneFailed,
}

pub mod core;
pub mod event_handlers;
pub mod linger;
pub mod runtime;

pub use core::ShutdownCore;
pub use event_handlers::{CoreCommand, CoreStep};
pub use linger::{decide_linger, effective_policy, final_linger, LingerDecision};
pub use runtime::{Reactor, ReactorExit, ReactorSetup};
