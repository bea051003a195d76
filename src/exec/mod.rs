// src/exec/mod.rs

//! Process launching and stderr capture.
//!
//! - [`backend`] provides the `ProcessSpawner` trait, the pre-built
//!   [`ExecPlan`] and the production `RealSpawner` (raw `fork` + `execvp`).
//! - [`launcher`] owns the fork retry policy and the stderr pipe.
//! - [`stderr`] drains the pipe into message-log blocks inside the reactor.

pub mod backend;
pub mod launcher;
pub mod stderr;

pub use backend::{ExecPlan, ProcessSpawner, RealSpawner};
pub use launcher::{fork_with_retry, launch, Launch, LaunchOutcome, StderrPipe};
pub use stderr::{Drained, StderrCapture};
