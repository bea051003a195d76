// src/engine/runtime.rs

use std::fmt;
use std::future::pending;
use std::io;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::unix::AsyncFd;
use tokio::net::unix::pipe;
use tracing::{debug, info, warn};

use crate::bus::{BridgeEvent, BusConnection, MessagingSession};
use crate::config::Tunables;
use crate::errors::Result;
use crate::exec::StderrCapture;
use crate::fs::FileSystem;
use crate::msglog::MessageSink;
use crate::notice::NoticeScheduler;
use crate::signals::SignalState;
use crate::types::ChildStatus;

use super::core::ShutdownCore;
use super::{CoreCommand, CoreEvent, Observation};

/// How the reactor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorExit {
    /// Shutdown ran to completion; apply the final-linger policy.
    Completed,
    /// A panic was handled; the process should exit 0 right away.
    Panicked,
}

/// Everything the reactor is handed at startup.
pub struct ReactorSetup<C: BusConnection> {
    pub tunables: Tunables,
    pub signals: &'static SignalState,
    /// Read end of the signal self-pipe.
    pub wake_rx: Option<OwnedFd>,
    pub session: Option<MessagingSession<C>>,
    /// Read end of the child's stderr pipe.
    pub stderr: Option<OwnedFd>,
    pub stderr_tag: String,
    pub sink: Box<dyn MessageSink>,
    pub notice: NoticeScheduler,
    pub fs: Arc<dyn FileSystem>,
    pub temp_files: Vec<PathBuf>,
}

/// What woke the reactor up.
#[derive(Debug)]
enum Wake {
    Signal(io::Result<()>),
    Bus(io::Result<()>),
    Stderr(io::Result<()>),
    Timeout,
}

/// Drives the shutdown core from signals, the bus and the stderr pipe.
///
/// This is a pure IO shell around [`ShutdownCore`], which holds all the
/// shutdown semantics. Every iteration waits for one source (or the poll
/// timeout), services it, then rediscovers the signal flags and feeds them
/// to the core as a single tick.
pub struct Reactor<C: BusConnection> {
    core: ShutdownCore,
    tunables: Tunables,
    signals: &'static SignalState,
    wake: Option<pipe::Receiver>,
    session: Option<MessagingSession<C>>,
    bus_fd: Option<AsyncFd<OwnedFd>>,
    stderr: Option<StderrCapture>,
    stderr_tag: String,
    sink: Box<dyn MessageSink>,
    notice: NoticeScheduler,
    fs: Arc<dyn FileSystem>,
    temp_files: Vec<PathBuf>,
    scrubbed: bool,
}

impl<C: BusConnection> fmt::Debug for Reactor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("core", &self.core)
            .field("attached", &self.is_attached())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: BusConnection> Reactor<C> {
    /// Must be called from within a Tokio runtime.
    pub fn new(setup: ReactorSetup<C>) -> Result<Self> {
        let wake = match setup.wake_rx {
            Some(fd) => Some(pipe::Receiver::from_owned_fd(fd)?),
            None => None,
        };

        let stderr = match setup.stderr {
            Some(fd) => Some(StderrCapture::new(
                fd,
                setup.tunables.short_poll,
                setup.tunables.stderr_flush_ceiling,
            )?),
            None => None,
        };

        let bus_fd = setup
            .session
            .as_ref()
            .and_then(MessagingSession::connection)
            .and_then(|conn| match conn.watch_fd().and_then(AsyncFd::new) {
                Ok(fd) => Some(fd),
                Err(err) => {
                    warn!(error = %err, "cannot poll the messaging bus; checking it every tick");
                    None
                }
            });

        let reactor = Self {
            core: ShutdownCore::from_tunables(&setup.tunables),
            tunables: setup.tunables,
            signals: setup.signals,
            wake,
            session: setup.session,
            bus_fd,
            stderr,
            stderr_tag: setup.stderr_tag,
            sink: setup.sink,
            notice: setup.notice,
            fs: setup.fs,
            temp_files: setup.temp_files,
            scrubbed: false,
        };
        reactor.signals.set_session_attached(reactor.is_attached());
        Ok(reactor)
    }

    fn is_attached(&self) -> bool {
        self.session.as_ref().is_some_and(MessagingSession::is_attached)
    }

    /// Main loop.
    pub async fn run(mut self) -> ReactorExit {
        info!(attached = self.is_attached(), "reactor started");

        loop {
            if self.signals.panic_requested() {
                return self.panic();
            }

            let wake = self.wait().await;
            self.service(wake).await;

            if self.signals.panic_requested() {
                return self.panic();
            }

            self.notice
                .run_if_due(Instant::now(), self.session.as_mut(), self.fs.as_ref());
            self.sync_attachment();

            let obs = Observation {
                child_exited: self.signals.child_exited(),
                urgent: self.signals.urgent(),
                session_attached: self.is_attached(),
            };
            let step = self.core.step(CoreEvent::Tick(obs));
            self.signals.publish_phase(self.core.phase());

            for command in step.commands {
                if self.execute(command) == Some(ReactorExit::Panicked) {
                    return ReactorExit::Panicked;
                }
            }

            if !step.keep_running {
                break;
            }
        }

        if let Some(session) = self.session.as_mut() {
            session.detach();
        }
        self.sync_attachment();
        info!("reactor exiting");
        ReactorExit::Completed
    }

    fn poll_timeout(&self) -> Duration {
        let base = if self.signals.child_exited() || self.signals.urgent() {
            self.tunables.short_poll
        } else {
            self.tunables.long_poll
        };
        let base = if self.bus_fd.is_none() && self.is_attached() {
            base.min(self.tunables.short_poll)
        } else {
            base
        };
        self.notice.clamp_timeout(Instant::now(), base)
    }

    async fn wait(&self) -> Wake {
        let timeout = self.poll_timeout();
        let wake = self.wake.as_ref();
        let bus = self.bus_fd.as_ref();
        let stderr = self.stderr.as_ref();

        tokio::select! {
            biased;
            res = async {
                match wake {
                    Some(rx) => rx.readable().await,
                    None => pending().await,
                }
            } => Wake::Signal(res),
            res = async {
                match bus {
                    Some(fd) => fd.readable().await.map(|mut guard| guard.clear_ready()),
                    None => pending().await,
                }
            } => Wake::Bus(res),
            res = async {
                match stderr {
                    Some(capture) => capture.readable().await,
                    None => pending().await,
                }
            } => Wake::Stderr(res),
            _ = tokio::time::sleep(timeout) => Wake::Timeout,
        }
    }

    async fn service(&mut self, wake: Wake) {
        match wake {
            Wake::Signal(Ok(())) => self.drain_wake_pipe(),
            Wake::Signal(Err(err)) => {
                warn!(error = %err, "signal wake pipe failed; relying on the poll timeout");
                self.wake = None;
            }
            Wake::Bus(Err(err)) => {
                warn!(error = %err, "messaging bus descriptor failed");
                if let Some(session) = self.session.as_mut() {
                    session.detach();
                }
            }
            Wake::Stderr(Ok(())) => self.drain_stderr().await,
            Wake::Stderr(Err(err)) => {
                warn!(error = %err, "stderr pipe failed; no longer capturing");
                self.stderr = None;
            }
            Wake::Bus(Ok(())) | Wake::Timeout => {}
        }

        // Replies may already be buffered even without a readiness edge.
        self.receive_bus();
    }

    fn drain_wake_pipe(&mut self) {
        let Some(rx) = self.wake.as_ref() else {
            return;
        };
        let mut buf = [0u8; 64];
        loop {
            match rx.try_read(&mut buf) {
                Ok(0) => {
                    self.wake = None;
                    return;
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => return,
            }
        }
    }

    async fn drain_stderr(&mut self) {
        let Some(capture) = self.stderr.as_ref() else {
            return;
        };
        let drained = capture.drain().await;
        if !drained.data.is_empty() {
            debug!(bytes = drained.data.len(), "child stderr captured");
            self.sink.log(&self.stderr_tag, &drained.data);
        }
        if drained.closed {
            debug!("child closed stderr");
            self.stderr = None;
        }
    }

    fn receive_bus(&mut self) {
        let events = match self.session.as_mut() {
            Some(session) if session.is_attached() => session.receive(),
            _ => Vec::new(),
        };

        for event in events {
            let core_event = match event {
                BridgeEvent::DoneReplied => CoreEvent::DoneReplied,
                BridgeEvent::DoneFailed => CoreEvent::DoneFailed,
                BridgeEvent::Detached => continue,
            };
            let step = self.core.step(core_event);
            for command in step.commands {
                self.execute(command);
            }
        }
        self.sync_attachment();
    }

    /// Keep the poll set and the handler-visible flag in line with the
    /// session.
    fn sync_attachment(&mut self) {
        let attached = self.is_attached();
        if !attached && self.bus_fd.take().is_some() {
            debug!("messaging bus removed from the poll set");
        }
        self.signals.set_session_attached(attached);
    }

    fn execute(&mut self, command: CoreCommand) -> Option<ReactorExit> {
        debug!(?command, phase = %self.core.phase(), "executing core command");
        match command {
            CoreCommand::SendDone(status) => {
                if let Some(session) = self.session.as_mut() {
                    session.done_request(status);
                }
                self.sync_attachment();
            }
            CoreCommand::DetachSession => {
                if let Some(session) = self.session.as_mut() {
                    session.detach();
                }
                self.sync_attachment();
            }
            CoreCommand::ScrubTempFiles => self.scrub_temp_files(),
            CoreCommand::ClearUrgent => self.signals.clear_urgent(),
            CoreCommand::Panic => return Some(self.panic()),
            CoreCommand::FinalLinger => info!("entering final linger"),
        }
        None
    }

    /// Tell the caller we failed, or clean up after ourselves when nobody
    /// is listening.
    fn panic(&mut self) -> ReactorExit {
        warn!(phase = %self.core.phase(), "panic");
        match self.session.as_mut() {
            Some(session) if session.is_attached() => {
                session.done_request(ChildStatus::Failed);
                session.detach();
            }
            _ => self.scrub_temp_files(),
        }
        self.sync_attachment();
        ReactorExit::Panicked
    }

    fn scrub_temp_files(&mut self) {
        if self.scrubbed {
            return;
        }
        self.scrubbed = true;

        for path in &self.temp_files {
            if let Err(err) = self.fs.set_owner_only(path) {
                debug!(path = %path.display(), error = %err, "chmod of temp file failed");
            }
            match self.fs.remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "temp file removed"),
                Err(err) => debug!(path = %path.display(), error = %err, "temp file not removed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::bus::{BusStatus, Frame, MessageId, MessageState, StatusCode};
    use crate::fs::mock::{FsOp, MockFileSystem};
    use crate::types::{CallerIdentity, ShutdownPhase};

    #[derive(Debug, Default, Clone)]
    struct Shared {
        sent: Arc<Mutex<Vec<Frame>>>,
        inbox: Arc<Mutex<VecDeque<Frame>>>,
    }

    #[derive(Debug)]
    struct Loopback {
        shared: Shared,
        auto_reply: Option<MessageState>,
    }

    impl BusConnection for Loopback {
        fn procid(&self) -> &str {
            "dtexec.1"
        }
        fn session(&self) -> &str {
            "s0"
        }
        fn watch_fd(&self) -> io::Result<OwnedFd> {
            Err(io::Error::other("loopback"))
        }
        fn send_frame(&mut self, frame: &Frame) -> std::result::Result<(), BusStatus> {
            if let (Frame::Message { message }, Some(state)) = (frame, self.auto_reply) {
                self.shared.inbox.lock().unwrap().push_back(Frame::Reply {
                    id: message.id,
                    state,
                    status: StatusCode::Ok,
                });
            }
            self.shared.sent.lock().unwrap().push(frame.clone());
            Ok(())
        }
        fn try_recv_frame(&mut self) -> std::result::Result<Option<Frame>, BusStatus> {
            Ok(self.shared.inbox.lock().unwrap().pop_front())
        }
        fn close(&mut self) {}
    }

    #[derive(Debug, Default)]
    struct NullSink;

    impl MessageSink for NullSink {
        fn log(&mut self, _tag: &str, _body: &[u8]) {}
    }

    fn tunables() -> Tunables {
        Tunables {
            short_poll: Duration::from_millis(1),
            long_poll: Duration::from_millis(5),
            urgent_grace: Duration::from_millis(10),
            reply_wait: Duration::from_millis(10),
            ..Tunables::default()
        }
    }

    fn setup(
        signals: &'static SignalState,
        session: Option<MessagingSession<Loopback>>,
        fs: Arc<MockFileSystem>,
    ) -> ReactorSetup<Loopback> {
        ReactorSetup {
            tunables: tunables(),
            signals,
            wake_rx: None,
            session,
            stderr: None,
            stderr_tag: "(dtexec) true".into(),
            sink: Box::new(NullSink),
            notice: NoticeScheduler::default(),
            fs,
            temp_files: vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")],
        }
    }

    fn session(auto_reply: Option<MessageState>) -> (MessagingSession<Loopback>, Shared) {
        let shared = Shared::default();
        let conn = Loopback {
            shared: shared.clone(),
            auto_reply,
        };
        let caller = CallerIdentity {
            procid: "dtsvc.1".into(),
            invocation_id: 3,
            child_id: 4,
        };
        (MessagingSession::new(conn, caller), shared)
    }

    fn leaked() -> &'static SignalState {
        Box::leak(Box::new(SignalState::new()))
    }

    fn done_codes(shared: &Shared) -> Vec<i32> {
        shared
            .sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|f| match f {
                Frame::Message { message } if message.op == crate::bus::OP_DONE => {
                    match message.args.get(2) {
                        Some(crate::bus::Arg::Int(code)) => Some(*code),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn standalone_exit_scrubs_and_completes() {
        let signals = leaked();
        signals.mark_child_exited();
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("/tmp/a", "x");

        let reactor = Reactor::new(setup(signals, None, fs.clone())).unwrap();
        assert_eq!(reactor.run().await, ReactorExit::Completed);

        assert_eq!(signals.phase(), ShutdownPhase::FinalLinger);
        assert_eq!(
            fs.ops(),
            vec![
                FsOp::SetOwnerOnly(PathBuf::from("/tmp/a")),
                FsOp::RemoveFile(PathBuf::from("/tmp/a")),
                FsOp::SetOwnerOnly(PathBuf::from("/tmp/b")),
                FsOp::RemoveFile(PathBuf::from("/tmp/b")),
            ]
        );
    }

    #[tokio::test]
    async fn scrub_continues_past_failures_and_runs_once() {
        let signals = leaked();
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("/tmp/a", "x");
        fs.add_file("/tmp/b", "y");
        fs.fail_on("/tmp/a");

        let mut reactor = Reactor::new(setup(signals, None, fs.clone())).unwrap();
        reactor.scrub_temp_files();
        reactor.scrub_temp_files();

        assert_eq!(
            fs.ops(),
            vec![
                FsOp::SetOwnerOnly(PathBuf::from("/tmp/a")),
                FsOp::RemoveFile(PathBuf::from("/tmp/a")),
                FsOp::SetOwnerOnly(PathBuf::from("/tmp/b")),
                FsOp::RemoveFile(PathBuf::from("/tmp/b")),
            ]
        );
        assert!(fs.contents("/tmp/a").is_some());
        assert_eq!(fs.contents("/tmp/b"), None);
    }

    #[tokio::test]
    async fn acknowledged_done_skips_scrub() {
        let signals = leaked();
        signals.mark_child_exited();
        let fs = Arc::new(MockFileSystem::new());
        let (session, shared) = session(Some(MessageState::Handled));

        let reactor = Reactor::new(setup(signals, Some(session), fs.clone())).unwrap();
        assert_eq!(reactor.run().await, ReactorExit::Completed);

        assert_eq!(done_codes(&shared), vec![ChildStatus::Done.code()]);
        assert!(fs.ops().is_empty());
    }

    #[tokio::test]
    async fn unanswered_done_times_out_into_cleanup() {
        let signals = leaked();
        signals.mark_child_exited();
        let fs = Arc::new(MockFileSystem::new());
        let (session, shared) = session(None);

        let reactor = Reactor::new(setup(signals, Some(session), fs.clone())).unwrap();
        assert_eq!(reactor.run().await, ReactorExit::Completed);

        assert_eq!(done_codes(&shared), vec![ChildStatus::Done.code()]);
        assert_eq!(fs.ops().len(), 4);
        assert!(!signals.session_attached());
    }

    #[tokio::test]
    async fn ignored_urgent_signal_panics_with_failed_done() {
        let signals = leaked();
        let fs = Arc::new(MockFileSystem::new());
        let (session, shared) = session(None);
        let reactor = Reactor::new(setup(signals, Some(session), fs.clone())).unwrap();
        signals.raise_urgent();

        assert_eq!(reactor.run().await, ReactorExit::Panicked);
        assert_eq!(done_codes(&shared), vec![ChildStatus::Failed.code()]);
    }

    #[tokio::test]
    async fn panic_flag_is_handled_before_anything_else() {
        let signals = leaked();
        let fs = Arc::new(MockFileSystem::new());
        let (session, shared) = session(Some(MessageState::Handled));
        let reactor = Reactor::new(setup(signals, Some(session), fs.clone())).unwrap();

        assert_eq!(
            signals.on_panic(),
            crate::signals::HandlerAction::Continue
        );
        assert_eq!(reactor.run().await, ReactorExit::Panicked);
        assert_eq!(done_codes(&shared), vec![ChildStatus::Failed.code()]);
        assert!(fs.ops().is_empty());
    }

    #[tokio::test]
    async fn late_reply_for_unknown_message_is_ignored() {
        let signals = leaked();
        signals.mark_child_exited();
        let fs = Arc::new(MockFileSystem::new());
        let (session, shared) = session(Some(MessageState::Handled));
        shared.inbox.lock().unwrap().push_back(Frame::Reply {
            id: MessageId(999),
            state: MessageState::Failed,
            status: StatusCode::Ok,
        });

        let reactor = Reactor::new(setup(signals, Some(session), fs.clone())).unwrap();
        assert_eq!(reactor.run().await, ReactorExit::Completed);
        assert!(fs.ops().is_empty());
    }
}
