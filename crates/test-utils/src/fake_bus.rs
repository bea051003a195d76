use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dtexec::bus::{
    Frame, Message, MessageClass, MessageState, SocketConnection, StatusCode, OP_DONE,
    OP_IDENTIFY,
};

/// How the fake launcher answers our Done request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyPolicy {
    Handle,
    Fail,
    /// Never answer; the supervisor has to time out.
    Silent,
}

/// An in-process messaging bus plus launcher on the far end of a socket
/// pair:
/// - answers the `open` handshake
/// - records every frame it receives
/// - replies to identify requests with `handled` and to Done requests
///   according to its [`ReplyPolicy`].
#[derive(Debug)]
pub struct FakeBus {
    frames: Arc<Mutex<Vec<Frame>>>,
    writer: Arc<Mutex<UnixStream>>,
    server: Option<JoinHandle<()>>,
}

impl FakeBus {
    /// Start the fake and return a connected, handshaken client.
    pub fn start(policy: ReplyPolicy) -> (SocketConnection, FakeBus) {
        let (ours, theirs) = UnixStream::pair().expect("socket pair");
        let frames = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::new(Mutex::new(theirs.try_clone().expect("clone peer")));

        let server = {
            let frames = Arc::clone(&frames);
            let writer = Arc::clone(&writer);
            thread::spawn(move || serve(theirs, policy, frames, writer))
        };

        let conn = SocketConnection::handshake(ours).expect("fake bus handshake");
        let bus = FakeBus {
            frames,
            writer,
            server: Some(server),
        };
        (conn, bus)
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Message { message } => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Ops of every message we received, in order.
    pub fn ops(&self) -> Vec<String> {
        self.messages().into_iter().map(|m| m.op).collect()
    }

    pub fn saw_quit(&self) -> bool {
        self.frames()
            .iter()
            .any(|f| matches!(f, Frame::Quit { .. }))
    }

    /// Push a frame to the client as if the bus delivered it.
    pub fn inject(&self, frame: &Frame) {
        let mut writer = self.writer.lock().unwrap();
        let line = serde_json::to_string(frame).expect("serialize frame");
        // The client may already have gone away.
        let _ = writeln!(writer, "{line}");
    }

    /// Close our end, as a crashing bus would.
    pub fn hang_up(&self) {
        let writer = self.writer.lock().unwrap();
        let _ = writer.shutdown(std::net::Shutdown::Both);
    }

    /// Poll until `pred` holds for the recorded frames, or give up after
    /// `timeout`.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[Frame]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&self.frames.lock().unwrap()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// Wait for the server thread to see the client disconnect.
    pub fn join(mut self) -> Vec<Frame> {
        if let Some(server) = self.server.take() {
            let _ = server.join();
        }
        self.frames()
    }
}

fn serve(
    peer: UnixStream,
    policy: ReplyPolicy,
    frames: Arc<Mutex<Vec<Frame>>>,
    writer: Arc<Mutex<UnixStream>>,
) {
    let reply = |frame: Frame| {
        let line = serde_json::to_string(&frame).expect("serialize frame");
        let mut writer = writer.lock().unwrap();
        let _ = writeln!(writer, "{line}");
    };

    let mut reader = BufReader::new(peer);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let Ok(frame) = serde_json::from_str::<Frame>(line.trim_end()) else {
            continue;
        };
        frames.lock().unwrap().push(frame.clone());

        match frame {
            Frame::Open => reply(Frame::Opened {
                procid: "dtexec.fake".to_string(),
                session: "fake-session".to_string(),
            }),
            Frame::Message { message } if message.class == MessageClass::Request => {
                let state = match (message.op.as_str(), policy) {
                    (OP_IDENTIFY, _) | (OP_DONE, ReplyPolicy::Handle) => MessageState::Handled,
                    (OP_DONE, ReplyPolicy::Fail) => MessageState::Failed,
                    _ => continue,
                };
                reply(Frame::Reply {
                    id: message.id,
                    state,
                    status: StatusCode::Ok,
                });
            }
            Frame::Quit { .. } => break,
            _ => {}
        }
    }
}
