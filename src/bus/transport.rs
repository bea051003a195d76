// src/bus/transport.rs

//! Wire transport to the messaging bus.
//!
//! Frames are newline-delimited JSON objects tagged by `kind`. A connection
//! starts with `open` -> `opened{procid, session}`; after that the bus
//! pushes `message` and `reply` frames at any time.

use std::fmt::Debug;
use std::io::{self, Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::message::{Message, MessageId, MessageState, StatusCode};
use super::BusStatus;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// How long a send may wait for a peer that is not draining the socket.
const SEND_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_RETRY: Duration = Duration::from_millis(2);
/// Longest line we buffer while waiting for its newline.
pub const MAX_FRAME_LEN: usize = 1 << 20;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Open,
    Opened { procid: String, session: String },
    Join { session: String },
    Message { message: Message },
    Reply {
        id: MessageId,
        state: MessageState,
        #[serde(default)]
        status: StatusCode,
    },
    Quit { session: String },
}

/// A live connection to the bus.
///
/// `try_recv_frame` must never block: it returns `Ok(None)` when no complete
/// frame is buffered and the socket has nothing more to read.
pub trait BusConnection: Send + Debug {
    /// Our own bus process id.
    fn procid(&self) -> &str;
    fn session(&self) -> &str;
    /// A duplicate of the descriptor the reactor polls for readability.
    fn watch_fd(&self) -> io::Result<OwnedFd>;
    fn send_frame(&mut self, frame: &Frame) -> Result<(), BusStatus>;
    fn try_recv_frame(&mut self) -> Result<Option<Frame>, BusStatus>;
    /// Quit the session and close. Called at most once.
    fn close(&mut self);
}

/// Production connection over a Unix stream socket.
#[derive(Debug)]
pub struct SocketConnection {
    stream: UnixStream,
    procid: String,
    session: String,
    inbuf: Vec<u8>,
    eof: bool,
}

impl SocketConnection {
    /// Connect to the bus endpoint at `path` and perform the handshake.
    pub fn connect(path: &Path) -> Result<Self, BusStatus> {
        let stream = UnixStream::connect(path).map_err(|e| {
            BusStatus::NotConnected(format!("{}: {e}", path.display()))
        })?;
        Self::handshake(stream)
    }

    /// Perform the handshake over an already-connected stream.
    pub fn handshake(stream: UnixStream) -> Result<Self, BusStatus> {
        let mut conn = Self {
            stream,
            procid: String::new(),
            session: String::new(),
            inbuf: Vec::new(),
            eof: false,
        };

        conn.stream
            .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .and_then(|_| conn.stream.set_write_timeout(Some(HANDSHAKE_TIMEOUT)))
            .map_err(|e| BusStatus::NotConnected(e.to_string()))?;
        conn.send_frame(&Frame::Open)?;

        let reply = loop {
            if let Some(frame) = conn.pop_frame()? {
                break frame;
            }
            if conn.fill_blocking()? == 0 {
                return Err(BusStatus::NotConnected("bus closed during handshake".into()));
            }
        };

        match reply {
            Frame::Opened { procid, session } => {
                conn.procid = procid;
                conn.session = session;
            }
            other => {
                return Err(BusStatus::Protocol(format!(
                    "expected opened frame, got {other:?}"
                )));
            }
        }

        conn.stream
            .set_read_timeout(None)
            .and_then(|_| conn.stream.set_write_timeout(None))
            .and_then(|_| conn.stream.set_nonblocking(true))
            .map_err(|e| BusStatus::NotConnected(e.to_string()))?;

        debug!(procid = %conn.procid, session = %conn.session, "connected to messaging bus");
        Ok(conn)
    }

    fn fill_blocking(&mut self) -> Result<usize, BusStatus> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(n) => {
                    self.inbuf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BusStatus::NotConnected(e.to_string())),
            }
        }
    }

    /// Read whatever is available without blocking, stopping early once the
    /// buffer holds more than one frame can be.
    fn fill_nonblocking(&mut self) -> Result<(), BusStatus> {
        let mut chunk = [0u8; READ_CHUNK];
        while self.inbuf.len() <= MAX_FRAME_LEN {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => self.inbuf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BusStatus::Lost(e.to_string())),
            }
        }
        Ok(())
    }

    /// Write `line` out, waiting at most [`SEND_TIMEOUT`] for the peer to
    /// make room. The socket stays non-blocking after the handshake.
    fn write_bounded(&mut self, mut line: &[u8]) -> io::Result<()> {
        let deadline = Instant::now() + SEND_TIMEOUT;
        while !line.is_empty() {
            match self.stream.write(line) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => line = &line[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "bus peer stopped reading",
                        ));
                    }
                    std::thread::sleep(SEND_RETRY);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Pop one complete line off the input buffer. A line that does not
    /// parse is consumed and reported, so the next call moves on.
    fn pop_frame(&mut self) -> Result<Option<Frame>, BusStatus> {
        loop {
            let Some(pos) = self.inbuf.iter().position(|b| *b == b'\n') else {
                if self.inbuf.len() > MAX_FRAME_LEN {
                    return Err(BusStatus::Lost(format!(
                        "frame exceeds {MAX_FRAME_LEN} bytes without a newline"
                    )));
                }
                return Ok(None);
            };
            let line: Vec<u8> = self.inbuf.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let frame = serde_json::from_slice(line)
                .map_err(|e| BusStatus::Protocol(format!("bad frame: {e}")))?;
            trace!(?frame, "frame received");
            return Ok(Some(frame));
        }
    }
}

impl BusConnection for SocketConnection {
    fn procid(&self) -> &str {
        &self.procid
    }

    fn session(&self) -> &str {
        &self.session
    }

    fn watch_fd(&self) -> io::Result<OwnedFd> {
        self.stream.try_clone().map(OwnedFd::from)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<(), BusStatus> {
        let mut line =
            serde_json::to_vec(frame).map_err(|e| BusStatus::Protocol(e.to_string()))?;
        line.push(b'\n');

        self.write_bounded(&line).map_err(|e| match e.kind() {
            io::ErrorKind::TimedOut => BusStatus::Lost(e.to_string()),
            _ => BusStatus::SendFailed(e.to_string()),
        })?;

        trace!(?frame, "frame sent");
        Ok(())
    }

    fn try_recv_frame(&mut self) -> Result<Option<Frame>, BusStatus> {
        if let Some(frame) = self.pop_frame()? {
            return Ok(Some(frame));
        }
        if !self.eof {
            self.fill_nonblocking()?;
        }
        match self.pop_frame()? {
            Some(frame) => Ok(Some(frame)),
            None if self.eof && !self.inbuf.contains(&b'\n') => {
                Err(BusStatus::Lost("bus closed the connection".to_string()))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        let quit = Frame::Quit {
            session: self.session.clone(),
        };
        if let Err(err) = self.send_frame(&quit) {
            debug!(error = %err, "quit frame not delivered");
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::thread;

    use super::*;

    fn serve_handshake(peer: UnixStream) -> UnixStream {
        let mut reader = BufReader::new(peer.try_clone().unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(serde_json::from_str::<Frame>(&line).unwrap(), Frame::Open);

        let mut peer = peer;
        let opened = Frame::Opened {
            procid: "dtexec.7".into(),
            session: "s0".into(),
        };
        writeln!(peer, "{}", serde_json::to_string(&opened).unwrap()).unwrap();
        peer
    }

    #[test]
    fn handshake_then_nonblocking_receive() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || serve_handshake(theirs));

        let mut conn = SocketConnection::handshake(ours).unwrap();
        let mut peer = server.join().unwrap();

        assert_eq!(conn.procid(), "dtexec.7");
        assert_eq!(conn.session(), "s0");
        assert_eq!(conn.try_recv_frame().unwrap(), None);

        let reply = Frame::Reply {
            id: MessageId(1),
            state: MessageState::Handled,
            status: StatusCode::Ok,
        };
        writeln!(peer, "not json").unwrap();
        writeln!(peer, "{}", serde_json::to_string(&reply).unwrap()).unwrap();

        assert!(matches!(conn.try_recv_frame(), Err(BusStatus::Protocol(_))));
        assert_eq!(conn.try_recv_frame().unwrap(), Some(reply));

        drop(peer);
        assert!(matches!(conn.try_recv_frame(), Err(BusStatus::Lost(_))));
    }

    #[test]
    fn send_gives_up_when_peer_stops_reading() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || serve_handshake(theirs));
        let mut conn = SocketConnection::handshake(ours).unwrap();
        let _peer = server.join().unwrap();

        let bulky = Frame::Join {
            session: "x".repeat(64 * 1024),
        };
        let started = Instant::now();
        let err = (0..256)
            .find_map(|_| conn.send_frame(&bulky).err())
            .expect("the socket buffer never filled");

        assert!(matches!(err, BusStatus::Lost(_)), "{err:?}");
        assert!(started.elapsed() < SEND_TIMEOUT * 10);
    }

    #[test]
    fn oversized_frame_is_reported_as_lost() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let server = thread::spawn(move || serve_handshake(theirs));
        let mut conn = SocketConnection::handshake(ours).unwrap();
        let mut peer = server.join().unwrap();

        let writer = thread::spawn(move || {
            let junk = vec![b'a'; MAX_FRAME_LEN + READ_CHUNK];
            let _ = peer.write_all(&junk);
            peer
        });

        let mut outcome = Ok(None);
        for _ in 0..5_000 {
            outcome = conn.try_recv_frame();
            if outcome.is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(outcome, Err(BusStatus::Lost(_))), "{outcome:?}");
        assert!(conn.inbuf.len() <= MAX_FRAME_LEN + READ_CHUNK);
        conn.close();
        drop(writer.join().unwrap());
    }

    #[test]
    fn handshake_fails_when_peer_hangs_up() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        drop(theirs);
        assert!(SocketConnection::handshake(ours).is_err());
    }
}
