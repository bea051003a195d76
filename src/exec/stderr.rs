// src/exec/stderr.rs

//! Draining the child's stderr pipe.
//!
//! A burst of output is collected into a single block: after each read the
//! drain waits up to the short poll timeout for a continuation, and only
//! hands the block over once the pipe goes quiet, closes, or the block grows
//! past the flush ceiling.

use std::io;
use std::os::fd::OwnedFd;
use std::time::Duration;

use tokio::net::unix::pipe;
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

/// One drain pass.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Drained {
    pub data: Vec<u8>,
    /// The write side is gone; stop polling this pipe.
    pub closed: bool,
}

#[derive(Debug)]
pub struct StderrCapture {
    rx: pipe::Receiver,
    settle: Duration,
    ceiling: usize,
}

impl StderrCapture {
    /// Must be called from within a Tokio runtime.
    pub fn new(read_end: OwnedFd, settle: Duration, ceiling: usize) -> io::Result<Self> {
        let rx = pipe::Receiver::from_owned_fd(read_end)?;
        Ok(Self {
            rx,
            settle,
            ceiling: ceiling.max(1),
        })
    }

    pub async fn readable(&self) -> io::Result<()> {
        self.rx.readable().await
    }

    /// Collect whatever the child is writing right now.
    pub async fn drain(&self) -> Drained {
        let mut drained = Drained::default();
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let room = (self.ceiling - drained.data.len()).min(READ_CHUNK);
            match self.rx.try_read(&mut chunk[..room]) {
                Ok(0) => {
                    drained.closed = true;
                    break;
                }
                Ok(n) => {
                    drained.data.extend_from_slice(&chunk[..n]);
                    if drained.data.len() >= self.ceiling {
                        debug!(bytes = drained.data.len(), "stderr block hit the flush ceiling");
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    match tokio::time::timeout(self.settle, self.rx.readable()).await {
                        Ok(Ok(())) => continue,
                        Ok(Err(e)) => {
                            warn!(error = %e, "stderr pipe failed while waiting");
                            drained.closed = true;
                            break;
                        }
                        Err(_) => break,
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "stderr pipe read failed");
                    drained.closed = true;
                    break;
                }
            }
        }

        drained
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use nix::unistd::pipe;

    use super::*;

    #[tokio::test]
    async fn fragments_then_close_are_one_block() {
        let (read, write) = pipe().unwrap();
        let capture = StderrCapture::new(read, Duration::from_millis(20), 65_535).unwrap();

        let mut writer = std::fs::File::from(write);
        writer.write_all(b"warning: ").unwrap();
        writer.write_all(b"something ").unwrap();
        writer.write_all(b"odd\n").unwrap();
        drop(writer);

        capture.readable().await.unwrap();
        let drained = capture.drain().await;
        assert_eq!(drained.data, b"warning: something odd\n");
        assert!(drained.closed);
    }

    #[tokio::test]
    async fn ceiling_flushes_early_without_losing_bytes() {
        let (read, write) = pipe().unwrap();
        let capture = StderrCapture::new(read, Duration::from_millis(20), 10).unwrap();

        let mut writer = std::fs::File::from(write);
        writer.write_all(b"0123456789abcdef").unwrap();
        drop(writer);

        capture.readable().await.unwrap();
        let first = capture.drain().await;
        assert_eq!(first.data, b"0123456789");
        assert!(!first.closed);

        let second = capture.drain().await;
        assert_eq!(second.data, b"abcdef");
        assert!(second.closed);
    }

    #[tokio::test]
    async fn quiet_pipe_returns_what_was_collected() {
        let (read, write) = pipe().unwrap();
        let capture = StderrCapture::new(read, Duration::from_millis(20), 65_535).unwrap();

        let mut writer = std::fs::File::from(write);
        writer.write_all(b"partial").unwrap();

        capture.readable().await.unwrap();
        let drained = capture.drain().await;
        assert_eq!(drained.data, b"partial");
        assert!(!drained.closed);
        drop(writer);
    }
}
