// crates/daemon/src/readiness.rs
//! One-shot readiness channel between the supervisor and the daemon.
//!
//! A report travels as a single frame: one status byte, a big-endian `u32`
//! message length and the UTF-8 message. Both endpoints are consumed by the
//! operation that uses them, so a report is sent and received at most once.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::unistd::pipe;

use crate::error::{ChannelError, DaemonError};
use crate::os;
use crate::signals;

/// Longest message carried by a report, in bytes.
pub const MAX_MESSAGE_LEN: usize = 4096;

const HEADER_LEN: usize = 5;

/// Message sent by a daemon that reached the dispatch loop.
pub const STARTED_MESSAGE: &str = "Started successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadinessStatus {
    Ok = 0,
    Error = 1,
    AlreadyRunning = 2,
}

impl ReadinessStatus {
    /// Exit status of a supervisor that received this status. Only a
    /// successful start exits 0.
    pub fn exit_code(self) -> i32 {
        match self {
            ReadinessStatus::Ok => 0,
            ReadinessStatus::Error | ReadinessStatus::AlreadyRunning => 1,
        }
    }
}

impl TryFrom<u8> for ReadinessStatus {
    type Error = ChannelError;

    fn try_from(byte: u8) -> Result<Self, ChannelError> {
        match byte {
            0 => Ok(ReadinessStatus::Ok),
            1 => Ok(ReadinessStatus::Error),
            2 => Ok(ReadinessStatus::AlreadyRunning),
            other => Err(ChannelError::InvalidStatus(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    pub status: ReadinessStatus,
    pub message: String,
}

impl ReadinessReport {
    pub fn new(status: ReadinessStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(ReadinessStatus::Ok, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ReadinessStatus::Error, message)
    }

    /// Encode the report as a frame, cutting the message at a character
    /// boundary if it exceeds [`MAX_MESSAGE_LEN`].
    pub fn encode(&self) -> Vec<u8> {
        let mut end = self.message.len().min(MAX_MESSAGE_LEN);
        while !self.message.is_char_boundary(end) {
            end -= 1;
        }
        let body = &self.message.as_bytes()[..end];
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.push(self.status as u8);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(body);
        frame
    }
}

/// How the daemon delivers its report once it is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessTrigger {
    /// Write the frame directly.
    #[default]
    Pipe,
    /// Park the frame and let the internal-ready signal handler write it.
    Signal,
}

/// Write end of the channel, owned by the daemon.
#[derive(Debug)]
pub struct ReadinessSender {
    file: File,
}

/// Read end of the channel, owned by the supervisor.
#[derive(Debug)]
pub struct ReadinessReceiver {
    file: File,
}

/// Open a fresh channel.
pub fn channel() -> Result<(ReadinessSender, ReadinessReceiver), ChannelError> {
    let (read, write) = pipe().map_err(io::Error::from)?;
    Ok((
        ReadinessSender {
            file: File::from(write),
        },
        ReadinessReceiver {
            file: File::from(read),
        },
    ))
}

impl ReadinessSender {
    pub fn send(mut self, report: &ReadinessReport) -> Result<(), ChannelError> {
        let frame = report.encode();
        self.file.write_all(&frame).map_err(|e| {
            if e.kind() == io::ErrorKind::BrokenPipe {
                ChannelError::Closed
            } else {
                ChannelError::Io(e)
            }
        })
    }

    /// Move the endpoint to a descriptor numbered `min` or above.
    pub(crate) fn relocate(&mut self, min: RawFd) -> io::Result<()> {
        if self.file.as_raw_fd() >= min {
            return Ok(());
        }
        let moved = os::dup_above(self.file.as_fd(), min)?;
        self.file = File::from(moved);
        Ok(())
    }

    pub(crate) fn into_owned_fd(self) -> OwnedFd {
        OwnedFd::from(self.file)
    }
}

impl AsRawFd for ReadinessSender {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl ReadinessReceiver {
    /// Block until a report arrives or the daemon goes away.
    pub fn receive(self) -> Result<ReadinessReport, ChannelError> {
        self.receive_until(None)
    }

    /// Like [`receive`](Self::receive) but gives up after `timeout`.
    pub fn receive_timeout(self, timeout: Duration) -> Result<ReadinessReport, ChannelError> {
        self.receive_until(Some(Instant::now() + timeout))
    }

    fn receive_until(mut self, deadline: Option<Instant>) -> Result<ReadinessReport, ChannelError> {
        let mut header = [0u8; HEADER_LEN];
        let got = self.fill(&mut header, deadline)?;
        if got == 0 {
            return Err(ChannelError::PeerCrashed);
        }
        if got < HEADER_LEN {
            return Err(ChannelError::Truncated(got));
        }
        let status = ReadinessStatus::try_from(header[0])?;
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(ChannelError::Oversized(len));
        }
        let mut body = vec![0u8; len];
        let got = self.fill(&mut body, deadline)?;
        if got < len {
            return Err(ChannelError::Truncated(HEADER_LEN + got));
        }
        let message = String::from_utf8_lossy(&body).into_owned();
        Ok(ReadinessReport { status, message })
    }

    /// Read until `buf` is full or the writer closes; returns the bytes read.
    fn fill(&mut self, buf: &mut [u8], deadline: Option<Instant>) -> Result<usize, ChannelError> {
        let mut filled = 0;
        while filled < buf.len() {
            if let Some(deadline) = deadline {
                self.wait_readable(deadline)?;
            }
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::Io(e)),
            }
        }
        Ok(filled)
    }

    fn wait_readable(&self, deadline: Instant) -> Result<(), ChannelError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::TimedOut);
            }
            let millis = remaining.as_millis().clamp(1, u16::MAX as u128) as u16;
            let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(0) => continue,
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ChannelError::Io(e.into())),
            }
        }
    }
}

/// Deliver `report` through the configured trigger.
///
/// With [`ReadinessTrigger::Signal`] the signal controller must already be
/// armed; the frame is parked and the internal-ready signal raised.
pub fn report_readiness(
    trigger: ReadinessTrigger,
    sender: ReadinessSender,
    report: &ReadinessReport,
) -> Result<(), DaemonError> {
    match trigger {
        ReadinessTrigger::Pipe => sender.send(report)?,
        ReadinessTrigger::Signal => {
            signals::park_readiness(sender.into_owned_fd(), report.encode())?;
            signals::raise_ready().map_err(|e| DaemonError::os("raise SIGUSR1", e))?;
            if !signals::readiness_delivered() {
                return Err(ChannelError::Closed.into());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn report_crosses_the_channel() {
        let (tx, rx) = channel().unwrap();
        tx.send(&ReadinessReport::ok(STARTED_MESSAGE)).unwrap();
        let report = rx.receive().unwrap();
        assert_eq!(report.status, ReadinessStatus::Ok);
        assert_eq!(report.message, "Started successfully");
    }

    #[test]
    fn already_running_status_survives() {
        let (tx, rx) = channel().unwrap();
        tx.send(&ReadinessReport::new(
            ReadinessStatus::AlreadyRunning,
            "already running as pid 42",
        ))
        .unwrap();
        let report = rx.receive().unwrap();
        assert_eq!(report.status, ReadinessStatus::AlreadyRunning);
        assert_eq!(report.status.exit_code(), 1);
    }

    #[test]
    fn dropped_sender_is_a_crash() {
        let (tx, rx) = channel().unwrap();
        drop(tx);
        assert!(matches!(rx.receive(), Err(ChannelError::PeerCrashed)));
    }

    #[test]
    fn partial_frame_is_truncated() {
        let (tx, rx) = channel().unwrap();
        let mut file = File::from(tx.into_owned_fd());
        file.write_all(&[0, 0, 0, 0, 10, b'h', b'i']).unwrap();
        drop(file);
        assert!(matches!(rx.receive(), Err(ChannelError::Truncated(7))));
    }

    #[test]
    fn unknown_status_is_rejected() {
        let (tx, rx) = channel().unwrap();
        let mut file = File::from(tx.into_owned_fd());
        file.write_all(&[9, 0, 0, 0, 0]).unwrap();
        drop(file);
        assert!(matches!(rx.receive(), Err(ChannelError::InvalidStatus(9))));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let (tx, rx) = channel().unwrap();
        let mut file = File::from(tx.into_owned_fd());
        let len = (MAX_MESSAGE_LEN as u32 + 1).to_be_bytes();
        file.write_all(&[1, len[0], len[1], len[2], len[3]]).unwrap();
        drop(file);
        assert!(matches!(rx.receive(), Err(ChannelError::Oversized(_))));
    }

    #[test]
    fn long_message_is_cut_on_char_boundary() {
        let message = "é".repeat(MAX_MESSAGE_LEN);
        let frame = ReadinessReport::error(message).encode();
        let len = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        assert!(len <= MAX_MESSAGE_LEN);
        assert!(std::str::from_utf8(&frame[HEADER_LEN..]).is_ok());
    }

    #[test]
    fn silent_peer_times_out() {
        let (tx, rx) = channel().unwrap();
        let started = Instant::now();
        let res = rx.receive_timeout(Duration::from_millis(100));
        assert!(matches!(res, Err(ChannelError::TimedOut)));
        assert!(started.elapsed() >= Duration::from_millis(100));
        drop(tx);
    }

    #[test]
    fn late_report_within_timeout_is_received() {
        let (tx, rx) = channel().unwrap();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            tx.send(&ReadinessReport::error("chroot failed")).unwrap();
        });
        let report = rx.receive_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
        assert_eq!(report, ReadinessReport::error("chroot failed"));
    }

    #[test]
    fn send_to_closed_peer_fails() {
        let (tx, rx) = channel().unwrap();
        drop(rx);
        assert!(matches!(
            tx.send(&ReadinessReport::ok(STARTED_MESSAGE)),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn relocate_moves_above_standard_slots() {
        let (mut tx, rx) = channel().unwrap();
        tx.relocate(100).unwrap();
        assert!(tx.as_raw_fd() >= 100);
        tx.send(&ReadinessReport::ok("moved")).unwrap();
        assert_eq!(rx.receive().unwrap().message, "moved");
    }
}
