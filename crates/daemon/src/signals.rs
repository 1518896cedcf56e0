// crates/daemon/src/signals.rs
//! Signal controller for the daemon process.
//!
//! Handlers only touch atomics and data published before they were armed:
//! raw descriptors, C strings and pre-encoded bytes. Nothing allocates or
//! locks inside a handler.
#![allow(unsafe_code)]

use std::ffi::CString;
use std::io;
use std::os::fd::{IntoRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};

use nix::sys::signal::{
    self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, sigprocmask,
};

use crate::error::ChannelError;

/// Signal that asks the daemon to reload its configuration.
pub const RELOAD_SIGNAL: Signal = Signal::SIGHUP;
/// Signal that shuts the daemon down.
pub const TERMINATE_SIGNAL: Signal = Signal::SIGTERM;
/// Signal used internally to deliver a parked readiness report.
pub const READY_SIGNAL: Signal = Signal::SIGUSR1;

/// What the terminate handler needs to release the service.
#[derive(Debug)]
pub struct ServiceSlot {
    socket_path: CString,
    pid_path: CString,
    listen_fd: RawFd,
    log_fd: RawFd,
    shutdown_line: Box<[u8]>,
}

impl ServiceSlot {
    pub fn new(
        socket_path: &Path,
        pid_path: &Path,
        listen_fd: Option<RawFd>,
        log_fd: Option<RawFd>,
    ) -> io::Result<Self> {
        let to_c = |path: &Path| {
            CString::new(path.as_os_str().as_bytes())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
        };
        let shutdown_line = format!("[{}] SIGTERM heard, terminating\n", std::process::id());
        Ok(Self {
            socket_path: to_c(socket_path)?,
            pid_path: to_c(pid_path)?,
            listen_fd: listen_fd.unwrap_or(-1),
            log_fd: log_fd.unwrap_or(-1),
            shutdown_line: shutdown_line.into_bytes().into_boxed_slice(),
        })
    }

    fn release(&self) {
        if self.log_fd >= 0 {
            write_all_raw(self.log_fd, &self.shutdown_line);
        }
        // SAFETY: unlink and close are async-signal-safe; the strings were
        // built before the handler was installed.
        unsafe {
            libc::unlink(self.socket_path.as_ptr());
            libc::unlink(self.pid_path.as_ptr());
            if self.listen_fd >= 0 {
                libc::close(self.listen_fd);
            }
            if self.log_fd >= 0 {
                libc::close(self.log_fd);
            }
        }
    }
}

static SERVICE: OnceLock<ServiceSlot> = OnceLock::new();
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);

static READY_FD: AtomicI32 = AtomicI32::new(-1);
static READY_FRAME: OnceLock<Box<[u8]>> = OnceLock::new();
static READY_STATE: AtomicU8 = AtomicU8::new(READY_IDLE);

const READY_IDLE: u8 = 0;
const READY_PARKED: u8 = 1;
const READY_DELIVERED: u8 = 2;
const READY_FAILED: u8 = 3;

/// Publish the service for the terminate handler. Only the first call
/// takes effect.
pub fn publish_service(slot: ServiceSlot) -> io::Result<()> {
    SERVICE
        .set(slot)
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "service slot already set"))
}

/// Install the daemon's handlers. Handlers are installed without
/// `SA_RESTART` so a blocked `accept` returns `EINTR`.
pub fn arm() -> nix::Result<()> {
    let install = |sig: Signal, handler: SigHandler, mask: SigSet| {
        let action = SigAction::new(handler, SaFlags::empty(), mask);
        // SAFETY: the handlers below only use async-signal-safe calls.
        unsafe { signal::sigaction(sig, &action) }.map(drop)
    };
    install(RELOAD_SIGNAL, SigHandler::Handler(on_reload), SigSet::empty())?;
    install(TERMINATE_SIGNAL, SigHandler::Handler(on_terminate), SigSet::all())?;
    install(READY_SIGNAL, SigHandler::Handler(on_ready), SigSet::empty())?;
    install(Signal::SIGPIPE, SigHandler::SigIgn, SigSet::empty())?;
    Ok(())
}

/// Restore the default disposition of every catchable signal and clear
/// the signal mask.
pub fn reset_all() -> nix::Result<()> {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in Signal::iterator() {
        if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
            continue;
        }
        // SAFETY: installing SIG_DFL runs no code of ours.
        let _ = unsafe { signal::sigaction(sig, &default) };
    }
    sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)
}

/// Returns whether a reload was requested since the last call.
pub fn take_reload_request() -> bool {
    RELOAD_REQUESTED.swap(false, Ordering::AcqRel)
}

/// Hand the readiness endpoint and an encoded frame to the ready handler.
pub(crate) fn park_readiness(fd: OwnedFd, frame: Vec<u8>) -> Result<(), ChannelError> {
    READY_FRAME
        .set(frame.into_boxed_slice())
        .map_err(|_| ChannelError::AlreadyParked)?;
    READY_FD.store(fd.into_raw_fd(), Ordering::Release);
    READY_STATE.store(READY_PARKED, Ordering::Release);
    Ok(())
}

pub(crate) fn raise_ready() -> nix::Result<()> {
    signal::raise(READY_SIGNAL)
}

pub(crate) fn readiness_delivered() -> bool {
    READY_STATE.load(Ordering::Acquire) == READY_DELIVERED
}

/// Blocks every signal until dropped, then restores the previous mask.
pub(crate) struct BlockedSignals {
    previous: SigSet,
}

impl BlockedSignals {
    pub(crate) fn new() -> nix::Result<Self> {
        let mut previous = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&SigSet::all()), Some(&mut previous))?;
        Ok(Self { previous })
    }
}

impl Drop for BlockedSignals {
    fn drop(&mut self) {
        let _ = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

extern "C" fn on_reload(_: libc::c_int) {
    RELOAD_REQUESTED.store(true, Ordering::Release);
}

extern "C" fn on_terminate(_: libc::c_int) {
    if let Some(slot) = SERVICE.get() {
        slot.release();
    }
    crate::os::exit_immediately(0)
}

extern "C" fn on_ready(_: libc::c_int) {
    let fd = READY_FD.swap(-1, Ordering::AcqRel);
    if fd < 0 {
        return;
    }
    let delivered = READY_FRAME
        .get()
        .is_some_and(|frame| write_all_raw(fd, frame));
    // SAFETY: the handler owns `fd` once it has been swapped out.
    unsafe { libc::close(fd) };
    let state = if delivered { READY_DELIVERED } else { READY_FAILED };
    READY_STATE.store(state, Ordering::Release);
}

fn write_all_raw(fd: RawFd, mut buf: &[u8]) -> bool {
    while !buf.is_empty() {
        // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return false;
        }
        if n == 0 {
            return false;
        }
        buf = &buf[n as usize..];
    }
    true
}
