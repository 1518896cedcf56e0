// crates/daemon/src/error.rs
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::bootstrap::BootstrapState;
use crate::readiness::ReadinessStatus;

/// Failures of the one-shot readiness channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("readiness channel closed by peer")]
    Closed,
    #[error("daemon exited without reporting")]
    PeerCrashed,
    #[error("readiness report truncated after {0} bytes")]
    Truncated(usize),
    #[error("unknown readiness status {0}")]
    InvalidStatus(u8),
    #[error("readiness message of {0} bytes exceeds limit")]
    Oversized(usize),
    #[error("timed out waiting for readiness report")]
    TimedOut,
    #[error("a readiness report was already parked")]
    AlreadyParked,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The jail boundary could not be established.
#[derive(Debug, Error)]
pub enum JailError {
    #[error("failed to create jail root {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error("jail root {0} is not a directory")]
    NotADirectory(PathBuf),
    #[error("chroot to {path} failed: {source}")]
    Chroot { path: PathBuf, source: nix::Error },
    #[error("chdir to / inside jail failed: {0}")]
    Chdir(nix::Error),
}

/// An identity transition failed or could not be verified.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    #[error("failed to lock securebits: {0}")]
    Securebits(nix::Error),
    #[error("securebits are not supported on this platform")]
    SecurebitsUnsupported,
    #[error("{call} failed: {source}")]
    Transition { call: &'static str, source: nix::Error },
    #[error("identity check failed after drop: {0}")]
    Verify(String),
    #[error("refusing to run the daemon as root")]
    StillRoot,
    #[error("failed to hand {path} to the daemon identity: {source}")]
    HandOver { path: PathBuf, source: nix::Error },
}

/// A configuration file that could not be read or understood.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },
    #[error("{0}")]
    Value(String),
}

/// Errors raised while bringing the daemon up.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Jail(#[from] JailError),
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
    #[error("already running as pid {0}")]
    AlreadyRunning(i32),
    #[error("pid file {path}: {source}")]
    PidFile { path: PathBuf, source: io::Error },
    #[error("socket {path}: {source}")]
    Socket { path: PathBuf, source: io::Error },
    #[error("{action} failed: {source}")]
    Os { action: &'static str, source: io::Error },
    #[error("failed to initialise logging: {0}")]
    Logging(io::Error),
}

impl DaemonError {
    pub(crate) fn os(action: &'static str, source: impl Into<io::Error>) -> Self {
        DaemonError::Os {
            action,
            source: source.into(),
        }
    }

    /// Status to put on the readiness channel when this error aborts startup.
    pub fn status(&self) -> ReadinessStatus {
        match self {
            DaemonError::AlreadyRunning(_) => ReadinessStatus::AlreadyRunning,
            _ => ReadinessStatus::Error,
        }
    }
}

/// A fatal bootstrap failure together with the state it happened in.
#[derive(Debug, Error)]
#[error("{state}: {source}")]
pub struct BootstrapError {
    pub state: BootstrapState,
    #[source]
    pub source: DaemonError,
}

pub type Result<T> = std::result::Result<T, DaemonError>;
