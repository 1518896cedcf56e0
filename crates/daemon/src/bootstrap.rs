// crates/daemon/src/bootstrap.rs
//! Supervisor and daemon sides of a start.
//!
//! The supervisor opens the readiness channel, forks and waits for one
//! report. The daemon walks [`BootstrapState`] in order; every step is
//! irreversible, and the report is only sent once all of them succeeded.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use logging::SubscriberConfig;
use nix::errno::Errno;
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, Pid, setsid};

use crate::config::DaemonConfig;
use crate::dispatch::{self, Handler, ServiceHandle};
use crate::error::{BootstrapError, ChannelError, DaemonError, PrivilegeError, Result};
use crate::os;
use crate::pidfile::{self, PidFile};
use crate::privilege::{
    Credentials, drop_privileges, ensure_jail_root, enter_jail, hand_over_parents,
    lock_securebits,
};
use crate::readiness::{
    self, ReadinessReceiver, ReadinessReport, ReadinessSender, STARTED_MESSAGE, report_readiness,
};
use crate::signals::{self, ServiceSlot};

/// Lowest descriptor the readiness endpoint may occupy in the daemon.
const CHANNEL_FD_FLOOR: RawFd = 3;

/// Daemon-side lifecycle, in the order the states are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BootstrapState {
    Spawned,
    FdClean,
    SessionDetached,
    StreamsReplaced,
    SecurebitsLocked,
    Jailed,
    PidWritten,
    ServiceBound,
    PrivilegeDropped,
    SignalsArmed,
    Ready,
    Dispatching,
    Terminating,
    Exited,
}

impl BootstrapState {
    /// What the daemon does to reach this state.
    pub const fn action(self) -> &'static str {
        match self {
            BootstrapState::Spawned => "spawning",
            BootstrapState::FdClean => "closing descriptors",
            BootstrapState::SessionDetached => "detaching session",
            BootstrapState::StreamsReplaced => "replacing standard streams",
            BootstrapState::SecurebitsLocked => "locking securebits",
            BootstrapState::Jailed => "entering jail",
            BootstrapState::PidWritten => "writing pid file",
            BootstrapState::ServiceBound => "binding service socket",
            BootstrapState::PrivilegeDropped => "dropping privileges",
            BootstrapState::SignalsArmed => "arming signals",
            BootstrapState::Ready => "reporting readiness",
            BootstrapState::Dispatching => "dispatching",
            BootstrapState::Terminating => "terminating",
            BootstrapState::Exited => "exiting",
        }
    }
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

/// A bootstrapped service, ready to report and dispatch.
#[derive(Debug)]
pub struct Service {
    pub handle: ServiceHandle,
    pub pid_file: PidFile,
}

impl Service {
    /// Remove the pid file and socket; failures are ignored.
    pub fn shutdown(self) {
        let _ = self.pid_file.remove();
        let _ = self.handle.release();
    }
}

pub struct Bootstrap<'a> {
    config: &'a DaemonConfig,
    state: BootstrapState,
}

impl<'a> Bootstrap<'a> {
    pub fn new(config: &'a DaemonConfig) -> Self {
        Self {
            config,
            state: BootstrapState::Spawned,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn enter(&mut self, next: BootstrapState) {
        debug_assert!(next > self.state);
        self.state = next;
        tracing::debug!(state = ?next, "bootstrap");
    }

    /// Run `f` to reach `next`; a failure is attributed to `next`.
    fn step<T, E>(
        &mut self,
        next: BootstrapState,
        f: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, BootstrapError>
    where
        E: Into<DaemonError>,
    {
        match f() {
            Ok(value) => {
                self.enter(next);
                Ok(value)
            }
            Err(e) => Err(BootstrapError {
                state: next,
                source: e.into(),
            }),
        }
    }

    /// Walk every state up to [`BootstrapState::SignalsArmed`].
    pub fn run(
        &mut self,
        sender: &mut ReadinessSender,
    ) -> std::result::Result<Service, BootstrapError> {
        use BootstrapState::*;
        let cfg = self.config;

        self.step(FdClean, || -> Result<()> {
            sender
                .relocate(CHANNEL_FD_FLOOR)
                .map_err(|e| DaemonError::os("move readiness channel", e))?;
            os::close_descriptors_except(&[sender.as_raw_fd()])
                .map_err(|e| DaemonError::os("close descriptors", e))?;
            Ok(())
        })?;

        self.step(SessionDetached, || -> Result<()> {
            setsid().map_err(|e| DaemonError::os("setsid", e))?;
            umask(Mode::from_bits_truncate(0o022));
            Ok(())
        })?;

        // Created ahead of the jail itself: the log file is opened below it.
        ensure_jail_root(&cfg.jail_root, cfg.jail_mode).map_err(|e| BootstrapError {
            state: Jailed,
            source: e.into(),
        })?;

        let log = self.step(StreamsReplaced, || -> Result<Option<File>> {
            os::redirect_stdio_to_devnull().map_err(|e| DaemonError::os("redirect stdio", e))?;
            start_logging(cfg)
        })?;

        self.step(SecurebitsLocked, || {
            if cfg.securebits {
                lock_securebits()?;
            }
            Ok::<_, DaemonError>(())
        })?;

        self.step(Jailed, || enter_jail(&cfg.jail_root, cfg.jail_mode))?;

        let pid_file = self.step(PidWritten, || -> Result<PidFile> {
            let pid_error = |source| DaemonError::PidFile {
                path: cfg.pid_file.clone(),
                source,
            };
            if let Some(pid) = pidfile::running_pid(&cfg.pid_file).map_err(pid_error)? {
                return Err(DaemonError::AlreadyRunning(pid.as_raw()));
            }
            PidFile::create(&cfg.pid_file).map_err(pid_error)
        })?;

        let handle = self.step(ServiceBound, || -> Result<ServiceHandle> {
            let mut handle = ServiceHandle::new(&cfg.socket_path, log);
            handle
                .listen(cfg.backlog)
                .and_then(|()| handle.set_mode(cfg.socket_mode))
                .map_err(|source| DaemonError::Socket {
                    path: cfg.socket_path.clone(),
                    source,
                })?;
            Ok(handle)
        })?;

        self.step(PrivilegeDropped, || -> std::result::Result<(), PrivilegeError> {
            let creds = Credentials::resolve(cfg.uid, cfg.gid);
            hand_over_parents(&[cfg.socket_path.as_path(), cfg.pid_file.as_path()], creds)?;
            drop_privileges(creds)
        })?;

        self.step(SignalsArmed, || -> Result<()> {
            ServiceSlot::new(
                &cfg.socket_path,
                &cfg.pid_file,
                handle.listener_fd(),
                handle.log_fd(),
            )
            .and_then(signals::publish_service)
            .map_err(|e| DaemonError::os("publish service", e))?;
            signals::arm().map_err(|e| DaemonError::os("sigaction", e))?;
            Ok(())
        })?;

        Ok(Service { handle, pid_file })
    }
}

/// Open the log file inside the jail root and install the subscriber.
fn start_logging(cfg: &DaemonConfig) -> Result<Option<File>> {
    let log = cfg
        .log_file
        .as_ref()
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .mode(0o640)
                .open(cfg.outside_jail(path))
        })
        .transpose()
        .map_err(DaemonError::Logging)?;
    let writer = log
        .as_ref()
        .map(File::try_clone)
        .transpose()
        .map_err(DaemonError::Logging)?;
    let sub = SubscriberConfig::builder()
        .format(cfg.log_format)
        .verbose(cfg.verbose)
        .filter(cfg.log_filter.clone())
        .stderr(false)
        .log_file(writer)
        .syslog(cfg.syslog)
        .syslog_path(cfg.syslog_path.clone())
        .build();
    logging::init(sub).map_err(DaemonError::Logging)?;
    Ok(log)
}

/// Daemon entry point after the fork. Never returns.
pub fn run_daemon(config: &DaemonConfig, mut sender: ReadinessSender, handler: Arc<Handler>) -> ! {
    let mut bootstrap = Bootstrap::new(config);
    let service = match bootstrap.run(&mut sender) {
        Ok(service) => service,
        Err(err) => {
            tracing::error!("{err}");
            let report = ReadinessReport::new(err.source.status(), err.to_string());
            let _ = sender.send(&report);
            process::exit(1);
        }
    };

    let report = ReadinessReport::ok(STARTED_MESSAGE);
    if let Err(e) = report_readiness(config.readiness, sender, &report) {
        tracing::error!("couldn't report readiness: {e}");
        service.shutdown();
        process::exit(1);
    }
    bootstrap.enter(BootstrapState::Ready);
    tracing::info!("jrnld has successfully started");

    bootstrap.enter(BootstrapState::Dispatching);
    dispatch::listen(service.handle, config.backlog, handler)
}

/// Supervisor-side lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Unstarted,
    ChannelOpen,
    Forked,
    Waiting,
    Reported,
    Crashed,
    TimedOut,
}

/// How a start ended, as seen by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Reported(ReadinessReport),
    Crashed,
    TimedOut(Duration),
}

impl SupervisorOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorOutcome::Reported(report) => report.status.exit_code(),
            SupervisorOutcome::Crashed | SupervisorOutcome::TimedOut(_) => 1,
        }
    }

    /// The line printed for the user.
    pub fn message(&self) -> String {
        match self {
            SupervisorOutcome::Reported(report) => format!("Jrnld: {}", report.message),
            SupervisorOutcome::Crashed => "Jrnld crashed".to_string(),
            SupervisorOutcome::TimedOut(after) => {
                format!("Jrnld did not report within {}s", after.as_secs())
            }
        }
    }
}

impl fmt::Display for SupervisorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Wait for the daemon's report, bounded by `timeout` when given.
pub fn await_report(receiver: ReadinessReceiver, timeout: Option<Duration>) -> SupervisorOutcome {
    let received = match timeout {
        Some(t) => receiver.receive_timeout(t),
        None => receiver.receive(),
    };
    match received {
        Ok(report) => SupervisorOutcome::Reported(report),
        Err(ChannelError::TimedOut) => SupervisorOutcome::TimedOut(timeout.unwrap_or_default()),
        Err(_) => SupervisorOutcome::Crashed,
    }
}

/// Strip what the supervisor inherited before anything is forked from it.
pub fn prepare_supervisor(keep: &[RawFd]) -> Result<()> {
    os::close_descriptors_except(keep).map_err(|e| DaemonError::os("close descriptors", e))?;
    signals::reset_all().map_err(|e| DaemonError::os("reset signals", e))?;
    os::clear_environment();
    Ok(())
}

pub struct Supervisor<'a> {
    config: &'a DaemonConfig,
    state: SupervisorState,
}

impl<'a> Supervisor<'a> {
    pub fn new(config: &'a DaemonConfig) -> Self {
        Self {
            config,
            state: SupervisorState::Unstarted,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Fork the daemon and wait for its report. Only the supervisor
    /// returns from here.
    pub fn launch(&mut self, handler: Arc<Handler>) -> Result<SupervisorOutcome> {
        let (sender, receiver) = readiness::channel()?;
        self.state = SupervisorState::ChannelOpen;
        match os::fork_process().map_err(|e| DaemonError::os("fork", e))? {
            ForkResult::Child => {
                drop(receiver);
                spawn_daemon(self.config, sender, handler)
            }
            ForkResult::Parent { child } => {
                drop(sender);
                self.state = SupervisorState::Forked;
                if self.config.double_fork {
                    reap(child);
                }
                self.state = SupervisorState::Waiting;
                let outcome = await_report(receiver, self.config.startup_timeout);
                self.state = match outcome {
                    SupervisorOutcome::Reported(_) => SupervisorState::Reported,
                    SupervisorOutcome::Crashed => SupervisorState::Crashed,
                    SupervisorOutcome::TimedOut(_) => SupervisorState::TimedOut,
                };
                Ok(outcome)
            }
        }
    }
}

/// Prepare this process as the supervisor and start the daemon. Logging
/// overrides in the environment are captured before it is cleared.
pub fn launch(config: &DaemonConfig, handler: Arc<Handler>) -> Result<SupervisorOutcome> {
    let mut config = config.clone();
    config.capture_log_environment();
    prepare_supervisor(&[libc::STDOUT_FILENO, libc::STDERR_FILENO])?;
    Supervisor::new(&config).launch(handler)
}

fn spawn_daemon(config: &DaemonConfig, sender: ReadinessSender, handler: Arc<Handler>) -> ! {
    if !config.double_fork {
        run_daemon(config, sender, handler);
    }
    match os::fork_process() {
        Ok(ForkResult::Child) => run_daemon(config, sender, handler),
        Ok(ForkResult::Parent { .. }) => os::exit_immediately(0),
        Err(e) => {
            let _ = sender.send(&ReadinessReport::error(format!(
                "{}: fork failed: {e}",
                BootstrapState::Spawned
            )));
            os::exit_immediately(1)
        }
    }
}

fn reap(child: Pid) {
    loop {
        match waitpid(child, None) {
            Err(Errno::EINTR) => continue,
            _ => return,
        }
    }
}
