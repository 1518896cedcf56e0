// crates/daemon/src/dispatch.rs
//! Accept-and-fork connection dispatcher.

use std::fs::{self, File, Permissions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid};
use socket2::{Domain, SockAddr, Socket, Type};

use crate::os::fork_process;
use crate::signals;

/// Per-connection callback run inside a worker process. The return value
/// becomes the worker's exit status.
pub type Handler = dyn Fn(&ServiceHandle, UnixStream) -> i32 + Send + Sync;

/// Exit status of a worker whose handler panicked.
pub const PANIC_STATUS: i32 = 101;

/// The listening socket together with its path and the log descriptor.
#[derive(Debug)]
pub struct ServiceHandle {
    path: PathBuf,
    socket: Option<Socket>,
    listening: bool,
    log: Option<File>,
}

impl ServiceHandle {
    pub fn new(path: impl Into<PathBuf>, log: Option<File>) -> Self {
        Self {
            path: path.into(),
            socket: None,
            listening: false,
            log,
        }
    }

    /// Bind a stream socket at the handle's path, replacing a stale one.
    pub fn bind(&mut self) -> io::Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }
        remove_stale(&self.path)?;
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
        socket.bind(&SockAddr::unix(&self.path)?)?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Bind if needed and start listening. Calling it again is a no-op.
    pub fn listen(&mut self, backlog: i32) -> io::Result<()> {
        self.bind()?;
        if !self.listening {
            if let Some(socket) = &self.socket {
                socket.listen(backlog)?;
            }
            self.listening = true;
        }
        Ok(())
    }

    pub fn set_mode(&self, mode: u32) -> io::Result<()> {
        fs::set_permissions(&self.path, Permissions::from_mode(mode))
    }

    pub fn accept(&self) -> io::Result<UnixStream> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "service is not bound"))?;
        let (conn, _) = socket.accept()?;
        Ok(UnixStream::from(OwnedFd::from(conn)))
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub fn log_file(&self) -> Option<&File> {
        self.log.as_ref()
    }

    pub fn listener_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn log_fd(&self) -> Option<RawFd> {
        self.log.as_ref().map(|f| f.as_raw_fd())
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Drop the listening socket, keeping the path on disk.
    pub(crate) fn close_listener(&mut self) {
        self.socket = None;
        self.listening = false;
    }

    /// Close the socket and remove its path.
    pub fn release(mut self) -> io::Result<()> {
        self.close_listener();
        remove_stale(&self.path)
    }
}

fn remove_stale(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Source of connections.
pub trait Accept {
    fn accept(&mut self, handle: &ServiceHandle) -> io::Result<UnixStream>;
}

/// Accepts from the handle's own listening socket.
#[derive(Debug, Default)]
pub struct SocketAcceptor;

impl Accept for SocketAcceptor {
    fn accept(&mut self, handle: &ServiceHandle) -> io::Result<UnixStream> {
        handle.accept()
    }
}

/// Runs a handler for one accepted connection.
pub trait Spawn {
    fn spawn(
        &mut self,
        handle: &mut ServiceHandle,
        conn: UnixStream,
        handler: &Handler,
    ) -> io::Result<()>;

    /// Collect finished workers without blocking.
    fn reap(&mut self) {}
}

/// One worker process per connection.
#[derive(Debug, Default)]
pub struct ForkSpawner {
    workers: Vec<Pid>,
}

impl ForkSpawner {
    pub fn workers(&self) -> &[Pid] {
        &self.workers
    }
}

impl Spawn for ForkSpawner {
    fn spawn(
        &mut self,
        handle: &mut ServiceHandle,
        conn: UnixStream,
        handler: &Handler,
    ) -> io::Result<()> {
        match fork_process()? {
            ForkResult::Parent { child } => {
                drop(conn);
                tracing::debug!(pid = child.as_raw(), "spawned worker");
                self.workers.push(child);
                Ok(())
            }
            ForkResult::Child => run_worker(handle, conn, handler),
        }
    }

    fn reap(&mut self) {
        self.workers.retain(|&pid| {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => true,
                Ok(WaitStatus::Exited(_, code)) => {
                    tracing::debug!(pid = pid.as_raw(), code, "worker exited");
                    false
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    tracing::debug!(pid = pid.as_raw(), signal = %sig, "worker killed");
                    false
                }
                Ok(_) => true,
                Err(Errno::ECHILD) => false,
                Err(e) => {
                    tracing::debug!(pid = pid.as_raw(), "waitpid failed: {e}");
                    true
                }
            }
        });
    }
}

fn run_worker(handle: &mut ServiceHandle, conn: UnixStream, handler: &Handler) -> ! {
    let _ = signals::reset_all();
    handle.close_listener();
    let status = panic::catch_unwind(AssertUnwindSafe(|| handler(handle, conn)))
        .unwrap_or(PANIC_STATUS);
    process::exit(status)
}

/// What a single dispatcher step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Dispatched,
    Interrupted,
    AcceptFailed,
    SpawnFailed,
}

pub struct Dispatcher<A = SocketAcceptor, S = ForkSpawner> {
    handle: ServiceHandle,
    acceptor: A,
    spawner: S,
}

impl Dispatcher {
    pub fn new(handle: ServiceHandle) -> Self {
        Self::with_parts(handle, SocketAcceptor, ForkSpawner::default())
    }
}

impl<A: Accept, S: Spawn> Dispatcher<A, S> {
    pub fn with_parts(handle: ServiceHandle, acceptor: A, spawner: S) -> Self {
        Self {
            handle,
            acceptor,
            spawner,
        }
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Accept one connection and hand it to the spawner.
    pub fn step(&mut self, handler: &Handler) -> Step {
        self.spawner.reap();
        let step = match self.acceptor.accept(&self.handle) {
            Ok(conn) => match self.spawner.spawn(&mut self.handle, conn, handler) {
                Ok(()) => Step::Dispatched,
                Err(e) => {
                    tracing::error!("couldn't start worker: {e}");
                    Step::SpawnFailed
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Step::Interrupted,
            Err(e) => {
                tracing::error!("couldn't accept connection: {e}");
                Step::AcceptFailed
            }
        };
        if signals::take_reload_request() {
            tracing::info!("reload requested; configuration reload is not supported");
        }
        step
    }

    pub fn run(mut self, handler: &Handler) -> ! {
        loop {
            self.step(handler);
        }
    }
}

/// Listen on `handle` and dispatch connections to `handler` forever.
pub fn listen(mut handle: ServiceHandle, backlog: i32, handler: Arc<Handler>) -> ! {
    if let Err(e) = handle.listen(backlog) {
        tracing::error!(
            "couldn't listen on {}: {e}",
            handle.socket_path().display()
        );
        process::exit(1);
    }
    Dispatcher::new(handle).run(handler.as_ref())
}
