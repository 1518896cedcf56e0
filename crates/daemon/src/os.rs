// crates/daemon/src/os.rs
#![allow(unsafe_code)]

use std::env;
use std::fs::{self, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::unistd::{ForkResult, fork};

/// Fork the current process.
///
/// # Safety
/// This wrapper is safe because it performs the raw `fork(2)` and returns
/// immediately without touching shared state in the child. The process is
/// single threaded whenever the daemon forks.
pub(crate) fn fork_process() -> nix::Result<ForkResult> {
    // SAFETY: see the `Safety` section above.
    unsafe { fork() }
}

/// Descriptors currently open in this process.
pub(crate) fn open_descriptors() -> io::Result<Vec<RawFd>> {
    let entries = match fs::read_dir("/proc/self/fd") {
        Ok(entries) => entries,
        Err(_) => fs::read_dir("/dev/fd")?,
    };
    let mut fds: Vec<RawFd> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect();
    fds.sort_unstable();
    Ok(fds)
}

/// Close every descriptor not named in `keep`. Returns how many were closed.
pub(crate) fn close_descriptors_except(keep: &[RawFd]) -> io::Result<usize> {
    // The directory handle used for listing shows up in the list and is
    // already gone by now; EBADF on it is expected.
    let mut closed = 0;
    for fd in open_descriptors()? {
        if keep.contains(&fd) {
            continue;
        }
        // SAFETY: the descriptor is not owned by any live Rust object that
        // the caller keeps using; bootstrap runs before any are created.
        if unsafe { libc::close(fd) } == 0 {
            closed += 1;
        }
    }
    Ok(closed)
}

/// Duplicate `fd` onto the lowest free descriptor numbered `min` or above.
pub(crate) fn dup_above(fd: BorrowedFd<'_>, min: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: fcntl(F_DUPFD_CLOEXEC) does not touch memory.
    let raw = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_DUPFD_CLOEXEC, min) };
    if raw == -1 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(raw) })
}

/// Point descriptors 0, 1 and 2 at `/dev/null`.
pub(crate) fn redirect_stdio_to_devnull() -> io::Result<()> {
    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    let fd = devnull.as_raw_fd();
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if fd == target {
            continue;
        }
        // SAFETY: dup2 replaces a standard slot; nothing in Rust owns it.
        if unsafe { libc::dup2(fd, target) } == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    if fd <= libc::STDERR_FILENO {
        // Opened straight into a standard slot; keep it there.
        std::mem::forget(devnull);
    }
    Ok(())
}

/// Remove every variable from the process environment.
pub(crate) fn clear_environment() {
    let keys: Vec<_> = env::vars_os().map(|(key, _)| key).collect();
    for key in keys {
        // SAFETY: called from the single-threaded supervisor before fork.
        unsafe { env::remove_var(key) };
    }
}

/// Terminate immediately without running exit handlers.
pub(crate) fn exit_immediately(code: i32) -> ! {
    // SAFETY: _exit is async-signal-safe and never returns.
    unsafe { libc::_exit(code) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::AsFd;

    #[test]
    fn lists_own_descriptors() {
        let file = File::open("/dev/null").unwrap();
        let fds = open_descriptors().unwrap();
        assert!(fds.contains(&file.as_raw_fd()));
        assert!(fds.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn dup_above_respects_floor() {
        let file = File::open("/dev/null").unwrap();
        let moved = dup_above(file.as_fd(), 64).unwrap();
        assert!(moved.as_raw_fd() >= 64);
    }
}
