// crates/daemon/src/pidfile.rs
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::{Pid, getpid};

/// The pid file written by a running daemon.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: Pid,
}

impl PidFile {
    /// Create or truncate `path` and write the current pid followed by a
    /// newline.
    pub fn create(path: &Path) -> io::Result<Self> {
        let pid = getpid();
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o644)
            .open(path)?;
        writeln!(f, "{pid}")?;
        f.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            pid,
        })
    }

    /// Pid recorded in `path`, if the file exists and holds one.
    pub fn read(path: &Path) -> io::Result<Option<Pid>> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(contents
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .map(Pid::from_raw))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Pid of another live process recorded in `path`.
pub fn running_pid(path: &Path) -> io::Result<Option<Pid>> {
    Ok(PidFile::read(path)?.filter(|pid| *pid != getpid() && is_alive(*pid)))
}

fn is_alive(pid: Pid) -> bool {
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn writes_pid_and_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jrnl.pid");
        let pid_file = PidFile::create(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", std::process::id()));
        assert_eq!(pid_file.pid().as_raw() as u32, std::process::id());
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode & !0o644, 0);
    }

    #[test]
    fn truncates_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jrnl.pid");
        fs::write(&path, "1234567890 stale contents\n").unwrap();
        PidFile::create(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            format!("{}\n", std::process::id())
        );
    }

    #[test]
    fn missing_or_garbage_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jrnl.pid");
        assert_eq!(PidFile::read(&path).unwrap(), None);
        fs::write(&path, "not a pid\n").unwrap();
        assert_eq!(PidFile::read(&path).unwrap(), None);
        fs::write(&path, "-4\n").unwrap();
        assert_eq!(PidFile::read(&path).unwrap(), None);
    }

    #[test]
    fn own_pid_is_not_another_instance() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jrnl.pid");
        PidFile::create(&path).unwrap();
        assert_eq!(running_pid(&path).unwrap(), None);
    }

    #[test]
    fn live_foreign_pid_is_running() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jrnl.pid");
        let mut child = std::process::Command::new("sleep").arg("5").spawn().unwrap();
        fs::write(&path, format!("{}\n", child.id())).unwrap();
        let found = running_pid(&path).unwrap();
        child.kill().unwrap();
        child.wait().unwrap();
        assert_eq!(found, Some(Pid::from_raw(child.id() as i32)));
    }

    #[test]
    fn remove_tolerates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jrnl.pid");
        let pid_file = PidFile::create(&path).unwrap();
        pid_file.remove().unwrap();
        assert!(!path.exists());
        pid_file.remove().unwrap();
    }
}
