// crates/daemon/tests/privileges.rs
//! Scenarios that need root. Run with `cargo test -- --ignored` as root.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use daemon::{
    Credentials, DaemonConfig, Handler, PidFile, ServiceHandle, Supervisor, drop_privileges,
    enter_jail,
};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Gid, Uid, fork, getegid, geteuid, getgid, getuid, setuid};
use serial_test::serial;
use tempfile::tempdir;

const NOBODY: u32 = 65534;

fn in_child(body: impl FnOnce() -> i32) -> i32 {
    // SAFETY: the child runs `body` and exits without returning.
    match unsafe { fork() }.unwrap() {
        ForkResult::Child => {
            let code = body();
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).unwrap() {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child ended with {other:?}"),
        },
    }
}

#[test]
#[ignore = "requires root privileges"]
#[serial]
fn jailed_and_dropped_process_cannot_regain_root() {
    let dir = tempdir().unwrap();
    let jail = dir.path().join("jail");
    let code = in_child(|| {
        if enter_jail(&jail, 0o755).is_err() {
            return 10;
        }
        let creds = Credentials {
            uid: Uid::from_raw(NOBODY),
            gid: Gid::from_raw(NOBODY),
        };
        if drop_privileges(creds).is_err() {
            return 11;
        }
        if getuid() != creds.uid || geteuid() != creds.uid {
            return 12;
        }
        if getgid() != creds.gid || getegid() != creds.gid {
            return 13;
        }
        if setuid(Uid::from_raw(0)).is_ok() {
            return 14;
        }
        if Path::new("/jail").exists() {
            return 15;
        }
        0
    });
    assert_eq!(code, 0);
    assert!(jail.is_dir());
}

#[test]
#[ignore = "requires root privileges"]
#[serial]
fn root_target_is_refused() {
    let code = in_child(|| {
        let creds = Credentials {
            uid: Uid::from_raw(0),
            gid: Gid::from_raw(0),
        };
        match drop_privileges(creds) {
            Err(daemon::PrivilegeError::StillRoot) => 0,
            _ => 1,
        }
    });
    assert_eq!(code, 0);
}

fn supervise(cfg: &DaemonConfig, transcript: &Path) -> (i32, String) {
    let code = in_child(|| {
        let handler: Arc<Handler> = Arc::new(|_: &ServiceHandle, mut conn: UnixStream| {
            let mut byte = [0u8; 1];
            if conn.read_exact(&mut byte).is_err() {
                return 1;
            }
            let uid = getuid().as_raw().to_le_bytes();
            match conn.write_all(&uid) {
                Ok(()) => 0,
                Err(_) => 1,
            }
        });
        match Supervisor::new(cfg).launch(handler) {
            Ok(outcome) => {
                let _ = fs::write(transcript, outcome.message());
                outcome.exit_code()
            }
            Err(_) => 99,
        }
    });
    (code, fs::read_to_string(transcript).unwrap_or_default())
}

fn wait_for(what: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if what() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
#[ignore = "requires root privileges"]
#[serial]
fn full_start_serve_and_terminate() {
    let dir = tempdir().unwrap();
    let jail = dir.path().join("jail");
    let cfg = DaemonConfig {
        jail_root: jail.clone(),
        syslog: false,
        uid: Some(NOBODY),
        gid: Some(NOBODY),
        startup_timeout: Some(Duration::from_secs(10)),
        ..DaemonConfig::default()
    };
    let inside = |p: &str| -> PathBuf { jail.join(p) };

    let (code, line) = supervise(&cfg, &dir.path().join("first"));
    assert_eq!(code, 0, "{line}");
    assert_eq!(line, "Jrnld: Started successfully");

    let meta = fs::metadata(&jail).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o755);
    assert_eq!((meta.uid(), meta.gid()), (NOBODY, NOBODY));

    let pid = PidFile::read(&inside("jrnl.pid")).unwrap().expect("pid file");
    let contents = fs::read_to_string(inside("jrnl.pid")).unwrap();
    assert_eq!(contents, format!("{pid}\n"));

    let mut conn = UnixStream::connect(inside("jrnl.sock")).unwrap();
    conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    conn.write_all(b"x").unwrap();
    let mut uid = [0u8; 4];
    conn.read_exact(&mut uid).unwrap();
    assert_eq!(u32::from_le_bytes(uid), NOBODY);

    let (code, line) = supervise(&cfg, &dir.path().join("second"));
    assert_eq!(code, 1, "{line}");
    assert_eq!(
        line,
        format!("Jrnld: writing pid file: already running as pid {pid}")
    );

    kill(pid, Signal::SIGHUP).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(kill(pid, None).is_ok());

    kill(pid, Signal::SIGTERM).unwrap();
    assert!(wait_for(|| !inside("jrnl.sock").exists()));
    assert!(!inside("jrnl.pid").exists());
    let log = fs::read_to_string(inside("jrnl.log")).unwrap();
    assert!(log.contains("jrnld has successfully started"), "{log}");
    assert!(log.contains("SIGTERM heard, terminating"), "{log}");
}
