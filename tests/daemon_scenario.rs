// tests/daemon_scenario.rs
#![cfg(unix)]

use std::fs;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use predicates::str::contains;
use serial_test::serial;
use tempfile::tempdir;

fn wait_until(what: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if what() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn write_config(dir: &Path, jail: &Path) -> std::path::PathBuf {
    let conf = dir.join("jrnld.conf");
    fs::write(
        &conf,
        format!(
            "# test daemon\n\
             jail root = {}\n\
             syslog = no\n\
             uid = 65534\n\
             gid = 65534\n\
             startup timeout = 10\n",
            jail.display()
        ),
    )
    .unwrap();
    conf
}

#[test]
#[serial]
#[ignore = "requires root privileges"]
fn start_serve_and_stop() {
    let dir = tempdir().unwrap();
    let jail = dir.path().join("jail");
    let conf = write_config(dir.path(), &jail);

    Command::cargo_bin("jrnld")
        .unwrap()
        .args(["-d", "--config"])
        .arg(&conf)
        .assert()
        .success()
        .stdout("Jrnld: Started successfully\n");

    let pid: i32 = fs::read_to_string(jail.join("jrnl.pid"))
        .unwrap()
        .trim_end()
        .parse()
        .unwrap();

    let conn = UnixStream::connect(jail.join("jrnl.sock")).unwrap();
    drop(conn);
    assert!(wait_until(|| {
        fs::read_to_string(jail.join("jrnl.log"))
            .map(|log| log.contains("handler with connection"))
            .unwrap_or(false)
    }));

    Command::cargo_bin("jrnld")
        .unwrap()
        .args(["-d", "--config"])
        .arg(&conf)
        .assert()
        .failure()
        .code(1)
        .stdout(contains(format!("already running as pid {pid}")));

    kill(Pid::from_raw(pid), Signal::SIGTERM).unwrap();
    assert!(wait_until(|| !jail.join("jrnl.pid").exists()));
    assert!(!jail.join("jrnl.sock").exists());
}

#[test]
#[serial]
#[ignore = "requires root privileges"]
fn jail_that_is_a_file_fails_startup() {
    let dir = tempdir().unwrap();
    let jail = dir.path().join("jail");
    fs::write(&jail, b"").unwrap();
    let conf = write_config(dir.path(), &jail);

    Command::cargo_bin("jrnld")
        .unwrap()
        .args(["-d", "--config"])
        .arg(&conf)
        .assert()
        .failure()
        .code(1)
        .stdout(contains("Jrnld: entering jail: "))
        .stdout(contains("not a directory"));
}

#[test]
#[ignore = "requires root privileges"]
fn missing_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    Command::cargo_bin("jrnld")
        .unwrap()
        .args(["-d", "--config"])
        .arg(dir.path().join("absent.conf"))
        .assert()
        .failure()
        .code(1)
        .stderr(contains("loading configuration"));
}
