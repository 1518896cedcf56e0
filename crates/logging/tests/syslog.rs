// crates/logging/tests/syslog.rs
#![cfg(all(unix, feature = "syslog"))]

use logging::{SubscriberConfig, subscriber};
use std::os::unix::net::UnixDatagram;
use tempfile::tempdir;
use tracing::subscriber::with_default;
use tracing::{error, info};

fn recv(server: &UnixDatagram) -> String {
    let mut buf = [0u8; 512];
    let (n, _) = server.recv_from(&mut buf).unwrap();
    String::from_utf8(buf[..n].to_vec()).unwrap()
}

#[test]
fn syslog_emits_rfc3164_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log");
    let server = UnixDatagram::bind(&path).unwrap();
    let cfg = SubscriberConfig::builder()
        .stderr(false)
        .syslog(true)
        .syslog_path(Some(path))
        .build();
    let sub = subscriber(cfg).unwrap();
    with_default(sub, || {
        info!(target: "test", "jrnld has successfully started");
        error!(target: "test", "couldn't accept connection");
    });
    let pid = std::process::id();
    assert_eq!(
        recv(&server),
        format!("<30>jrnld[{pid}]: jrnld has successfully started")
    );
    assert_eq!(
        recv(&server),
        format!("<27>jrnld[{pid}]: couldn't accept connection")
    );
}

#[test]
fn missing_syslog_socket_is_tolerated() {
    let dir = tempdir().unwrap();
    let cfg = SubscriberConfig::builder()
        .syslog(true)
        .syslog_path(Some(dir.path().join("absent")))
        .build();
    assert!(subscriber(cfg).is_ok());
}
