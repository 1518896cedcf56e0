// src/bin/jrnld.rs
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::process;
use std::sync::Arc;

use daemon::{Handler, ServiceHandle};

/// Default connection handler: records the connection and closes it.
fn record_connection(_handle: &ServiceHandle, conn: UnixStream) -> i32 {
    tracing::info!(fd = conn.as_raw_fd(), "handler with connection");
    0
}

fn main() {
    let handler: Arc<Handler> = Arc::new(record_connection);
    process::exit(jrnld_cli::run(std::env::args_os(), handler));
}
