// crates/logging/src/lib.rs
//! `tracing` subscriber assembly for jrnld: stderr, an append-only log file
//! and syslog, configured through [`SubscriberConfig`].

mod flags;
mod formatter;
mod json_format;
mod sink;
mod subscriber;

pub use flags::{
    DEFAULT_IDENT, DEFAULT_SYSLOG_PATH, FILTER_ENV, LogFormat, SYSLOG_PATH_ENV, SubscriberConfig,
    SubscriberConfigBuilder,
};
pub use formatter::DaemonFormatter;
pub use json_format::JsonFormatter;
pub use subscriber::{init, subscriber};
