// crates/logging/src/flags.rs
#![allow(missing_docs)]

use clap::ValueEnum;
use std::fs::File;
use std::path::PathBuf;

/// Identifier used for syslog records.
pub const DEFAULT_IDENT: &str = "jrnld";

/// Filter directives in the `EnvFilter` syntax.
pub const FILTER_ENV: &str = "RUST_LOG";

/// Overrides the syslog socket, `/dev/log` by default.
pub const SYSLOG_PATH_ENV: &str = "JRNLD_SYSLOG_PATH";

pub const DEFAULT_SYSLOG_PATH: &str = "/dev/log";

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum, Default)]
#[clap(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Settings for [`crate::subscriber`]. Nothing here is read from the
/// environment when the subscriber is built; callers capture overrides
/// such as [`FILTER_ENV`] themselves.
#[derive(Debug)]
pub struct SubscriberConfig {
    pub format: LogFormat,
    pub verbose: u8,
    /// Directives that replace the level derived from `verbose`.
    pub filter: Option<String>,
    pub stderr: bool,
    /// An already open, append-only log file.
    pub log_file: Option<File>,
    pub syslog: bool,
    pub syslog_path: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            verbose: 0,
            filter: None,
            stderr: true,
            log_file: None,
            syslog: false,
            syslog_path: None,
        }
    }
}

#[derive(Default)]
pub struct SubscriberConfigBuilder {
    cfg: SubscriberConfig,
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }
}

impl SubscriberConfigBuilder {
    pub fn format(mut self, format: LogFormat) -> Self {
        self.cfg.format = format;
        self
    }

    pub fn verbose(mut self, verbose: u8) -> Self {
        self.cfg.verbose = verbose;
        self
    }

    pub fn filter(mut self, directives: Option<String>) -> Self {
        self.cfg.filter = directives;
        self
    }

    pub fn stderr(mut self, stderr: bool) -> Self {
        self.cfg.stderr = stderr;
        self
    }

    pub fn log_file(mut self, file: Option<File>) -> Self {
        self.cfg.log_file = file;
        self
    }

    pub fn syslog(mut self, syslog: bool) -> Self {
        self.cfg.syslog = syslog;
        self
    }

    pub fn syslog_path(mut self, path: Option<PathBuf>) -> Self {
        self.cfg.syslog_path = path;
        self
    }

    pub fn build(self) -> SubscriberConfig {
        self.cfg
    }
}
