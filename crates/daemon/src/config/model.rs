// crates/daemon/src/config/model.rs

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use logging::{FILTER_ENV, LogFormat, SYSLOG_PATH_ENV};

use crate::readiness::ReadinessTrigger;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/jrnld.conf";
pub const DEFAULT_JAIL_ROOT: &str = "/var/jrnl";
pub const DEFAULT_PID_FILE: &str = "/jrnl.pid";
pub const DEFAULT_SOCKET_PATH: &str = "/jrnl.sock";
pub const DEFAULT_LOG_FILE: &str = "/jrnl.log";
pub const DEFAULT_BACKLOG: i32 = 64;
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub jail_root: PathBuf,
    pub jail_mode: u32,
    /// Paths below are resolved inside the jail.
    pub pid_file: PathBuf,
    pub socket_path: PathBuf,
    pub socket_mode: u32,
    pub log_file: Option<PathBuf>,
    pub log_format: LogFormat,
    /// `RUST_LOG`-style directives; replace the level from `verbose`.
    pub log_filter: Option<String>,
    pub syslog: bool,
    pub syslog_path: Option<PathBuf>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub securebits: bool,
    pub readiness: ReadinessTrigger,
    pub double_fork: bool,
    /// `None` waits forever.
    pub startup_timeout: Option<Duration>,
    pub backlog: i32,
    pub verbose: u8,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            jail_root: PathBuf::from(DEFAULT_JAIL_ROOT),
            jail_mode: 0o755,
            pid_file: PathBuf::from(DEFAULT_PID_FILE),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            socket_mode: 0o666,
            log_file: Some(PathBuf::from(DEFAULT_LOG_FILE)),
            log_format: LogFormat::Text,
            log_filter: None,
            syslog: true,
            syslog_path: None,
            uid: None,
            gid: None,
            securebits: cfg!(target_os = "linux"),
            readiness: ReadinessTrigger::Pipe,
            double_fork: true,
            startup_timeout: Some(DEFAULT_STARTUP_TIMEOUT),
            backlog: DEFAULT_BACKLOG,
            verbose: 0,
        }
    }
}

impl DaemonConfig {
    /// Where a path inside the jail lives before the jail is entered.
    pub fn outside_jail(&self, inner: &Path) -> PathBuf {
        self.jail_root
            .join(inner.strip_prefix("/").unwrap_or(inner))
    }

    /// Take the logging overrides from the environment. Must run before
    /// the supervisor clears it; values already set are kept.
    pub fn capture_log_environment(&mut self) {
        if self.log_filter.is_none() {
            self.log_filter = env::var(FILTER_ENV).ok();
        }
        if self.syslog_path.is_none() {
            self.syslog_path = env::var_os(SYSLOG_PATH_ENV).map(PathBuf::from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn jail_paths_resolve_below_root() {
        let cfg = DaemonConfig::default();
        assert_eq!(
            cfg.outside_jail(&cfg.pid_file),
            PathBuf::from("/var/jrnl/jrnl.pid")
        );
        assert_eq!(
            cfg.outside_jail(Path::new("relative.sock")),
            PathBuf::from("/var/jrnl/relative.sock")
        );
    }

    #[test]
    #[serial]
    fn log_overrides_come_from_the_environment() {
        unsafe {
            env::set_var(FILTER_ENV, "jrnld=debug");
            env::set_var(SYSLOG_PATH_ENV, "/run/jrnld/log");
        }
        let mut cfg = DaemonConfig::default();
        cfg.capture_log_environment();
        let mut preset = DaemonConfig {
            log_filter: Some("warn".into()),
            ..DaemonConfig::default()
        };
        preset.capture_log_environment();
        unsafe {
            env::remove_var(FILTER_ENV);
            env::remove_var(SYSLOG_PATH_ENV);
        }
        assert_eq!(cfg.log_filter.as_deref(), Some("jrnld=debug"));
        assert_eq!(cfg.syslog_path, Some(PathBuf::from("/run/jrnld/log")));
        assert_eq!(preset.log_filter.as_deref(), Some("warn"));
    }
}
