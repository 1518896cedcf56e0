// crates/daemon/src/config/parser.rs

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::model::{DEFAULT_CONFIG_PATH, DaemonConfig};
use super::validator::{
    parse_bool, parse_gid, parse_log_format, parse_mode, parse_readiness, parse_timeout, parse_uid,
    validate_config,
};
use crate::error::ConfigError;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "JRNLD_CONFIG_PATH";

/// Strip a trailing comment. `#` and `;` start one when they follow
/// whitespace outside quotes.
fn strip_comment(raw: &str) -> String {
    let mut line = String::new();
    let mut in_quotes: Option<char> = None;
    let mut prev_ws = true;
    for c in raw.chars() {
        match c {
            '"' | '\'' => {
                if let Some(q) = in_quotes {
                    if c == q {
                        in_quotes = None;
                    }
                } else {
                    in_quotes = Some(c);
                }
                line.push(c);
                prev_ws = false;
            }
            '#' | ';' if in_quotes.is_none() && prev_ws => break,
            c => {
                prev_ws = c.is_whitespace();
                line.push(c);
            }
        }
    }
    line
}

fn unquote(val: &str) -> &str {
    let quoted = val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')));
    if quoted { &val[1..val.len() - 1] } else { val }
}

fn parse_path(val: &str) -> Result<Option<PathBuf>, ConfigError> {
    if val.is_empty() {
        return Err(ConfigError::Value("empty path".into()));
    }
    if val.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    Ok(Some(PathBuf::from(val)))
}

fn required_path(val: &str) -> Result<PathBuf, ConfigError> {
    parse_path(val)?.ok_or_else(|| ConfigError::Value("path is required".into()))
}

fn apply(cfg: &mut DaemonConfig, key: &str, val: &str) -> Result<(), ConfigError> {
    match key {
        "jail root" => cfg.jail_root = required_path(val)?,
        "jail mode" => cfg.jail_mode = parse_mode(val)?,
        "pid file" => cfg.pid_file = required_path(val)?,
        "socket path" => cfg.socket_path = required_path(val)?,
        "socket mode" => cfg.socket_mode = parse_mode(val)?,
        "log file" => cfg.log_file = parse_path(val)?,
        "log format" => cfg.log_format = parse_log_format(val)?,
        "syslog" => cfg.syslog = parse_bool(val)?,
        "uid" => cfg.uid = Some(parse_uid(val)?),
        "gid" => cfg.gid = Some(parse_gid(val)?),
        "securebits" => cfg.securebits = parse_bool(val)?,
        "readiness" => cfg.readiness = parse_readiness(val)?,
        "double fork" => cfg.double_fork = parse_bool(val)?,
        "startup timeout" => cfg.startup_timeout = parse_timeout(val)?,
        "backlog" => {
            cfg.backlog = val
                .parse()
                .map_err(|_| ConfigError::Value(format!("invalid backlog: {val}")))?;
        }
        "verbose" => {
            cfg.verbose = val
                .parse()
                .map_err(|_| ConfigError::Value(format!("invalid verbosity: {val}")))?;
        }
        _ => return Err(ConfigError::Value(format!("unknown option: {key}"))),
    }
    Ok(())
}

pub fn parse_config(contents: &str) -> Result<DaemonConfig, ConfigError> {
    let mut cfg = DaemonConfig::default();
    for (idx, raw) in contents.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let invalid = |message: String| ConfigError::Invalid {
            line: line_no,
            message,
        };
        let (key, val) = line
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected key = value, got {line}")))?;
        let key = key.trim().to_lowercase().replace(['-', '_'], " ");
        let val = unquote(val.trim());
        apply(&mut cfg, &key, val).map_err(|e| invalid(e.to_string()))?;
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn parse_config_file(path: &Path) -> Result<DaemonConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents)
}

/// Load `path`, or the default location when none is given. Only a
/// missing default file falls back to the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<DaemonConfig, ConfigError> {
    if let Some(path) = path {
        return parse_config_file(path);
    }
    let default = env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    match parse_config_file(&default) {
        Err(ConfigError::Read { source, .. }) if source.kind() == io::ErrorKind::NotFound => {
            Ok(DaemonConfig::default())
        }
        other => other,
    }
}
