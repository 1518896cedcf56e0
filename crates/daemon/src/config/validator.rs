// crates/daemon/src/config/validator.rs

use std::time::Duration;

use logging::LogFormat;

use crate::error::ConfigError;
use crate::readiness::ReadinessTrigger;

use super::model::DaemonConfig;

fn invalid(what: &str, val: &str) -> ConfigError {
    ConfigError::Value(format!("invalid {what}: {val}"))
}

pub fn parse_bool(val: &str) -> Result<bool, ConfigError> {
    if ["1", "yes", "true", "on"]
        .iter()
        .any(|v| val.eq_ignore_ascii_case(v))
    {
        Ok(true)
    } else if ["0", "no", "false", "off"]
        .iter()
        .any(|v| val.eq_ignore_ascii_case(v))
    {
        Ok(false)
    } else {
        Err(invalid("boolean", val))
    }
}

pub fn parse_uid(val: &str) -> Result<u32, ConfigError> {
    if let Ok(n) = val.parse::<u32>() {
        return Ok(n);
    }
    use nix::unistd::User;
    User::from_name(val)
        .map_err(|e| ConfigError::Value(format!("looking up user {val}: {e}")))?
        .ok_or_else(|| ConfigError::Value(format!("unknown user: {val}")))
        .map(|u| u.uid.as_raw())
}

pub fn parse_gid(val: &str) -> Result<u32, ConfigError> {
    if let Ok(n) = val.parse::<u32>() {
        return Ok(n);
    }
    use nix::unistd::Group;
    Group::from_name(val)
        .map_err(|e| ConfigError::Value(format!("looking up group {val}: {e}")))?
        .ok_or_else(|| ConfigError::Value(format!("unknown group: {val}")))
        .map(|g| g.gid.as_raw())
}

/// Octal permission bits such as `0755` or `755`.
pub fn parse_mode(val: &str) -> Result<u32, ConfigError> {
    let digits = val.strip_prefix("0o").unwrap_or(val);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(invalid("mode", val)),
    }
}

/// Seconds; `0` means no limit.
pub fn parse_timeout(val: &str) -> Result<Option<Duration>, ConfigError> {
    let secs = val
        .parse::<u64>()
        .map_err(|_| invalid("timeout", val))?;
    Ok((secs != 0).then(|| Duration::from_secs(secs)))
}

pub fn parse_readiness(val: &str) -> Result<ReadinessTrigger, ConfigError> {
    if val.eq_ignore_ascii_case("pipe") {
        Ok(ReadinessTrigger::Pipe)
    } else if val.eq_ignore_ascii_case("signal") {
        Ok(ReadinessTrigger::Signal)
    } else {
        Err(invalid("readiness trigger", val))
    }
}

pub fn parse_log_format(val: &str) -> Result<LogFormat, ConfigError> {
    if val.eq_ignore_ascii_case("text") {
        Ok(LogFormat::Text)
    } else if val.eq_ignore_ascii_case("json") {
        Ok(LogFormat::Json)
    } else {
        Err(invalid("log format", val))
    }
}

pub fn validate_config(cfg: &DaemonConfig) -> Result<(), ConfigError> {
    if !cfg.jail_root.is_absolute() {
        return Err(ConfigError::Value(format!(
            "jail root must be absolute: {}",
            cfg.jail_root.display()
        )));
    }
    for (what, path) in [("pid file", &cfg.pid_file), ("socket path", &cfg.socket_path)] {
        if path.as_os_str().is_empty() || path == std::path::Path::new("/") {
            return Err(ConfigError::Value(format!("{what} names no file")));
        }
    }
    if cfg.backlog <= 0 {
        return Err(invalid("backlog", &cfg.backlog.to_string()));
    }
    if cfg.securebits && !cfg!(target_os = "linux") {
        return Err(ConfigError::Value(
            "securebits are only available on Linux".into(),
        ));
    }
    Ok(())
}
