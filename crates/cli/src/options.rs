// crates/cli/src/options.rs

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use daemon::DaemonConfig;
use logging::LogFormat;

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "jrnld",
    version,
    about = "Privileged journal daemon",
    override_usage = "jrnld -d [OPTION]..."
)]
pub struct Opts {
    /// run as a daemon (required)
    #[arg(short = 'd', long = "daemon")]
    pub daemon: bool,
    /// configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        env = "JRNLD_CONFIG_PATH"
    )]
    pub config: Option<PathBuf>,
    /// increase log verbosity
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// format of the daemon's log records
    #[arg(long = "log-format", value_name = "FORMAT", value_enum)]
    pub log_format: Option<LogFormat>,
    /// wait at most SECS for the daemon to report (0 waits forever)
    #[arg(long = "startup-timeout", value_name = "SECS")]
    pub startup_timeout: Option<u64>,
    /// fork the daemon directly, without an intermediate process
    #[arg(long = "no-double-fork")]
    pub no_double_fork: bool,
}

impl Opts {
    /// Parse `args`; running in the foreground is not supported, so
    /// `--daemon` must be given.
    pub fn parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let opts = Self::try_parse_from(args)?;
        if !opts.daemon {
            return Err(Self::command().error(
                ErrorKind::MissingRequiredArgument,
                "the following required arguments were not provided:\n  --daemon",
            ));
        }
        Ok(opts)
    }

    /// Layer command line settings over a loaded configuration.
    pub fn apply(&self, cfg: &mut DaemonConfig) {
        cfg.verbose = cfg.verbose.saturating_add(self.verbose);
        if let Some(format) = self.log_format {
            cfg.log_format = format;
        }
        if let Some(secs) = self.startup_timeout {
            cfg.startup_timeout = (secs != 0).then(|| Duration::from_secs(secs));
        }
        if self.no_double_fork {
            cfg.double_fork = false;
        }
    }
}
