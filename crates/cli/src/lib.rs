// crates/cli/src/lib.rs
//! Command line front end for `jrnld`.

use std::ffi::OsString;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::CommandFactory;
use daemon::{Handler, SupervisorOutcome, load_config};

pub mod options;
pub mod print;

pub use options::Opts;

pub const NOT_ROOT_MESSAGE: &str = "Jrnld must be run with euid=0, root";

pub fn cli_command() -> clap::Command {
    Opts::command()
}

/// Check privileges, load the configuration and start the daemon.
pub fn start(opts: &Opts, handler: Arc<Handler>) -> Result<SupervisorOutcome> {
    if !nix::unistd::geteuid().is_root() {
        bail!(NOT_ROOT_MESSAGE);
    }
    let mut cfg = load_config(opts.config.as_deref()).context("loading configuration")?;
    opts.apply(&mut cfg);
    let outcome = daemon::launch(&cfg, handler).context("starting daemon")?;
    Ok(outcome)
}

/// Run `jrnld` with `args` and return the process exit status.
pub fn run<I, T>(args: I, handler: Arc<Handler>) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let opts = match Opts::parse_args(args) {
        Ok(opts) => opts,
        Err(e) => return print::report_clap_error(e),
    };
    match start(&opts, handler) {
        Ok(outcome) => {
            println!("{outcome}");
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("{e:#}");
            1
        }
    }
}
