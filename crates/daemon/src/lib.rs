// crates/daemon/src/lib.rs
//! Privileged daemon bootstrap: readiness handshake, jail entry and
//! privilege drop, signal control and accept-and-fork dispatch.

pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
mod os;
pub mod pidfile;
pub mod privilege;
pub mod readiness;
pub mod signals;

pub use bootstrap::{
    Bootstrap, BootstrapState, Service, Supervisor, SupervisorOutcome, SupervisorState,
    await_report, launch, prepare_supervisor, run_daemon,
};
pub use config::{DaemonConfig, load_config, parse_config};
pub use dispatch::{Accept, Dispatcher, ForkSpawner, Handler, ServiceHandle, Spawn, Step, listen};
pub use error::{
    BootstrapError, ChannelError, ConfigError, DaemonError, JailError, PrivilegeError, Result,
};
pub use pidfile::{PidFile, running_pid};
pub use privilege::{
    Credentials, drop_privileges, ensure_jail_root, enter_jail, hand_over_parents, lock_securebits,
};
pub use readiness::{
    ReadinessReceiver, ReadinessReport, ReadinessSender, ReadinessStatus, ReadinessTrigger,
    channel, report_readiness,
};
