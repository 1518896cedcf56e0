// crates/daemon/src/config/mod.rs

pub mod model;
pub mod parser;
pub mod validator;

pub use model::DaemonConfig;
pub use parser::{CONFIG_PATH_ENV, load_config, parse_config, parse_config_file};
