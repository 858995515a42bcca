//! Command implementations for the CLI.

mod config;
mod send;
mod watch;

pub use config::cmd_config;
pub use send::cmd_send;
pub use watch::{WatchArgs, cmd_watch};
