//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod image;
pub(crate) mod reset;
pub(crate) mod status;
pub(crate) mod upgrade;

use crate::Cli;
use crate::config::Config;
use pixerlink::TcpConfig;

/// Connection settings for this invocation.
pub(crate) fn tcp_config(cli: &Cli, config: &Config) -> TcpConfig {
    config.tcp_config(cli.host.as_deref(), cli.port)
}
