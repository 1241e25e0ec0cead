//! Device reset command.

use anyhow::{Context, Result};
use console::style;
use pixerlink::Device;

use crate::config::Config;
use crate::{Cli, CliError};

/// Reset command implementation.
pub(crate) fn cmd_reset(cli: &Cli, config: &Config) -> Result<()> {
    let tcp = super::tcp_config(cli, config);
    let target = tcp.address();

    if !cli.quiet {
        eprintln!("{} Resetting {target}", style("🔄").cyan());
    }

    let sent = Device::new(tcp)
        .reset()
        .with_context(|| format!("Failed to reset {target}"))?;
    if !sent {
        return Err(CliError::Device(format!(
            "Device at {target} did not answer the greeting, reset not sent"
        ))
        .into());
    }

    if !cli.quiet {
        eprintln!("{} Reset sent", style("✓").green());
    }
    Ok(())
}
