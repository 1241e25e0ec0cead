//! pixerlink CLI - Command-line tool for Pixer e-ink devices.
//!
//! ## Features
//!
//! - Query battery level and firmware versions
//! - Convert and upload images
//! - Multi-component firmware upgrade
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if progress bars and colors should be used.
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// pixerlink - Talk to Pixer e-ink devices over TCP.
///
/// Environment variables:
///   PIXERLINK_HOST              - Device address (default: 192.168.1.1)
///   PIXERLINK_PORT              - Device TCP port (default: 6000)
///   PIXERLINK_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "pixerlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Device host name or IP address.
    #[arg(long, global = true, env = "PIXERLINK_HOST")]
    pub(crate) host: Option<String>,

    /// Device TCP port.
    #[arg(short, long, global = true, env = "PIXERLINK_PORT")]
    pub(crate) port: Option<u16>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "PIXERLINK_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Show battery level and firmware versions.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Convert an image and show it on the device.
    Upload {
        /// Image file (PNG, JPEG, BMP, GIF, WebP).
        image: PathBuf,

        /// Frame width in pixels.
        #[arg(long, default_value_t = pixerlink::image::DEFAULT_WIDTH)]
        width: u32,

        /// Frame height in pixels.
        #[arg(long, default_value_t = pixerlink::image::DEFAULT_HEIGHT)]
        height: u32,
    },

    /// Convert an image to a device frame file without uploading.
    Convert {
        /// Image file (PNG, JPEG, BMP, GIF, WebP).
        image: PathBuf,

        /// Output file for the framed payload.
        #[arg(short, long)]
        output: PathBuf,

        /// Frame width in pixels.
        #[arg(long, default_value_t = pixerlink::image::DEFAULT_WIDTH)]
        width: u32,

        /// Frame height in pixels.
        #[arg(long, default_value_t = pixerlink::image::DEFAULT_HEIGHT)]
        height: u32,
    },

    /// Upgrade BLE, ITE and main board firmware where outdated.
    Upgrade {
        /// BLE firmware file (default: ble.bin).
        #[arg(long, value_name = "FILE")]
        ble: Option<PathBuf>,

        /// ITE firmware file (default: ite.bin).
        #[arg(long, value_name = "FILE")]
        ite: Option<PathBuf>,

        /// Main board firmware file (default: pixer.bin).
        #[arg(long, value_name = "FILE")]
        bsp: Option<PathBuf>,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Output the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Reboot the device.
    Reset,

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// User-facing failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing input.
    #[error("{0}")]
    Usage(String),
    /// The device answered, but not as expected.
    #[error("{0}")]
    Device(String),
    /// The user declined.
    #[error("{0}")]
    Cancelled(String),
}

/// Map an error to the process exit code.
///
/// | code | meaning |
/// |------|---------|
/// | 1    | generic failure |
/// | 2    | usage error |
/// | 3    | configuration error |
/// | 4    | device unreachable or not responding |
/// | 130  | cancelled |
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Device(_) => 4,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<pixerlink::Error>() {
        Some(pixerlink::Error::Config(_)) => 3,
        Some(
            pixerlink::Error::ConnectionFailed { .. }
            | pixerlink::Error::NotConnected
            | pixerlink::Error::Handshake(_),
        ) => 4,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "pixerlink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Status { json } => commands::status::cmd_status(cli, &config, *json),
        Commands::Upload {
            image,
            width,
            height,
        } => commands::image::cmd_upload(cli, &config, image, *width, *height),
        Commands::Convert {
            image,
            output,
            width,
            height,
        } => commands::image::cmd_convert(cli, image, output, *width, *height),
        Commands::Upgrade {
            ble,
            ite,
            bsp,
            yes,
            json,
        } => {
            let files = commands::upgrade::FirmwareFiles::resolve(
                &config,
                ble.as_deref(),
                ite.as_deref(),
                bsp.as_deref(),
            );
            commands::upgrade::cmd_upgrade(cli, &config, &files, *yes, *json)
        },
        Commands::Reset => commands::reset::cmd_reset(cli, &config),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}
