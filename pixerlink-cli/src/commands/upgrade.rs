//! Firmware upgrade command.
//!
//! Firmware files are resolved from flags, then the `[firmware]` config
//! section, then the default file names in the current directory. A default
//! file that does not exist just skips that component; an explicitly named
//! one must exist.

use {
    crate::{
        Cli, CliError,
        config::{Config, DEFAULT_BLE_BIN, DEFAULT_BSP_BIN, DEFAULT_ITE_BIN},
        use_fancy_output,
    },
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, theme::ColorfulTheme},
    indicatif::{ProgressBar, ProgressStyle},
    log::{debug, warn},
    pixerlink::{Device, FirmwareImages, StepOutcome, UpgradeReport},
    serde_json::json,
    std::{
        fs,
        io::IsTerminal,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// A firmware file and whether the user named it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FirmwareFile {
    pub(crate) path: PathBuf,
    pub(crate) explicit: bool,
}

impl FirmwareFile {
    fn resolve(flag: Option<&Path>, configured: Option<&PathBuf>, default: &str) -> Self {
        match flag.map(Path::to_path_buf).or_else(|| configured.cloned()) {
            Some(path) => Self {
                path,
                explicit: true,
            },
            None => Self {
                path: PathBuf::from(default),
                explicit: false,
            },
        }
    }

    fn load(&self, component: &str) -> Result<Option<Vec<u8>>> {
        if !self.path.exists() {
            if self.explicit {
                return Err(CliError::Usage(format!(
                    "{component} firmware file '{}' not found",
                    self.path.display()
                ))
                .into());
            }
            warn!(
                "{component} firmware '{}' not found, skipping {component}",
                self.path.display()
            );
            return Ok(None);
        }

        let data = fs::read(&self.path).with_context(|| {
            format!(
                "Failed to read {component} firmware {}",
                self.path.display()
            )
        })?;
        debug!(
            "Loaded {component} firmware {} ({} bytes)",
            self.path.display(),
            data.len()
        );
        Ok(Some(data))
    }
}

/// Firmware files for one upgrade run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FirmwareFiles {
    pub(crate) ble: FirmwareFile,
    pub(crate) ite: FirmwareFile,
    pub(crate) bsp: FirmwareFile,
}

impl FirmwareFiles {
    /// Resolve file locations: flag, then config, then default name.
    pub(crate) fn resolve(
        config: &Config,
        ble: Option<&Path>,
        ite: Option<&Path>,
        bsp: Option<&Path>,
    ) -> Self {
        Self {
            ble: FirmwareFile::resolve(ble, config.firmware.ble.as_ref(), DEFAULT_BLE_BIN),
            ite: FirmwareFile::resolve(ite, config.firmware.ite.as_ref(), DEFAULT_ITE_BIN),
            bsp: FirmwareFile::resolve(bsp, config.firmware.bsp.as_ref(), DEFAULT_BSP_BIN),
        }
    }

    /// Read every available file.
    pub(crate) fn load(&self) -> Result<FirmwareImages> {
        let mut images = FirmwareImages::default();
        if let Some(data) = self.ble.load("BLE")? {
            images = images.with_ble(data);
        }
        if let Some(data) = self.ite.load("ITE")? {
            images = images.with_ite(data);
        }
        if let Some(data) = self.bsp.load("BSP")? {
            images = images.with_bsp(data);
        }
        Ok(images)
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "Confirmation needs an interactive terminal, pass --yes to skip it".to_string(),
        )
        .into())
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Upgrade cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("Prompt failed: {io_err}")).into()
            }
        },
    }
}

fn confirm_upgrade(cli: &Cli, target: &str, yes: bool) -> Result<()> {
    if yes {
        return Ok(());
    }
    // Non-interactive mode must never prompt
    if cli.non_interactive {
        return Err(CliError::Usage(
            "Refusing to upgrade without --yes in non-interactive mode".to_string(),
        )
        .into());
    }
    ensure_interactive_terminal()?;

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!(
            "Upgrade firmware on {target}? Keep the device powered until it finishes"
        ))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(())
    } else {
        Err(CliError::Cancelled("Upgrade cancelled".to_string()).into())
    }
}

/// Upgrade command implementation.
pub(crate) fn cmd_upgrade(
    cli: &Cli,
    config: &Config,
    files: &FirmwareFiles,
    yes: bool,
    json: bool,
) -> Result<()> {
    let images = files.load()?;
    if images.is_empty() {
        return Err(CliError::Usage(format!(
            "No firmware files found; place {DEFAULT_BLE_BIN}, {DEFAULT_ITE_BIN} or \
             {DEFAULT_BSP_BIN} in the current directory or pass --ble/--ite/--bsp"
        ))
        .into());
    }

    let tcp = super::tcp_config(cli, config);
    let target = tcp.address();

    if !cli.quiet && !json {
        eprintln!("{} Firmware images:", style("📦").cyan());
        for (name, file, data) in [
            ("BLE", &files.ble, &images.ble),
            ("ITE", &files.ite, &images.ite),
            ("BSP", &files.bsp, &images.bsp),
        ] {
            if let Some(data) = data {
                eprintln!(
                    "    {} {name}: {} ({} bytes)",
                    style("•").dim(),
                    file.path.display(),
                    data.len()
                );
            }
        }
    }

    confirm_upgrade(cli, &target, yes)?;

    let spinner = if cli.quiet || json || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.set_message(format!("Upgrading {target}"));
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    };

    let result = Device::new(tcp).upgrade_firmware(&images, &config.thresholds());
    spinner.finish_and_clear();
    let report = result.with_context(|| format!("Firmware upgrade on {target} failed"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report_json(&target, &report))?);
    } else {
        print_report(cli, &report);
    }

    if report.ask_charge {
        return Err(CliError::Device(format!(
            "Battery at {}%, charge the device above {}% and run the upgrade again",
            report.info.battery.value(),
            config.thresholds().battery
        ))
        .into());
    }
    if report.has_failures() {
        anyhow::bail!("One or more firmware pushes failed");
    }
    Ok(())
}

fn outcome_json(outcome: &StepOutcome) -> serde_json::Value {
    match outcome {
        StepOutcome::Skipped => json!({ "status": "skipped" }),
        StepOutcome::Pushed => json!({ "status": "pushed" }),
        StepOutcome::Failed(reason) => json!({ "status": "failed", "reason": reason }),
    }
}

fn report_json(target: &str, report: &UpgradeReport) -> serde_json::Value {
    json!({
        "ok": !report.ask_charge && !report.has_failures(),
        "data": {
            "target": target,
            "hello": report.hello,
            "battery": report.info.battery.value(),
            "ask_charge": report.ask_charge,
            "versions": {
                "ble": report.info.versions.ble.value(),
                "ite": report.info.versions.ite.value(),
                "bsp": report.info.versions.bsp.value(),
            },
            "steps": {
                "ite": outcome_json(&report.ite),
                "ble": outcome_json(&report.ble),
                "bsp": outcome_json(&report.bsp),
                "ota_info": outcome_json(&report.ota_info),
            },
            "bsp_target": report.bsp_target,
            "refreshed_ite": report.refreshed_ite,
            "refreshed_ble": report.refreshed_ble,
            "terminal": report.terminal.map(|t| format!("{t:?}").to_lowercase()),
            "states": report.states.iter().map(|s| format!("{s:?}")).collect::<Vec<_>>(),
        }
    })
}

fn print_report(cli: &Cli, report: &UpgradeReport) {
    if report.ask_charge {
        eprintln!(
            "{} Battery at {}%, please charge the device first",
            style("🔋").yellow(),
            report.info.battery.value()
        );
        return;
    }
    if cli.quiet {
        return;
    }

    if !report.plan.any() {
        eprintln!("{} Firmware is up to date", style("✓").green());
        return;
    }

    for (name, outcome) in [
        ("ITE", &report.ite),
        ("BLE", &report.ble),
        ("BSP", &report.bsp),
        ("OTA info", &report.ota_info),
    ] {
        let marker = match outcome {
            StepOutcome::Skipped => style("-").dim(),
            StepOutcome::Pushed => style("✓").green(),
            StepOutcome::Failed(_) => style("✗").red(),
        };
        eprintln!("    {marker} {name}: {outcome}");
    }
    if let Some(slot) = report.bsp_target {
        eprintln!("    {} BSP written to {slot}", style("•").dim());
    }
    if let Some(version) = &report.refreshed_ite {
        eprintln!("    {} ITE now reports {}", style("•").dim(), version.trim());
    }
    if let Some(version) = &report.refreshed_ble {
        eprintln!("    {} BLE now reports {}", style("•").dim(), version.trim());
    }
    if let Some(terminal) = report.terminal {
        eprintln!(
            "{} Sent {terminal:?} to the device, it will apply the update",
            style("🔄").cyan()
        );
    }
    if !report.has_failures() {
        eprintln!("\n{} Upgrade completed", style("🎉").green().bold());
    }
}
