//! Device status command.

use anyhow::{Context, Result};
use console::style;
use pixerlink::{Device, DeviceInfo, NumericField};
use serde_json::json;

use crate::config::Config;
use crate::{Cli, CliError};

/// Status command implementation.
pub(crate) fn cmd_status(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let tcp = super::tcp_config(cli, config);
    let target = tcp.address();

    if !cli.quiet && !json {
        eprintln!("{} Connecting to {target}", style("🔌").cyan());
    }

    let status = Device::new(tcp)
        .check_status()
        .with_context(|| format!("Failed to query {target}"))?;

    let Some(info) = status.info.as_ref().filter(|_| status.is_ready()) else {
        return Err(CliError::Device(format!(
            "Device at {target} did not answer the greeting (got {})",
            status.hello.as_deref().map_or_else(|| "nothing".to_string(), |h| format!("'{h}'"))
        ))
        .into());
    };

    if json {
        let output = json!({
            "ok": true,
            "data": {
                "target": target,
                "hello": status.hello,
                "battery": field_json(info.battery_level.as_deref(), info.battery),
                "ble": field_json(info.ble_version.as_deref(), info.versions.ble),
                "ite": field_json(info.ite_version.as_deref(), info.versions.ite),
                "mcu": field_json(info.mcu_version.as_deref(), info.versions.bsp),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    print_info(&target, info, config.thresholds().battery);
    Ok(())
}

fn field_json(raw: Option<&str>, parsed: NumericField) -> serde_json::Value {
    json!({
        "raw": raw.map(str::trim),
        "value": parsed.value(),
        "parsed": !parsed.is_fallback(),
    })
}

fn print_info(target: &str, info: &DeviceInfo, battery_threshold: u32) {
    println!("{}", style(format!("Device {target}")).bold().underlined());

    let battery = info.battery.value();
    let battery_text = format!("{battery}%");
    let battery_styled = if battery <= battery_threshold {
        style(battery_text).red()
    } else {
        style(battery_text).green()
    };
    println!("  {:<9}{battery_styled}", "Battery:");

    for (label, raw, parsed) in [
        ("BLE:", info.ble_version.as_deref(), info.versions.ble),
        ("ITE:", info.ite_version.as_deref(), info.versions.ite),
        ("MCU:", info.mcu_version.as_deref(), info.versions.bsp),
    ] {
        let raw = raw.map_or("-", str::trim);
        let number = if parsed.is_fallback() {
            style("unparsed".to_string()).yellow()
        } else {
            style(parsed.value().to_string()).dim()
        };
        println!("  {label:<9}{raw} ({number})");
    }
}
