//! Version and battery parsing.
//!
//! Device replies are free text. Each numeric field is either parsed or falls
//! back to zero, which sorts below every threshold and so forces an upgrade
//! attempt rather than skipping one.

use crate::port::Port;
use crate::protocol::command::{Command, ExchangeConfig, exchange};
use log::{debug, info, warn};
use std::fmt;

/// A numeric field read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericField {
    /// The reply parsed cleanly.
    Parsed(u32),
    /// The reply was missing or malformed; treated as `0`.
    Fallback,
}

impl NumericField {
    /// Numeric value, `0` for [`NumericField::Fallback`].
    pub fn value(self) -> u32 {
        match self {
            Self::Parsed(v) => v,
            Self::Fallback => 0,
        }
    }

    /// Whether the fallback was applied.
    pub fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback)
    }

    fn parse(text: &str) -> Self {
        text.trim().parse().map_or(Self::Fallback, Self::Parsed)
    }
}

impl fmt::Display for NumericField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// Component version number: third `.` field of `"major.minor.build"`.
pub fn parse_component_version(raw: &str) -> NumericField {
    match raw.split('.').nth(2) {
        Some(field) => NumericField::parse(field),
        None => NumericField::Fallback,
    }
}

/// Board version number: second `_` field of `"model_date_rev"`, hyphens
/// removed, so `"X_2023-10-01_7"` becomes `20231001`.
pub fn parse_bsp_version(raw: &str) -> NumericField {
    match raw.split('_').nth(1) {
        Some(field) => NumericField::parse(&field.replace('-', "")),
        None => NumericField::Fallback,
    }
}

/// Battery percentage.
pub fn parse_battery(raw: &str) -> NumericField {
    NumericField::parse(raw)
}

/// Parsed version numbers of the three components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceVersions {
    /// BLE radio.
    pub ble: NumericField,
    /// ITE co-processor.
    pub ite: NumericField,
    /// Main board.
    pub bsp: NumericField,
}

/// Raw replies to the status queries plus their parsed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Reply to `bleVersion`.
    pub ble_version: Option<String>,
    /// Reply to `iteVersion`.
    pub ite_version: Option<String>,
    /// Reply to `mcuVersion`.
    pub mcu_version: Option<String>,
    /// Reply to `batteryLevel`.
    pub battery_level: Option<String>,
    /// Parsed component versions.
    pub versions: DeviceVersions,
    /// Parsed battery percentage.
    pub battery: NumericField,
}

impl DeviceInfo {
    /// Build from raw replies, `None` meaning the device did not answer.
    pub fn from_replies(
        ble_version: Option<String>,
        ite_version: Option<String>,
        mcu_version: Option<String>,
        battery_level: Option<String>,
    ) -> Self {
        let versions = DeviceVersions {
            ble: parse_or_warn("BLE", ble_version.as_deref(), parse_component_version),
            ite: parse_or_warn("ITE", ite_version.as_deref(), parse_component_version),
            bsp: parse_or_warn("MCU", mcu_version.as_deref(), parse_bsp_version),
        };
        let battery = parse_or_warn("battery", battery_level.as_deref(), parse_battery);

        Self {
            ble_version,
            ite_version,
            mcu_version,
            battery_level,
            versions,
            battery,
        }
    }

    /// Run the four status queries on an open port.
    pub fn query<P: Port + ?Sized>(port: &mut P, config: &ExchangeConfig) -> Self {
        debug!("Querying device versions and battery level");
        let ble = exchange(port, Command::BleVersion.as_bytes(), config);
        let ite = exchange(port, Command::IteVersion.as_bytes(), config);
        let mcu = exchange(port, Command::McuVersion.as_bytes(), config);
        let battery = exchange(port, Command::BatteryLevel.as_bytes(), config);

        let info = Self::from_replies(ble, ite, mcu, battery);
        info!(
            "Device info - BLE: {}, ITE: {}, MCU: {}, Battery: {}%",
            info.versions.ble, info.versions.ite, info.versions.bsp, info.battery
        );
        info
    }
}

fn parse_or_warn(what: &str, reply: Option<&str>, parse: fn(&str) -> NumericField) -> NumericField {
    let Some(reply) = reply else {
        warn!("No {what} reply, assuming 0");
        return NumericField::Fallback;
    };
    let field = parse(reply);
    if field.is_fallback() {
        warn!("Failed to parse {what} reply '{reply}', assuming 0");
    }
    field
}
