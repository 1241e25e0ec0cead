//! Firmware upgrade: version parsing and the upgrade run itself.

pub mod orchestrator;
pub mod version;

pub use orchestrator::{
    BATTERY_THRESHOLD, FirmwareImages, FirmwareUpgrade, NEW_PROTOCOL_BSP, StepOutcome,
    TerminalCommand, UpgradePlan, UpgradeReport, UpgradeState, UpgradeThresholds,
};
pub use version::{
    DeviceInfo, DeviceVersions, NumericField, parse_battery, parse_bsp_version,
    parse_component_version,
};
