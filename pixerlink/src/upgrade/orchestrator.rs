//! Multi-component firmware upgrade.
//!
//! One run over one connection:
//!
//! ```text
//! Connecting -> Querying -> Deciding -+-> UpdatingIte -> UpdatingBle -> UpdatingBsp
//!                                     |        -> SendingOtaInfo? -> Finalizing -+
//!                                     |                                          |
//!                                     +---- battery too low --------------------+-> Closed
//! ```
//!
//! The component order matters to the device: ITE first, then BLE, then the
//! main board image, then the OTA marker, then at most one power command.

use crate::error::{Error, Result};
use crate::port::{Connect, Port};
use crate::protocol::command::{Command, HELLO_REPLY, exchange};
use crate::protocol::transfer::{FileTransfer, FileTransferConfig};
use crate::upgrade::version::{DeviceInfo, DeviceVersions};
use log::{debug, error, info, warn};
use std::fmt;

/// Battery percentage at or below which no upgrade is attempted.
pub const BATTERY_THRESHOLD: u32 = 15;

/// Board versions from here on apply component updates without a power cycle.
pub const NEW_PROTOCOL_BSP: u32 = 1_700_000;

/// Device path for the ITE image.
pub const ITE_TARGET_PATH: &str = "ite_new.bin";

/// Device path for the BLE image.
pub const BLE_TARGET_PATH: &str = "ble_new.bin";

/// Default board image slot.
pub const MCU_IMAGE_PRIMARY: &str = "/sys/mcuimg2.bin";

/// Board image slot used when the device reports slot `1` active.
pub const MCU_IMAGE_ALTERNATE: &str = "/sys/mcuimg3.bin";

/// Marker file asking the bootloader to apply staged component images.
pub const OTA_INFO_PATH: &str = "ota_info.bin";

/// Contents of [`OTA_INFO_PATH`].
pub const OTA_INFO_PAYLOAD: [u8; 4] = [1, 0, 0, 0];

/// Minimum versions a device must report to be left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeThresholds {
    /// BLE version number.
    pub ble: u32,
    /// ITE version number.
    pub ite: u32,
    /// Board version number.
    pub bsp: u32,
    /// Battery percentage that must be exceeded.
    pub battery: u32,
}

impl Default for UpgradeThresholds {
    fn default() -> Self {
        Self {
            ble: 14,
            ite: 35,
            bsp: 1_702_061,
            battery: BATTERY_THRESHOLD,
        }
    }
}

/// Firmware binaries available for this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirmwareImages {
    /// BLE radio image.
    pub ble: Option<Vec<u8>>,
    /// ITE co-processor image.
    pub ite: Option<Vec<u8>>,
    /// Main board image.
    pub bsp: Option<Vec<u8>>,
}

impl FirmwareImages {
    /// Set the BLE image.
    #[must_use]
    pub fn with_ble(mut self, data: Vec<u8>) -> Self {
        self.ble = Some(data);
        self
    }

    /// Set the ITE image.
    #[must_use]
    pub fn with_ite(mut self, data: Vec<u8>) -> Self {
        self.ite = Some(data);
        self
    }

    /// Set the board image.
    #[must_use]
    pub fn with_bsp(mut self, data: Vec<u8>) -> Self {
        self.bsp = Some(data);
        self
    }

    /// Whether no image is available at all.
    pub fn is_empty(&self) -> bool {
        self.ble.is_none() && self.ite.is_none() && self.bsp.is_none()
    }
}

/// What a run intends to do, and what it turned out to need afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpgradePlan {
    /// Push the ITE image.
    pub need_ite: bool,
    /// Push the BLE image.
    pub need_ble: bool,
    /// Push the board image.
    pub need_bsp: bool,
    /// A power command must end the run.
    pub reboot_required: bool,
    /// The OTA marker must be written.
    pub ota_info_required: bool,
}

impl UpgradePlan {
    /// Compare the device against the thresholds.
    ///
    /// A component is only scheduled when its image is available.
    pub fn decide(
        versions: &DeviceVersions,
        thresholds: &UpgradeThresholds,
        images: &FirmwareImages,
    ) -> Self {
        Self {
            need_ite: needs_update("ITE", versions.ite.value(), thresholds.ite, images.ite.is_some()),
            need_ble: needs_update("BLE", versions.ble.value(), thresholds.ble, images.ble.is_some()),
            need_bsp: needs_update("BSP", versions.bsp.value(), thresholds.bsp, images.bsp.is_some()),
            reboot_required: false,
            ota_info_required: false,
        }
    }

    /// Whether any component is scheduled.
    pub fn any(&self) -> bool {
        self.need_ite || self.need_ble || self.need_bsp
    }
}

fn needs_update(name: &str, current: u32, target: u32, available: bool) -> bool {
    if current >= target {
        debug!("{name} upgrade not needed: {current} >= {target}");
        false
    } else if !available {
        warn!("{name} upgrade needed ({current} < {target}) but no image was provided");
        false
    } else {
        info!("{name} upgrade needed: {current} -> {target}");
        true
    }
}

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// Opening the connection.
    Connecting,
    /// Greeting and status queries.
    Querying,
    /// Battery gate and version comparison.
    Deciding,
    /// Pushing the ITE image.
    UpdatingIte,
    /// Pushing the BLE image.
    UpdatingBle,
    /// Pushing the board image.
    UpdatingBsp,
    /// Writing the OTA marker.
    SendingOtaInfo,
    /// Sending the power command, if any.
    Finalizing,
    /// Connection released.
    Closed,
}

/// Result of one push step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StepOutcome {
    /// Not attempted.
    #[default]
    Skipped,
    /// The device confirmed the file.
    Pushed,
    /// The push was attempted and failed; the run went on.
    Failed(String),
}

impl StepOutcome {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Pushed,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    /// Whether the step pushed its file.
    pub fn is_pushed(&self) -> bool {
        matches!(self, Self::Pushed)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => f.write_str("skipped"),
            Self::Pushed => f.write_str("pushed"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Power command that ends a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalCommand {
    /// Power off; older boards apply staged images on the next boot.
    Off,
    /// Reboot.
    Reset,
}

impl TerminalCommand {
    /// Command to put on the wire.
    pub fn command(self) -> Command {
        match self {
            Self::Off => Command::Off,
            Self::Reset => Command::Reset,
        }
    }
}

/// Record of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    /// States visited, in order.
    pub states: Vec<UpgradeState>,
    /// Reply to the greeting.
    pub hello: String,
    /// Status replies and parsed values.
    pub info: DeviceInfo,
    /// The battery was too low; nothing was pushed.
    pub ask_charge: bool,
    /// Decisions made for this run.
    pub plan: UpgradePlan,
    /// ITE push.
    pub ite: StepOutcome,
    /// BLE push.
    pub ble: StepOutcome,
    /// Board image push.
    pub bsp: StepOutcome,
    /// Slot the board image was written to.
    pub bsp_target: Option<&'static str>,
    /// OTA marker push.
    pub ota_info: StepOutcome,
    /// ITE version reported after the update.
    pub refreshed_ite: Option<String>,
    /// BLE version reported after the update.
    pub refreshed_ble: Option<String>,
    /// Power command sent, if any.
    pub terminal: Option<TerminalCommand>,
}

impl UpgradeReport {
    fn new(hello: String, info: DeviceInfo) -> Self {
        Self {
            states: vec![UpgradeState::Querying],
            hello,
            info,
            ask_charge: false,
            plan: UpgradePlan::default(),
            ite: StepOutcome::Skipped,
            ble: StepOutcome::Skipped,
            bsp: StepOutcome::Skipped,
            bsp_target: None,
            ota_info: StepOutcome::Skipped,
            refreshed_ite: None,
            refreshed_ble: None,
            terminal: None,
        }
    }

    /// Whether any push step failed.
    pub fn has_failures(&self) -> bool {
        [&self.ite, &self.ble, &self.bsp, &self.ota_info]
            .iter()
            .any(|s| matches!(s, StepOutcome::Failed(_)))
    }
}

/// Firmware upgrade runner.
pub struct FirmwareUpgrade<'a> {
    images: &'a FirmwareImages,
    thresholds: UpgradeThresholds,
    transfer: FileTransferConfig,
}

impl<'a> FirmwareUpgrade<'a> {
    /// Runner with default thresholds and transfer settings.
    pub fn new(images: &'a FirmwareImages) -> Self {
        Self {
            images,
            thresholds: UpgradeThresholds::default(),
            transfer: FileTransferConfig::default(),
        }
    }

    /// Set the version thresholds.
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: UpgradeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the file push settings.
    #[must_use]
    pub fn with_transfer_config(mut self, transfer: FileTransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Connect, run the upgrade, and close the connection on every path.
    ///
    /// Fails when the device cannot be reached or does not answer the
    /// greeting. Failed pushes are recorded in the report instead.
    pub fn run<C: Connect>(&self, connector: &C) -> Result<UpgradeReport> {
        info!("Starting firmware upgrade on {}", connector.target());
        debug!(
            "Thresholds - BLE: {}, ITE: {}, BSP: {}, battery: {}%",
            self.thresholds.ble, self.thresholds.ite, self.thresholds.bsp, self.thresholds.battery
        );

        let mut port = connector.connect()?;
        info!("Connection established");

        let result = self.run_on(&mut port);

        if let Err(e) = port.close() {
            debug!("Error closing connection: {e}");
        }
        debug!("Connection closed");

        let mut report = result?;
        report.states.insert(0, UpgradeState::Connecting);
        report.states.push(UpgradeState::Closed);
        info!("Firmware upgrade process completed");
        Ok(report)
    }

    /// Run the upgrade on an already open port. The port is left open.
    pub fn run_on<P: Port + ?Sized>(&self, port: &mut P) -> Result<UpgradeReport> {
        let exchange_config = self.transfer.exchange;

        let hello = exchange(port, Command::Test.as_bytes(), &exchange_config).ok_or_else(|| {
            error!("No response to '{}', device may not be responding", Command::Test);
            Error::Handshake(format!("no response to '{}'", Command::Test))
        })?;
        if hello == HELLO_REPLY {
            debug!("Received expected greeting");
        } else if hello.len() > HELLO_REPLY.len() {
            debug!("Received mixed greeting '{hello}', continuing");
        } else {
            warn!("Unexpected greeting '{hello}', continuing anyway");
        }

        let info = DeviceInfo::query(port, &exchange_config);
        let versions = info.versions;
        let battery = info.battery.value();
        let bsp = versions.bsp.value();

        let mut report = UpgradeReport::new(hello, info);
        report.states.push(UpgradeState::Deciding);

        if battery <= self.thresholds.battery {
            warn!(
                "Battery level too low ({battery}% <= {}%), skipping upgrade",
                self.thresholds.battery
            );
            report.ask_charge = true;
            return Ok(report);
        }

        let mut plan = UpgradePlan::decide(&versions, &self.thresholds, self.images);

        if let (true, Some(data)) = (plan.need_ite, self.images.ite.as_deref()) {
            report.states.push(UpgradeState::UpdatingIte);
            report.ite = self.push(port, ITE_TARGET_PATH, data);
            if report.ite.is_pushed() {
                report.refreshed_ite = self.after_component_update(
                    port,
                    bsp,
                    Command::IteVersionRefresh,
                    &mut plan,
                );
            }
        }

        if let (true, Some(data)) = (plan.need_ble, self.images.ble.as_deref()) {
            report.states.push(UpgradeState::UpdatingBle);
            report.ble = self.push(port, BLE_TARGET_PATH, data);
            if report.ble.is_pushed() {
                report.refreshed_ble = self.after_component_update(
                    port,
                    bsp,
                    Command::BleVersionRefresh,
                    &mut plan,
                );
            }
        }

        if let (true, Some(data)) = (plan.need_bsp, self.images.bsp.as_deref()) {
            report.states.push(UpgradeState::UpdatingBsp);
            let slot = exchange(port, Command::McuImage.as_bytes(), &exchange_config)
                .unwrap_or_else(|| "0".to_string());
            let target = if bsp > NEW_PROTOCOL_BSP && slot.trim() == "1" {
                MCU_IMAGE_ALTERNATE
            } else {
                MCU_IMAGE_PRIMARY
            };
            debug!("Board image target: {target} (BSP {bsp}, slot '{}')", slot.trim());

            report.bsp_target = Some(target);
            report.bsp = self.push(port, target, data);
            if report.bsp.is_pushed() {
                plan.reboot_required = true;
            }
        }

        if plan.ota_info_required {
            report.states.push(UpgradeState::SendingOtaInfo);
            report.ota_info = self.push(port, OTA_INFO_PATH, &OTA_INFO_PAYLOAD);
        }

        report.states.push(UpgradeState::Finalizing);
        if plan.reboot_required {
            let terminal = if bsp < NEW_PROTOCOL_BSP {
                TerminalCommand::Off
            } else {
                TerminalCommand::Reset
            };
            info!("Sending '{}'", terminal.command());
            let reply = exchange(port, terminal.command().as_bytes(), &exchange_config);
            debug!("'{}' reply: {}", terminal.command(), reply.as_deref().unwrap_or("none"));
            report.terminal = Some(terminal);
        } else {
            debug!("No reboot needed");
        }

        report.plan = plan;
        Ok(report)
    }

    fn push<P: Port + ?Sized>(&self, port: &mut P, path: &str, data: &[u8]) -> StepOutcome {
        let result = FileTransfer::with_config(port, self.transfer.clone()).push(path, data);
        StepOutcome::from_result(result)
    }

    /// Newer boards report the new version right away; older ones need the
    /// OTA marker and a power cycle.
    fn after_component_update<P: Port + ?Sized>(
        &self,
        port: &mut P,
        bsp: u32,
        refresh: Command,
        plan: &mut UpgradePlan,
    ) -> Option<String> {
        if bsp >= NEW_PROTOCOL_BSP {
            let version = exchange(port, refresh.as_bytes(), &self.transfer.exchange);
            info!("Updated version: {}", version.as_deref().unwrap_or("unknown"));
            version
        } else {
            debug!("BSP {bsp} < {NEW_PROTOCOL_BSP}, marking for reboot and OTA");
            plan.reboot_required = true;
            plan.ota_info_required = true;
            None
        }
    }
}
