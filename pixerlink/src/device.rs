//! Top-level device operations.
//!
//! Each operation opens its own connection, runs, and closes it again.
//! Operations against the same address are serialized within the process, so
//! two callers never interleave commands on one device.

use crate::error::Result;
use crate::image::ImageFrame;
use crate::port::{Connect, Port, TcpConfig};
use crate::protocol::command::{Command, HELLO_REPLY, exchange};
use crate::protocol::transfer::{FileTransferConfig, push_image};
use crate::upgrade::{
    DeviceInfo, FirmwareImages, FirmwareUpgrade, UpgradeReport, UpgradeThresholds,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Result of a status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Reply to the greeting, `None` if the device stayed silent.
    pub hello: Option<String>,
    /// Versions and battery, queried only after a proper greeting.
    pub info: Option<DeviceInfo>,
}

impl DeviceStatus {
    /// Whether the device answered the greeting as expected.
    pub fn is_ready(&self) -> bool {
        self.hello.as_deref() == Some(HELLO_REPLY)
    }

    /// Battery percentage, if it was read.
    pub fn battery(&self) -> Option<u32> {
        self.info.as_ref().map(|i| i.battery.value())
    }
}

/// A device reachable through a [`Connect`] implementation.
#[derive(Debug, Clone)]
pub struct Device<C: Connect = TcpConfig> {
    connector: C,
    transfer: FileTransferConfig,
}

impl Device<TcpConfig> {
    /// Device at `host:port` with the default connection policy.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(TcpConfig::new(host, port))
    }
}

impl<C: Connect> Device<C> {
    /// Device behind `connector`.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            transfer: FileTransferConfig::default(),
        }
    }

    /// Set the file push settings used by upgrades.
    #[must_use]
    pub fn with_transfer_config(mut self, transfer: FileTransferConfig) -> Self {
        self.transfer = transfer;
        self
    }

    /// Connection settings.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Greet the device and, if it answers properly, read versions and battery.
    pub fn check_status(&self) -> Result<DeviceStatus> {
        self.with_connection("status", |port, transfer| {
            let hello = exchange(port, Command::Test.as_bytes(), &transfer.exchange);
            let info = if hello.as_deref() == Some(HELLO_REPLY) {
                Some(DeviceInfo::query(port, &transfer.exchange))
            } else {
                warn!("Device did not greet ({hello:?}), skipping status queries");
                None
            };
            Ok(DeviceStatus { hello, info })
        })
    }

    /// Push an encoded image. `progress` receives `(bytes_sent, total)`.
    pub fn upload_image<F>(&self, frame: &ImageFrame, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        let bytes = frame.to_bytes();
        self.with_connection("image upload", |port, _| push_image(port, &bytes, progress))
    }

    /// Reboot the device. Returns whether the command was sent, which only
    /// happens after a proper greeting.
    pub fn reset(&self) -> Result<bool> {
        self.with_connection("reset", |port, transfer| {
            let hello = exchange(port, Command::Test.as_bytes(), &transfer.exchange);
            if hello.as_deref() != Some(HELLO_REPLY) {
                warn!("Device did not greet ({hello:?}), not resetting");
                return Ok(false);
            }
            let reply = exchange(port, Command::Reset.as_bytes(), &transfer.exchange);
            debug!("'{}' reply: {}", Command::Reset, reply.as_deref().unwrap_or("none"));
            info!("Reset sent");
            Ok(true)
        })
    }

    /// Run a firmware upgrade.
    pub fn upgrade_firmware(
        &self,
        images: &FirmwareImages,
        thresholds: &UpgradeThresholds,
    ) -> Result<UpgradeReport> {
        let target = self.connector.target();
        let lease = lease_for(&target);
        let _held = lease.lock().unwrap_or_else(PoisonError::into_inner);

        FirmwareUpgrade::new(images)
            .with_thresholds(*thresholds)
            .with_transfer_config(self.transfer.clone())
            .run(&self.connector)
    }

    fn with_connection<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnOnce(&mut C::Port, &FileTransferConfig) -> Result<T>,
    {
        let target = self.connector.target();
        let lease = lease_for(&target);
        let _held = lease.lock().unwrap_or_else(PoisonError::into_inner);

        debug!("Starting {what} on {target}");
        let mut port = self.connector.connect()?;
        let result = op(&mut port, &self.transfer);
        if let Err(e) = port.close() {
            debug!("Error closing {target}: {e}");
        }
        result
    }
}

/// Per-address lock shared by every [`Device`] in the process.
fn lease_for(target: &str) -> Arc<Mutex<()>> {
    static LEASES: OnceLock<Mutex<HashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();

    let mut leases = LEASES
        .get_or_init(Mutex::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(leases.entry(target.to_string()).or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::FRAME_HEADER;
    use crate::port::sim::{SimConnector, SimDevice};
    use crate::protocol::transfer::IMAGE_TAIL;
    use crate::upgrade::TerminalCommand;
    use std::thread;
    use std::time::Duration;

    fn sim_device(sim: &SimDevice, target: &str) -> Device<SimConnector> {
        Device::new(SimConnector::new(sim.clone()).with_target(target))
    }

    fn greeting_device() -> SimDevice {
        SimDevice::new()
            .with_reply("#TEST#", "Hello PC!")
            .with_reply("bleVersion", "2.0.14")
            .with_reply("iteVersion", "1.0.35")
            .with_reply("mcuVersion", "PX_1702061_2")
            .with_reply("batteryLevel", "72")
    }

    #[test]
    fn test_status_reads_versions_after_greeting() {
        let sim = greeting_device();
        let status = sim_device(&sim, "status-ok").check_status().unwrap();

        assert!(status.is_ready());
        assert_eq!(status.battery(), Some(72));
        let info = status.info.unwrap();
        assert_eq!(info.versions.ble.value(), 14);
        assert_eq!(info.mcu_version.as_deref(), Some("PX_1702061_2"));
        assert_eq!(sim.close_count(), 1);
    }

    #[test]
    fn test_status_without_greeting_skips_queries() {
        let sim = SimDevice::new().with_reply("#TEST#", "busy");
        let status = sim_device(&sim, "status-busy").check_status().unwrap();

        assert!(!status.is_ready());
        assert_eq!(status.hello.as_deref(), Some("busy"));
        assert_eq!(status.info, None);
        assert_eq!(status.battery(), None);
        assert_eq!(sim.transcript(), vec!["#TEST#"]);
    }

    #[test]
    fn test_status_unreachable() {
        let mut connector = SimConnector::new(SimDevice::new()).with_target("status-down");
        connector.reachable = false;
        assert!(Device::new(connector).check_status().is_err());
    }

    #[test]
    fn test_upload_image_writes_frame_and_tail() {
        let sim = SimDevice::new();
        let frame = ImageFrame::from_luma(4, 2, &[0xFF; 8]);
        let mut last = (0, 0);

        sim_device(&sim, "upload")
            .upload_image(&frame, |sent, total| last = (sent, total))
            .unwrap();

        let written = sim.written_bytes();
        assert!(written.starts_with(FRAME_HEADER));
        assert!(written.ends_with(IMAGE_TAIL));
        assert_eq!(written.len(), FRAME_HEADER.len() + 4 + IMAGE_TAIL.len());
        assert_eq!(last, (frame.len(), frame.len()));
        assert_eq!(sim.close_count(), 1);
    }

    #[test]
    fn test_reset_after_greeting() {
        let sim = SimDevice::new()
            .with_reply("#TEST#", "Hello PC!")
            .with_reply("reset", "rebooting");
        assert!(sim_device(&sim, "reset-ok").reset().unwrap());
        assert_eq!(sim.transcript(), vec!["#TEST#", "reset"]);
        assert_eq!(sim.pending_reads(), 0);
    }

    #[test]
    fn test_reset_refused_without_greeting() {
        let sim = SimDevice::new();
        assert!(!sim_device(&sim, "reset-silent").reset().unwrap());
        assert_eq!(sim.transcript(), vec!["#TEST#"]);
        assert_eq!(sim.close_count(), 1);
    }

    #[test]
    fn test_upgrade_through_device() {
        let sim = SimDevice::new()
            .with_reply("#TEST#", "Hello PC!")
            .with_reply("bleVersion", "2.0.13")
            .with_reply("iteVersion", "1.0.35")
            .with_reply("mcuVersion", "PX_1702061_2")
            .with_reply("batteryLevel", "50")
            .with_reply("bleversion", "2.0.14");
        let device = sim_device(&sim, "upgrade").with_transfer_config(FileTransferConfig {
            poll_interval: Duration::from_millis(1),
            settle_delay: Duration::ZERO,
            ..Default::default()
        });
        let images = FirmwareImages::default().with_ble(vec![1; 64]);

        let report = device
            .upgrade_firmware(&images, &UpgradeThresholds::default())
            .unwrap();

        assert!(report.ble.is_pushed());
        assert_eq!(report.refreshed_ble.as_deref(), Some("2.0.14"));
        assert_eq!(report.terminal, None::<TerminalCommand>);
        assert_eq!(sim.close_count(), 1);
    }

    #[test]
    fn test_lease_is_shared_per_target() {
        let a = lease_for("lease-a");
        let b = lease_for("lease-a");
        let c = lease_for("lease-c");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_operations_wait_for_the_lease() {
        let sim = greeting_device();
        let device = sim_device(&sim, "lease-wait");

        let lease = lease_for("lease-wait");
        let held = lease.lock().unwrap();

        let worker = thread::spawn(move || device.check_status());
        thread::sleep(Duration::from_millis(50));
        assert!(sim.transcript().is_empty());

        drop(held);
        let status = worker.join().unwrap().unwrap();
        assert!(status.is_ready());
        assert_eq!(sim.transcript().len(), 5);
    }
}
