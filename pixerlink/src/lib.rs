//! # pixerlink
//!
//! A library for driving Pixer e-ink devices over their TCP command protocol.
//!
//! This crate provides:
//!
//! - Connection handling with retry and per-read timeouts
//! - Command/response exchange (status queries, power commands)
//! - Image conversion to the panel's packed 4-bit grayscale frame
//! - Firmware file pushes and the multi-component upgrade sequence
//!
//! ## Example
//!
//! ```rust,no_run
//! use pixerlink::{Device, ImageEncoder};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let device = Device::tcp("192.168.1.1", 6000);
//!
//!     let status = device.check_status()?;
//!     if let Some(battery) = status.battery() {
//!         println!("Battery: {battery}%");
//!     }
//!
//!     let frame = ImageEncoder::default().encode_file("cover.png")?;
//!     device.upload_image(&frame, |sent, total| {
//!         println!("Uploading: {sent}/{total}");
//!     })?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod upgrade;

pub use device::{Device, DeviceStatus};
pub use error::{Error, Result};
pub use image::{ImageEncoder, ImageFrame};
pub use port::{Connect, Port, ReadOutcome, TcpConfig, TcpPort};
pub use protocol::{Command, FileTransferConfig};
pub use upgrade::{
    DeviceInfo, FirmwareImages, NumericField, StepOutcome, TerminalCommand, UpgradeReport,
    UpgradeThresholds,
};
