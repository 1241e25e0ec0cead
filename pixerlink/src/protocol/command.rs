//! Command/response exchange.
//!
//! Every status query and control command is a plain ASCII string written in
//! one go. The device answers with a short text reply, which is read back in
//! small chunks:
//!
//! ```text
//! host                        device
//!  |  "batteryLevel"  ------>   |
//!  |  <------  "87"             |
//! ```
//!
//! Replies are not framed. The first non-empty read is taken as the whole
//! answer, so callers should keep one command in flight at a time.

use crate::port::{Port, ReadOutcome};
use log::{debug, trace, warn};
use std::fmt;

/// Greeting returned by a healthy device in reply to [`Command::Test`].
pub const HELLO_REPLY: &str = "Hello PC!";

/// Commands understood by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness check, answered with [`HELLO_REPLY`].
    Test,
    /// BLE radio firmware version.
    BleVersion,
    /// ITE co-processor firmware version.
    IteVersion,
    /// Main board firmware version.
    McuVersion,
    /// Battery charge in percent.
    BatteryLevel,
    /// BLE version, re-read after a staged update.
    BleVersionRefresh,
    /// ITE version, re-read after a staged update.
    IteVersionRefresh,
    /// Which MCU image slot is active.
    McuImage,
    /// Start of a firmware file push.
    SendFile,
    /// Reboot the device.
    Reset,
    /// Power the device off.
    Off,
}

impl Command {
    /// Wire representation of the command.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Test => "#TEST#",
            Self::BleVersion => "bleVersion",
            Self::IteVersion => "iteVersion",
            Self::McuVersion => "mcuVersion",
            Self::BatteryLevel => "batteryLevel",
            Self::BleVersionRefresh => "bleversion",
            Self::IteVersionRefresh => "iteversion",
            Self::McuImage => "mcuImage",
            Self::SendFile => "sendFile",
            Self::Reset => "reset",
            Self::Off => "off",
        }
    }

    /// Wire bytes of the command.
    pub const fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry and buffer settings for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeConfig {
    /// Number of read attempts before giving up.
    pub max_retries: usize,
    /// Maximum bytes taken from a single read.
    pub read_chunk: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            read_chunk: 64,
        }
    }
}

/// Send `payload` and wait for a reply.
///
/// Returns the first non-empty reply, decoded lossily. Returns `None` when all
/// read attempts time out or the link fails; failures are logged, never raised.
pub fn exchange<P: Port + ?Sized>(
    port: &mut P,
    payload: &[u8],
    config: &ExchangeConfig,
) -> Option<String> {
    let shown = String::from_utf8_lossy(payload);
    trace!("Sending '{shown}' ({} bytes)", payload.len());

    if let Err(e) = port.write_all_bytes(payload) {
        warn!("Error sending '{shown}': {e}");
        return None;
    }

    let mut buf = vec![0u8; config.read_chunk.max(1)];
    for attempt in 1..=config.max_retries {
        match port.read_some(&mut buf) {
            Ok(ReadOutcome::Data(n)) => {
                let reply = String::from_utf8_lossy(&buf[..n]).into_owned();
                trace!("Reply to '{shown}': '{reply}'");
                return Some(reply);
            },
            Ok(ReadOutcome::TimedOut) => {
                debug!("Timeout, retrying... {attempt}/{}", config.max_retries);
            },
            Ok(ReadOutcome::Eof) => {
                debug!("No data received ({attempt}/{})", config.max_retries);
            },
            Err(e) => {
                warn!("Error reading reply to '{shown}': {e}");
                return None;
            },
        }
    }

    debug!("No reply to '{shown}' after {} attempts", config.max_retries);
    None
}

/// Send a known [`Command`] with the default exchange settings.
pub fn send_command<P: Port + ?Sized>(port: &mut P, command: Command) -> Option<String> {
    exchange(port, command.as_bytes(), &ExchangeConfig::default())
}
