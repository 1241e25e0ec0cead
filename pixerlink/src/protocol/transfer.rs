//! Bulk transfer to the device.
//!
//! Two framings share the link:
//!
//! **Image push**: the framed bitmap is written in 4096-byte chunks, followed
//! by a fixed tail marker. Nothing is acknowledged.
//!
//! ```text
//! +-----------------------------+-------------------+-----------+
//! | "#file#000801314144imagebin"|  packed pixels    | "#MOVE#d" |
//! +-----------------------------+-------------------+-----------+
//! ```
//!
//! **File push**: a handshake announces the destination and size, the payload
//! follows in 1024-byte chunks, and the device reports `OK!` once the file is
//! stored.
//!
//! ```text
//! host                                  device
//!  | "sendFile"            -------->       |
//!  |                       <--------  ack  |
//!  | "<path>"              -------->       |
//!  | "<size>"              -------->       |
//!  |                       <--------  ack  |
//!  | payload (1024 B chunks) ------>       |
//!  |                       <-------- "OK!" |   (polled, up to 180 s)
//!  | drain leftovers, settle               |
//! ```

use crate::error::{Error, Result};
use crate::port::{Port, ReadOutcome};
use crate::protocol::command::{Command, ExchangeConfig, exchange};
use log::{debug, error, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Chunk size for image pushes.
pub const IMAGE_CHUNK_SIZE: usize = 4096;

/// Marker written after the last image chunk.
pub const IMAGE_TAIL: &[u8] = b"#MOVE#d";

/// Read/write timeout during an image push.
pub const IMAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Chunk size for file pushes, matching the device receive buffer.
pub const FILE_CHUNK_SIZE: usize = 1024;

/// Largest payload accepted for a file push (1 MiB).
pub const MAX_FILE_SIZE: usize = 1024 * 1024;

/// Reply that marks a stored file.
pub const COMPLETION_SENTINEL: &str = "OK!";

/// Upper bound on reads while draining, in case the device keeps talking.
const MAX_DRAIN_READS: usize = 1024;

/// Push a framed image and the tail marker.
///
/// `progress` is called after every chunk with `(bytes_sent, total)`.
pub fn push_image<P, F>(port: &mut P, frame: &[u8], mut progress: F) -> Result<()>
where
    P: Port + ?Sized,
    F: FnMut(usize, usize),
{
    let total = frame.len();
    debug!("Pushing image frame ({total} bytes) to {}", port.name());
    port.set_timeout(Some(IMAGE_TIMEOUT))?;

    let mut sent = 0;
    for chunk in frame.chunks(IMAGE_CHUNK_SIZE) {
        port.write_all_bytes(chunk)?;
        sent += chunk.len();
        trace!("Image progress: {}%", sent * 100 / total);
        progress(sent, total);
    }

    port.write_all_bytes(IMAGE_TAIL)?;
    info!("Image frame sent ({total} bytes)");
    Ok(())
}

/// File push settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferConfig {
    /// Largest payload accepted.
    pub max_size: usize,
    /// Payload chunk size.
    pub chunk_size: usize,
    /// Timeout while announcing the file.
    pub handshake_timeout: Duration,
    /// Timeout while streaming the payload.
    pub transfer_timeout: Duration,
    /// Timeout for each read while waiting for the sentinel.
    pub poll_read_timeout: Duration,
    /// Pause between completion polls.
    pub poll_interval: Duration,
    /// Wall-clock budget for the completion sentinel.
    pub completion_deadline: Duration,
    /// Read timeout while discarding leftover bytes.
    pub drain_timeout: Duration,
    /// Pause after draining, before the next command.
    pub settle_delay: Duration,
    /// Settings for the handshake exchanges.
    pub exchange: ExchangeConfig,
}

impl Default for FileTransferConfig {
    fn default() -> Self {
        Self {
            max_size: MAX_FILE_SIZE,
            chunk_size: FILE_CHUNK_SIZE,
            handshake_timeout: Duration::from_secs(5),
            transfer_timeout: Duration::from_secs(30),
            poll_read_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            completion_deadline: Duration::from_secs(180),
            drain_timeout: Duration::from_millis(200),
            settle_delay: Duration::from_millis(500),
            exchange: ExchangeConfig::default(),
        }
    }
}

/// State of one file push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession<'a> {
    /// Destination path on the device.
    pub path: &'a str,
    /// Declared payload size.
    pub size: usize,
    /// Payload bytes written so far.
    pub sent: usize,
    /// Reply that completes the push.
    pub sentinel: &'static str,
}

impl<'a> TransferSession<'a> {
    fn new(path: &'a str, size: usize) -> Self {
        Self {
            path,
            size,
            sent: 0,
            sentinel: COMPLETION_SENTINEL,
        }
    }
}

/// File push handler.
pub struct FileTransfer<'a, P: Port + ?Sized> {
    port: &'a mut P,
    config: FileTransferConfig,
}

impl<'a, P: Port + ?Sized> FileTransfer<'a, P> {
    /// Create a new file push handler.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: FileTransferConfig::default(),
        }
    }

    /// Create a new file push handler with custom configuration.
    pub fn with_config(port: &'a mut P, config: FileTransferConfig) -> Self {
        Self { port, config }
    }

    /// Store `data` on the device at `path`.
    ///
    /// Leftover replies are drained on every exit path once the handshake has
    /// started. Afterwards the port gets back the timeout it had before the
    /// call rather than being switched to fully blocking reads, so a port that
    /// was blocking stays blocking and one with a timeout keeps it.
    pub fn push(&mut self, path: &str, data: &[u8]) -> Result<()> {
        if data.len() > self.config.max_size {
            error!(
                "File for '{path}' too large: {} > {}",
                data.len(),
                self.config.max_size
            );
            return Err(Error::PayloadTooLarge {
                size: data.len(),
                max: self.config.max_size,
            });
        }

        info!("Sending file '{path}' ({} bytes)", data.len());
        let restore = self.port.timeout();
        let mut session = TransferSession::new(path, data.len());

        let result = self
            .handshake(&session)
            .and_then(|()| self.stream(&mut session, data))
            .and_then(|()| self.await_completion(&session));

        self.drain();
        if let Err(e) = self.port.set_timeout(restore) {
            debug!("Failed to restore timeout: {e}");
        }
        thread::sleep(self.config.settle_delay);

        match &result {
            Ok(()) => info!("File '{path}' stored ({} bytes)", session.sent),
            Err(e) => error!("File '{path}' failed: {e}"),
        }
        result
    }

    /// Announce the transfer: command, path, size.
    fn handshake(&mut self, session: &TransferSession<'_>) -> Result<()> {
        self.port.set_timeout(Some(self.config.handshake_timeout))?;

        let reply = exchange(self.port, Command::SendFile.as_bytes(), &self.config.exchange)
            .ok_or_else(|| Error::Handshake("no response to 'sendFile'".into()))?;
        debug!("sendFile reply: '{reply}'");

        self.port.write_all_bytes(session.path.as_bytes())?;

        let size = session.size.to_string();
        let ack = exchange(self.port, size.as_bytes(), &self.config.exchange)
            .ok_or_else(|| Error::Handshake(format!("no response to size '{size}'")))?;
        debug!("Size reply: '{ack}'");

        Ok(())
    }

    /// Write the payload in fixed-size chunks.
    fn stream(&mut self, session: &mut TransferSession<'_>, data: &[u8]) -> Result<()> {
        self.port.set_timeout(Some(self.config.transfer_timeout))?;

        for (index, chunk) in data.chunks(self.config.chunk_size.max(1)).enumerate() {
            self.port.write_all_bytes(chunk)?;
            session.sent += chunk.len();
            if (index + 1) % 100 == 0 {
                debug!(
                    "Progress: {}/{} bytes ({}%)",
                    session.sent,
                    session.size,
                    session.sent * 100 / session.size
                );
            }
        }

        debug!("Payload written: {} bytes", session.sent);
        Ok(())
    }

    /// Poll until the sentinel arrives or the deadline passes.
    ///
    /// Only a timed-out read counts as "still writing". A closed or failed link
    /// ends the push at once.
    fn await_completion(&mut self, session: &TransferSession<'_>) -> Result<()> {
        let deadline = Instant::now() + self.config.completion_deadline;
        let mut buf = [0u8; 256];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.port
                .set_timeout(Some(self.config.poll_read_timeout.min(remaining)))?;

            match self.port.read_some(&mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    let msg = String::from_utf8_lossy(&buf[..n]);
                    let msg = msg.trim();
                    if msg == session.sentinel {
                        debug!("Received '{msg}' for '{}'", session.path);
                        return Ok(());
                    }
                    debug!("Received '{msg}' while waiting for '{}'", session.sentinel);
                },
                Ok(ReadOutcome::TimedOut) => {
                    trace!("No data while waiting for '{}'", session.sentinel);
                },
                Ok(ReadOutcome::Eof) => {
                    return Err(Error::Protocol(format!(
                        "connection closed while waiting for '{}'",
                        session.sentinel
                    )));
                },
                Err(e) => {
                    debug!("Read error while waiting for completion: {e}");
                    return Err(e);
                },
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(self.config.poll_interval.min(remaining));
        }

        Err(Error::Timeout(format!(
            "no '{}' within {} seconds",
            session.sentinel,
            self.config.completion_deadline.as_secs()
        )))
    }

    /// Discard whatever the device still has queued.
    fn drain(&mut self) {
        if let Err(e) = self.port.set_timeout(Some(self.config.drain_timeout)) {
            debug!("Drain skipped: {e}");
            return;
        }

        let mut buf = [0u8; 256];
        let mut drained = 0;
        for _ in 0..MAX_DRAIN_READS {
            match self.port.read_some(&mut buf) {
                Ok(ReadOutcome::Data(n)) => {
                    trace!("Drained: '{}'", String::from_utf8_lossy(&buf[..n]));
                    drained += n;
                },
                Ok(_) => break,
                Err(e) => {
                    debug!("Drain stopped: {e}");
                    break;
                },
            }
        }

        if drained > 0 {
            warn!("Discarded {drained} trailing bytes after file push");
        }
    }
}
