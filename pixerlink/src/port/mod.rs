//! Port abstraction for the device link.
//!
//! The protocol layer never touches a socket directly. It talks to a [`Port`],
//! which is a blocking byte stream with an adjustable read/write timeout:
//!
//! ```text
//! +--------------------------------------+
//! |  Protocol layer (command, transfer)  |
//! +------------------+-------------------+
//!                    |
//!                    v
//! +------------------+-------------------+
//! |             Port trait               |
//! +---------+------------------+---------+
//!           |                  |
//!           v                  v
//! +---------+--------+ +-------+---------+
//! |     TcpPort      | | simulated device|
//! |  (std::net TCP)  | |    (tests)      |
//! +------------------+ +-----------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use pixerlink::port::{Port, ReadOutcome};
//!
//! fn ping<P: Port>(port: &mut P) -> pixerlink::Result<()> {
//!     port.write_all_bytes(b"#TEST#")?;
//!
//!     let mut buf = [0u8; 64];
//!     if let ReadOutcome::Data(n) = port.read_some(&mut buf)? {
//!         println!("Received: {:?}", &buf[..n]);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod tcp;

#[cfg(test)]
pub(crate) mod sim;

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::Result;

pub use tcp::{TcpConfig, TcpPort};

/// Result of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer.
    Data(usize),
    /// The read timeout elapsed with nothing to read.
    TimedOut,
    /// The peer closed its side of the connection.
    Eof,
}

/// Unified port trait for the device link.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout. `None` means fully blocking.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Option<Duration>;

    /// Get a printable name for the remote end (e.g. `192.168.1.1:6000`).
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// Closing twice, or closing a port that never connected, is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes and flush, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        Write::write_all(self, buf)?;
        Write::flush(self)?;
        Ok(())
    }

    /// Read once, turning a timeout into [`ReadOutcome::TimedOut`].
    ///
    /// Interrupted reads are retried. Any other I/O failure is returned as an
    /// error.
    fn read_some(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            match self.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Eof),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) if is_timeout(&e) => return Ok(ReadOutcome::TimedOut),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl<P: Port + ?Sized> Port for &mut P {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Option<Duration> {
        (**self).timeout()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Something that can open a fresh [`Port`] to one device.
///
/// Every top-level operation asks for its own connection and never reuses it.
pub trait Connect {
    /// Port type produced by a successful connection.
    type Port: Port;

    /// Open a new connection.
    fn connect(&self) -> Result<Self::Port>;

    /// Identifier of the remote device, used for logging and for serializing
    /// operations against the same device.
    fn target(&self) -> String;
}

/// Whether an I/O error is a read/write timeout.
///
/// Unix sockets report an elapsed `SO_RCVTIMEO` as `WouldBlock`, Windows as
/// `TimedOut`.
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
