//! TCP port implementation using `std::net`.

use {
    crate::{
        error::{Error, Result},
        port::{Connect, Port},
    },
    log::{debug, trace, warn},
    std::{
        io::{self, Read, Write},
        net::{Shutdown, TcpStream, ToSocketAddrs},
        thread,
        time::Duration,
    },
};

/// Default device address.
pub const DEFAULT_HOST: &str = "192.168.1.1";

/// Default device command port.
pub const DEFAULT_PORT: u16 = 6000;

/// TCP connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConfig {
    /// Device host name or IP address.
    pub host: String,
    /// Device TCP port.
    pub port: u16,
    /// Timeout for each connection attempt, also the initial read/write timeout.
    pub timeout: Duration,
    /// Maximum number of connection attempts.
    pub connect_attempts: usize,
    /// Delay between connection attempts.
    pub retry_delay: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(2),
            connect_attempts: 10,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl TcpConfig {
    /// Create a new configuration with host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retries(mut self, attempts: usize, delay: Duration) -> Self {
        self.connect_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// `host:port` string.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Connect for TcpConfig {
    type Port = TcpPort;

    fn connect(&self) -> Result<TcpPort> {
        TcpPort::connect(self)
    }

    fn target(&self) -> String {
        self.address()
    }
}

/// TCP port to a device.
pub struct TcpPort {
    stream: Option<TcpStream>,
    name: String,
    timeout: Option<Duration>,
}

impl TcpPort {
    /// Connect to the device, retrying according to `config`.
    ///
    /// Fails with [`Error::ConnectionFailed`] once every attempt is used up.
    pub fn connect(config: &TcpConfig) -> Result<Self> {
        let name = config.address();
        let attempts = config.connect_attempts.max(1);

        for attempt in 1..=attempts {
            match Self::try_connect(config) {
                Ok(stream) => {
                    debug!("Connected to {name} (attempt {attempt}/{attempts})");
                    return Ok(Self {
                        stream: Some(stream),
                        name,
                        timeout: Some(config.timeout),
                    });
                },
                Err(e) => {
                    debug!("Connection attempt {attempt}/{attempts} to {name} failed: {e}");
                    if attempt < attempts {
                        thread::sleep(config.retry_delay);
                    }
                },
            }
        }

        warn!("Failed to connect to {name} after {attempts} attempts");
        Err(Error::ConnectionFailed {
            target: name,
            attempts,
        })
    }

    /// Single connection attempt against every resolved address.
    fn try_connect(config: &TcpConfig) -> Result<TcpStream> {
        let mut last_error = None;

        for addr in (config.host.as_str(), config.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.timeout))?;
                    stream.set_write_timeout(Some(config.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                },
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))
            .into())
    }

    /// Whether the port still holds an open stream.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stream_mut(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Port for TcpPort {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        // A zero duration is rejected by the socket API.
        let timeout = timeout.map(|t| t.max(Duration::from_millis(1)));
        if let Some(ref stream) = self.stream {
            stream.set_read_timeout(timeout)?;
            stream.set_write_timeout(timeout)?;
        } else {
            return Err(Error::NotConnected);
        }
        trace!("Timeout on {} set to {timeout:?}", self.name);
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            // The peer may already be gone; dropping the stream closes it either way.
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Closed connection to {}", self.name);
        }
        Ok(())
    }
}

impl Read for TcpPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream_mut()?.read(buf)
    }
}

impl Write for TcpPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream_mut()?.flush()
    }
}

impl Drop for TcpPort {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
