//! In-memory device simulator for protocol tests.
//!
//! Handles are cheap clones sharing one state, so a test can hand one handle to
//! the code under test and keep another to inspect what the device saw.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::port::{Connect, Port};

/// One scripted read result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Incoming {
    Data(Vec<u8>),
    Timeout,
    Eof,
    /// The read fails with a connection reset.
    Reset,
    /// The read is interrupted by a signal.
    Interrupted,
}

impl Incoming {
    pub(crate) fn text(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }
}

#[derive(Debug)]
enum Mode {
    Command,
    AwaitPath,
    AwaitSize { path: String },
    Receiving { path: String, size: usize, data: Vec<u8> },
}

#[derive(Debug)]
struct SimState {
    inbox: VecDeque<Incoming>,
    replies: HashMap<String, String>,
    mode: Mode,
    transcript: Vec<String>,
    writes: Vec<Vec<u8>>,
    files: Vec<(String, Vec<u8>)>,
    send_file_reply: Option<String>,
    size_reply: Option<String>,
    completion: Vec<Incoming>,
    completion_by_path: HashMap<String, Vec<Incoming>>,
    timeouts: Vec<Option<Duration>>,
    timeout: Option<Duration>,
    broken: bool,
    closed: bool,
    close_count: usize,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            inbox: VecDeque::new(),
            replies: HashMap::new(),
            mode: Mode::Command,
            transcript: Vec::new(),
            writes: Vec::new(),
            files: Vec::new(),
            send_file_reply: Some("sendFile ready".to_string()),
            size_reply: Some("size ok".to_string()),
            completion: vec![Incoming::Timeout, Incoming::text("OK!\n")],
            completion_by_path: HashMap::new(),
            timeouts: Vec::new(),
            timeout: Some(Duration::from_secs(2)),
            broken: false,
            closed: false,
            close_count: 0,
        }
    }
}

impl SimState {
    fn on_write(&mut self, buf: &[u8]) {
        self.writes.push(buf.to_vec());
        let text = String::from_utf8_lossy(buf).into_owned();

        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::Command => {
                if text == "sendFile" {
                    self.transcript.push(text);
                    if let Some(reply) = self.send_file_reply.clone() {
                        self.inbox.push_back(Incoming::text(&reply));
                        self.mode = Mode::AwaitPath;
                    }
                } else {
                    if let Some(reply) = self.replies.get(&text).cloned() {
                        self.inbox.push_back(Incoming::text(&reply));
                    }
                    if buf.len() <= 32 {
                        self.transcript.push(text);
                    } else {
                        self.transcript.push(format!("<{} bytes>", buf.len()));
                    }
                }
            },
            Mode::AwaitPath => {
                self.transcript.push(format!("path:{text}"));
                self.mode = Mode::AwaitSize { path: text };
            },
            Mode::AwaitSize { path } => {
                self.transcript.push(format!("size:{text}"));
                let size = text.parse().unwrap_or(0);
                if let Some(reply) = self.size_reply.clone() {
                    self.inbox.push_back(Incoming::text(&reply));
                }
                self.mode = Mode::Receiving {
                    path,
                    size,
                    data: Vec::new(),
                };
            },
            Mode::Receiving {
                path,
                size,
                mut data,
            } => {
                data.extend_from_slice(buf);
                if data.len() >= size {
                    self.transcript.push(format!("file:{path}"));
                    let script = self
                        .completion_by_path
                        .get(&path)
                        .unwrap_or(&self.completion)
                        .clone();
                    self.inbox.extend(script);
                    self.files.push((path, data));
                } else {
                    self.mode = Mode::Receiving { path, size, data };
                }
            },
        }
    }
}

/// Simulated device handle.
#[derive(Debug, Clone, Default)]
pub(crate) struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimDevice {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Answer `command` with `reply` whenever it is written.
    pub(crate) fn with_reply(self, command: &str, reply: &str) -> Self {
        self.lock()
            .replies
            .insert(command.to_string(), reply.to_string());
        self
    }

    pub(crate) fn push_reply(&self, data: &[u8]) {
        self.lock().inbox.push_back(Incoming::Data(data.to_vec()));
    }

    pub(crate) fn push_timeout(&self) {
        self.lock().inbox.push_back(Incoming::Timeout);
    }

    pub(crate) fn push_eof(&self) {
        self.lock().inbox.push_back(Incoming::Eof);
    }

    pub(crate) fn push_incoming(&self, incoming: Incoming) {
        self.lock().inbox.push_back(incoming);
    }

    pub(crate) fn set_send_file_reply(&self, reply: Option<&str>) {
        self.lock().send_file_reply = reply.map(str::to_string);
    }

    pub(crate) fn set_size_reply(&self, reply: Option<&str>) {
        self.lock().size_reply = reply.map(str::to_string);
    }

    /// Script what the device sends after a file has been fully received.
    pub(crate) fn set_completion(&self, script: Vec<Incoming>) {
        self.lock().completion = script;
    }

    pub(crate) fn set_completion_for(&self, path: &str, script: Vec<Incoming>) {
        self.lock()
            .completion_by_path
            .insert(path.to_string(), script);
    }

    pub(crate) fn set_broken(&self, broken: bool) {
        self.lock().broken = broken;
    }

    pub(crate) fn transcript(&self) -> Vec<String> {
        self.lock().transcript.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    pub(crate) fn written_bytes(&self) -> Vec<u8> {
        self.lock().writes.concat()
    }

    pub(crate) fn files(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().files.clone()
    }

    pub(crate) fn timeouts(&self) -> Vec<Option<Duration>> {
        self.lock().timeouts.clone()
    }

    pub(crate) fn pending_reads(&self) -> usize {
        self.lock().inbox.len()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.lock().close_count
    }
}

impl Read for SimDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"));
        }

        match state.inbox.pop_front() {
            None | Some(Incoming::Timeout) => {
                Err(io::Error::new(io::ErrorKind::WouldBlock, "timed out"))
            },
            Some(Incoming::Eof) => Ok(0),
            Some(Incoming::Reset) => {
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
            },
            Some(Incoming::Interrupted) => {
                Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"))
            },
            Some(Incoming::Data(data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.inbox.push_front(Incoming::Data(data[n..].to_vec()));
                }
                Ok(n)
            },
        }
    }
}

impl Write for SimDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        state.on_write(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimDevice {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.lock();
        state.timeouts.push(timeout);
        state.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Option<Duration> {
        self.lock().timeout
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            state.close_count += 1;
        }
        Ok(())
    }
}

/// Connector handing out handles to one simulated device.
#[derive(Debug, Clone)]
pub(crate) struct SimConnector {
    pub(crate) device: SimDevice,
    pub(crate) reachable: bool,
    pub(crate) target: String,
}

impl SimConnector {
    pub(crate) fn new(device: SimDevice) -> Self {
        Self {
            device,
            reachable: true,
            target: "sim:6000".to_string(),
        }
    }

    /// Same device under a different address.
    pub(crate) fn with_target(mut self, target: &str) -> Self {
        self.target = target.to_string();
        self
    }
}

impl Connect for SimConnector {
    type Port = SimDevice;

    fn connect(&self) -> Result<SimDevice> {
        if !self.reachable {
            return Err(Error::ConnectionFailed {
                target: self.target(),
                attempts: 10,
            });
        }
        let device = self.device.clone();
        device.lock().closed = false;
        Ok(device)
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}
