//! Scripted serial backend for hardware-free tests.

use std::{
    collections::{HashMap, VecDeque},
    io::{self, Read, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    error::{Error, Result},
    port::{FlowControl, Port, SerialBackend, SerialConfig, Unavailable},
};

type Responder = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Answers the handshake and echoes nothing else.
pub(crate) fn basic_modem(command: &str) -> Option<String> {
    match command {
        "AT" => Some("AT\r\r\nOK\r\n".to_string()),
        _ => Some("\r\nERROR\r\n".to_string()),
    }
}

/// In-memory port fed by a responder closure.
pub(crate) struct MockPort {
    name: String,
    baud_rate: u32,
    flow_control: FlowControl,
    responder: Responder,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    written: Arc<Mutex<Vec<String>>>,
    write_faults: VecDeque<io::ErrorKind>,
    closed: bool,
}

impl MockPort {
    pub(crate) fn new(
        name: &str,
        responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self::with_responder(name, 115200, FlowControl::None, Arc::new(responder))
    }

    fn with_responder(
        name: &str,
        baud_rate: u32,
        flow_control: FlowControl,
        responder: Responder,
    ) -> Self {
        Self {
            name: name.to_string(),
            baud_rate,
            flow_control,
            responder,
            pending: Vec::new(),
            rx: VecDeque::new(),
            written: Arc::new(Mutex::new(Vec::new())),
            write_faults: VecDeque::new(),
            closed: false,
        }
    }

    /// Fail the next writes with the given error kinds, in order.
    pub(crate) fn with_write_faults(mut self, faults: &[io::ErrorKind]) -> Self {
        self.write_faults
            .extend(faults.iter().copied());
        self
    }

    /// Bytes that arrive before any command is written.
    pub(crate) fn with_unsolicited(mut self, text: &str) -> Self {
        self.rx
            .extend(text.bytes());
        self
    }

    /// Commands seen so far, without terminators.
    pub(crate) fn written(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.written)
    }
}

impl Port for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn flow_control(&self) -> FlowControl {
        self.flow_control
    }

    fn bytes_to_read(&self) -> Result<usize> {
        Ok(self.rx.len())
    }

    fn clear_input(&mut self) -> Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.rx.clear();
        self.pending.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.rx.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if let Some(kind) = self.write_faults.pop_front() {
            return Err(io::Error::new(kind, "injected fault"));
        }
        self.pending
            .extend_from_slice(buf);
        while let Some(end) = self
            .pending
            .iter()
            .position(|&b| b == b'\r' || b == b'\n')
        {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let command = String::from_utf8_lossy(&line)
                .trim()
                .to_string();
            if command.is_empty() {
                continue;
            }
            if let Ok(mut written) = self.written.lock() {
                written.push(command.clone());
            }
            if let Some(reply) = (self.responder)(&command) {
                self.rx
                    .extend(reply.bytes());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// How a scripted device behaves once its path passes preflight.
#[derive(Clone)]
pub(crate) enum MockDevice {
    /// Responds at `baud` only, and only with `flow` when one is required.
    Modem {
        baud: u32,
        flow: Option<FlowControl>,
        responder: Responder,
    },
    /// Opens but never answers.
    Silent,
    /// `open` never returns.
    Hangs,
    /// `open` fails.
    OpenFails,
    /// Fails preflight.
    Unavailable(Unavailable),
}

/// Backend over a table of scripted devices.
#[derive(Default)]
pub(crate) struct MockBackend {
    devices: HashMap<String, MockDevice>,
    opened: Mutex<Vec<(String, u32, FlowControl)>>,
    preflighted: Mutex<Vec<String>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_device(mut self, path: &str, device: MockDevice) -> Self {
        self.devices
            .insert(path.to_string(), device);
        self
    }

    pub(crate) fn with_modem(self, path: &str, baud: u32) -> Self {
        self.with_device(
            path,
            MockDevice::Modem {
                baud,
                flow: None,
                responder: Arc::new(basic_modem),
            },
        )
    }

    /// Every `(path, baud, flow)` that reached `open`, in call order.
    pub(crate) fn opened(&self) -> Vec<(String, u32, FlowControl)> {
        self.opened
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Every path that reached preflight, in call order.
    pub(crate) fn preflighted(&self) -> Vec<String> {
        self.preflighted
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl SerialBackend for MockBackend {
    fn preflight(&self, path: &str) -> std::result::Result<(), Unavailable> {
        if let Ok(mut seen) = self.preflighted.lock() {
            seen.push(path.to_string());
        }
        match self.devices.get(path) {
            None => Err(Unavailable::NotFound),
            Some(MockDevice::Unavailable(reason)) => Err(reason.clone()),
            Some(_) => Ok(()),
        }
    }

    fn open(&self, config: &SerialConfig) -> Result<Box<dyn Port>> {
        if let Ok(mut opened) = self.opened.lock() {
            opened.push((config.port_name.clone(), config.baud_rate, config.flow_control));
        }
        let silent: Responder = Arc::new(|_| None);
        let responder = match self.devices.get(&config.port_name) {
            Some(MockDevice::Modem {
                baud,
                flow,
                responder,
            }) => {
                let flow_ok = flow.is_none_or(|f| f == config.flow_control);
                if *baud == config.baud_rate && flow_ok {
                    Arc::clone(responder)
                } else {
                    silent
                }
            },
            Some(MockDevice::Hangs) => loop {
                std::thread::sleep(Duration::from_secs(3600));
            },
            Some(MockDevice::OpenFails) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "device busy",
                )));
            },
            Some(MockDevice::Silent | MockDevice::Unavailable(_)) => silent,
            None => return Err(Error::Io(io::Error::from(io::ErrorKind::NotFound))),
        };
        Ok(Box::new(MockPort::with_responder(
            &config.port_name,
            config.baud_rate,
            config.flow_control,
            responder,
        )))
    }
}
