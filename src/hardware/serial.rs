// src/hardware/serial.rs - Line-framed serial transport to the motion firmware
use async_trait::async_trait;
use serial2_tokio::SerialPort;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};

use crate::gcode::{SETTINGS_QUERY, WAKE_SEQUENCE};

/// Quiet period that ends a "read everything available" call.
const QUIET_WINDOW: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to open serial port '{port}': {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Serial I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connection closed by remote")]
    Closed,
    #[error("No serial ports found")]
    NoPorts,
    #[error("No motion controller answered on {0:?}")]
    NotDetected(Vec<String>),
}

/// One open, exclusively owned connection.
#[async_trait]
pub trait Transport: Send {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads up to the next line break. Returns the trimmed line, which is
    /// empty when nothing arrived before the read timeout.
    async fn read_line(&mut self) -> Result<String, TransportError>;

    /// Returns everything the device has sent so far.
    async fn read_available(&mut self) -> Result<String, TransportError>;

    /// Drops any buffered, unread input.
    async fn discard_input(&mut self) -> Result<(), TransportError>;
}

/// Opens a fresh [`Transport`] for each logical operation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError>;

    fn describe(&self) -> String;
}

/// A woken connection held for the length of one operation.
///
/// The only way to get one is [`PortLease::acquire`], which always performs
/// the wake handshake first. Dropping the lease closes the port, on every
/// exit path.
pub struct PortLease {
    transport: Box<dyn Transport>,
    label: String,
}

impl PortLease {
    pub async fn acquire(connector: &dyn Connector, settle: Duration) -> Result<Self, TransportError> {
        let label = connector.describe();
        let mut transport = connector.open().await.map_err(|e| {
            tracing::error!("Could not open {}: {}", label, e);
            e
        })?;
        transport.write_all(WAKE_SEQUENCE).await?;
        sleep(settle).await;
        transport.discard_input().await?;
        tracing::debug!("{} is awake", label);
        Ok(Self { transport, label })
    }
}

impl std::ops::Deref for PortLease {
    type Target = dyn Transport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref()
    }
}

impl std::ops::DerefMut for PortLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.transport.as_mut()
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        tracing::trace!("Released {}", self.label);
    }
}

/// [`Transport`] over a real serial device.
pub struct SerialTransport {
    port: SerialPort,
    pending: Vec<u8>,
    read_timeout: Duration,
}

impl SerialTransport {
    pub fn open(port_name: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, TransportError> {
        let port = SerialPort::open(port_name, baud_rate).map_err(|source| TransportError::Open {
            port: port_name.to_string(),
            source,
        })?;
        Ok(Self { port, pending: Vec::new(), read_timeout })
    }

    async fn fill(&mut self, wait: Duration) -> Result<usize, TransportError> {
        let mut buf = [0u8; 256];
        match timeout(wait, self.port.read(&mut buf)).await {
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => {
                tracing::trace!("Read {} bytes from serial", n);
                self.pending.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Ok(0),
        }
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        tracing::debug!("Serial TX: {:?}", String::from_utf8_lossy(bytes));
        self.port.write_all(bytes).await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, TransportError> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.pending.drain(..=end).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                tracing::debug!("Serial RX: {}", line);
                return Ok(line);
            }
            let now = Instant::now();
            if now >= deadline {
                // Partial line, like a timed-out readline.
                let raw = std::mem::take(&mut self.pending);
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    tracing::trace!("Serial read timed out");
                } else {
                    tracing::debug!("Serial RX (partial): {}", line);
                }
                return Ok(line);
            }
            self.fill(deadline - now).await?;
        }
    }

    async fn read_available(&mut self) -> Result<String, TransportError> {
        let deadline = Instant::now() + self.read_timeout;
        while Instant::now() < deadline {
            if self.fill(QUIET_WINDOW).await? == 0 {
                break;
            }
        }
        let raw = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&raw).trim().to_string();
        tracing::debug!("Serial RX (all): {:?}", text);
        Ok(text)
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        self.pending.clear();
        self.port.discard_input_buffer()?;
        Ok(())
    }
}

/// Serial connection parameters for one motion controller.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub port_name: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl SerialConnector {
    pub fn new(port_name: impl Into<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self { port_name: port_name.into(), baud_rate, read_timeout }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let transport = SerialTransport::open(&self.port_name, self.baud_rate, self.read_timeout)?;
        Ok(Box::new(transport))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port_name, self.baud_rate)
    }
}

/// Picks the serial port a GRBL-class controller is attached to.
///
/// A single available port is taken as-is. With several, each is woken and
/// asked for its settings; the first reply mentioning `ok` or `grbl` wins.
pub async fn discover_port(baud_rate: u32, settle: Duration, read_timeout: Duration) -> Result<String, TransportError> {
    let ports: Vec<PathBuf> = SerialPort::available_ports()?;
    let names: Vec<String> = ports.iter().map(|p| p.display().to_string()).collect();

    match names.as_slice() {
        [] => Err(TransportError::NoPorts),
        [only] => {
            tracing::info!("Automatically selected only available port: {}", only);
            Ok(only.clone())
        }
        _ => {
            tracing::info!("Found {} ports, querying each for a motion controller", names.len());
            for name in &names {
                let connector = SerialConnector::new(name.clone(), baud_rate, read_timeout);
                match answers_settings_query(&connector, settle).await {
                    Ok(true) => {
                        tracing::info!("Motion controller detected on {}", name);
                        return Ok(name.clone());
                    }
                    Ok(false) => tracing::debug!("{} did not answer like a motion controller", name),
                    Err(e) => tracing::debug!("Settings query on {} failed: {}", name, e),
                }
            }
            Err(TransportError::NotDetected(names))
        }
    }
}

/// Wakes the controller behind `connector` and checks its `$$` reply.
async fn answers_settings_query(connector: &dyn Connector, settle: Duration) -> Result<bool, TransportError> {
    let mut lease = PortLease::acquire(connector, settle).await?;
    lease.write_all(SETTINGS_QUERY).await?;
    let reply = lease.read_available().await?.to_lowercase();
    Ok(reply.contains("ok") || reply.contains("grbl"))
}
