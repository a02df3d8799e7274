//! Modbus-TCP output for the effects PLC. Only "write single coil" (function 0x05)
//! is spoken; every write waits for the echo before returning.

use firebeat_ports::hardware::{HardwareError, HardwareOutputPort};
use firebeat_ports::types::CoilAddress;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const WRITE_SINGLE_COIL: u8 = 0x05;
const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;
const FRAME_LEN: usize = 12;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("short frame: {0} bytes")]
    Short(usize),
    #[error("transaction id {got} does not match {expected}")]
    Transaction { expected: u16, got: u16 },
    #[error("plc exception code {0:#04x}")]
    Exception(u8),
    #[error("unexpected reply: {0}")]
    Unexpected(String),
}

/// Request for "write single coil". The reply to a successful write is a byte
/// for byte echo.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteCoilRequest {
    pub transaction: u16,
    pub unit: u8,
    pub coil: CoilAddress,
    pub on: bool,
}

impl WriteCoilRequest {
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0..2].copy_from_slice(&self.transaction.to_be_bytes());
        // protocol id stays 0
        frame[4..6].copy_from_slice(&6u16.to_be_bytes());
        frame[6] = self.unit;
        frame[7] = WRITE_SINGLE_COIL;
        frame[8..10].copy_from_slice(&self.coil.0.to_be_bytes());
        let value = if self.on { COIL_ON } else { COIL_OFF };
        frame[10..12].copy_from_slice(&value.to_be_bytes());
        frame
    }

    pub fn check_reply(&self, reply: &[u8]) -> Result<(), FrameError> {
        if reply.len() < 9 {
            return Err(FrameError::Short(reply.len()));
        }
        let transaction = u16::from_be_bytes([reply[0], reply[1]]);
        if transaction != self.transaction {
            return Err(FrameError::Transaction {
                expected: self.transaction,
                got: transaction,
            });
        }
        let function = reply[7];
        if function == WRITE_SINGLE_COIL | 0x80 {
            return Err(FrameError::Exception(reply[8]));
        }
        if reply.len() < FRAME_LEN {
            return Err(FrameError::Short(reply.len()));
        }
        if reply[..FRAME_LEN] != self.encode() {
            return Err(FrameError::Unexpected(format!("{:02x?}", &reply[..FRAME_LEN])));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlcConfig {
    pub host: String,
    pub port: u16,
    pub unit: u8,
    pub timeout: Duration,
}

impl PlcConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            unit: 1,
            timeout: Duration::from_secs(1),
        }
    }
}

struct Link {
    stream: Option<TcpStream>,
    next_transaction: u16,
}

/// One TCP connection to the PLC, reopened on the next write after any failure.
pub struct ModbusOutput {
    config: PlcConfig,
    addr: SocketAddr,
    link: Mutex<Link>,
}

impl ModbusOutput {
    /// Connects eagerly so a bad address fails before a show is queued.
    pub fn connect(config: PlcConfig) -> Result<Self, HardwareError> {
        let addr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| HardwareError::Connect(format!("{}:{}: {e}", config.host, config.port)))?
            .next()
            .ok_or_else(|| {
                HardwareError::Connect(format!("{}:{}: no address", config.host, config.port))
            })?;
        info!(%addr, "connecting to plc");
        let stream = open(addr, config.timeout)?;
        info!(%addr, "plc connected");
        Ok(Self {
            config,
            addr,
            link: Mutex::new(Link {
                stream: Some(stream),
                next_transaction: 1,
            }),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

fn open(addr: SocketAddr, timeout: Duration) -> Result<TcpStream, HardwareError> {
    let stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| HardwareError::Connect(format!("{addr}: {e}")))?;
    let configure = |stream: &TcpStream| -> std::io::Result<()> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)
    };
    configure(&stream).map_err(|e| HardwareError::Connect(format!("{addr}: {e}")))?;
    Ok(stream)
}

fn exchange(stream: &mut TcpStream, request: &WriteCoilRequest) -> Result<(), String> {
    stream
        .write_all(&request.encode())
        .map_err(|e| e.to_string())?;
    let mut header = [0u8; 9];
    stream.read_exact(&mut header).map_err(|e| e.to_string())?;
    if header[7] & 0x80 != 0 {
        return request.check_reply(&header).map_err(|e| e.to_string());
    }
    let mut reply = [0u8; FRAME_LEN];
    reply[..9].copy_from_slice(&header);
    stream
        .read_exact(&mut reply[9..])
        .map_err(|e| e.to_string())?;
    request.check_reply(&reply).map_err(|e| e.to_string())
}

impl HardwareOutputPort for ModbusOutput {
    fn write_coil(&self, coil: CoilAddress, on: bool) -> Result<(), HardwareError> {
        let mut link = self.link.lock();
        let transaction = link.next_transaction;
        link.next_transaction = link.next_transaction.wrapping_add(1);
        let request = WriteCoilRequest {
            transaction,
            unit: self.config.unit,
            coil,
            on,
        };

        if link.stream.is_none() {
            warn!(addr = %self.addr, "reconnecting to plc");
            link.stream = Some(open(self.addr, self.config.timeout)?);
        }
        let Some(stream) = link.stream.as_mut() else {
            return Err(HardwareError::Connect(self.addr.to_string()));
        };
        match exchange(stream, &request) {
            Ok(()) => {
                debug!(%coil, on, transaction, "coil written");
                Ok(())
            }
            Err(reason) => {
                // The stream may hold a half-read reply; start clean next time.
                link.stream = None;
                Err(HardwareError::Write { coil, reason })
            }
        }
    }

    fn describe(&self) -> String {
        format!("plc {}", self.addr)
    }

    fn close(&self) {
        if self.link.lock().stream.take().is_some() {
            info!(addr = %self.addr, "plc connection closed");
        }
    }
}
