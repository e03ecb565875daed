//! Frame transports.
//!
//! A frame is one newline-terminated message. Sessions only see this trait,
//! so protocol tests run over in-process channels and the server over TCP.

use crate::error::{LedgerError, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

pub trait Transport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Waits up to `timeout` for the next frame. `Ok(None)` means nothing
    /// arrived in time; an error means the connection is gone.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    fn peer_label(&self) -> String;

    fn close(&mut self);
}

pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    /// Bytes of a frame whose newline has not arrived yet
    pending: Vec<u8>,
    max_frame_bytes: usize,
    label: String,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, io_timeout: Duration, max_frame_bytes: usize) -> Result<Self> {
        let label = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        stream
            .set_write_timeout(Some(io_timeout))
            .map_err(|e| LedgerError::Network(format!("Failed to set write timeout: {e}")))?;
        stream
            .set_nodelay(true)
            .map_err(|e| LedgerError::Network(format!("Failed to set nodelay: {e}")))?;
        let writer = stream
            .try_clone()
            .map_err(|e| LedgerError::Network(format!("Failed to clone stream: {e}")))?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            pending: Vec::new(),
            max_frame_bytes,
            label,
        })
    }

    pub fn connect(addr: &str, io_timeout: Duration, max_frame_bytes: usize) -> Result<Self> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| LedgerError::Network(format!("Invalid address {addr}: {e}")))?
            .next()
            .ok_or_else(|| LedgerError::Network(format!("Address {addr} did not resolve")))?;
        let stream = TcpStream::connect_timeout(&socket_addr, io_timeout)
            .map_err(|e| LedgerError::Network(format!("Failed to connect to {addr}: {e}")))?;
        Self::new(stream, io_timeout, max_frame_bytes)
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.writer
            .write_all(frame)
            .and_then(|_| self.writer.flush())
            .map_err(|e| LedgerError::Network(format!("Failed to send to {}: {e}", self.label)))
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.reader
            .get_ref()
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(|e| LedgerError::Network(format!("Failed to set read timeout: {e}")))?;

        loop {
            let budget = (self.max_frame_bytes + 1).saturating_sub(self.pending.len()) as u64;
            let result = (&mut self.reader)
                .take(budget)
                .read_until(b'\n', &mut self.pending);
            match result {
                Ok(0) => {
                    return Err(LedgerError::Network(format!(
                        "{} closed the connection",
                        self.label
                    )))
                }
                Ok(_) if self.pending.ends_with(b"\n") => {
                    return Ok(Some(std::mem::take(&mut self.pending)));
                }
                Ok(_) if self.pending.len() > self.max_frame_bytes => {
                    return Err(LedgerError::Network(format!(
                        "{} sent a frame over {} bytes",
                        self.label, self.max_frame_bytes
                    )));
                }
                Ok(_) => continue,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(LedgerError::Network(format!(
                        "Failed to read from {}: {e}",
                        self.label
                    )))
                }
            }
        }
    }

    fn peer_label(&self) -> String {
        self.label.clone()
    }

    fn close(&mut self) {
        let _ = self.writer.shutdown(Shutdown::Both);
    }
}

/// In-process transport; see [`memory_pair`].
pub struct MemoryTransport {
    outbound: Option<Sender<Vec<u8>>>,
    inbound: Receiver<Vec<u8>>,
    label: String,
}

/// Two connected ends. Closing or dropping one makes the other's
/// `receive` fail.
pub fn memory_pair(a: &str, b: &str) -> (MemoryTransport, MemoryTransport) {
    let (to_b, from_a) = channel();
    let (to_a, from_b) = channel();
    (
        MemoryTransport {
            outbound: Some(to_b),
            inbound: from_b,
            label: b.to_string(),
        },
        MemoryTransport {
            outbound: Some(to_a),
            inbound: from_a,
            label: a.to_string(),
        },
    )
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| LedgerError::Network("transport is closed".to_string()))?;
        outbound
            .send(frame.to_vec())
            .map_err(|_| LedgerError::Network(format!("{} hung up", self.label)))
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.outbound.is_none() {
            return Err(LedgerError::Network("transport is closed".to_string()));
        }
        match self.inbound.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(LedgerError::Network(format!("{} hung up", self.label)))
            }
        }
    }

    /// Label of the far end.
    fn peer_label(&self) -> String {
        self.label.clone()
    }

    fn close(&mut self) {
        self.outbound = None;
    }
}
