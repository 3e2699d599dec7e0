//! TCP peer transport: one length-prefixed JSON request per connection,
//! length-prefixed JSON reply back. Connections are cached per nodename
//! and reused across calls; `purge` drops the cached entry so the next
//! `unary` dials a fresh one.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use ca3_core::error::{Error, ErrorKind, Result};
use ca3_core::packet::GeneralPacket;
use ca3_core::types::RosterEntry;
use ca3_core::PeerTransport;
use log::{debug, warn};
use parking_lot::Mutex;

pub struct TcpTransport {
    connections: Mutex<HashMap<String, TcpStream>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        TcpTransport {
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn dial(&self, target: &RosterEntry, timeout: Duration) -> Result<TcpStream> {
        let addr = format!("{}:{}", target.host, target.rpc_port);
        let stream = TcpStream::connect(&addr)
            .map_err(|_| Error::from(ErrorKind::PeerUnreachable(target.nodename.clone())))?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|_| Error::from(ErrorKind::PeerUnreachable(target.nodename.clone())))?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(|_| Error::from(ErrorKind::PeerUnreachable(target.nodename.clone())))?;
        Ok(stream)
    }
}

/// Writes `packet` as a 4-byte big-endian length prefix followed by its
/// JSON encoding. I/O failures are reported as plain `io::Result`; the
/// caller decides whether that means "connection unavailable" (a reused,
/// possibly stale cached stream) or a harder failure (a freshly dialed one).
fn write_framed(stream: &mut TcpStream, packet: &GeneralPacket) -> std::io::Result<()> {
    let body = serde_json::to_vec(packet)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    let len = body.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

/// Reads one length-prefixed JSON packet off `stream`.
fn read_framed(stream: &mut TcpStream) -> Result<GeneralPacket> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .map_err(|_| Error::from(ErrorKind::CollaboratorDown("transport".into())))?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .map_err(|_| Error::from(ErrorKind::CollaboratorDown("transport".into())))?;
    serde_json::from_slice(&body).map_err(|_| Error::from(ErrorKind::MalformedData))
}

impl PeerTransport for TcpTransport {
    fn unary(&self, target: &RosterEntry, packet: GeneralPacket, timeout: Duration) -> Result<GeneralPacket> {
        let cached = self.connections.lock().remove(&target.nodename);
        let reused = cached.is_some();
        let mut stream = match cached {
            Some(s) => s,
            None => self.dial(target, timeout)?,
        };

        if let Err(e) = write_framed(&mut stream, &packet) {
            warn!(target: "ca3::transport", "write to {} failed: {}", target.nodename, e);
            return Err(if reused {
                Error::from(ErrorKind::ConnectionUnavailable(target.nodename.clone()))
            } else {
                Error::from(ErrorKind::PeerUnreachable(target.nodename.clone()))
            });
        }

        match read_framed(&mut stream) {
            Ok(reply) => {
                self.connections
                    .lock()
                    .insert(target.nodename.clone(), stream);
                Ok(reply)
            }
            Err(e) => {
                warn!(target: "ca3::transport", "call to {} failed: {}", target.nodename, e);
                if reused {
                    Err(Error::from(ErrorKind::ConnectionUnavailable(target.nodename.clone())))
                } else {
                    Err(e)
                }
            }
        }
    }

    fn purge(&self, target: &RosterEntry) {
        debug!(target: "ca3::transport", "purging cached connection to {}", target.nodename);
        self.connections.lock().remove(&target.nodename);
    }
}
