//! Datagram sink: one JSON document per frame, no framing, no retry.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use crate::error::TransportError;
use crate::payload::Payload;

use super::{SendOutcome, Sink};

/// Anything that can push one datagram at an address.
pub trait DatagramTransport: Send {
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;
}

impl DatagramTransport for UdpSocket {
    fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, data, addr)
    }
}

pub struct NetworkDatagramSink<T: DatagramTransport = UdpSocket> {
    transport: T,
    host: String,
    port: u16,
    target: String,
}

impl NetworkDatagramSink<UdpSocket> {
    /// Bind an ephemeral local socket for sending to `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self, TransportError> {
        let target = format!("{}:{}", host, port);
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|source| TransportError::Connect {
            target: target.clone(),
            source,
        })?;
        Ok(Self::with_transport(socket, host, port))
    }
}

impl<T: DatagramTransport> NetworkDatagramSink<T> {
    pub fn with_transport(transport: T, host: &str, port: u16) -> Self {
        Self {
            transport,
            host: host.to_string(),
            port,
            target: format!("{}:{}", host, port),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    // Resolved per send so a DNS change is picked up without a restart.
    fn resolve(&self) -> Result<SocketAddr, TransportError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .ok()
            .and_then(|mut addrs| addrs.next())
            .ok_or_else(|| TransportError::Resolve(self.target.clone()))
    }

    pub fn send_bytes(&self, data: &[u8]) -> Result<(), TransportError> {
        let addr = self.resolve()?;
        self.transport
            .send_to(data, addr)
            .map_err(|source| TransportError::Send {
                target: self.target.clone(),
                source,
            })?;
        Ok(())
    }
}

impl<T: DatagramTransport> Sink for NetworkDatagramSink<T> {
    fn name(&self) -> &str {
        "udp"
    }

    fn send(&mut self, payload: &Payload) -> Result<SendOutcome, TransportError> {
        let json = payload.to_json()?;
        self.send_bytes(json.as_bytes())?;
        log::debug!("udp: sent {} bytes to {}", json.len(), self.target);
        Ok(SendOutcome::Delivered)
    }
}
