//! Reconnecting stream sink.
//!
//! The connection is opened lazily on the first send. A failed write closes
//! it, reopens once and retries the same bytes once; if that also fails the
//! payload is dropped and the next send starts from a closed connection.

use std::borrow::Cow;
use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::TransportError;
use crate::payload::Payload;

use super::{SendOutcome, Sink};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Opens the byte stream a `NetworkTextSink` writes to.
pub trait StreamConnector: Send {
    type Stream: Write + Send;

    fn connect(&mut self) -> Result<Self::Stream, TransportError>;

    /// `host:port` (or another label) for logs and errors.
    fn target(&self) -> &str;
}

/// TCP connector with bounded connect and write timeouts.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    host: String,
    port: u16,
    target: String,
    connect_timeout: Duration,
    write_timeout: Duration,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            target: format!("{}:{}", host, port),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Applies to both connect and write.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self.write_timeout = timeout;
        self
    }
}

impl StreamConnector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&mut self) -> Result<TcpStream, TransportError> {
        let addrs = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(self.target.clone()))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    let configured = stream
                        .set_write_timeout(Some(self.write_timeout))
                        .and_then(|_| stream.set_nodelay(true));
                    if let Err(source) = configured {
                        return Err(TransportError::Connect {
                            target: self.target.clone(),
                            source,
                        });
                    }
                    log::info!("tcp connected to {}", self.target);
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(source) => Err(TransportError::Connect {
                target: self.target.clone(),
                source,
            }),
            None => Err(TransportError::Resolve(self.target.clone())),
        }
    }

    fn target(&self) -> &str {
        &self.target
    }
}

enum Connection<S> {
    Closed,
    Open(S),
}

/// Stream-oriented sink that keeps one persistent connection.
pub struct NetworkTextSink<C: StreamConnector = TcpConnector> {
    name: String,
    connector: C,
    connection: Connection<C::Stream>,
    newline: bool,
    reconnect_on_error: bool,
}

impl<C: StreamConnector> NetworkTextSink<C> {
    pub fn new(name: &str, connector: C) -> Self {
        Self {
            name: name.to_string(),
            connector,
            connection: Connection::Closed,
            newline: true,
            reconnect_on_error: true,
        }
    }

    /// Append `\n` to text messages that lack one (default on).
    pub fn with_newline(mut self, newline: bool) -> Self {
        self.newline = newline;
        self
    }

    pub fn with_reconnect(mut self, reconnect_on_error: bool) -> Self {
        self.reconnect_on_error = reconnect_on_error;
        self
    }

    pub fn is_open(&self) -> bool {
        matches!(self.connection, Connection::Open(_))
    }

    pub fn target(&self) -> &str {
        self.connector.target()
    }

    /// Send text, newline-framed when enabled. Never doubles a newline.
    pub fn send_text(&mut self, text: &str) -> SendOutcome {
        let framed = frame_text(text, self.newline);
        self.send_bytes(framed.as_bytes())
    }

    /// Send bytes unchanged.
    pub fn send_bytes(&mut self, data: &[u8]) -> SendOutcome {
        match self.write_once(data) {
            Ok(()) => {
                log::debug!("{}: sent {} bytes to {}", self.name, data.len(), self.target());
                SendOutcome::Delivered
            }
            Err(err) => {
                log::warn!("{}: send error: {}; reconnecting...", self.name, err);
                self.close_connection();
                if !self.reconnect_on_error {
                    return SendOutcome::Dropped;
                }
                match self.write_once(data) {
                    Ok(()) => SendOutcome::Recovered,
                    Err(err) => {
                        log::error!("{}: resend failed: {}", self.name, err);
                        self.close_connection();
                        SendOutcome::Dropped
                    }
                }
            }
        }
    }

    fn write_once(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if let Connection::Closed = self.connection {
            self.connection = Connection::Open(self.connector.connect()?);
        }
        let Connection::Open(stream) = &mut self.connection else {
            return Err(TransportError::Resolve(self.connector.target().to_string()));
        };
        stream
            .write_all(data)
            .and_then(|_| stream.flush())
            .map_err(|source| TransportError::Send {
                target: self.connector.target().to_string(),
                source,
            })
    }

    fn close_connection(&mut self) {
        if let Connection::Open(mut stream) = std::mem::replace(&mut self.connection, Connection::Closed) {
            let _ = stream.flush();
        }
    }
}

impl<C: StreamConnector> Sink for NetworkTextSink<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, payload: &Payload) -> Result<SendOutcome, TransportError> {
        let json = payload.to_json()?;
        Ok(self.send_text(&json))
    }

    fn close(&mut self) {
        if self.is_open() {
            log::info!("{}: closing connection to {}", self.name, self.target());
        }
        self.close_connection();
    }
}

fn frame_text(text: &str, newline: bool) -> Cow<'_, str> {
    if newline && !text.ends_with('\n') {
        Cow::Owned(format!("{text}\n"))
    } else {
        Cow::Borrowed(text)
    }
}
