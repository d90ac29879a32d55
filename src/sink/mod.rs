//! Output sinks for per-frame detection payloads.
//!
//! Every sink owns its transport. The orchestrator calls `send` on each sink
//! in turn and treats an `Err` as that sink's problem only.
//!
//! - `tcp`: line-framed JSON over a reconnecting stream
//! - `udp`: one JSON datagram per frame, fire-and-forget
//! - `eki`: XML document for KUKA EKI over a stream
//! - `mqtt`: JSON published to a broker topic

pub mod eki;
pub mod mqtt;
pub mod tcp;
pub mod udp;

use anyhow::Result;

use crate::config::OutputSettings;
use crate::error::TransportError;
use crate::payload::Payload;

pub use eki::{render_document, EkiOptions, StructuredDocumentSink};
pub use mqtt::MqttSink;
pub use tcp::{NetworkTextSink, StreamConnector, TcpConnector};
pub use udp::{DatagramTransport, NetworkDatagramSink};

/// How a send that did not error ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Delivered on the single retry after reconnecting.
    Recovered,
    /// Both attempts failed; the payload is lost for this frame.
    Dropped,
}

pub trait Sink: Send {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Deliver one payload. Must not block indefinitely.
    fn send(&mut self, payload: &Payload) -> Result<SendOutcome, TransportError>;

    /// Release the transport. Called once on shutdown.
    fn close(&mut self) {}
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send(&mut self, payload: &Payload) -> Result<SendOutcome, TransportError> {
        (**self).send(payload)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Instantiate every enabled sink, in a fixed order: udp, tcp, eki, mqtt.
pub fn build_sinks(output: &OutputSettings) -> Result<Vec<Box<dyn Sink>>> {
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    if output.udp.enabled {
        let sink = NetworkDatagramSink::new(&output.udp.host, output.udp.port)?;
        log::info!("udp sink -> {}:{}", output.udp.host, output.udp.port);
        sinks.push(Box::new(sink));
    }

    if output.tcp.enabled {
        let connector = TcpConnector::new(&output.tcp.host, output.tcp.port)
            .with_connect_timeout(output.tcp.connect_timeout);
        let sink = NetworkTextSink::new("tcp", connector).with_newline(output.tcp.newline);
        log::info!(
            "tcp sink -> {}:{} (newline={})",
            output.tcp.host,
            output.tcp.port,
            output.tcp.newline
        );
        sinks.push(Box::new(sink));
    }

    if output.eki.enabled {
        let connector = TcpConnector::new(&output.eki.host, output.eki.port)
            .with_connect_timeout(output.eki.connect_timeout);
        let options = EkiOptions {
            root_tag: output.eki.root_tag.clone(),
            only_first_detection: output.eki.only_first_detection,
            use_robot_xyz: output.eki.use_robot_xyz,
            pretty: output.eki.pretty,
        };
        log::info!(
            "eki sink -> {}:{} (root={}, first_only={}, robot_xyz={})",
            output.eki.host,
            output.eki.port,
            options.root_tag,
            options.only_first_detection,
            options.use_robot_xyz
        );
        sinks.push(Box::new(StructuredDocumentSink::new(connector, options)));
    }

    if output.mqtt.enabled {
        let sink = MqttSink::connect(&output.mqtt)?;
        log::info!("mqtt sink -> {} topic={}", output.mqtt.broker, output.mqtt.topic);
        sinks.push(Box::new(sink));
    }

    if sinks.is_empty() {
        log::warn!("no output sinks enabled; payloads will only be logged");
    }
    Ok(sinks)
}
