//! MQTT sink: publishes the JSON payload to one topic at QoS 1.
//!
//! The rumqttc connection is driven on a helper thread. It keeps polling
//! after errors so the client reconnects on its own; `close` stops it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Transport;

use crate::config::{split_host_port, MqttSettings};
use crate::error::TransportError;
use crate::payload::Payload;

use super::{SendOutcome, Sink};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// `host:port` with an optional `mqtt://`, `tcp://`, `mqtts://` or `ssl://`
/// scheme. The TLS schemes switch the transport to rustls.
pub fn parse_mqtt_endpoint(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

pub struct MqttSink {
    client: Client,
    topic: String,
    running: Arc<AtomicBool>,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttSink {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let endpoint = parse_mqtt_endpoint(&settings.broker)?;
        let mut options = MqttOptions::new(&settings.client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        if let Some(user) = settings.username.as_deref() {
            options.set_credentials(user, settings.password.clone().unwrap_or_default());
        }
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_connection_loop(connection, running.clone());
        log::info!(
            "mqtt client started for {}:{} (TLS: {}, auth: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls,
            settings.username.is_some()
        );

        Ok(Self {
            client,
            topic: settings.topic.clone(),
            running,
            connection_handle: Some(handle),
        })
    }
}

fn spawn_connection_loop(mut connection: Connection, running: Arc<AtomicBool>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            if !running.load(Ordering::SeqCst) {
                break;
            }
            match event {
                Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    log::warn!("MQTT connection error: {}", e);
                    if !wait_backoff(&running) {
                        break;
                    }
                }
            }
        }
    })
}

/// Sleep out the reconnect backoff in short slices. Returns false as soon as
/// the sink is closing.
fn wait_backoff(running: &AtomicBool) -> bool {
    let deadline = Instant::now() + RECONNECT_BACKOFF;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(BACKOFF_SLICE.min(deadline - now));
    }
    false
}

impl Sink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn send(&mut self, payload: &Payload) -> Result<SendOutcome, TransportError> {
        let json = payload.to_json()?;
        self.client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, json.into_bytes())
            .map_err(|e| TransportError::Publish {
                topic: self.topic.clone(),
                message: e.to_string(),
            })?;
        Ok(SendOutcome::Delivered)
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("mqtt disconnect: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}
