//! MQTT session and the pose-report publisher.
//!
//! The session owns a `rumqttc` client plus a driver thread that pumps the
//! connection. Operation starts only after the broker has acknowledged the
//! connection. Losing the connection afterwards is reported once through
//! [`SessionEvents::on_lost`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use tagpose_core::MarkerReport;

pub const DEFAULT_PORT: u16 = 1883;

const DRIVER_JOIN_WAIT: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    #[error("invalid broker address {0:?}")]
    InvalidAddress(String),
    #[error("invalid client id {0:?}")]
    InvalidClientId(String),
    #[error("cannot connect to broker at {address}: {reason}")]
    Connect { address: BrokerAddress, reason: String },
    #[error("broker at {address} did not acknowledge within {after:?}")]
    Timeout {
        address: BrokerAddress,
        after: Duration,
    },
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
    #[error("cannot spawn connection driver: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
}

/// `host` or `host:port`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for BrokerAddress {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || BrokerError::InvalidAddress(s.to_string());
        let (host, port) = match s.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (s, DEFAULT_PORT),
        };
        if host.is_empty() || host.contains(char::is_whitespace) || port == 0 {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Connection parameters shared by both processes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// How long to wait for the broker's CONNACK.
    pub connect_timeout_ms: u64,
    /// Defaults to the client id.
    pub username: Option<String>,
    /// Defaults to the client id.
    pub password: Option<String>,
    pub request_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keep_alive_secs: 20,
            clean_session: true,
            connect_timeout_ms: 5000,
            username: None,
            password: None,
            request_capacity: 16,
        }
    }
}

impl SessionSettings {
    pub fn mqtt_options(
        &self,
        address: &BrokerAddress,
        client_id: &str,
    ) -> Result<MqttOptions, BrokerError> {
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(BrokerError::InvalidClientId(client_id.to_string()));
        }
        let mut opts = MqttOptions::new(client_id, address.host.clone(), address.port);
        opts.set_keep_alive(Duration::from_secs(self.keep_alive_secs.max(1)));
        opts.set_clean_session(self.clean_session);
        let username = self.username.as_deref().unwrap_or(client_id);
        let password = self.password.as_deref().unwrap_or(client_id);
        opts.set_credentials(username, password);
        Ok(opts)
    }
}

type MessageCallback = Box<dyn FnMut(&str, &[u8]) + Send>;
type LostCallback = Box<dyn FnOnce() + Send>;

/// Callbacks run on the connection driver thread.
#[derive(Default)]
pub struct SessionEvents {
    on_message: Option<MessageCallback>,
    on_lost: Option<LostCallback>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incoming publish: topic and raw payload.
    pub fn on_message(mut self, f: impl FnMut(&str, &[u8]) + Send + 'static) -> Self {
        self.on_message = Some(Box::new(f));
        self
    }

    /// The established connection went away. Not called for a local
    /// disconnect.
    pub fn on_lost(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_lost = Some(Box::new(f));
        self
    }
}

pub struct MqttSession {
    client: Client,
    address: BrokerAddress,
    closing: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl MqttSession {
    /// Connect and wait for the broker's acknowledgement.
    pub fn connect(
        address: &BrokerAddress,
        client_id: &str,
        settings: &SessionSettings,
        events: SessionEvents,
    ) -> Result<Self, BrokerError> {
        let opts = settings.mqtt_options(address, client_id)?;
        let (client, connection) = Client::new(opts, settings.request_capacity.max(1));
        let closing = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let driver = {
            let closing = Arc::clone(&closing);
            let address = address.clone();
            thread::Builder::new()
                .name("mqtt".into())
                .spawn(move || drive(connection, address, closing, ready_tx, events))
                .map_err(BrokerError::Spawn)?
        };

        let after = Duration::from_millis(settings.connect_timeout_ms);
        let outcome = match ready_rx.recv_timeout(after) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(BrokerError::Connect {
                address: address.clone(),
                reason,
            }),
            Err(RecvTimeoutError::Timeout) => Err(BrokerError::Timeout {
                address: address.clone(),
                after,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(BrokerError::Connect {
                address: address.clone(),
                reason: "connection driver exited".into(),
            }),
        };

        let mut session = Self {
            client,
            address: address.clone(),
            closing,
            driver: Some(driver),
        };
        match outcome {
            Ok(()) => {
                log::info!("connected to broker {address} as {client_id}");
                Ok(session)
            }
            Err(e) => {
                session.disconnect();
                Err(e)
            }
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn address(&self) -> &BrokerAddress {
        &self.address
    }

    pub fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        self.client.subscribe(topic, qos)?;
        log::info!("subscribed to {topic} ({qos:?})");
        Ok(())
    }

    /// Disconnect and give the driver a bounded time to finish.
    pub fn disconnect(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.try_disconnect() {
            log::debug!("disconnect request not sent: {e}");
        }

        let deadline = Instant::now() + DRIVER_JOIN_WAIT;
        while !driver.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if driver.is_finished() {
            let _ = driver.join();
        } else {
            log::debug!("mqtt driver still running after disconnect, detaching");
        }
        log::info!("disconnected from broker {}", self.address);
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn drive(
    mut connection: Connection,
    address: BrokerAddress,
    closing: Arc<AtomicBool>,
    ready: Sender<Result<(), String>>,
    mut events: SessionEvents,
) {
    let mut connected = false;
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    let _ = ready.send(Ok(()));
                } else {
                    let _ = ready.send(Err(format!("connection refused: {:?}", ack.code)));
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log::trace!("message on {} ({} bytes)", publish.topic, publish.payload.len());
                if let Some(on_message) = events.on_message.as_mut() {
                    on_message(&publish.topic, &publish.payload);
                }
            }
            Ok(_) => {}
            Err(e) => {
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                if !connected {
                    let _ = ready.send(Err(e.to_string()));
                } else {
                    log::warn!("lost connection to broker {address}: {e}");
                    if let Some(on_lost) = events.on_lost.take() {
                        on_lost();
                    }
                }
                break;
            }
        }
        if closing.load(Ordering::SeqCst) && !connected {
            break;
        }
    }
    log::debug!("mqtt driver for {address} finished");
}

/// Destination for per-frame reports.
pub trait ReportPublisher: Send {
    fn publish(&mut self, report: &MarkerReport) -> Result<(), PublishError>;
}

/// Publishes reports as JSON on one topic without blocking the caller.
pub struct MqttPublisher {
    client: Client,
    topic: String,
}

impl MqttPublisher {
    pub fn new(client: Client, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Wire form of a report: `{"id":..,"dist":..,"yaw":..,"phi":..}`.
pub fn encode_report(report: &MarkerReport) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(report)
}

impl ReportPublisher for MqttPublisher {
    fn publish(&mut self, report: &MarkerReport) -> Result<(), PublishError> {
        let payload = encode_report(report)?;
        self.client
            .try_publish(self.topic.as_str(), QoS::AtMostOnce, false, payload)?;
        Ok(())
    }
}
