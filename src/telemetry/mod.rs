use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration, Transport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub mod messages;

pub use messages::{DetectionEdge, DetectionEvent, StatusPayload, StatusUpdate};

use crate::alerts::{Alert, AlertSink, DetectionKind};
use crate::config::MqttConfig;
use crate::recovery::BackoffStrategy;
use crate::registry::{CameraPatch, CameraRegistry};
use crate::security::Credentials;

/// Topic namespace shared with the camera nodes.
pub const TOPIC_PREFIX: &str = "fleet";

const SUBSCRIBED_KINDS: [&str; 4] = ["status", "motion", "face", "object"];

const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Commands the command center can send to a camera node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Shutdown,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Broker bridge: one authenticated session that fuses per-camera status and
/// detection messages into the registry, raises alerts, and relays outbound
/// commands.
pub struct TelemetryBridge {
    client: AsyncClient,
    registry: Arc<CameraRegistry>,
    alerts: Arc<dyn AlertSink>,
}

impl TelemetryBridge {
    pub fn new(
        config: &MqttConfig,
        credentials: &Credentials,
        registry: Arc<CameraRegistry>,
        alerts: Arc<dyn AlertSink>,
    ) -> crate::Result<(Self, EventLoop)> {
        // Unique suffix so a restarted command center does not fight the old
        // session over the client id.
        let client_id = format!(
            "{}-{:04x}",
            config.client_id,
            rand::rng().random_range(0u32..=0xffff)
        );

        let mut options = MqttOptions::new(client_id, config.broker.as_str(), config.port);
        options.set_credentials(credentials.username.clone(), credentials.password.clone());
        options.set_keep_alive(Duration::from_secs(config.keep_alive_seconds));

        if config.tls {
            match &config.ca_file {
                Some(path) => {
                    let ca = std::fs::read(path).map_err(|e| {
                        crate::FleetError::BrokerError(format!(
                            "Failed to read CA file {:?}: {}",
                            path, e
                        ))
                    })?;
                    options.set_transport(Transport::Tls(TlsConfiguration::Simple {
                        ca,
                        alpn: None,
                        client_auth: None,
                    }));
                    info!("[MQTT] TLS encryption enabled");
                }
                None => {
                    warn!("[MQTT] TLS requested but no ca_file configured, using plain TCP");
                }
            }
        }

        let (client, eventloop) = AsyncClient::new(options, 16);

        Ok((
            Self {
                client,
                registry,
                alerts,
            },
            eventloop,
        ))
    }

    /// Poll loop. A failed (including initial) connect only delays the next
    /// attempt with bounded backoff; the bridge never takes the process down.
    pub async fn run(&self, mut eventloop: EventLoop, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BackoffStrategy::exponential(RECONNECT_BACKOFF_BASE, RECONNECT_BACKOFF_MAX)
            .with_jitter(true);

        info!("[MQTT] Client started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow_and_update() {
                        break;
                    }
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!("[MQTT] Connected with result code {:?}", ack.code);
                        backoff.reset();
                        self.subscribe_topics().await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_message(&publish.topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!("[MQTT] Connection error: {}, retrying in {:?}", e, delay);
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
            }
        }

        let _ = self.client.disconnect().await;
        info!("[MQTT] Client stopped");
    }

    async fn subscribe_topics(&self) {
        for kind in SUBSCRIBED_KINDS {
            let filter = format!("{}/+/{}", TOPIC_PREFIX, kind);
            match self.client.subscribe(filter.as_str(), QoS::AtMostOnce).await {
                Ok(()) => info!("[MQTT] Subscribed to {}", filter),
                Err(e) => warn!("[MQTT] Failed to subscribe to {}: {}", filter, e),
            }
        }
    }

    /// Dispatch one inbound message. Messages for cameras the registry does
    /// not know are dropped: the broker carries telemetry, not discovery.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) {
        let parts: Vec<&str> = topic.split('/').collect();
        let &[prefix, camera_id, kind] = parts.as_slice() else {
            return;
        };
        if prefix != TOPIC_PREFIX {
            return;
        }
        if !self.registry.contains(camera_id) {
            debug!("[MQTT] Message for unknown camera {}, dropped", camera_id);
            return;
        }

        if kind == "status" {
            self.handle_status(camera_id, payload);
        } else if let Some(kind) = messages::kind_from_topic(kind) {
            self.handle_detection(camera_id, kind, payload);
        }
    }

    fn handle_status(&self, camera_id: &str, payload: &[u8]) {
        match StatusPayload::parse(payload) {
            Some(StatusPayload::Structured(update)) => {
                let mut patch = CameraPatch::new().status(update.status.clone()).touch();
                if let Some(node_type) = update.node_type {
                    patch = patch.node_type(node_type);
                }
                if let Some(capabilities) = update.capabilities {
                    patch = patch.capabilities(capabilities);
                }
                self.registry.update(camera_id, patch);
                info!("[MQTT] {} status: {}", camera_id, update.status);
            }
            Some(StatusPayload::Legacy(status)) => {
                self.registry
                    .update(camera_id, CameraPatch::new().status(status.clone()).touch());
                info!("[MQTT] {} status: {}", camera_id, status);
            }
            None => {
                debug!("[MQTT] {} status payload not valid UTF-8, dropped", camera_id);
            }
        }
    }

    fn handle_detection(&self, camera_id: &str, kind: DetectionKind, payload: &[u8]) {
        let Some(event) = DetectionEvent::parse(payload) else {
            warn!("[MQTT] Malformed {} event from {}, dropped", kind, camera_id);
            return;
        };

        self.registry.push_event(camera_id, kind, event.raw.clone());

        match messages::classify(kind, &event.event) {
            Some(DetectionEdge::Start) => {
                self.registry.set_detection_active(camera_id, kind, true);
                info!("[MQTT] {} {} started", camera_id, kind);
                let alert = Alert::new(camera_id, kind, event.event)
                    .with_confidence(event.confidence)
                    .with_region(event.region);
                self.alerts.record(alert);
            }
            Some(DetectionEdge::End) => {
                self.registry.set_detection_active(camera_id, kind, false);
                info!("[MQTT] {} {} ended", camera_id, kind);
            }
            None => {}
        }
    }

    /// Publish a command to the camera's command topic, fire-and-forget.
    /// Failure is reported to the caller and not retried here.
    pub async fn send_command(&self, camera_id: &str, command: Command) -> bool {
        let topic = format!("{}/{}/command", TOPIC_PREFIX, camera_id);
        match self
            .client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, command.as_str().to_string())
            .await
        {
            Ok(()) => {
                info!("[MQTT] Sent command '{}' to {}", command.as_str(), camera_id);
                true
            }
            Err(e) => {
                warn!(
                    "[MQTT] Failed to send command '{}' to {}: {}",
                    command.as_str(),
                    camera_id,
                    e
                );
                false
            }
        }
    }
}
