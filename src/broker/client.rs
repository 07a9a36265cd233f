// src/broker/client.rs
//! MQTT broker client used by both recording and playback
//!
//! Wraps a `rumqttc` [`AsyncClient`] and drives its [`EventLoop`] from a
//! background task once the broker has acknowledged the connection. Inbound
//! publishes are stamped on receipt and forwarded into an event channel;
//! outbound publishes go through the client's request queue.

use crate::recording::event_queue::{event_channel, EventReceiver, EventSender, MessageEvent};
use crate::replay::publisher::Publisher;
use crate::utils::config::BrokerConfig;
use crate::utils::errors::{BagError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Back-off between event loop errors
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long `disconnect` waits for the driver to flush the DISCONNECT packet
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Shortest keep-alive the client accepts
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

const CLIENT_ID_LEN: usize = 32;
const CLIENT_ID_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// State shared with the driver task
#[derive(Default)]
struct Shared {
    sender: Mutex<Option<EventSender>>,
    subscriptions: Mutex<Vec<String>>,

    /// Set while the event queue is full and messages are being dropped
    dropping: AtomicBool,
}

impl Shared {
    /// Hand an inbound message to the recorder without blocking the event loop
    ///
    /// A full queue drops the message; the event loop must keep polling or the
    /// broker stops receiving pings and acknowledgements.
    fn forward(&self, event: MessageEvent) {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return;
        };

        match sender.try_push(event) {
            Ok(()) => {
                if self.dropping.swap(false, Ordering::Relaxed) {
                    info!(
                        "Event queue has room again, {} messages dropped so far",
                        sender.stats().drop_count
                    );
                }
            }
            Err(event) if sender.is_closed() => {
                debug!("Event receiver closed, no longer forwarding {}", event.topic);
                self.sender.lock().take();
            }
            Err(event) => {
                if !self.dropping.swap(true, Ordering::Relaxed) {
                    warn!("Event queue full, dropping messages (first on {})", event.topic);
                }
            }
        }
    }
}

/// Connected broker client
pub struct BrokerClient {
    client: AsyncClient,
    qos: QoS,
    shared: Arc<Shared>,
    driver: JoinHandle<()>,
}

impl BrokerClient {
    /// Connect and wait for the broker's CONNACK
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let client_id = client_id(&config.client_id_prefix);
        let mut options = MqttOptions::new(&client_id, &config.host, config.port);
        options.set_keep_alive(config.keep_alive().max(MIN_KEEP_ALIVE));
        options.set_max_packet_size(config.max_packet_size, config.max_packet_size);
        if let Some((user, password)) = config.credentials() {
            options.set_credentials(user, password);
        }

        info!(
            "Connecting to {}:{} as {}",
            config.host, config.port, client_id
        );
        let (client, mut eventloop) = AsyncClient::new(options, config.channel_capacity);

        tokio::time::timeout(config.connect_timeout(), wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BagError::Connection(format!(
                    "no CONNACK from {}:{} within {:?}",
                    config.host,
                    config.port,
                    config.connect_timeout()
                ))
            })??;
        info!("Connected to {}:{}", config.host, config.port);

        let qos = qos_from_u8(config.qos);
        let shared = Arc::new(Shared::default());
        let driver = tokio::spawn(drive(eventloop, client.clone(), Arc::clone(&shared), qos));

        Ok(Self {
            client,
            qos,
            shared,
            driver,
        })
    }

    /// Subscribe to `filters` and return the channel inbound messages arrive on
    ///
    /// Only one subscription channel exists per client; a second call fails.
    /// The filters are re-sent automatically after a reconnect.
    pub async fn subscribe(&mut self, filters: &[String], queue_capacity: usize) -> Result<EventReceiver> {
        if self.shared.sender.lock().is_some() {
            return Err(BagError::Connection("client is already subscribed".to_string()));
        }

        let (tx, rx) = event_channel(queue_capacity);
        *self.shared.sender.lock() = Some(tx);
        *self.shared.subscriptions.lock() = filters.to_vec();

        for filter in filters {
            self.client
                .subscribe(filter.as_str(), self.qos)
                .await
                .map_err(|e| BagError::Connection(format!("subscribe to {} failed: {}", filter, e)))?;
            info!("Subscribed to {}", filter);
        }

        Ok(rx)
    }

    /// Queue a message for publishing, never retained
    pub async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish_bytes(topic, self.qos, false, payload)
            .await
            .map_err(|e| BagError::Publish(format!("{}: {}", topic, e)))
    }

    /// Send DISCONNECT and wait briefly for the driver task to finish
    pub async fn disconnect(self) {
        self.shared.sender.lock().take();

        if let Err(e) = self.client.disconnect().await {
            warn!("Failed to queue DISCONNECT: {}", e);
            self.driver.abort();
            return;
        }

        let abort = self.driver.abort_handle();
        match tokio::time::timeout(DISCONNECT_GRACE, self.driver).await {
            Ok(_) => info!("Disconnected from broker"),
            Err(_) => {
                warn!("Broker did not take DISCONNECT in time, dropping connection");
                abort.abort();
            }
        }
    }
}

impl Publisher for BrokerClient {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        BrokerClient::publish(self, topic, payload).await
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<()> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(BagError::Connection(e.to_string())),
        }
    }
}

/// Drive the event loop until DISCONNECT has gone out
async fn drive(mut eventloop: EventLoop, client: AsyncClient, shared: Arc<Shared>, qos: QoS) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                shared.forward(MessageEvent::new(publish.topic, publish.payload));
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Reconnected to broker");
                let filters = shared.subscriptions.lock().clone();
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), qos) {
                        warn!("Failed to resubscribe to {}: {}", filter, e);
                    }
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Broker connection error: {}, retrying", e);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }
    }
}

/// `<prefix>-` followed by random ASCII letters
pub fn client_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CLIENT_ID_LEN)
        .map(|_| CLIENT_ID_CHARS[rng.gen_range(0..CLIENT_ID_CHARS.len())] as char)
        .collect();
    format!("{}-{}", prefix, suffix)
}

/// Map a configured QoS level; anything above 1 is exactly-once
pub fn qos_from_u8(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}
