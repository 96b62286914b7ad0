//! rumqttc-backed bus client.
//!
//! A background driver polls the event loop, forwards inbound publishes, and keeps
//! reconnecting after the first successful connect. Only that first connect is fatal.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use oee_core::config::BrokerConfig;

use crate::publisher::BusClient;
use crate::types::{BusError, BusMessage, OutboundMessage};

const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

pub struct MqttBus {
    client: AsyncClient,
    driver: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl MqttBus {
    /// Connect, wait for the broker's CONNACK and subscribe to `filters`.
    ///
    /// Inbound publishes on those filters arrive on the returned receiver. The
    /// connection lives until [`MqttBus::disconnect`].
    pub async fn connect(
        cfg: &BrokerConfig,
        filters: &[&str],
    ) -> Result<(Self, mpsc::Receiver<BusMessage>), BusError> {
        let mut opts = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        opts.set_keep_alive(cfg.keep_alive);

        let (client, mut event_loop) = AsyncClient::new(opts, cfg.channel_capacity);
        wait_for_connack(&mut event_loop).await?;
        info!(host = %cfg.host, port = cfg.port, client_id = %cfg.client_id, "connected to MQTT broker");

        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        let filters: Vec<String> = filters.iter().map(|f| f.to_string()).collect();
        let stop = CancellationToken::new();
        let driver = tokio::spawn(drive(
            event_loop,
            client.clone(),
            filters.clone(),
            tx,
            cfg.reconnect_delay,
            stop.clone(),
        ));

        for filter in &filters {
            client.subscribe(filter.as_str(), QoS::AtLeastOnce).await?;
            info!(%filter, "subscribed");
        }

        let bus = Self { client, driver: Mutex::new(Some(driver)), stop };
        Ok((bus, rx))
    }

    /// Send DISCONNECT and give the driver a short grace period to flush it.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not queued: {e}");
        }
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            if tokio::time::timeout(DISCONNECT_GRACE, driver).await.is_err() {
                warn!("MQTT driver did not stop in time");
            }
        }
        self.stop.cancel();
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), BusError> {
    loop {
        if let Event::Incoming(Packet::ConnAck(_)) = event_loop.poll().await? {
            return Ok(());
        }
    }
}

async fn drive(
    mut event_loop: EventLoop,
    client: AsyncClient,
    filters: Vec<String>,
    tx: mpsc::Sender<BusMessage>,
    reconnect_delay: Duration,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            ev = event_loop.poll() => match ev {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    // Publish-only connections never read their inbox.
                    if tx.is_closed() {
                        continue;
                    }
                    let msg = BusMessage { topic: p.topic, payload: p.payload.to_vec() };
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        res = tx.send(msg) => {
                            if res.is_err() {
                                debug!("inbound receiver dropped");
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(session_present = ack.session_present, "reconnected to MQTT broker");
                    if !ack.session_present {
                        resubscribe(&client, &filters);
                    }
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("disconnected from MQTT broker");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {e} (retrying)");
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(reconnect_delay) => {}
                    }
                }
            }
        }
    }
}

fn resubscribe(client: &AsyncClient, filters: &[String]) {
    for filter in filters {
        // Only the event loop drains the request queue, so this must not wait on it.
        if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
            warn!(%filter, "failed to resubscribe: {e}");
        }
    }
}

#[async_trait]
impl BusClient for MqttBus {
    /// Completes once the request is queued in the client, not when the broker's PUBACK
    /// arrives. An error here means the request could not be queued. Anything that goes
    /// wrong after queueing, including a dropped connection or a broker-side rejection,
    /// only shows up in the driver's error log. The client state replays unacknowledged
    /// QoS 1 packets after a reconnect.
    async fn publish(&self, msg: OutboundMessage) -> Result<(), BusError> {
        self.client
            .publish(msg.topic, msg.qos, msg.retain, msg.payload)
            .await?;
        Ok(())
    }
}
