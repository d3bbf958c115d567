use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, Publish, QoS,
};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::MqttConfig;
use crate::decode;
use crate::sinks::MySqlUsageSink;

/// Lifecycle of the single logical broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorState {
    Idle,
    Connecting,
    Connected,
    Terminated,
}

#[derive(thiserror::Error, Debug)]
enum AttemptError {
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error("broker refused connection: {0:?}")]
    Refused(ConnectReturnCode),
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] rumqttc::ClientError),
}

#[derive(thiserror::Error, Debug)]
#[error("mqtt broker unreachable after {attempts} connection attempts")]
pub struct RetriesExhausted {
    pub attempts: u32,
}

enum ConnectOutcome {
    Connected(AsyncClient, EventLoop),
    ShutdownRequested,
}

enum SessionEnd {
    Shutdown,
    ConnectionLost,
}

/// Owns the broker connection for the process lifetime and drives the
/// ingestion loop: receive, decode, persist, strictly one message at a time
/// in delivery order.
///
/// Connection establishment retries with a constant delay up to a bounded
/// attempt count; exhausting the bound is fatal to the process. A connection
/// lost after it was established re-enters the same bounded retry sequence.
/// Shutdown is cooperative: the signal is observed between iterations, so an
/// in-flight insert always completes first.
pub struct MqttConnector {
    cfg: MqttConfig,
    sink: MySqlUsageSink,
    shutdown: watch::Receiver<bool>,
    state: ConnectorState,
}

impl MqttConnector {
    pub fn new(cfg: MqttConfig, sink: MySqlUsageSink, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            cfg,
            sink,
            shutdown,
            state: ConnectorState::Idle,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let outcome = match self.connect_with_retry().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.set_state(ConnectorState::Terminated);
                    return Err(e.into());
                }
            };

            let (client, eventloop) = match outcome {
                ConnectOutcome::Connected(client, eventloop) => (client, eventloop),
                ConnectOutcome::ShutdownRequested => {
                    self.set_state(ConnectorState::Terminated);
                    return Ok(());
                }
            };

            match self.receive_loop(client, eventloop).await {
                SessionEnd::Shutdown => {
                    self.set_state(ConnectorState::Terminated);
                    return Ok(());
                }
                SessionEnd::ConnectionLost => {
                    // Lost after connect: go back through the bounded retry
                    // sequence rather than spinning forever.
                    self.set_state(ConnectorState::Idle);
                }
            }
        }
    }

    fn set_state(&mut self, next: ConnectorState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "connector state change");
            self.state = next;
        }
    }

    fn client_id(&self) -> String {
        format!("{}-{}", self.cfg.client_id_prefix, std::process::id())
    }

    async fn connect_with_retry(&mut self) -> Result<ConnectOutcome, RetriesExhausted> {
        let max_attempts = self.cfg.max_connect_retries.max(1);
        let delay = Duration::from_secs(self.cfg.retry_delay_secs);

        for attempt in 1..=max_attempts {
            self.set_state(ConnectorState::Connecting);
            match self.try_connect().await {
                Ok((client, eventloop)) => {
                    self.set_state(ConnectorState::Connected);
                    return Ok(ConnectOutcome::Connected(client, eventloop));
                }
                Err(e) => {
                    metrics::counter!("mqtt_connect_retries_total").increment(1);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        "mqtt connection attempt failed"
                    );
                    self.set_state(ConnectorState::Idle);
                }
            }

            if attempt < max_attempts {
                // Constant backoff, interruptible by shutdown so a pending
                // retry never blocks process exit.
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.changed() => {
                        return Ok(ConnectOutcome::ShutdownRequested);
                    }
                }
            }
        }

        Err(RetriesExhausted {
            attempts: max_attempts,
        })
    }

    /// One connection attempt: TCP + MQTT handshake within the configured
    /// timeout, then subscribe to the telemetry topic.
    ///
    /// QoS 0 (at-most-once) is the deliberate subscription level: delivery
    /// guarantees are whatever the broker gives at that level.
    async fn try_connect(&self) -> Result<(AsyncClient, EventLoop), AttemptError> {
        let mut opts = MqttOptions::new(self.client_id(), &self.cfg.host, self.cfg.port);
        opts.set_keep_alive(Duration::from_secs(self.cfg.keep_alive_secs));

        let (client, mut eventloop) = AsyncClient::new(opts, 16);

        let deadline = Instant::now() + Duration::from_secs(self.cfg.connect_timeout_secs);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let event = tokio::time::timeout(remaining, eventloop.poll())
                .await
                .map_err(|_| AttemptError::HandshakeTimeout)??;

            match event {
                Event::Incoming(Packet::ConnAck(ack)) => {
                    if ack.code == ConnectReturnCode::Success {
                        break;
                    }
                    return Err(AttemptError::Refused(ack.code));
                }
                _ => {}
            }
        }

        client
            .subscribe(self.cfg.data_topic.as_str(), QoS::AtMostOnce)
            .await?;
        tracing::info!(
            host = %self.cfg.host,
            port = self.cfg.port,
            topic = %self.cfg.data_topic,
            "connected to mqtt broker and subscribed"
        );
        Ok((client, eventloop))
    }

    async fn receive_loop(&mut self, client: AsyncClient, mut eventloop: EventLoop) -> SessionEnd {
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow() {
                self.disconnect(&client, &mut eventloop).await;
                return SessionEnd::Shutdown;
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    self.disconnect(&client, &mut eventloop).await;
                    return SessionEnd::Shutdown;
                }
                polled = eventloop.poll() => match polled {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        self.handle_publish(&publish).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "mqtt connection lost");
                        return SessionEnd::ConnectionLost;
                    }
                }
            }
        }
    }

    /// Graceful close: queue the DISCONNECT and drive the event loop until it
    /// is flushed, so the broker sees a clean session end instead of a
    /// dropped socket.
    async fn disconnect(&self, client: &AsyncClient, eventloop: &mut EventLoop) {
        tracing::info!("disconnecting from mqtt broker");
        if let Err(e) = client.disconnect().await {
            tracing::warn!(error = %e, "failed to queue mqtt disconnect");
            return;
        }
        while let Ok(event) = eventloop.poll().await {
            if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                break;
            }
        }
    }

    /// Per-message path. Any failure here is contained to this message; the
    /// receive loop always moves on to the next one.
    async fn handle_publish(&self, publish: &Publish) {
        metrics::counter!("mqtt_messages_received_total").increment(1);

        if publish.topic != self.cfg.data_topic {
            tracing::trace!(topic = %publish.topic, "ignoring message on unexpected topic");
            return;
        }

        match decode::decode(&publish.payload) {
            Ok(event) => {
                if let Err(e) = self.sink.persist(&event).await {
                    metrics::counter!("mysql_sink_errors_total").increment(1);
                    tracing::error!(
                        error = %e,
                        client_id = %event.client_id,
                        "failed to persist usage event, message dropped"
                    );
                }
            }
            Err(reason) => {
                metrics::counter!("usage_events_rejected_total", "reason" => reason.kind())
                    .increment(1);
                tracing::warn!(
                    reason = %reason,
                    payload = %String::from_utf8_lossy(&publish.payload),
                    "rejected telemetry payload"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};

    fn unreachable_broker_cfg(max_retries: u32) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            // Reserved port nothing listens on, so every attempt is refused.
            port: 1,
            client_id_prefix: "test-logger".to_string(),
            data_topic: "sleep_sense/data".to_string(),
            timer_topic: "/phone/timer_setting".to_string(),
            keep_alive_secs: 60,
            max_connect_retries: max_retries,
            retry_delay_secs: 0,
            connect_timeout_secs: 1,
        }
    }

    fn lazy_sink() -> MySqlUsageSink {
        // connect_lazy never touches the network; the sink is only carried,
        // never used, when connection attempts fail.
        let opts = MySqlConnectOptions::new().host("localhost");
        MySqlUsageSink::new(MySqlPoolOptions::new().connect_lazy_with(opts))
    }

    #[tokio::test]
    async fn connect_retry_exhausts_after_configured_attempts() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut connector = MqttConnector::new(unreachable_broker_cfg(3), lazy_sink(), shutdown_rx);

        match connector.connect_with_retry().await {
            Err(RetriesExhausted { attempts }) => assert_eq!(attempts, 3),
            Ok(_) => panic!("expected connection attempts to exhaust"),
        }
        assert_eq!(connector.state, ConnectorState::Idle);
    }

    #[tokio::test]
    async fn shutdown_during_retry_wait_stops_connecting() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut cfg = unreachable_broker_cfg(5);
        // Long enough that the test would time out if the wait ignored the
        // shutdown signal.
        cfg.retry_delay_secs = 60;
        let mut connector = MqttConnector::new(cfg, lazy_sink(), shutdown_rx);

        shutdown_tx.send(true).unwrap();
        match connector.connect_with_retry().await {
            Ok(ConnectOutcome::ShutdownRequested) => {}
            Ok(ConnectOutcome::Connected(..)) => panic!("nothing to connect to"),
            Err(e) => panic!("expected shutdown, got {e}"),
        }
    }
}
