//! MQTT side of the unit: temperature samples in, sampling interval out.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::config::BusConfig;
use crate::shutdown::Shutdown;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid temperature payload {0:?}")]
    InvalidPayload(String),
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Parse a temperature sample published as decimal text.
pub fn parse_temperature(payload: &[u8]) -> Result<f64, BusError> {
    let text = String::from_utf8_lossy(payload);
    let value: f64 = text
        .trim()
        .parse()
        .map_err(|_| BusError::InvalidPayload(text.to_string()))?;
    if !value.is_finite() {
        return Err(BusError::InvalidPayload(text.to_string()));
    }
    Ok(value)
}

/// Sampling interval as the peer expects it: milliseconds in decimal text.
pub fn encode_interval(interval: Duration) -> String {
    interval.as_millis().to_string()
}

pub fn mqtt_options(config: &BusConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    options
}

pub fn connect(config: &BusConfig) -> (AsyncClient, EventLoop) {
    AsyncClient::new(mqtt_options(config), 10)
}

/// Drive the event loop and forward temperature samples until shutdown.
/// Subscribes again after every (re)connection.
pub async fn run_subscriber(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    retry: Duration,
    samples: mpsc::Sender<f64>,
    shutdown: Shutdown,
) {
    tracing::info!("MQTT subscriber started for {}", topic);
    loop {
        let event = tokio::select! {
            _ = shutdown.wait() => break,
            event = eventloop.poll() => event,
        };
        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!("Connected to MQTT broker");
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                    tracing::error!("Failed to subscribe to {}: {}", topic, e);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == topic => {
                match parse_temperature(&publish.payload) {
                    Ok(temp) => {
                        tracing::trace!("Temperature sample {:.2}", temp);
                        if samples.send(temp).await.is_err() {
                            tracing::info!("Coordinator gone, stopping MQTT subscriber");
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping sample: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("MQTT connection error: {}", e);
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = sleep(retry) => {}
                }
            }
        }
    }
    tracing::info!("MQTT subscriber stopped");
}

/// Publish every sampling-interval update until shutdown or until the
/// coordinator drops its sender.
pub async fn run_publisher(
    client: AsyncClient,
    topic: String,
    mut intervals: mpsc::UnboundedReceiver<Duration>,
    shutdown: Shutdown,
) {
    tracing::info!("MQTT publisher started for {}", topic);
    loop {
        let interval = tokio::select! {
            _ = shutdown.wait() => break,
            interval = intervals.recv() => match interval {
                Some(interval) => interval,
                None => break,
            },
        };
        let payload = encode_interval(interval);
        tracing::debug!("Publishing sampling interval {} ms", payload);
        if let Err(e) = client
            .publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
            .await
            .map_err(BusError::from)
        {
            tracing::error!("Failed to publish interval: {}", e);
        }
    }
    tracing::info!("MQTT publisher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature(b"23.5").unwrap(), 23.5);
        assert_eq!(parse_temperature(b" 71\n").unwrap(), 71.0);
        assert_eq!(parse_temperature(b"-4.25").unwrap(), -4.25);
    }

    #[test]
    fn test_parse_temperature_rejects_garbage() {
        assert!(matches!(parse_temperature(b"hot"), Err(BusError::InvalidPayload(_))));
        assert!(parse_temperature(b"").is_err());
        assert!(parse_temperature(b"NaN").is_err());
        assert!(parse_temperature(b"inf").is_err());
    }

    #[test]
    fn test_encode_interval_in_millis() {
        assert_eq!(encode_interval(Duration::from_millis(100)), "100");
        assert_eq!(encode_interval(Duration::from_secs(1)), "1000");
    }

    #[test]
    fn test_options_from_config() {
        let config = BusConfig::default();
        let options = mqtt_options(&config);
        assert_eq!(options.client_id(), config.client_id);
        assert_eq!(options.keep_alive(), Duration::from_secs(config.keep_alive_secs));
    }
}
