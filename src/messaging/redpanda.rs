use async_trait::async_trait;
use rdkafka::{
    config::ClientConfig,
    error::KafkaError,
    message::{Header, OwnedHeaders},
    producer::{FutureProducer, FutureRecord},
    types::RDKafkaErrorCode,
    util::Timeout,
};
use std::time::Duration;

use super::{EventBus, PublishError};
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitSnapshot};

pub struct RedpandaClient {
    producer: FutureProducer,
    circuit_breaker: CircuitBreaker,
    ack_timeout: Duration,
}

impl RedpandaClient {
    pub fn new(brokers: &str, ack_timeout: Duration) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", ack_timeout.as_millis().to_string())
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create()?;

        tracing::info!(brokers = %brokers, "Kafka producer created (idempotent, acks=all)");

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            ack_timeout,
        })
    }
}

/// Errors that say the broker itself is unreachable or stalled
fn broker_wide(err: &KafkaError) -> bool {
    !matches!(
        err,
        KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessage
        )
    )
}

#[async_trait]
impl EventBus for RedpandaClient {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        event_type: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        let result = self
            .circuit_breaker
            .call(
                async {
                    let headers = OwnedHeaders::new().insert(Header {
                        key: "event_type",
                        value: Some(event_type),
                    });
                    let record = FutureRecord::to(topic)
                        .key(key)
                        .payload(payload)
                        .headers(headers);

                    self.producer
                        .send(record, Timeout::After(self.ack_timeout))
                        .await
                        .map_err(|(e, _)| e)
                },
                broker_wide,
            )
            .await;

        match result {
            Ok(_) => {
                tracing::debug!(
                    topic = %topic,
                    key = %key,
                    event_type = %event_type,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::Open { retry_in }) => {
                tracing::debug!(
                    topic = %topic,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "Circuit breaker open, not sending"
                );
                Err(PublishError::CircuitOpen)
            }
            Err(CircuitBreakerError::Failed(e)) => {
                tracing::error!(
                    error = %e,
                    topic = %topic,
                    key = %key,
                    "Failed to publish to Redpanda"
                );
                match e {
                    KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
                        Err(PublishError::Timeout(self.ack_timeout))
                    }
                    other => Err(PublishError::Broker(other.to_string())),
                }
            }
        }
    }

    async fn circuit_state(&self) -> Option<CircuitSnapshot> {
        Some(self.circuit_breaker.snapshot())
    }
}
