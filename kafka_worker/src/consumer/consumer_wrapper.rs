use crate::consumer::{
    AuthCallback, BrokerClient, BrokerClientFactory, ConsumerSettings, Message, PartitionOffset,
    PayloadFormat,
};
use crate::contexts::MainClientContext;
use crate::error::{BrokerError, PullError};
use bytes::Bytes;
use chrono::DateTime;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::BorrowedMessage;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use rdkafka::Message as _;
use std::time::Duration;

/// [`BrokerClient`] backed by an rdkafka `BaseConsumer`.
///
/// `poll` serves the OAUTHBEARER refresh callback on the calling thread.
pub struct ConsumerWrapper {
    consumer: BaseConsumer<MainClientContext>,
    payload_format: PayloadFormat,
}

impl ConsumerWrapper {
    pub fn create_for_consuming(
        settings: &ConsumerSettings,
        auth_callback: AuthCallback,
    ) -> Result<Self, BrokerError> {
        let config = ClientConfig::try_from(settings)
            .map_err(|e| BrokerError::ClientCreation(format!("{e:#}")))?;

        let consumer: BaseConsumer<MainClientContext> = config
            .create_with_context(MainClientContext::new(auth_callback))
            .map_err(|e| BrokerError::ClientCreation(e.to_string()))?;

        Ok(Self {
            consumer,
            payload_format: settings.payload_format,
        })
    }
}

impl BrokerClient for ConsumerWrapper {
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Subscription {
                topic: topic.to_owned(),
                reason: e.to_string(),
            })
    }

    fn poll(&mut self, timeout: Duration) -> Option<Result<Message, PullError>> {
        let result = match self.consumer.poll(timeout)? {
            Ok(message) => to_message(&message, self.payload_format),
            Err(e) => Err(classify_kafka_error(e)),
        };

        Some(result)
    }

    fn store_offset(
        &mut self,
        topic: &str,
        partition_offset: PartitionOffset,
    ) -> Result<(), PullError> {
        self.consumer
            .store_offset(topic, *partition_offset.partition(), *partition_offset.offset())
            .map_err(classify_kafka_error)
    }

    fn unsubscribe(&mut self) {
        self.consumer.unsubscribe();
    }
}

/// Creates rdkafka-backed clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct KafkaBrokerClientFactory;

impl BrokerClientFactory for KafkaBrokerClientFactory {
    fn create(
        &self,
        settings: &ConsumerSettings,
        auth_callback: AuthCallback,
    ) -> Result<Box<dyn BrokerClient>, BrokerError> {
        let wrapper = ConsumerWrapper::create_for_consuming(settings, auth_callback)?;
        Ok(Box::new(wrapper))
    }
}

fn to_message(message: &BorrowedMessage<'_>, format: PayloadFormat) -> Result<Message, PullError> {
    let partition_offset = PartitionOffset::new(message.partition(), message.offset());
    let key = message.key();
    let value = message.payload();

    for part in [key, value].into_iter().flatten() {
        format
            .validate(part)
            .map_err(|reason| PullError::Deserialization {
                partition_offset,
                reason,
            })?;
    }

    let timestamp = message
        .timestamp()
        .to_millis()
        .and_then(DateTime::from_timestamp_millis);

    Ok(Message {
        partition_offset,
        timestamp,
        key: key.map(Bytes::copy_from_slice),
        value: value.map(Bytes::copy_from_slice),
    })
}

fn classify_kafka_error(error: KafkaError) -> PullError {
    match error.rdkafka_error_code() {
        Some(RDKafkaErrorCode::Authentication | RDKafkaErrorCode::SaslAuthenticationFailed) => {
            PullError::Authentication(error.to_string())
        }
        Some(RDKafkaErrorCode::Fatal) => PullError::Fatal(error.to_string()),
        _ => PullError::Transient(error.to_string()),
    }
}
