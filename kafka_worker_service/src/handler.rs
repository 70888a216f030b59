use async_trait::async_trait;
use kafka_worker::consumer::Message;
use kafka_worker::consumption::MessageHandler;
use kafka_worker::error::ProcessingError;
use tracing::info;

/// Logs every message. Payloads are shown lossily decoded as UTF-8.
pub struct LoggingMessageHandler;

#[async_trait]
impl MessageHandler for LoggingMessageHandler {
    async fn handle(&self, message: &Message) -> Result<(), ProcessingError> {
        let key = message.key.as_deref().map(String::from_utf8_lossy);
        let value = message.value.as_deref().map(String::from_utf8_lossy);

        info!(
            partition = message.partition(),
            offset = message.offset(),
            timestamp = ?message.timestamp,
            ?key,
            ?value,
            "Message received"
        );

        Ok(())
    }
}
