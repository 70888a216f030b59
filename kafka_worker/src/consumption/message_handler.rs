use crate::consumer::Message;
use crate::error::ProcessingError;
use async_trait::async_trait;

/// Processes one delivered message.
///
/// `ProcessingError::Transient` is logged and consumption goes on,
/// `ProcessingError::Fatal` stops the loop. Plain `anyhow` errors converted
/// with `?` count as transient.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<(), ProcessingError>;
}
