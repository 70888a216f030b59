use crate::consumer::{ConsumerSettings, Message, PartitionOffset};
use crate::error::{BrokerError, PullError};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Answer sink handed to the authentication callback. Exactly one of the
/// methods is expected to be called per handshake.
pub trait HandshakeContext {
    fn set_token(&mut self, value: &str, expires_at: DateTime<Utc>);
    fn fail(&mut self, reason: &str);
}

/// Invoked by the broker client whenever it needs a bearer token.
pub type AuthCallback = Arc<dyn Fn(&mut dyn HandshakeContext) + Send + Sync>;

/// Records what the callback answered.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum HandshakeOutcome {
    #[default]
    Pending,
    Token {
        value: String,
        expires_at: DateTime<Utc>,
    },
    Failed(String),
}

impl HandshakeContext for HandshakeOutcome {
    fn set_token(&mut self, value: &str, expires_at: DateTime<Utc>) {
        *self = HandshakeOutcome::Token {
            value: value.to_owned(),
            expires_at,
        };
    }

    fn fail(&mut self, reason: &str) {
        *self = HandshakeOutcome::Failed(reason.to_owned());
    }
}

/// Partitioned-log client driven from the pull thread.
///
/// Dropping the client releases its network resources.
pub trait BrokerClient: Send {
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    /// Waits at most `timeout`. `None` means nothing arrived, which is not an
    /// error.
    fn poll(&mut self, timeout: Duration) -> Option<Result<Message, PullError>>;

    fn store_offset(&mut self, topic: &str, partition_offset: PartitionOffset)
        -> Result<(), PullError>;

    fn unsubscribe(&mut self);
}

pub trait BrokerClientFactory: Send + Sync {
    fn create(
        &self,
        settings: &ConsumerSettings,
        auth_callback: AuthCallback,
    ) -> Result<Box<dyn BrokerClient>, BrokerError>;
}
